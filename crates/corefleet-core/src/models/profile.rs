//! Node profiles and core type selectors.
//!
//! Profiles are owned by the caller (loaded from wherever the front-end keeps
//! them); the orchestrator only reads them.

use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};

/// Proxy core implementation a node runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreType {
    #[default]
    Xray,
    V2fly,
    #[serde(alias = "sing-box")]
    SingBox,
    Mihomo,
    Hysteria2,
    Tuic,
    Naiveproxy,
    Juicity,
}

impl CoreType {
    pub const ALL: [CoreType; 8] = [
        CoreType::Xray,
        CoreType::V2fly,
        CoreType::SingBox,
        CoreType::Mihomo,
        CoreType::Hysteria2,
        CoreType::Tuic,
        CoreType::Naiveproxy,
        CoreType::Juicity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CoreType::Xray => "xray",
            CoreType::V2fly => "v2fly",
            CoreType::SingBox => "sing_box",
            CoreType::Mihomo => "mihomo",
            CoreType::Hysteria2 => "hysteria2",
            CoreType::Tuic => "tuic",
            CoreType::Naiveproxy => "naiveproxy",
            CoreType::Juicity => "juicity",
        }
    }

}

impl std::str::FromStr for CoreType {
    type Err = FleetError;

    /// Case-insensitive; `-` and `_` are interchangeable.
    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.to_lowercase().replace('-', "_");
        CoreType::ALL
            .into_iter()
            .find(|core| core.as_str() == lowered)
            .ok_or_else(|| FleetError::Validation {
                field: "core_type".to_string(),
                message: format!("Unknown core type: {}", s),
            })
    }
}

impl std::fmt::Display for CoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user-defined proxy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeProfile {
    /// Unique identity; must be non-empty.
    pub index_id: String,
    /// Requested local port. Unset, zero or negative means auto-assign.
    #[serde(default)]
    pub custom_local_port: Option<i32>,
    #[serde(default)]
    pub remarks: String,
    /// Remote server address, only used for display.
    #[serde(default)]
    pub address: String,
    /// Remote server port, only used for display.
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub core_type: CoreType,
    /// Outbound definition copied verbatim into the generated config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound: Option<serde_json::Value>,
}

impl NodeProfile {
    pub fn new(index_id: impl Into<String>, core_type: CoreType) -> Self {
        Self {
            index_id: index_id.into(),
            custom_local_port: None,
            remarks: String::new(),
            address: String::new(),
            port: 0,
            core_type,
            outbound: None,
        }
    }

    pub fn with_custom_local_port(mut self, port: i32) -> Self {
        self.custom_local_port = Some(port);
        self
    }

    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = remarks.into();
        self
    }

    pub fn with_server(mut self, address: impl Into<String>, port: u16) -> Self {
        self.address = address.into();
        self.port = port;
        self
    }

    pub fn with_outbound(mut self, outbound: serde_json::Value) -> Self {
        self.outbound = Some(outbound);
        self
    }

    /// Human-readable one-liner for messages.
    pub fn summary(&self) -> String {
        let name = if self.remarks.is_empty() {
            self.index_id.as_str()
        } else {
            self.remarks.as_str()
        };

        if self.address.is_empty() {
            format!("[{}] {}", self.core_type, name)
        } else {
            format!("[{}] {}({}:{})", self.core_type, name, self.address, self.port)
        }
    }

    /// The explicitly requested port, if any.
    ///
    /// Non-positive values mean "not set"; values beyond the TCP range are rejected.
    pub fn requested_port(&self) -> Result<Option<u16>> {
        match self.custom_local_port {
            None => Ok(None),
            Some(port) if port <= 0 => Ok(None),
            Some(port) => u16::try_from(port).map(Some).map_err(|_| FleetError::Validation {
                field: "custom_local_port".to_string(),
                message: format!("{} is not a valid TCP port", port),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_type_roundtrip() {
        for core in CoreType::ALL {
            assert_eq!(core.as_str().parse::<CoreType>().unwrap(), core);
        }
        assert_eq!("Sing-Box".parse::<CoreType>().unwrap(), CoreType::SingBox);
        assert!("unknown".parse::<CoreType>().is_err());
    }

    #[test]
    fn test_requested_port() {
        let profile = NodeProfile::new("a", CoreType::Xray);
        assert_eq!(profile.requested_port().unwrap(), None);

        let profile = profile.with_custom_local_port(0);
        assert_eq!(profile.requested_port().unwrap(), None);

        let profile = profile.with_custom_local_port(-5);
        assert_eq!(profile.requested_port().unwrap(), None);

        let profile = profile.with_custom_local_port(1180);
        assert_eq!(profile.requested_port().unwrap(), Some(1180));

        let profile = profile.with_custom_local_port(70000);
        assert!(matches!(
            profile.requested_port(),
            Err(FleetError::Validation { .. })
        ));
    }

    #[test]
    fn test_summary() {
        let profile = NodeProfile::new("id-1", CoreType::SingBox);
        assert_eq!(profile.summary(), "[sing_box] id-1");

        let profile = profile
            .with_remarks("Tokyo")
            .with_server("jp.example.com", 443);
        assert_eq!(profile.summary(), "[sing_box] Tokyo(jp.example.com:443)");
    }

    #[test]
    fn test_profile_deserializes_with_defaults() {
        let profile: NodeProfile =
            serde_json::from_str(r#"{ "index_id": "abc", "core_type": "mihomo" }"#).unwrap();
        assert_eq!(profile.index_id, "abc");
        assert_eq!(profile.core_type, CoreType::Mihomo);
        assert!(profile.custom_local_port.is_none());
        assert!(profile.outbound.is_none());
    }
}
