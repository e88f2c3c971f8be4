//! Per-node core config generation.
//!
//! Each node gets a minimal config: its inbounds derived from the primary
//! inbound definition, the profile's outbound, and no routing rules.

use crate::config::{FleetConfig, InboundSettings};
use crate::error::{FleetError, Result};
use crate::models::NodeProfile;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use tracing::debug;

/// Listen address for loopback-only inbounds.
const LOOPBACK_LISTEN: &str = "127.0.0.1";
/// Listen address when LAN connections are allowed.
const LAN_LISTEN: &str = "0.0.0.0";

/// Outcome of a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResult {
    pub success: bool,
    pub message: String,
}

impl GenerateResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Writes the config a node's core is started with.
#[async_trait]
pub trait ConfigGenerator: Send + Sync {
    async fn generate_minimal_config(
        &self,
        config: &FleetConfig,
        profile: &NodeProfile,
        port: u16,
        output_path: &Path,
    ) -> GenerateResult;
}

/// Inbound tags and their offset from the node's base port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InboundTag {
    Socks,
    Socks2,
    Socks3,
}

impl InboundTag {
    fn as_str(self) -> &'static str {
        match self {
            InboundTag::Socks => "socks",
            InboundTag::Socks2 => "socks2",
            InboundTag::Socks3 => "socks3",
        }
    }

    fn offset(self) -> u16 {
        match self {
            InboundTag::Socks => 0,
            InboundTag::Socks2 => 1,
            InboundTag::Socks3 => 2,
        }
    }
}

/// Default generator producing `log`, `inbounds` and `outbounds`.
#[derive(Debug, Default, Clone, Copy)]
pub struct InboundConfigGenerator;

impl InboundConfigGenerator {
    pub fn new() -> Self {
        Self
    }

    fn inbound(settings: &InboundSettings, tag: InboundTag, base_port: u16) -> Result<Value> {
        let port = base_port
            .checked_add(tag.offset())
            .ok_or_else(|| FleetError::Validation {
                field: "port".to_string(),
                message: format!(
                    "{} inbound would exceed the TCP port range (base {})",
                    tag.as_str(),
                    base_port
                ),
            })?;

        Ok(json!({
            "tag": tag.as_str(),
            "port": port,
            "listen": LOOPBACK_LISTEN,
            "protocol": "mixed",
            "settings": {
                "auth": "noauth",
                "udp": settings.udp_enabled,
                "allowTransparent": false
            },
            "sniffing": {
                "enabled": settings.sniffing_enabled,
                "destOverride": settings.dest_override,
                "routeOnly": settings.route_only
            }
        }))
    }

    /// Inbound list for a node whose primary inbound sits on `port`.
    pub fn build_inbounds(settings: &InboundSettings, port: u16) -> Result<Vec<Value>> {
        let mut primary = Self::inbound(settings, InboundTag::Socks, port)?;
        let mut inbounds = Vec::new();

        let secondary = if settings.second_local_port_enabled {
            Some(Self::inbound(settings, InboundTag::Socks2, port)?)
        } else {
            None
        };

        let mut lan = None;
        if settings.allow_lan_conn {
            if settings.new_port_for_lan {
                let mut inbound = Self::inbound(settings, InboundTag::Socks3, port)?;
                inbound["listen"] = json!(LAN_LISTEN);
                if let Some((user, pass)) = settings.credentials() {
                    inbound["settings"]["auth"] = json!("password");
                    inbound["settings"]["accounts"] = json!([{ "user": user, "pass": pass }]);
                }
                lan = Some(inbound);
            } else {
                primary["listen"] = json!(LAN_LISTEN);
            }
        }

        inbounds.push(primary);
        inbounds.extend(secondary);
        inbounds.extend(lan);
        Ok(inbounds)
    }

    /// Full config document for a node.
    pub fn build_document(config: &FleetConfig, profile: &NodeProfile, port: u16) -> Result<Value> {
        let outbound = profile.outbound.clone().unwrap_or_else(|| {
            json!({
                "tag": "proxy",
                "protocol": "freedom"
            })
        });

        Ok(json!({
            "log": {
                "loglevel": config.core_log_level
            },
            "inbounds": Self::build_inbounds(&config.inbound, port)?,
            "outbounds": [outbound]
        }))
    }

    async fn write(config: &FleetConfig, profile: &NodeProfile, port: u16, output_path: &Path) -> Result<()> {
        let document = Self::build_document(config, profile, port)?;
        let contents = serde_json::to_string_pretty(&document)?;

        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FleetError::io_with_path(e, parent))?;
        }
        tokio::fs::write(output_path, contents)
            .await
            .map_err(|e| FleetError::io_with_path(e, output_path))?;
        Ok(())
    }
}

#[async_trait]
impl ConfigGenerator for InboundConfigGenerator {
    async fn generate_minimal_config(
        &self,
        config: &FleetConfig,
        profile: &NodeProfile,
        port: u16,
        output_path: &Path,
    ) -> GenerateResult {
        match Self::write(config, profile, port, output_path).await {
            Ok(()) => {
                debug!(
                    "[{}] Wrote node config {}",
                    profile.index_id,
                    output_path.display()
                );
                GenerateResult::ok(format!("Generated {}", output_path.display()))
            }
            Err(e) => GenerateResult::failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CoreType;
    use tempfile::TempDir;

    fn tags(inbounds: &[Value]) -> Vec<(&str, u64, &str)> {
        inbounds
            .iter()
            .map(|i| {
                (
                    i["tag"].as_str().unwrap(),
                    i["port"].as_u64().unwrap(),
                    i["listen"].as_str().unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_default_single_loopback_inbound() {
        let settings = InboundSettings::default();
        let inbounds = InboundConfigGenerator::build_inbounds(&settings, 1180).unwrap();
        assert_eq!(tags(&inbounds), vec![("socks", 1180, "127.0.0.1")]);
        assert_eq!(inbounds[0]["protocol"], "mixed");
        assert_eq!(inbounds[0]["settings"]["udp"], true);
        assert_eq!(inbounds[0]["sniffing"]["destOverride"], json!(["http", "tls"]));
        assert_eq!(inbounds[0]["sniffing"]["routeOnly"], false);
    }

    #[test]
    fn test_second_port_and_lan_port_with_auth() {
        let settings = InboundSettings {
            second_local_port_enabled: true,
            allow_lan_conn: true,
            new_port_for_lan: true,
            user: Some("alice".into()),
            pass: Some("secret".into()),
            ..InboundSettings::default()
        };
        let inbounds = InboundConfigGenerator::build_inbounds(&settings, 1180).unwrap();
        assert_eq!(
            tags(&inbounds),
            vec![
                ("socks", 1180, "127.0.0.1"),
                ("socks2", 1181, "127.0.0.1"),
                ("socks3", 1182, "0.0.0.0"),
            ]
        );
        assert_eq!(inbounds[2]["settings"]["auth"], "password");
        assert_eq!(inbounds[2]["settings"]["accounts"][0]["user"], "alice");
        assert_eq!(inbounds[0]["settings"]["auth"], "noauth");
    }

    #[test]
    fn test_lan_port_without_full_credentials_has_no_auth() {
        let settings = InboundSettings {
            allow_lan_conn: true,
            new_port_for_lan: true,
            user: Some("alice".into()),
            pass: None,
            ..InboundSettings::default()
        };
        let inbounds = InboundConfigGenerator::build_inbounds(&settings, 1180).unwrap();
        assert_eq!(inbounds.len(), 2);
        assert_eq!(inbounds[1]["settings"]["auth"], "noauth");
        assert!(inbounds[1]["settings"].get("accounts").is_none());
    }

    #[test]
    fn test_lan_without_new_port_opens_primary() {
        let settings = InboundSettings {
            allow_lan_conn: true,
            ..InboundSettings::default()
        };
        let inbounds = InboundConfigGenerator::build_inbounds(&settings, 1180).unwrap();
        assert_eq!(tags(&inbounds), vec![("socks", 1180, "0.0.0.0")]);
    }

    #[test]
    fn test_offset_overflow_is_rejected() {
        let settings = InboundSettings {
            second_local_port_enabled: true,
            ..InboundSettings::default()
        };
        assert!(InboundConfigGenerator::build_inbounds(&settings, u16::MAX).is_err());
    }

    #[tokio::test]
    async fn test_generate_writes_document() {
        let temp_dir = TempDir::new().unwrap();
        let config = FleetConfig::with_root(temp_dir.path());
        let profile = NodeProfile::new("a", CoreType::Xray).with_outbound(json!({
            "tag": "proxy",
            "protocol": "vless"
        }));
        let path = config.node_config_path("a");

        let result = InboundConfigGenerator
            .generate_minimal_config(&config, &profile, 1180, &path)
            .await;
        assert!(result.success, "{}", result.message);

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["log"]["loglevel"], "warning");
        assert_eq!(written["inbounds"][0]["port"], 1180);
        assert_eq!(written["outbounds"][0]["protocol"], "vless");
        assert!(written.get("routing").is_none());
    }

    #[tokio::test]
    async fn test_generate_defaults_to_freedom_outbound() {
        let temp_dir = TempDir::new().unwrap();
        let config = FleetConfig::with_root(temp_dir.path());
        let path = config.node_config_path("b");

        let result = InboundConfigGenerator
            .generate_minimal_config(&config, &NodeProfile::new("b", CoreType::Xray), 1181, &path)
            .await;
        assert!(result.success);
        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["outbounds"][0]["protocol"], "freedom");
    }
}
