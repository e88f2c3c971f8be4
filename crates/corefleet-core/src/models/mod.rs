//! Data models shared by the orchestrator and the RPC front-end.

mod profile;
mod responses;

pub use profile::*;
pub use responses::*;
