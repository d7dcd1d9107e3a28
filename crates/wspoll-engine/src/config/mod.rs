//! Engine config loader (strict parsing).

pub mod schema;

use std::fs;

use wspoll_core::error::{Result, WsError};

pub use schema::{ClientSection, ConnectionSection, ServerSection, WsConfig};

pub fn load_from_file(path: &str) -> Result<WsConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| WsError::Config(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<WsConfig> {
    let cfg: WsConfig =
        serde_yaml::from_str(s).map_err(|e| WsError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
