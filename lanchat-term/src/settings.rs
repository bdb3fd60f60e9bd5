//! Runtime settings from the command line and environment.
//!
//! `lanchat <name>`; everything else comes from `LANCHAT_*` variables and
//! falls back to the library defaults.

use lanchat_core::SessionConfig;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const NAME_VAR: &str = "LANCHAT_NAME";
pub const GROUP_VAR: &str = "LANCHAT_GROUP";
pub const PORT_VAR: &str = "LANCHAT_PORT";
pub const TTL_VAR: &str = "LANCHAT_TTL";
pub const REFRESH_VAR: &str = "LANCHAT_REFRESH_SECS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("no display name: pass it as the first argument or set LANCHAT_NAME")]
    MissingName,
    #[error("{var}={value:?} is not a valid {what}")]
    Invalid {
        var: &'static str,
        value: String,
        what: &'static str,
    },
}

/// Read the process arguments and environment.
pub fn load() -> Result<SessionConfig, SettingsError> {
    from_sources(std::env::args().skip(1), |var| std::env::var(var).ok())
}

pub fn from_sources(
    mut args: impl Iterator<Item = String>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<SessionConfig, SettingsError> {
    let name = args
        .next()
        .or_else(|| env(NAME_VAR))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or(SettingsError::MissingName)?;

    let mut config = SessionConfig::new(name);
    if let Some(value) = env(GROUP_VAR) {
        config.group = parse(GROUP_VAR, &value, "IPv4 address")?;
    }
    if let Some(value) = env(PORT_VAR) {
        config.port = parse(PORT_VAR, &value, "port")?;
    }
    if let Some(value) = env(TTL_VAR) {
        config.ttl = parse(TTL_VAR, &value, "TTL")?;
    }
    if let Some(value) = env(REFRESH_VAR) {
        let secs: u64 = parse(REFRESH_VAR, &value, "number of seconds")?;
        config.presence_refresh = (secs > 0).then(|| Duration::from_secs(secs));
    }
    Ok(config)
}

fn parse<T: FromStr>(var: &'static str, value: &str, what: &'static str) -> Result<T, SettingsError> {
    value.trim().parse().map_err(|_| SettingsError::Invalid {
        var,
        value: value.to_string(),
        what,
    })
}
