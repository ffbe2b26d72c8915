use std::env;
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_DATABASE_URL: &str = "sqlite:committee_polls.db";
const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub poll_check_interval_secs: u64,
    /// Members allowed to vote. Unset means everyone in the guild.
    pub committee_role_id: Option<u64>,
    /// Members allowed to manage any poll. Authors can always manage their own.
    pub manager_role_id: Option<u64>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let discord_token = lookup("DISCORD_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;

        Ok(Self {
            discord_token,
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            poll_check_interval_secs: parse_or(&lookup, "POLL_CHECK_INTERVAL_SECS", DEFAULT_CHECK_INTERVAL_SECS)?,
            committee_role_id: parse_opt(&lookup, "COMMITTEE_ROLE_ID")?,
            manager_role_id: parse_opt(&lookup, "MANAGER_ROLE_ID")?,
        })
    }
}

fn parse_opt<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
        _ => Ok(None),
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    T: FromStr,
{
    Ok(parse_opt(lookup, name)?.unwrap_or(default))
}
