use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::calendar::Calendar;
use crate::model::Role;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("COWORK_TLS_CERT and COWORK_TLS_KEY must be set together")]
    PartialTls,
}

/// Server settings, read once from `COWORK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
    /// Login user → role.
    pub roles: HashMap<String, Role>,
    /// Role of users missing from `roles`.
    pub default_role: Role,
    pub calendar: Calendar,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "cowork".into(),
            max_connections: 256,
            compact_threshold: 1000,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
            roles: HashMap::new(),
            default_role: Role::Staff,
            calendar: Calendar::utc(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Config::default();

        if let Some(v) = lookup("COWORK_PORT") {
            cfg.port = parse("COWORK_PORT", v)?;
        }
        if let Some(v) = lookup("COWORK_BIND") {
            cfg.bind = v;
        }
        if let Some(v) = lookup("COWORK_DATA_DIR") {
            cfg.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("COWORK_PASSWORD") {
            cfg.password = v;
        }
        if let Some(v) = lookup("COWORK_MAX_CONNECTIONS") {
            cfg.max_connections = parse("COWORK_MAX_CONNECTIONS", v)?;
        }
        if let Some(v) = lookup("COWORK_COMPACT_THRESHOLD") {
            cfg.compact_threshold = parse("COWORK_COMPACT_THRESHOLD", v)?;
        }
        if let Some(v) = lookup("COWORK_METRICS_PORT") {
            cfg.metrics_port = Some(parse("COWORK_METRICS_PORT", v)?);
        }
        if let Some(v) = lookup("COWORK_ROLES") {
            cfg.roles = parse_roles(&v)?;
        }
        if let Some(v) = lookup("COWORK_DEFAULT_ROLE") {
            cfg.default_role = parse("COWORK_DEFAULT_ROLE", v)?;
        }
        if let Some(v) = lookup("COWORK_UTC_OFFSET_MINUTES") {
            let minutes: i32 = parse("COWORK_UTC_OFFSET_MINUTES", v.clone())?;
            cfg.calendar = Calendar::with_offset_minutes(minutes).ok_or(ConfigError::Invalid {
                var: "COWORK_UTC_OFFSET_MINUTES",
                value: v,
            })?;
        }

        cfg.tls_cert = lookup("COWORK_TLS_CERT");
        cfg.tls_key = lookup("COWORK_TLS_KEY");
        if cfg.tls_cert.is_some() != cfg.tls_key.is_some() {
            return Err(ConfigError::PartialTls);
        }

        Ok(cfg)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { var, value })
}

/// `alice=ADMIN,bob=MANAGER`
fn parse_roles(value: &str) -> Result<HashMap<String, Role>, ConfigError> {
    let mut roles = HashMap::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let invalid = || ConfigError::Invalid {
            var: "COWORK_ROLES",
            value: entry.to_string(),
        };
        let (user, role) = entry.split_once('=').ok_or_else(invalid)?;
        let role: Role = role.parse().map_err(|_| invalid())?;
        roles.insert(user.trim().to_string(), role);
    }
    Ok(roles)
}
