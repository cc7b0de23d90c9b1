//! Runtime configuration.
//! Defaults match the single vacuum this tool was written for; every value can be
//! overridden through the environment.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::local::protocol::LocalProtocolVersion;

pub const DEFAULT_HOST: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 150);
pub const DEFAULT_MODEL: &str = "roborock.vacuum.a27";
pub const DEFAULT_PRODUCT_ID: &str = "product-id-123";
pub const DEFAULT_NAME: &str = "Roborock";
pub const DEFAULT_QUEUE_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_LOCAL_PROTOCOL: &str = "L01";
pub const DEFAULT_CACHE_FILES: &[&str] = &["~/.roborock", "~/.roborock.cache"];

pub const DEFAULT_DUID_REF: &str = "op://private/vacuum roborock/username";
pub const DEFAULT_LOCAL_KEY_REF: &str = "op://private/vacuum roborock/credential";
pub const DEFAULT_EMAIL_REF: &str = "op://private/Roborock/username";
pub const DEFAULT_PASSWORD_REF: &str = "op://private/Roborock/password";

pub const LOCAL_PORT: u16 = 58867;
pub const CODE_REQUEST_ATTEMPTS: u32 = 3;
pub const CODE_REQUEST_BACKOFF: Duration = Duration::from_millis(1500);

/// 1Password references for the four credentials the flow consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRefs {
    pub duid: String,
    pub local_key: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: Ipv4Addr,
    pub port: u16,
    pub model: String,
    pub product_id: String,
    /// Display name recorded in the device identity.
    pub name: String,
    /// Upper bound on waiting for the room mapping response.
    pub queue_timeout: Duration,
    /// `None` lets the client negotiate (1.0 first, then L01).
    pub local_protocol: Option<LocalProtocolVersion>,
    /// Candidate cache files, in lookup order. The first one is the write target
    /// when no cached session was found.
    pub cache_files: Vec<PathBuf>,
    pub secrets: SecretRefs,
    pub code_request_attempts: u32,
    pub code_request_backoff: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let var = |key: &str, default: &str| -> String {
            match lookup(key) {
                Some(v) if !v.trim().is_empty() => v.trim().to_string(),
                _ => default.to_string(),
            }
        };

        let host = match lookup("ROBOROCK_HOST") {
            Some(v) if !v.trim().is_empty() => v
                .trim()
                .parse::<Ipv4Addr>()
                .map_err(|_| format!("ROBOROCK_HOST must be an IPv4 address, got {:?}", v.trim()))?,
            _ => DEFAULT_HOST,
        };

        let queue_timeout_secs = match lookup("ROBOROCK_QUEUE_TIMEOUT_SECS") {
            Some(v) if !v.trim().is_empty() => match v.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => return Err("ROBOROCK_QUEUE_TIMEOUT_SECS must be a positive integer".to_string()),
            },
            _ => DEFAULT_QUEUE_TIMEOUT_SECS,
        };

        // An explicitly empty value disables forcing, unset keeps the default.
        let local_protocol = match lookup("ROBOROCK_LOCAL_PROTOCOL") {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(parse_protocol(v.trim())?),
            None => Some(parse_protocol(DEFAULT_LOCAL_PROTOCOL)?),
        };

        let cache_files = match lookup("ROBOROCK_CACHE_FILES") {
            Some(v) if !v.trim().is_empty() => v
                .split(':')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(expand_home)
                .collect::<Vec<_>>(),
            _ => DEFAULT_CACHE_FILES.iter().map(|s| expand_home(s)).collect(),
        };
        if cache_files.is_empty() {
            return Err("ROBOROCK_CACHE_FILES must name at least one path".to_string());
        }

        Ok(Config {
            host,
            port: LOCAL_PORT,
            model: var("ROBOROCK_MODEL", DEFAULT_MODEL),
            product_id: var("ROBOROCK_PRODUCT_ID", DEFAULT_PRODUCT_ID),
            name: var("ROBOROCK_NAME", DEFAULT_NAME),
            queue_timeout: Duration::from_secs(queue_timeout_secs),
            local_protocol,
            cache_files,
            secrets: SecretRefs {
                duid: var("ROBOROCK_OP_DUID", DEFAULT_DUID_REF),
                local_key: var("ROBOROCK_OP_LOCAL_KEY", DEFAULT_LOCAL_KEY_REF),
                email: var("ROBOROCK_OP_EMAIL", DEFAULT_EMAIL_REF),
                password: var("ROBOROCK_OP_PASSWORD", DEFAULT_PASSWORD_REF),
            },
            code_request_attempts: CODE_REQUEST_ATTEMPTS,
            code_request_backoff: CODE_REQUEST_BACKOFF,
        })
    }

    /// Cache file rewritten after a refresh when no cached session was loaded.
    pub fn primary_cache_file(&self) -> &PathBuf {
        &self.cache_files[0]
    }
}

fn parse_protocol(value: &str) -> Result<LocalProtocolVersion, String> {
    LocalProtocolVersion::from_name(value)
        .ok_or_else(|| format!("ROBOROCK_LOCAL_PROTOCOL must be one of \"1.0\", \"L01\" or empty, got {:?}", value))
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
