//! Server configuration, read once from `BURNLINK_*` environment variables.
//!
//! ```text
//!   BURNLINK_PORT                 listen port (3000)
//!   BURNLINK_MASTER_KEY           newest server key, base64url, 32 bytes
//!   BURNLINK_MASTER_KEY_PREVIOUS  older keys, comma separated, newest first
//!   BURNLINK_KEYRING_FILE         one key per line, newest first; re-read on SIGHUP
//!   BURNLINK_DATA_DIR             file-backed store here; in-memory when unset
//!   BURNLINK_MAX_SECRET_KB        payload limit (100)
//!   BURNLINK_DEFAULT_TTL_SECS     ttl when the request has none (86400)
//!   BURNLINK_MAX_TTL_SECS         largest accepted ttl (604800)
//!   BURNLINK_STORE_TIMEOUT_MS     per store call (2000)
//!   BURNLINK_STORE_RETRIES        retries on transient faults (2)
//!   BURNLINK_MIN_RESPONSE_MS      reveal response-time floor (50)
//!   BURNLINK_SWEEP_INTERVAL_SECS  sweep + key retirement cadence (60)
//!   BURNLINK_RATE_LIMIT_RPS       per-IP refill rate (20)
//!   BURNLINK_RATE_LIMIT_BURST     per-IP bucket size (50)
//!   BURNLINK_LOG_FORMAT           "json" or "pretty"
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use zeroize::Zeroizing;

use burnlink_vault::GatewayConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("set BURNLINK_MASTER_KEY or BURNLINK_KEYRING_FILE")]
    NoKeys,

    #[error("{var}={value:?} is not valid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var("BURNLINK_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Where server keys come from.
#[derive(Clone)]
pub enum KeySource {
    Env {
        master: Zeroizing<String>,
        previous: Vec<Zeroizing<String>>,
    },
    File(PathBuf),
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Env { previous, .. } => f
                .debug_struct("Env")
                .field("previous", &previous.len())
                .finish_non_exhaustive(),
            KeySource::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub keys: KeySource,
    pub data_dir: Option<PathBuf>,
    pub gateway: GatewayConfig,
    pub sweep_interval: Duration,
    pub rate_limit_rps: f64,
    pub rate_limit_burst: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let keys = match (get("BURNLINK_KEYRING_FILE"), get("BURNLINK_MASTER_KEY")) {
            (Some(path), _) => KeySource::File(PathBuf::from(path)),
            (None, Some(master)) => KeySource::Env {
                master: Zeroizing::new(master),
                previous: get("BURNLINK_MASTER_KEY_PREVIOUS")
                    .map(|list| {
                        list.split(',')
                            .map(str::trim)
                            .filter(|k| !k.is_empty())
                            .map(|k| Zeroizing::new(k.to_owned()))
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            (None, None) => return Err(ConfigError::NoKeys),
        };

        let defaults = GatewayConfig::default();
        let max_kb: usize = parse(&get, "BURNLINK_MAX_SECRET_KB", 100)?;
        let max_ttl_secs: u64 = parse(&get, "BURNLINK_MAX_TTL_SECS", defaults.max_ttl.as_secs())?;
        let default_ttl_secs: u64 =
            parse(&get, "BURNLINK_DEFAULT_TTL_SECS", defaults.default_ttl.as_secs())?;
        if max_kb == 0 {
            return Err(invalid("BURNLINK_MAX_SECRET_KB", "0", "must be positive"));
        }
        if max_ttl_secs == 0 {
            return Err(invalid("BURNLINK_MAX_TTL_SECS", "0", "must be positive"));
        }
        if default_ttl_secs == 0 || default_ttl_secs > max_ttl_secs {
            return Err(invalid(
                "BURNLINK_DEFAULT_TTL_SECS",
                &default_ttl_secs.to_string(),
                "must be between 1 and BURNLINK_MAX_TTL_SECS",
            ));
        }

        let gateway = GatewayConfig {
            max_secret_bytes: max_kb * 1024,
            default_ttl: Duration::from_secs(default_ttl_secs),
            max_ttl: Duration::from_secs(max_ttl_secs),
            store_timeout: Duration::from_millis(parse(
                &get,
                "BURNLINK_STORE_TIMEOUT_MS",
                defaults.store_timeout.as_millis() as u64,
            )?),
            store_retries: parse(&get, "BURNLINK_STORE_RETRIES", defaults.store_retries)?,
            min_response_time: Duration::from_millis(parse(
                &get,
                "BURNLINK_MIN_RESPONSE_MS",
                defaults.min_response_time.as_millis() as u64,
            )?),
            ..defaults
        };

        Ok(Self {
            port: parse(&get, "BURNLINK_PORT", 3000)?,
            keys,
            data_dir: get("BURNLINK_DATA_DIR").map(PathBuf::from),
            gateway,
            sweep_interval: Duration::from_secs(
                parse(&get, "BURNLINK_SWEEP_INTERVAL_SECS", 60u64)?.max(1),
            ),
            rate_limit_rps: parse(&get, "BURNLINK_RATE_LIMIT_RPS", 20.0)?,
            rate_limit_burst: parse(&get, "BURNLINK_RATE_LIMIT_BURST", 50)?,
        })
    }
}

fn parse<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e: T::Err| invalid(var, &raw, &e.to_string())),
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_owned(),
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = config_from(&[("BURNLINK_MASTER_KEY", "k")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.gateway.max_secret_bytes, 100 * 1024);
        assert_eq!(config.gateway.min_response_time, Duration::from_millis(50));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert!(config.data_dir.is_none());
        assert!(matches!(config.keys, KeySource::Env { ref previous, .. } if previous.is_empty()));
    }

    #[test]
    fn keys_are_required() {
        assert!(matches!(config_from(&[]), Err(ConfigError::NoKeys)));
        assert!(matches!(
            config_from(&[("BURNLINK_MASTER_KEY", "  ")]),
            Err(ConfigError::NoKeys)
        ));
    }

    #[test]
    fn previous_keys_are_split() {
        let config = config_from(&[
            ("BURNLINK_MASTER_KEY", "a"),
            ("BURNLINK_MASTER_KEY_PREVIOUS", "b, c,,"),
        ])
        .unwrap();
        match config.keys {
            KeySource::Env { master, previous } => {
                assert_eq!(master.as_str(), "a");
                let previous: Vec<&str> = previous.iter().map(|k| k.as_str()).collect();
                assert_eq!(previous, vec!["b", "c"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn keyring_file_wins() {
        let config = config_from(&[
            ("BURNLINK_MASTER_KEY", "a"),
            ("BURNLINK_KEYRING_FILE", "/etc/burnlink/keys"),
        ])
        .unwrap();
        assert!(matches!(config.keys, KeySource::File(_)));
    }

    #[test]
    fn bad_numbers_fail_fast() {
        let err = config_from(&[("BURNLINK_MASTER_KEY", "a"), ("BURNLINK_PORT", "http")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "BURNLINK_PORT", .. }));

        let err = config_from(&[
            ("BURNLINK_MASTER_KEY", "a"),
            ("BURNLINK_DEFAULT_TTL_SECS", "90000"),
            ("BURNLINK_MAX_TTL_SECS", "3600"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "BURNLINK_DEFAULT_TTL_SECS", .. }));
    }

    #[test]
    fn debug_hides_keys() {
        let config = config_from(&[("BURNLINK_MASTER_KEY", "supersecretkey")]).unwrap();
        assert!(!format!("{config:?}").contains("supersecretkey"));
    }
}
