//! Configuración del servicio desde variables de entorno (.env incluido).
//! Los valores ausentes toman los defaults de `FanoutConfig`; un valor
//! presente pero ilegible es un error de arranque.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use fanout_core::{FanoutConfig, WAKE_CHANNEL};

use crate::errors::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Sin `REDIS_URL` el aviso de wake queda en proceso.
    pub redis_url: Option<String>,
    pub wake_channel: String,
    /// Periodo de sincronización del supervisor con la tabla de tenants.
    pub tenant_sync: Duration,
    pub fanout: FanoutConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        fanout_persistence::init_dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
        where F: Fn(&str) -> Option<String>
    {
        let parse = |key: &str| -> Result<Option<u64>, AppError> { parse_var(&lookup, key) };
        let defaults = FanoutConfig::default();
        let secs = |key: &str, default: Duration| -> Result<Duration, AppError> {
            Ok(parse(key)?.map(Duration::from_secs).unwrap_or(default))
        };
        let millis = |key: &str, default: Duration| -> Result<Duration, AppError> {
            Ok(parse(key)?.map(Duration::from_millis).unwrap_or(default))
        };

        let fanout = FanoutConfig { shard_count: parse_var(&lookup, "MESSAGE_SHARD_SIZE")?.unwrap_or(defaults.shard_count),
                                    shard_max_age: secs("SHARD_REFRESH_SECS", defaults.shard_max_age)?,
                                    batch_size: parse_var(&lookup, "DISTRIBUTE_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
                                    batch_pause: millis("DISTRIBUTE_BATCH_PAUSE_MS", defaults.batch_pause)?,
                                    idle_interval: millis("SCHEDULER_IDLE_MS", defaults.idle_interval)?,
                                    block_refresh: secs("BLOCK_REFRESH_SECS", defaults.block_refresh)?,
                                    pin_failure_notice: lookup("PIN_FAILURE_NOTICE").unwrap_or(defaults.pin_failure_notice),
                                    ..defaults };
        if fanout.shard_count == 0 || fanout.batch_size == 0 {
            return Err(AppError::Config("MESSAGE_SHARD_SIZE and DISTRIBUTE_BATCH_SIZE must be positive".into()));
        }
        Ok(Self { redis_url: lookup("REDIS_URL").filter(|u| !u.is_empty()),
                  wake_channel: lookup("WAKE_CHANNEL").unwrap_or_else(|| WAKE_CHANNEL.to_string()),
                  tenant_sync: secs("TENANT_SYNC_SECS", Duration::from_secs(60))?,
                  fanout })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, AppError>
    where F: Fn(&str) -> Option<String>,
          T: FromStr
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim()
                        .parse()
                        .map(Some)
                        .map_err(|_| AppError::Config(format!("{key}={raw} is not a valid number"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.fanout.shard_count, 5);
        assert_eq!(cfg.fanout.batch_size, 200);
        assert_eq!(cfg.wake_channel, "distribute");
        assert_eq!(cfg.redis_url, None);
        assert_eq!(cfg.tenant_sync, Duration::from_secs(60));
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = AppConfig::from_lookup(lookup(&[("MESSAGE_SHARD_SIZE", "8"),
                                                  ("DISTRIBUTE_BATCH_PAUSE_MS", "0"),
                                                  ("SCHEDULER_IDLE_MS", "250"),
                                                  ("BLOCK_REFRESH_SECS", "30"),
                                                  ("PIN_FAILURE_NOTICE", "gone"),
                                                  ("REDIS_URL", "redis://cache:6379"),
                                                  ("WAKE_CHANNEL", "wake")])).unwrap();
        assert_eq!(cfg.fanout.shard_count, 8);
        assert_eq!(cfg.fanout.batch_pause, Duration::ZERO);
        assert_eq!(cfg.fanout.idle_interval, Duration::from_millis(250));
        assert_eq!(cfg.fanout.block_refresh, Duration::from_secs(30));
        assert_eq!(cfg.fanout.pin_failure_notice, "gone");
        assert_eq!(cfg.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(cfg.wake_channel, "wake");
    }

    #[test]
    fn invalid_numbers_fail() {
        let err = AppConfig::from_lookup(lookup(&[("DISTRIBUTE_BATCH_SIZE", "lots")])).unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("DISTRIBUTE_BATCH_SIZE")));
        assert!(AppConfig::from_lookup(lookup(&[("MESSAGE_SHARD_SIZE", "0")])).is_err());
    }
}
