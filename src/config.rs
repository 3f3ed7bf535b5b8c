//! Daemon-wide settings, loadable from TOML via `toml` + `serde`-derived
//! structs rather than hand-rolled parsing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_unreachable_check_interval() -> Duration {
    Duration::from_secs(600)
}

fn default_shutdown_short_grace() -> Duration {
    Duration::from_secs(10)
}

fn default_shutdown_idle_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Multiaddress strings to bind at startup.
    #[serde(default)]
    pub listen: Vec<String>,

    /// `None` disables the idle-check ticker entirely.
    #[serde(default, with = "duration_opt_secs")]
    pub idle_check_interval: Option<Duration>,

    /// Fixed 10-minute default; fires only when the tree has zero mounts
    /// and zero listeners.
    #[serde(default = "default_unreachable_check_interval", with = "duration_secs")]
    pub unreachable_check_interval: Duration,

    /// Delay before a `Short` disposition escalates to cancellation.
    #[serde(default = "default_shutdown_short_grace", with = "duration_secs")]
    pub shutdown_short_grace: Duration,

    /// Idle threshold the `Shutdown` poller uses to close connections.
    #[serde(default = "default_shutdown_idle_timeout", with = "duration_secs")]
    pub shutdown_idle_timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            listen: Vec::new(),
            idle_check_interval: None,
            unreachable_check_interval: default_unreachable_check_interval(),
            shutdown_short_grace: default_shutdown_short_grace(),
            shutdown_idle_timeout: default_shutdown_idle_timeout(),
        }
    }
}

impl DaemonConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod duration_opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = DaemonConfig::default();
        assert_eq!(cfg.unreachable_check_interval, Duration::from_secs(600));
        assert_eq!(cfg.shutdown_short_grace, Duration::from_secs(10));
        assert_eq!(cfg.shutdown_idle_timeout, Duration::from_secs(30));
        assert!(cfg.idle_check_interval.is_none());
    }

    #[test]
    fn parses_listen_addresses_from_toml() {
        let cfg = DaemonConfig::from_toml_str(r#"listen = ["/ip4/127.0.0.1/tcp/564"]"#).unwrap();
        assert_eq!(cfg.listen, vec!["/ip4/127.0.0.1/tcp/564".to_string()]);
        assert_eq!(cfg.unreachable_check_interval, Duration::from_secs(600));
    }

    #[test]
    fn round_trips_through_toml() {
        let mut cfg = DaemonConfig::default();
        cfg.listen.push("/unix//run/fs/server".into());
        cfg.idle_check_interval = Some(Duration::from_secs(60));
        let text = cfg.to_toml_string().unwrap();
        let back = DaemonConfig::from_toml_str(&text).unwrap();
        assert_eq!(back.listen, cfg.listen);
        assert_eq!(back.idle_check_interval, cfg.idle_check_interval);
    }
}
