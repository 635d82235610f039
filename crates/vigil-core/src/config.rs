use serde::{Deserialize, Serialize};

/// Bot connection settings, persisted as part of the state file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Fixed delay between reconnect attempts. Not exponential: the target
    /// environment tolerates steady retry rates.
    pub reconnect_delay_secs: u64,
    /// Interval between keep-alive pulses while online.
    pub ping_interval_secs: u64,
    pub version: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 25565,
            username: "vigil".into(),
            reconnect_delay_secs: 5,
            ping_interval_secs: 45,
            version: "1.20.4".into(),
        }
    }
}

/// Partial config update; present fields merge onto the current config.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub reconnect_delay_secs: Option<u64>,
    pub ping_interval_secs: Option<u64>,
    pub version: Option<String>,
}

impl BotConfig {
    /// Merge a patch onto this config, validating the result.
    pub fn apply(&self, patch: &ConfigPatch) -> Result<Self, String> {
        let mut next = self.clone();
        if let Some(host) = &patch.host {
            if host.trim().is_empty() {
                return Err("host must not be empty".into());
            }
            next.host = host.trim().to_string();
        }
        if let Some(port) = patch.port {
            if port == 0 {
                return Err("port must be nonzero".into());
            }
            next.port = port;
        }
        if let Some(username) = &patch.username {
            if username.trim().is_empty() {
                return Err("username must not be empty".into());
            }
            next.username = username.trim().to_string();
        }
        if let Some(delay) = patch.reconnect_delay_secs {
            if delay == 0 {
                return Err("reconnectDelaySecs must be nonzero".into());
            }
            next.reconnect_delay_secs = delay;
        }
        if let Some(interval) = patch.ping_interval_secs {
            if interval == 0 {
                return Err("pingIntervalSecs must be nonzero".into());
            }
            next.ping_interval_secs = interval;
        }
        if let Some(version) = &patch.version {
            next.version = version.clone();
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = BotConfig::default();
        assert_eq!(cfg.port, 25565);
        assert!(cfg.reconnect_delay_secs > 0);
        assert!(cfg.ping_interval_secs > 0);
    }

    #[test]
    fn patch_merges_only_present_fields() {
        let cfg = BotConfig::default();
        let patch = ConfigPatch {
            host: Some("mc.example.net".into()),
            port: Some(25570),
            ..Default::default()
        };
        let next = cfg.apply(&patch).unwrap();
        assert_eq!(next.host, "mc.example.net");
        assert_eq!(next.port, 25570);
        assert_eq!(next.username, cfg.username);
        assert_eq!(next.version, cfg.version);
    }

    #[test]
    fn patch_rejects_bad_values() {
        let cfg = BotConfig::default();
        assert!(cfg
            .apply(&ConfigPatch {
                port: Some(0),
                ..Default::default()
            })
            .is_err());
        assert!(cfg
            .apply(&ConfigPatch {
                host: Some("   ".into()),
                ..Default::default()
            })
            .is_err());
        assert!(cfg
            .apply(&ConfigPatch {
                ping_interval_secs: Some(0),
                ..Default::default()
            })
            .is_err());
    }

    #[test]
    fn patch_deserializes_camel_case() {
        let patch: ConfigPatch =
            serde_json::from_str(r#"{"reconnectDelaySecs": 10, "pingIntervalSecs": 30}"#).unwrap();
        assert_eq!(patch.reconnect_delay_secs, Some(10));
        assert_eq!(patch.ping_interval_secs, Some(30));
    }
}
