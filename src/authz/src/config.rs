//! Plugin configuration

use serde::{Deserialize, Serialize};

/// Environment variable enabling strict mode
pub const STRICT_ENV: &str = "FIELDGUARD_STRICT";

/// Environment variable switching write sanitization from strip to reject
pub const REJECT_WRITES_ENV: &str = "FIELDGUARD_REJECT_WRITES";

/// Permission plugin configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Fail route installation when an enabled, non-event operation has no
    /// registered rule. When off, such operations are unrestricted.
    #[serde(default)]
    pub strict: bool,

    /// Reject create/update payloads carrying unauthorized keys instead of
    /// silently stripping them
    #[serde(default)]
    pub reject_unauthorized_writes: bool,
}

impl PluginConfig {
    /// Strict-mode configuration
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Load configuration from the environment, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).map(|v| parse_flag(&v)).unwrap_or(false);

        Self {
            strict: flag(STRICT_ENV),
            reject_unauthorized_writes: flag(REJECT_WRITES_ENV),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
