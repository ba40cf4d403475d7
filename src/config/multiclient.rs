//! Multiclient/bouncer configuration.
//!
//! Controls whether several connections may share one nickname and whether
//! a client persists after its last connection closes (always-on).

use serde::Deserialize;

/// `[accounts.multiclient]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MulticlientConfig {
    /// Enable multiclient support (multiple connections to same nick).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Allow multiclient by default, or require an explicit account opt-in.
    #[serde(default = "default_true")]
    pub allowed_by_default: bool,

    /// Always-on mode policy. Fixed for the lifetime of the server.
    #[serde(default)]
    pub always_on: AlwaysOnPolicy,
}

/// Always-on persistence policy.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AlwaysOnPolicy {
    /// Never persist clients when disconnected.
    Disabled,
    /// Accounts must opt in.
    #[default]
    OptIn,
    /// Enabled by default, accounts can opt out.
    OptOut,
    /// Always persist, accounts cannot disable.
    Mandatory,
}

impl Default for MulticlientConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_by_default: true,
            always_on: AlwaysOnPolicy::default(),
        }
    }
}

impl MulticlientConfig {
    /// Takes the per-account setting if set, otherwise uses config default.
    pub fn is_multiclient_enabled(&self, account_setting: Option<bool>) -> bool {
        if !self.enabled {
            return false;
        }
        account_setting.unwrap_or(self.allowed_by_default)
    }

    /// Takes the per-account setting if set, otherwise uses policy default.
    pub fn is_always_on_enabled(&self, account_setting: Option<bool>) -> bool {
        match self.always_on {
            AlwaysOnPolicy::Disabled => false,
            AlwaysOnPolicy::Mandatory => true,
            AlwaysOnPolicy::OptIn => account_setting.unwrap_or(false),
            AlwaysOnPolicy::OptOut => account_setting.unwrap_or(true),
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = MulticlientConfig::default();
        assert!(config.enabled);
        assert!(config.allowed_by_default);
        assert_eq!(config.always_on, AlwaysOnPolicy::OptIn);
    }

    #[test]
    fn multiclient_disabled_ignores_account() {
        let config = MulticlientConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(!config.is_multiclient_enabled(None));
        assert!(!config.is_multiclient_enabled(Some(true)));
    }

    #[test]
    fn always_on_policies() {
        let mandatory = MulticlientConfig {
            always_on: AlwaysOnPolicy::Mandatory,
            ..Default::default()
        };
        assert!(mandatory.is_always_on_enabled(Some(false)));

        let opt_in = MulticlientConfig::default();
        assert!(!opt_in.is_always_on_enabled(None));
        assert!(opt_in.is_always_on_enabled(Some(true)));

        let opt_out = MulticlientConfig {
            always_on: AlwaysOnPolicy::OptOut,
            ..Default::default()
        };
        assert!(opt_out.is_always_on_enabled(None));
        assert!(!opt_out.is_always_on_enabled(Some(false)));

        let disabled = MulticlientConfig {
            always_on: AlwaysOnPolicy::Disabled,
            ..Default::default()
        };
        assert!(!disabled.is_always_on_enabled(Some(true)));
    }

    #[test]
    fn parses_kebab_case_policy() {
        let config: MulticlientConfig = toml::from_str("always_on = \"opt-out\"").unwrap();
        assert_eq!(config.always_on, AlwaysOnPolicy::OptOut);
    }
}
