//! Configuration validation.
//!
//! [`validate`] catches mistakes in a single snapshot. [`check_immutable`]
//! compares a candidate snapshot against the running one during rehash.

use super::Config;
use super::listen::ListenerConfig;
use std::net::SocketAddr;
use thiserror::Error;

/// User modes that may appear in `accounts.default_user_modes`.
pub const SETTABLE_DEFAULT_MODES: &[char] = &['B', 'R', 'T', 'i', 'w'];

/// Validation errors for configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("server.name is required")]
    MissingServerName,
    #[error("server.name must not contain spaces")]
    InvalidServerName,
    #[error("at least one listener must be configured")]
    NoListeners,
    #[error("listener address {0:?} is not a valid host:port")]
    InvalidListenerAddress(String),
    #[error("listener {0:?} cannot be both STS-only and TLS")]
    StsOnlyTls(String),
    #[error("STS-only listener {0:?} requires server.sts to be enabled")]
    StsOnlyWithoutSts(String),
    #[error("mode {0:?} cannot be set in default_user_modes")]
    InvalidDefaultMode(char),
    #[error("ip_limits.cidr_len_ipv4 must be at most 32, got {0}")]
    InvalidCidrV4(u8),
    #[error("ip_limits.cidr_len_ipv6 must be at most 128, got {0}")]
    InvalidCidrV6(u8),
    #[error("debug.diagnostics_listener {0:?} is not a valid socket address")]
    InvalidDiagnosticsAddress(String),
}

/// Settings that can only be changed by restarting the server.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ImmutableField {
    #[error("Server name cannot be changed after launching the server, rehash aborted")]
    ServerName,
    #[error("Datastore path cannot be changed after launching the server, rehash aborted")]
    DatastorePath,
    #[error("Casemapping cannot be changed after launching the server, rehash aborted")]
    Casemapping,
    #[error("UTF-8 enforcement cannot be changed after launching the server, rehash aborted")]
    Utf8Enforcement,
    #[error("Default always-on setting cannot be changed after launching the server, rehash aborted")]
    AlwaysOnPolicy,
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.name.is_empty() {
        errors.push(ValidationError::MissingServerName);
    } else if config.server.name.contains(' ') {
        errors.push(ValidationError::InvalidServerName);
    }

    if config.server.listeners.is_empty() {
        errors.push(ValidationError::NoListeners);
    }
    for (addr, listener) in &config.server.listeners {
        if parse_listen_addr(addr).is_none() {
            errors.push(ValidationError::InvalidListenerAddress(addr.clone()));
        }
        errors.extend(validate_listener(addr, listener, config.server.sts.enabled));
    }

    if let Err(mode) = parse_default_user_modes(config.accounts.default_user_modes.as_deref()) {
        errors.push(ValidationError::InvalidDefaultMode(mode));
    }

    let limits = &config.server.ip_limits;
    if limits.cidr_len_ipv4 > 32 {
        errors.push(ValidationError::InvalidCidrV4(limits.cidr_len_ipv4));
    }
    if limits.cidr_len_ipv6 > 128 {
        errors.push(ValidationError::InvalidCidrV6(limits.cidr_len_ipv6));
    }

    if let Some(ref addr) = config.debug.diagnostics_listener
        && addr.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidDiagnosticsAddress(addr.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_listener(addr: &str, listener: &ListenerConfig, sts_enabled: bool) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if listener.sts_only && listener.is_tls() {
        errors.push(ValidationError::StsOnlyTls(addr.to_string()));
    }
    if listener.sts_only && !sts_enabled {
        errors.push(ValidationError::StsOnlyWithoutSts(addr.to_string()));
    }
    errors
}

/// Parse a listener key. `":6667"` binds every interface.
pub fn parse_listen_addr(addr: &str) -> Option<SocketAddr> {
    if let Some(port) = addr.strip_prefix(':') {
        let port: u16 = port.parse().ok()?;
        return Some(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    addr.parse().ok()
}

/// Parse a default mode string such as `"+iw"`. Returns the offending
/// character on failure.
pub fn parse_default_user_modes(modes: Option<&str>) -> Result<Vec<char>, char> {
    let Some(modes) = modes else {
        return Ok(Vec::new());
    };
    let mut parsed = Vec::new();
    for c in modes.trim().trim_start_matches('+').chars() {
        if !SETTABLE_DEFAULT_MODES.contains(&c) {
            return Err(c);
        }
        if !parsed.contains(&c) {
            parsed.push(c);
        }
    }
    Ok(parsed)
}

/// Reject a candidate snapshot that changes a launch-time setting.
pub fn check_immutable(current: &Config, candidate: &Config) -> Result<(), ImmutableField> {
    if current.server.name != candidate.server.name {
        return Err(ImmutableField::ServerName);
    }
    if current.datastore.path != candidate.datastore.path {
        return Err(ImmutableField::DatastorePath);
    }
    if current.server.casemapping != candidate.server.casemapping {
        return Err(ImmutableField::Casemapping);
    }
    if current.server.enforce_utf8 != candidate.server.enforce_utf8 {
        return Err(ImmutableField::Utf8Enforcement);
    }
    if current.accounts.multiclient.always_on != candidate.accounts.multiclient.always_on {
        return Err(ImmutableField::AlwaysOnPolicy);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_valid_config() -> String {
        r#"
[server]
name = "irc.test"
[server.listeners."127.0.0.1:6667"]
"#
        .to_string()
    }

    fn raw(text: &str) -> Config {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate(&raw(&minimal_valid_config())).is_ok());
    }

    #[test]
    fn empty_server_name_fails() {
        let config = raw(&minimal_valid_config().replace("irc.test", ""));
        let errors = validate(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::MissingServerName));
    }

    #[test]
    fn missing_listeners_fail() {
        let config = raw("[server]\nname = \"irc.test\"\n");
        let errors = validate(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::NoListeners));
    }

    #[test]
    fn bad_listener_address_fails() {
        let config = raw("[server]\nname = \"irc.test\"\n[server.listeners.\"nowhere\"]\n");
        let errors = validate(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::InvalidListenerAddress("nowhere".into())));
    }

    #[test]
    fn sts_only_needs_sts() {
        let config = raw(
            "[server]\nname = \"irc.test\"\n[server.listeners.\":6667\"]\nsts_only = true\n",
        );
        let errors = validate(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::StsOnlyWithoutSts(":6667".into())));
    }

    #[test]
    fn invalid_default_mode_fails() {
        let text = format!("{}\n[accounts]\ndefault_user_modes = \"+io\"\n", minimal_valid_config());
        let errors = validate(&raw(&text)).unwrap_err();
        assert!(errors.contains(&ValidationError::InvalidDefaultMode('o')));
    }

    #[test]
    fn parses_listen_addresses() {
        assert_eq!(parse_listen_addr(":6667"), Some("0.0.0.0:6667".parse().unwrap()));
        assert_eq!(parse_listen_addr("[::1]:6697"), Some("[::1]:6697".parse().unwrap()));
        assert_eq!(parse_listen_addr(":notaport"), None);
    }

    #[test]
    fn default_modes_dedupe() {
        assert_eq!(parse_default_user_modes(Some("+iwi")), Ok(vec!['i', 'w']));
        assert_eq!(parse_default_user_modes(None), Ok(vec![]));
    }

    #[test]
    fn immutable_fields_detected() {
        let current = Config::parse(&minimal_valid_config()).unwrap();

        let renamed = Config::parse(&minimal_valid_config().replace("irc.test", "irc.other")).unwrap();
        assert_eq!(check_immutable(&current, &renamed), Err(ImmutableField::ServerName));

        let recased = Config::parse(&minimal_valid_config().replace("irc.test", "IRC.test")).unwrap();
        assert_eq!(check_immutable(&current, &recased), Err(ImmutableField::ServerName));

        let moved = Config::parse(&format!(
            "{}\n[datastore]\npath = \"other.db\"\n",
            minimal_valid_config()
        ))
        .unwrap();
        assert_eq!(check_immutable(&current, &moved), Err(ImmutableField::DatastorePath));

        let always_on = Config::parse(&format!(
            "{}\n[accounts.multiclient]\nalways_on = \"mandatory\"\n",
            minimal_valid_config()
        ))
        .unwrap();
        assert_eq!(check_immutable(&current, &always_on), Err(ImmutableField::AlwaysOnPolicy));
    }
}
