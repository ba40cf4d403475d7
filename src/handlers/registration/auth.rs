//! Password and SASL policy check at registration.

use super::machine::AuthOutcome;
use crate::config::Config;
use crate::state::{PassStatus, Session};

/// Decide whether `session` may register.
///
/// The server password comes first; a SASL login satisfies it when
/// `skip_server_password` is set. Then Tor and general SASL requirements.
pub fn check(config: &Config, session: &Session) -> AuthOutcome {
    let (pass, logged_in) = {
        let state = session.state();
        (state.pass, state.sasl_account.is_some())
    };

    if config.server.password.is_some() {
        let skip = logged_in && config.accounts.skip_server_password;
        if pass != PassStatus::Correct && !skip {
            return AuthOutcome::PasswordMismatch;
        }
    }

    if !logged_in {
        if session.is_tor && config.server.tor_listeners.require_sasl {
            return AuthOutcome::TorSaslRequired;
        }
        let require = &config.accounts.require_sasl;
        if require.enabled && !session.is_tor && !require.is_exempt(session.ip) {
            return AuthOutcome::SaslRequired;
        }
    }

    AuthOutcome::Success
}

/// Check a PASS argument against the configured bcrypt hash.
pub fn verify_password(config: &Config, password: &str) -> PassStatus {
    match config.server.password.as_deref() {
        None => PassStatus::Correct,
        Some(hash) => match bcrypt::verify(password, hash) {
            Ok(true) => PassStatus::Correct,
            _ => PassStatus::Incorrect,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SessionInfo;
    use std::sync::Arc;

    fn config(extra: &str) -> Config {
        Config::parse(&format!(
            "[server]\nname = \"irc.test\"\n{extra}\n[server.listeners.\":6667\"]\n"
        ))
        .unwrap()
    }

    fn session(ip: &str, tor: bool) -> Arc<Session> {
        Session::detached(SessionInfo {
            ip: Some(ip.parse().unwrap()),
            is_tor: tor,
            ..Default::default()
        })
        .0
    }

    #[test]
    fn open_server_accepts() {
        assert_eq!(check(&config(""), &session("192.0.2.1", false)), AuthOutcome::Success);
    }

    #[test]
    fn server_password() {
        let hash = bcrypt::hash("hunter2", 4).unwrap();
        let config = config(&format!("password = \"{hash}\""));
        let s = session("192.0.2.1", false);
        assert_eq!(check(&config, &s), AuthOutcome::PasswordMismatch);

        s.state().pass = verify_password(&config, "wrong");
        assert_eq!(check(&config, &s), AuthOutcome::PasswordMismatch);

        s.state().pass = verify_password(&config, "hunter2");
        assert_eq!(check(&config, &s), AuthOutcome::Success);
    }

    #[test]
    fn sasl_required_unless_exempt() {
        let config = Config::parse(
            "[server]\nname = \"irc.test\"\n[server.listeners.\":6667\"]\n\
             [accounts.require_sasl]\nenabled = true\nexempted = [\"10.0.0.0/8\"]\n",
        )
        .unwrap();
        assert_eq!(check(&config, &session("192.0.2.1", false)), AuthOutcome::SaslRequired);
        assert_eq!(check(&config, &session("10.1.1.1", false)), AuthOutcome::Success);

        let s = session("192.0.2.1", false);
        s.state().sasl_account = Some("alice".into());
        assert_eq!(check(&config, &s), AuthOutcome::Success);
    }

    #[test]
    fn tor_sasl_is_separate() {
        let config = Config::parse(
            "[server]\nname = \"irc.test\"\n[server.listeners.\":6667\"]\n\
             [server.tor_listeners]\nrequire_sasl = true\n",
        )
        .unwrap();
        assert_eq!(check(&config, &session("127.0.0.1", true)), AuthOutcome::TorSaslRequired);
        assert_eq!(check(&config, &session("127.0.0.1", false)), AuthOutcome::Success);
    }
}
