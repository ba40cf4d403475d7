//! Operator block configuration.

use serde::Deserialize;

/// `[[opers]]` entry. Only certificate-fingerprint auto-oper is supported.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OperBlock {
    pub name: String,
    /// Hex SHA-256 fingerprint of the operator's client certificate.
    pub certfp: String,
    /// Grant operator status at registration when the fingerprint matches.
    #[serde(default)]
    pub auto: bool,
}

impl OperBlock {
    pub fn matches_certfp(&self, certfp: &str) -> bool {
        !self.certfp.is_empty() && self.certfp.eq_ignore_ascii_case(certfp)
    }
}
