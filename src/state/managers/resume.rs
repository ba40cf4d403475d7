//! Resume tokens.
//!
//! A registered session that negotiated the resume capability gets a
//! token; a later connection presenting it before registration takes
//! over the old client instead of registering a new one.

use crate::state::client::Client;
use dashmap::DashMap;
use std::sync::{Arc, Weak};

#[derive(Debug, Default)]
pub struct ResumeManager {
    tokens: DashMap<String, (u64, Weak<Client>)>,
}

impl ResumeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for `client`, replacing any earlier one.
    pub fn generate(&self, client: &Arc<Client>) -> String {
        self.tokens.retain(|_, (id, _)| *id != client.id);
        let token = uuid::Uuid::new_v4().simple().to_string();
        self.tokens
            .insert(token.clone(), (client.id, Arc::downgrade(client)));
        token
    }

    /// Consume `token`. Returns the client if it is still alive.
    pub fn verify(&self, token: &str) -> Option<Arc<Client>> {
        let (_, (_, client)) = self.tokens.remove(token)?;
        client.upgrade()
    }

    pub fn forget(&self, client_id: u64) {
        self.tokens.retain(|_, (id, _)| *id != client_id);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::client::ClientIdentity;

    #[test]
    fn tokens_are_single_use() {
        let resume = ResumeManager::new();
        let client = Client::new(ClientIdentity::default(), "192.0.2.1".parse().unwrap(), 4);
        let first = resume.generate(&client);
        let second = resume.generate(&client);
        assert_eq!(resume.len(), 1);
        assert!(resume.verify(&first).is_none());
        assert_eq!(resume.verify(&second).unwrap().id, client.id);
        assert!(resume.verify(&second).is_none());
    }

    #[test]
    fn dead_clients_do_not_resume() {
        let resume = ResumeManager::new();
        let client = Client::new(ClientIdentity::default(), "192.0.2.1".parse().unwrap(), 4);
        let token = resume.generate(&client);
        drop(client);
        assert!(resume.verify(&token).is_none());
    }
}
