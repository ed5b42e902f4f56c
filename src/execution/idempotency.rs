//! Client order id generation
//!
//! BingX accepts client order ids of up to 40 characters. Keys are a short
//! prefix plus a v4 uuid, and each key is issued at most once per process.
//! A key is claimed when an order is first submitted under it; claims are
//! never forgotten, so a key cannot reach the exchange twice.

use std::collections::HashSet;
use uuid::Uuid;

use super::order::ExecutionError;

const MAX_KEY_LEN: usize = 40;

#[derive(Debug)]
pub struct KeyGenerator {
    prefix: String,
    issued: HashSet<String>,
    claimed: HashSet<String>,
}

impl KeyGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix: String = prefix
            .into()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        // uuid simple form is 32 chars, one more for the separator
        prefix.truncate(MAX_KEY_LEN - 33);
        Self {
            prefix,
            issued: HashSet::new(),
            claimed: HashSet::new(),
        }
    }

    /// A fresh key that was never issued or registered before
    pub fn next_key(&mut self) -> String {
        loop {
            let key = if self.prefix.is_empty() {
                Uuid::new_v4().simple().to_string()
            } else {
                format!("{}-{}", self.prefix, Uuid::new_v4().simple())
            };
            if self.issued.insert(key.clone()) {
                return key;
            }
        }
    }

    /// Record a key seen elsewhere (adopted orders) so it is never reissued
    pub fn register(&mut self, key: &str) -> Result<(), ExecutionError> {
        if self.issued.insert(key.to_string()) {
            Ok(())
        } else {
            Err(ExecutionError::DuplicateKey(key.to_string()))
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.issued.contains(key)
    }

    /// Mark `key` as used for a submission
    ///
    /// Fails if an order was already submitted or adopted under it. Keys from
    /// `next_key` and `register` can be claimed once.
    pub fn claim(&mut self, key: &str) -> Result<(), ExecutionError> {
        self.issued.insert(key.to_string());
        if self.claimed.insert(key.to_string()) {
            Ok(())
        } else {
            Err(ExecutionError::DuplicateKey(key.to_string()))
        }
    }

    pub fn is_claimed(&self, key: &str) -> bool {
        self.claimed.contains(key)
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new("bxt")
    }
}
