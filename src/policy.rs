//! Admission checks for observed lock events.
//!
//! A lock that fails a check is logged and skipped; it never produces a
//! record or a mint instruction.

use alloy::primitives::U256;
use std::str::FromStr;

use crate::config::PolicyConfig;
use crate::types::LockEvent;

pub struct LockPolicy {
    min_lock_amount: U256,
    token_allowlist: Vec<String>,
    max_recipient_len: usize,
    max_extra_data_len: usize,
}

impl LockPolicy {
    pub fn new(config: &PolicyConfig) -> eyre::Result<Self> {
        let min_lock_amount = U256::from_str(&config.min_lock_amount)
            .map_err(|e| eyre::eyre!("Invalid min lock amount: {}", e))?;
        Ok(Self {
            min_lock_amount,
            token_allowlist: config
                .token_allowlist
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
            max_recipient_len: config.max_recipient_len,
            max_extra_data_len: config.max_extra_data_len,
        })
    }

    /// Returns `None` when the lock is admissible, otherwise the reason it
    /// was rejected.
    pub fn check(&self, event: &LockEvent) -> Option<String> {
        if !self.token_allowlist.is_empty()
            && !self.token_allowlist.contains(&event.token.to_lowercase())
        {
            return Some(format!("token {} not in allowlist", event.token));
        }
        let amount = match U256::from_str(&event.amount) {
            Ok(a) => a,
            Err(e) => return Some(format!("unparseable amount {}: {}", event.amount, e)),
        };
        if amount < self.min_lock_amount {
            return Some(format!(
                "amount {} below minimum {}",
                event.amount, self.min_lock_amount
            ));
        }
        if event.recipient.len() > self.max_recipient_len {
            return Some(format!(
                "recipient length {} exceeds limit {}",
                event.recipient.len(),
                self.max_recipient_len
            ));
        }
        if event.extra_data.len() > self.max_extra_data_len {
            return Some(format!(
                "extra data length {} exceeds limit {}",
                event.extra_data.len(),
                self.max_extra_data_len
            ));
        }
        None
    }
}
