//! State store boundary for preprocessing.
//!
//! Handlers never touch the canonical store while a block is being
//! preprocessed. Every worker reads from its own copy, taken through
//! [`StateStore::snapshot`] at the start of the block. Only
//! [`Handler::after_block`](super::handler::Handler::after_block) receives the
//! canonical store mutably.
//!
//! # Requirements on implementors
//!
//! - `snapshot` returns a copy that is fully independent of `self`: writes to
//!   either side must never be observable through the other.
//! - `snapshot` is only ever called by one thread at a time on a given instance,
//!   so it does not need to be thread-safe.

use alloy_primitives::{Address, B256};
use std::collections::HashMap;

/// Read access to account-scoped storage.
pub trait StateReader {
    /// Returns the value stored under `key` for `address`, zero if unset.
    fn get_state(&self, address: Address, key: B256) -> B256;
}

/// A mutable key-value state store that can hand out independent copies.
pub trait StateStore: StateReader + Send + Sized + 'static {
    /// Returns an independent, mutable copy of the store.
    fn snapshot(&self) -> Self;

    fn set_state(&mut self, address: Address, key: B256, value: B256);
}

/// In-memory reference store. Copies are deep clones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryState {
    storage: HashMap<Address, HashMap<B256, B256>>,
}

impl InMemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accounts with at least one slot written.
    pub fn num_accounts(&self) -> usize {
        self.storage.len()
    }
}

impl StateReader for InMemoryState {
    fn get_state(&self, address: Address, key: B256) -> B256 {
        self.storage
            .get(&address)
            .and_then(|slots| slots.get(&key))
            .copied()
            .unwrap_or_default()
    }
}

impl StateStore for InMemoryState {
    fn snapshot(&self) -> Self {
        self.clone()
    }

    fn set_state(&mut self, address: Address, key: B256, value: B256) {
        self.storage.entry(address).or_default().insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_slot_reads_zero() {
        let state = InMemoryState::new();
        assert_eq!(
            state.get_state(Address::repeat_byte(1), B256::with_last_byte(1)),
            B256::ZERO
        );
    }

    #[test]
    fn test_snapshot_is_independent() {
        let addr = Address::repeat_byte(0xaa);
        let key = B256::with_last_byte(1);

        let mut canonical = InMemoryState::new();
        canonical.set_state(addr, key, B256::with_last_byte(10));

        let mut copy = canonical.snapshot();
        assert_eq!(copy.get_state(addr, key), B256::with_last_byte(10));

        copy.set_state(addr, key, B256::with_last_byte(20));
        canonical.set_state(addr, B256::with_last_byte(2), B256::with_last_byte(30));

        assert_eq!(canonical.get_state(addr, key), B256::with_last_byte(10));
        assert_eq!(copy.get_state(addr, B256::with_last_byte(2)), B256::ZERO);
        assert_eq!(canonical.num_accounts(), 1);
    }
}
