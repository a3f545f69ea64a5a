//! Error types for the preprocessing pipeline.

use alloy_primitives::B256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessError {
    /// Intrinsic gas does not fit in a `u64`.
    #[error("gas uint64 overflow")]
    GasUintOverflow,

    /// Intrinsic gas exceeds a gas limit that block validation already accepted.
    /// This is a consensus invariant violation elsewhere, not a retryable condition.
    #[error("transaction {tx_hash}: intrinsic gas {intrinsic} exceeds gas limit {gas_limit}")]
    IntrinsicGasExceedsLimit {
        tx_hash: B256,
        intrinsic: u64,
        gas_limit: u64,
    },

    /// The gas hook was queried for a transaction outside the current block.
    #[error("transaction {0} unknown to preprocessing gas ledger")]
    UnknownTransaction(B256),

    #[error("block {0} is still being preprocessed")]
    BlockInProgress(u64),

    #[error("processor is closed")]
    Closed,

    #[error("invalid processor config: {0}")]
    InvalidConfig(&'static str),

    #[error("failed to spawn preprocessing thread: {0}")]
    Spawn(#[from] std::io::Error),
}
