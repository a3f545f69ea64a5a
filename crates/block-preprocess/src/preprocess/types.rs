//! Core types for the preprocessing pipeline.
//!
//! This module defines the block-level types the pipeline consumes from the
//! transaction/block collaborator, plus the per-transaction identity and result
//! types that flow between pipeline stages:
//! - Transaction indexing (`TxnIndex`, `IndexedTx`)
//! - Block, header and receipt views
//! - Protocol activation flags (`Rules`)
//! - Per-transaction handler results (`TxResult`)

use alloy_eips::eip2930::AccessList;
use alloy_primitives::{Address, B256, Bytes};
use derive_more::Display;
use std::{fmt, sync::Arc};

/// Index of a transaction within a block (0-based).
pub type TxnIndex = u32;

/// A transaction as seen by the preprocessing pipeline.
///
/// Only the fields needed for eligibility, intrinsic gas and handler logic are
/// carried; the hash is the stable identity assigned by the block collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Stable transaction hash, used as the gas ledger key
    pub hash: B256,
    /// Destination address, `None` for contract creation
    pub to: Option<Address>,
    /// Declared gas limit
    pub gas_limit: u64,
    /// Calldata (or init code for creations)
    pub input: Bytes,
    /// EIP-2930 access list
    pub access_list: AccessList,
}

impl Transaction {
    /// Returns true if the transaction creates a contract.
    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }
}

/// A transaction paired with its position in the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedTx {
    pub index: TxnIndex,
    pub tx: Transaction,
}

impl IndexedTx {
    pub fn new(index: TxnIndex, tx: Transaction) -> Self {
        Self { index, tx }
    }

    pub fn hash(&self) -> B256 {
        self.tx.hash
    }
}

impl fmt::Display for IndexedTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(txn={}, hash={})", self.index, self.tx.hash)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub number: u64,
    /// Arbitrary header "extra" bytes
    pub extra_data: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Number of transactions in the block.
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Pairs every transaction with its position, shared so the same value can be
    /// handed to every handler and both worker pools without copying.
    pub fn indexed_transactions(&self) -> Vec<Arc<IndexedTx>> {
        self.transactions
            .iter()
            .enumerate()
            .map(|(index, tx)| Arc::new(IndexedTx::new(index as TxnIndex, tx.clone())))
            .collect()
    }
}

/// Post-execution receipt, handed to handlers at the end of the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub success: bool,
    pub gas_used: u64,
}

/// Protocol activation flags relevant to intrinsic gas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rules {
    /// Contract creation costs 53,000 base gas
    pub is_homestead: bool,
    /// EIP-2028: non-zero calldata bytes cost 16 instead of 68
    pub is_istanbul: bool,
    /// EIP-3860: init code is charged per 32-byte word
    pub is_shanghai: bool,
}

impl Rules {
    /// All activation flags set, i.e. a post-Shanghai chain.
    pub const fn latest() -> Self {
        Self {
            is_homestead: true,
            is_istanbul: true,
            is_shanghai: true,
        }
    }
}

/// Pipeline stage a worker pool serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Stage {
    #[display("prefetch")]
    Prefetch,
    #[display("process")]
    Process,
}

/// Result of one handler for one transaction.
///
/// `result` is `None` when the handler declined the transaction, or when the
/// transaction could not cover the handler's gas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxResult<R> {
    pub tx: Arc<IndexedTx>,
    pub result: Option<R>,
}

impl<R> TxResult<R> {
    pub fn new(tx: Arc<IndexedTx>, result: Option<R>) -> Self {
        Self { tx, result }
    }

    pub fn declined(tx: Arc<IndexedTx>) -> Self {
        Self { tx, result: None }
    }

    pub fn index(&self) -> TxnIndex {
        self.tx.index
    }

    pub fn is_declined(&self) -> bool {
        self.result.is_none()
    }
}
