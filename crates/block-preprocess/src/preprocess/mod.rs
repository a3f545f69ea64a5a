//! Block preprocessing: parallel per-transaction precomputation ahead of
//! serial block execution.
//!
//! Registered handlers declare per transaction whether they want to run and how
//! much gas they reserve. While the block executes serially, worker pools run
//! each handler's `prefetch` and `process` stages on private state copies, and
//! the interpreter reads the results through a [`ResultHandle`], blocking only
//! when a result is not ready yet.
//!
//! # Architecture
//!
//! - [`types`]: Transactions, blocks, receipts and fork rules
//! - [`eventual`]: Write-once, broadcast-read cells with reset
//! - [`state`]: State access traits and an in-memory store
//! - [`snapshot`]: Per-block distribution of state copies to workers
//! - [`gas`]: Intrinsic gas and the preprocessing gas ledger
//! - [`handler`]: The handler trait, registry and result handles
//! - [`wrapper`]: Per-handler block bookkeeping behind a type-erased interface
//! - [`processor`]: Worker pools and per-block orchestration

pub mod error;
pub mod eventual;
pub mod gas;
pub mod handler;
pub mod processor;
pub mod snapshot;
pub mod state;
pub mod types;
pub(crate) mod wrapper;


// Re-export commonly used types
pub use error::PreprocessError;
pub use eventual::Eventual;
pub use gas::{GasLedger, PreprocessingGasCharge, intrinsic_gas};
pub use handler::{Handler, HandlerRegistry, ResultHandle, ResultStreams};
pub use processor::{DEFAULT_JOB_QUEUE_DEPTH, Processor, ProcessorConfig};
pub use snapshot::{SnapshotDistributor, SnapshotReceiver};
pub use state::{InMemoryState, StateReader, StateStore};
pub use types::{
    Block, Header, IndexedTx, Receipt, Rules, Stage, Transaction, TxResult, TxnIndex,
};
