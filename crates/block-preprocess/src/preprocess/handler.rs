//! Pluggable per-transaction precomputation.
//!
//! A [`Handler`] declares which transactions it wants and how much gas it
//! reserves for them, then runs in stages:
//!
//! 1. [`gas`](Handler::gas): eligibility and cost, evaluated once per transaction
//!    while the block is being set up.
//! 2. [`before_block`](Handler::before_block): block-scoped precomputation whose
//!    output (`Common`) is shared with every later stage.
//! 3. [`prefetch`](Handler::prefetch): per-transaction, I/O-light state reads.
//! 4. [`process`](Handler::process): per-transaction computation producing the
//!    result exposed through [`ResultHandle::result`].
//! 5. [`post_process`](Handler::post_process): online aggregation over all results.
//! 6. [`after_block`](Handler::after_block): finalization, the only stage allowed to
//!    write to the canonical state.
//!
//! Stages 3 and 4 run on worker pools and may execute in any order across
//! transactions. Stages 2 to 4 receive a private, block-scoped state copy whose
//! writes are never seen by anyone else.

use crate::preprocess::{
    eventual::Eventual,
    state::StateStore,
    types::{Block, IndexedTx, Receipt, Rules, TxResult, TxnIndex},
    wrapper::{ErasedHandler, HandlerWrapper},
};
use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

pub trait Handler<S: StateStore>: Send + Sync + 'static {
    /// Output of `before_block`, shared by every transaction of the block.
    type Common: Send + Sync + 'static;
    /// Output of `prefetch`, consumed by `process` for the same transaction.
    type Data: Send + Sync + 'static;
    /// Per-transaction result.
    type Output: Clone + Send + Sync + 'static;
    /// Output of `post_process`, consumed by `after_block`.
    type Aggregated: Send + 'static;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Returns the gas to reserve if the handler wants to process `tx`, `None` to
    /// decline it.
    fn gas(&self, tx: &IndexedTx, rules: &Rules) -> Option<u64>;

    fn before_block(&self, state: &S, rules: &Rules, block: &Block) -> Self::Common;

    fn prefetch(&self, state: &S, tx: &IndexedTx, common: &Self::Common) -> Self::Data;

    fn process(
        &self,
        state: &S,
        tx: &IndexedTx,
        common: &Self::Common,
        data: &Self::Data,
    ) -> Self::Output;

    /// Aggregate the block's results. Both streams carry one entry per
    /// transaction in the block, declines included, and close once complete.
    fn post_process(
        &self,
        common: &Self::Common,
        results: ResultStreams<Self::Output>,
    ) -> Self::Aggregated;

    /// Runs after the block executed. Handlers are called one at a time, in
    /// registration order.
    fn after_block(
        &self,
        state: &mut S,
        aggregated: Self::Aggregated,
        block: &Block,
        receipts: &[Receipt],
    );
}

/// The two views `post_process` gets over a block's results.
pub struct ResultStreams<R> {
    /// Strictly increasing by transaction index.
    pub tx_order: Receiver<TxResult<R>>,
    /// Completion order of the process pool.
    pub process_order: Receiver<TxResult<R>>,
}

impl<R> fmt::Debug for ResultStreams<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStreams")
            .field("tx_order", &self.tx_order.len())
            .field("process_order", &self.process_order.len())
            .finish()
    }
}

/// Positional per-transaction result cells of one handler.
#[derive(Debug)]
pub(crate) struct ResultCells<R> {
    cells: RwLock<Vec<Arc<Eventual<TxResult<R>>>>>,
    /// Transactions in the block currently started, zero between blocks.
    block_len: AtomicUsize,
}

impl<R> ResultCells<R> {
    pub(crate) fn new() -> Self {
        Self {
            cells: RwLock::new(Vec::new()),
            block_len: AtomicUsize::new(0),
        }
    }

    /// Grow to `len` cells if needed and open them for a new block.
    pub(crate) fn begin_block(&self, len: usize) {
        {
            let mut cells = self.cells.write();
            if cells.len() < len {
                cells.resize_with(len, || Arc::new(Eventual::new()));
            }
        }
        self.block_len.store(len, Ordering::SeqCst);
    }

    pub(crate) fn block_len(&self) -> usize {
        self.block_len.load(Ordering::SeqCst)
    }

    /// Shared handle to the cell of transaction `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not part of the block currently started.
    pub(crate) fn cell(&self, index: TxnIndex) -> Arc<Eventual<TxResult<R>>> {
        let block_len = self.block_len();
        assert!(
            (index as usize) < block_len,
            "result requested for transaction {index} outside the started block of {block_len} transactions"
        );
        Arc::clone(&self.cells.read()[index as usize])
    }

    /// Cells of the current block, in transaction order.
    pub(crate) fn block_cells(&self) -> Vec<Arc<Eventual<TxResult<R>>>> {
        self.cells.read()[..self.block_len()].to_vec()
    }

    /// Wait for every cell of the current block and empty it.
    pub(crate) fn drain(&self) {
        for cell in self.block_cells() {
            cell.take_blocking();
        }
        self.block_len.store(0, Ordering::SeqCst);
    }
}

/// Read access to one handler's per-transaction results, typically held by the
/// precompile exposing them during serial execution.
pub struct ResultHandle<R> {
    cells: Arc<ResultCells<R>>,
}

impl<R> ResultHandle<R> {
    pub(crate) fn new(cells: Arc<ResultCells<R>>) -> Self {
        Self { cells }
    }
}

impl<R> Clone for ResultHandle<R> {
    fn clone(&self) -> Self {
        Self {
            cells: Arc::clone(&self.cells),
        }
    }
}

impl<R: Clone> ResultHandle<R> {
    /// Blocks until the handler is done with transaction `index`, then returns its
    /// result, or `None` if the handler declined it.
    ///
    /// May be called any number of times, from any thread, between
    /// `start_block` and `finish_block`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the block currently started.
    pub fn result(&self, index: TxnIndex) -> Option<R> {
        self.cells.cell(index).peek_blocking().result
    }
}

impl<R> fmt::Debug for ResultHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultHandle")
            .field("block_len", &self.cells.block_len())
            .finish()
    }
}

/// Handlers to run, in registration order. Passed to
/// [`Processor::new`](super::processor::Processor::new).
pub struct HandlerRegistry<S: StateStore> {
    handlers: Vec<Arc<dyn ErasedHandler<S>>>,
}

impl<S: StateStore> HandlerRegistry<S> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register `handler`, returning the handle through which its results are read.
    pub fn register<H: Handler<S>>(&mut self, handler: H) -> ResultHandle<H::Output> {
        let wrapper = HandlerWrapper::new(handler);
        let handle = wrapper.result_handle();
        self.handlers.push(Arc::new(wrapper));
        handle
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn into_handlers(self) -> Vec<Arc<dyn ErasedHandler<S>>> {
        self.handlers
    }
}

impl<S: StateStore> Default for HandlerRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
