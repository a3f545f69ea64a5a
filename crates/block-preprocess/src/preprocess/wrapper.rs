//! Type erasure for handlers.
//!
//! [`HandlerWrapper`] owns a concrete [`Handler`] together with its per-block
//! cells and exposes it through the object-safe [`ErasedHandler`], so the
//! processor can drive any mix of handlers through the same pipeline.
//!
//! Every result cell of a block is written exactly once, either by
//! [`ErasedHandler::decline`] or by [`ErasedHandler::process`]; draining the
//! cells at the end of the block therefore always terminates. A result is
//! published on the completion stream before its cell is written, so once every
//! cell is set nothing of the block touches the stream any more.
//!
//! A panic in `prefetch` or `process` is caught and turned into a decline for
//! that transaction, keeping the block and the worker alive. The first such
//! panic of a block is kept until [`ErasedHandler::take_panic`].

use crate::preprocess::{
    eventual::Eventual,
    handler::{Handler, ResultCells, ResultHandle, ResultStreams},
    state::StateStore,
    types::{Block, IndexedTx, Receipt, Rules, TxResult, TxnIndex},
};
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::{Mutex, RwLock};
use std::{
    any::Any,
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
};
use tracing::{error, trace};

/// Payload of a caught handler panic.
pub(crate) type PanicPayload = Box<dyn Any + Send + 'static>;

/// Handler operations the processor drives, with the handler's own types erased.
pub(crate) trait ErasedHandler<S: StateStore>: Send + Sync {
    fn name(&self) -> &'static str;

    fn gas(&self, tx: &IndexedTx, rules: &Rules) -> Option<u64>;

    /// Open the cells of a block with `num_txs` transactions.
    fn begin_block(&self, num_txs: usize);

    fn before_block(&self, state: &S, rules: &Rules, block: &Block);

    /// Publish an empty result for a transaction that will not be dispatched.
    fn decline(&self, tx: Arc<IndexedTx>);

    /// Blocks until `before_block` finished.
    fn prefetch(&self, state: &S, tx: Arc<IndexedTx>);

    /// Blocks until the transaction was prefetched. Declines the transaction if
    /// its prefetch panicked.
    fn process(&self, state: &S, tx: Arc<IndexedTx>);

    /// Blocks until every result of the block is published.
    fn post_process(&self);

    /// Blocks until `post_process` finished.
    fn after_block(&self, state: &mut S, block: &Block, receipts: &[Receipt]);

    /// Drain and reset the cells of the block.
    fn end_block(&self);

    /// First panic caught in `prefetch` or `process` since the last call.
    fn take_panic(&self) -> Option<PanicPayload>;
}

/// Sending half of the completion-order stream of a block.
struct Completions<R> {
    sender: Option<Sender<TxResult<R>>>,
    remaining: usize,
}

pub(crate) struct HandlerWrapper<S: StateStore, H: Handler<S>> {
    handler: H,
    common: Eventual<Arc<H::Common>>,
    /// `None` when the transaction's prefetch panicked.
    data: RwLock<Vec<Arc<Eventual<Option<Arc<H::Data>>>>>>,
    results: Arc<ResultCells<H::Output>>,
    completions: Mutex<Completions<H::Output>>,
    process_order: Mutex<Option<Receiver<TxResult<H::Output>>>>,
    aggregated: Eventual<H::Aggregated>,
    panic: Mutex<Option<PanicPayload>>,
    _state: PhantomData<fn(&S)>,
}

impl<S: StateStore, H: Handler<S>> HandlerWrapper<S, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            common: Eventual::new(),
            data: RwLock::new(Vec::new()),
            results: Arc::new(ResultCells::new()),
            completions: Mutex::new(Completions {
                sender: None,
                remaining: 0,
            }),
            process_order: Mutex::new(None),
            aggregated: Eventual::new(),
            panic: Mutex::new(None),
            _state: PhantomData,
        }
    }

    pub(crate) fn result_handle(&self) -> ResultHandle<H::Output> {
        ResultHandle::new(Arc::clone(&self.results))
    }

    fn data_cell(&self, index: TxnIndex) -> Arc<Eventual<Option<Arc<H::Data>>>> {
        Arc::clone(&self.data.read()[index as usize])
    }

    fn publish(&self, result: TxResult<H::Output>) {
        let cell = self.results.cell(result.index());
        {
            let mut completions = self.completions.lock();
            if let Some(sender) = &completions.sender {
                // Sized to the block, never blocks. The receiver may already be gone
                // if `post_process` returned without draining it.
                let _ = sender.send(result.clone());
            }
            completions.remaining = completions.remaining.saturating_sub(1);
            if completions.remaining == 0 {
                // Closes the stream for `post_process`
                completions.sender = None;
            }
        }
        // Last write of the transaction: `end_block` waits for it
        cell.set(result);
    }

    /// Run a handler stage, keeping its panic for `take_panic`.
    fn guard<R>(
        &self,
        stage: &'static str,
        tx: &IndexedTx,
        f: impl FnOnce() -> R,
    ) -> Option<R> {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(output) => Some(output),
            Err(payload) => {
                error!(
                    target: "preprocess",
                    handler = self.name(),
                    txn_idx = tx.index,
                    stage,
                    "Handler panicked, declining transaction"
                );
                let mut panic = self.panic.lock();
                if panic.is_none() {
                    *panic = Some(payload);
                }
                None
            }
        }
    }
}

impl<S: StateStore, H: Handler<S>> ErasedHandler<S> for HandlerWrapper<S, H> {
    fn name(&self) -> &'static str {
        self.handler.name()
    }

    fn gas(&self, tx: &IndexedTx, rules: &Rules) -> Option<u64> {
        self.handler.gas(tx, rules)
    }

    fn begin_block(&self, num_txs: usize) {
        {
            let mut data = self.data.write();
            if data.len() < num_txs {
                data.resize_with(num_txs, || Arc::new(Eventual::new()));
            }
        }
        self.results.begin_block(num_txs);

        let (sender, receiver) = bounded(num_txs);
        *self.completions.lock() = Completions {
            sender: (num_txs > 0).then_some(sender),
            remaining: num_txs,
        };
        *self.process_order.lock() = Some(receiver);
    }

    fn before_block(&self, state: &S, rules: &Rules, block: &Block) {
        let common = self.handler.before_block(state, rules, block);
        self.common.set(Arc::new(common));
    }

    fn decline(&self, tx: Arc<IndexedTx>) {
        self.publish(TxResult::declined(tx));
    }

    fn prefetch(&self, state: &S, tx: Arc<IndexedTx>) {
        let common = self.common.peek_blocking();
        let data = self.guard("prefetch", &tx, || self.handler.prefetch(state, &tx, &common));
        self.data_cell(tx.index).set(data.map(Arc::new));
        trace!(target: "preprocess", handler = self.name(), txn_idx = tx.index, "Prefetched");
    }

    fn process(&self, state: &S, tx: Arc<IndexedTx>) {
        let common = self.common.peek_blocking();
        let output = match self.data_cell(tx.index).peek_blocking() {
            Some(data) => self.guard("process", &tx, || {
                self.handler.process(state, &tx, &common, &data)
            }),
            None => None,
        };
        trace!(target: "preprocess", handler = self.name(), txn_idx = tx.index, "Processed");
        self.publish(TxResult::new(tx, output));
    }

    fn post_process(&self) {
        let Some(process_order) = self.process_order.lock().take() else {
            panic!("post_process for handler {} without begin_block", self.name());
        };
        let common = self.common.peek_blocking();
        let cells = self.results.block_cells();
        let (tx_order_tx, tx_order) = bounded(cells.len());

        let aggregated = thread::scope(|scope| {
            scope.spawn(move || {
                for cell in cells {
                    if tx_order_tx.send(cell.peek_blocking()).is_err() {
                        break;
                    }
                }
            });
            self.handler.post_process(
                &common,
                ResultStreams {
                    tx_order,
                    process_order,
                },
            )
        });
        self.aggregated.set(aggregated);
    }

    fn after_block(&self, state: &mut S, block: &Block, receipts: &[Receipt]) {
        let aggregated = self.aggregated.take_blocking();
        self.handler.after_block(state, aggregated, block, receipts);
    }

    fn end_block(&self) {
        self.results.drain();
        for cell in self.data.read().iter() {
            cell.take();
        }
        self.common.take();
        self.aggregated.take();
        self.process_order.lock().take();
    }

    fn take_panic(&self) -> Option<PanicPayload> {
        self.panic.lock().take()
    }
}
