use std::{
    iter,
    num::NonZeroUsize,
    sync::Arc,
    thread::{self, JoinHandle},
};

use alloy_primitives::B256;
use crossbeam_channel::{Receiver, Sender, bounded, select};
use parking_lot::Mutex;
use tracing::{Span, debug, error, info_span, trace, warn};

use crate::preprocess::{
    error::PreprocessError,
    gas::{GasLedger, PreprocessingGasCharge, intrinsic_gas},
    handler::HandlerRegistry,
    snapshot::{SnapshotDistributor, SnapshotReceiver},
    state::StateStore,
    types::{Block, IndexedTx, Receipt, Rules, Stage},
    wrapper::ErasedHandler,
};

/// Default capacity of each pool's job queue.
pub const DEFAULT_JOB_QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Number of threads running `prefetch`.
    pub prefetch_workers: usize,
    /// Number of threads running `process`.
    pub process_workers: usize,
    /// Capacity of each pool's job queue. Feeder threads block while it is full.
    pub job_queue_depth: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        let parallelism = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4);
        Self {
            prefetch_workers: parallelism,
            process_workers: parallelism,
            job_queue_depth: DEFAULT_JOB_QUEUE_DEPTH,
        }
    }
}

impl ProcessorConfig {
    pub fn with_prefetch_workers(self, prefetch_workers: usize) -> Self {
        Self {
            prefetch_workers,
            ..self
        }
    }

    pub fn with_process_workers(self, process_workers: usize) -> Self {
        Self {
            process_workers,
            ..self
        }
    }

    pub fn with_job_queue_depth(self, job_queue_depth: usize) -> Self {
        Self {
            job_queue_depth,
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), PreprocessError> {
        if self.prefetch_workers == 0 {
            return Err(PreprocessError::InvalidConfig(
                "prefetch_workers must be at least 1",
            ));
        }
        if self.process_workers == 0 {
            return Err(PreprocessError::InvalidConfig(
                "process_workers must be at least 1",
            ));
        }
        Ok(())
    }
}

/// One handler's work on one transaction, dispatched through both pools.
struct Job<S: StateStore> {
    handler: Arc<dyn ErasedHandler<S>>,
    tx: Arc<IndexedTx>,
}

impl<S: StateStore> Clone for Job<S> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            tx: Arc::clone(&self.tx),
        }
    }
}

struct Pools<S: StateStore> {
    prefetch: Sender<Job<S>>,
    process: Sender<Job<S>>,
    workers: Vec<JoinHandle<()>>,
}

/// Background work of the block currently being preprocessed.
struct ActiveBlock {
    number: u64,
    tx_hashes: Vec<B256>,
    /// `before_block` runners and the two feeders.
    threads: Vec<JoinHandle<()>>,
    /// One `post_process` runner per handler, in registration order.
    post_processors: Vec<JoinHandle<()>>,
}

/// Runs registered handlers over every transaction of a block ahead of its
/// serial execution.
///
/// Per block: [`start_block`](Self::start_block) sets up and dispatches the
/// work and returns immediately; serial execution reads results through the
/// handles returned by [`HandlerRegistry::register`] and charges reserved gas
/// through [`PreprocessingGasCharge`]; [`finish_block`](Self::finish_block)
/// finalizes the handlers and returns once nothing from the block is running.
pub struct Processor<S: StateStore> {
    config: ProcessorConfig,
    handlers: Vec<Arc<dyn ErasedHandler<S>>>,
    snapshots: Arc<SnapshotDistributor<S>>,
    ledger: GasLedger,
    pools: Mutex<Option<Pools<S>>>,
    active: Mutex<Option<ActiveBlock>>,
}

impl<S: StateStore> Processor<S> {
    /// Spawns both worker pools and waits until every worker is ready.
    pub fn new(
        config: ProcessorConfig,
        registry: HandlerRegistry<S>,
    ) -> Result<Self, PreprocessError> {
        config.validate()?;

        let snapshots = Arc::new(SnapshotDistributor::new(
            config.prefetch_workers + config.process_workers,
        ));
        let (prefetch, prefetch_jobs) = bounded(config.job_queue_depth);
        let (process, process_jobs) = bounded(config.job_queue_depth);

        let parent_span = Span::current();
        let mut workers = Vec::with_capacity(snapshots.workers());
        for (stage, count, jobs) in [
            (Stage::Prefetch, config.prefetch_workers, prefetch_jobs),
            (Stage::Process, config.process_workers, process_jobs),
        ] {
            for worker_id in 0..count {
                let receiver = snapshots.subscribe();
                let jobs = jobs.clone();
                let worker_span = info_span!(
                    parent: &parent_span,
                    "preprocess_worker",
                    stage = %stage,
                    worker_id = worker_id
                );
                // On failure the queues are dropped, which stops the workers
                // already spawned.
                let handle = thread::Builder::new()
                    .name(format!("preprocess-{stage}-{worker_id}"))
                    .spawn(move || {
                        let _worker_guard = worker_span.entered();
                        run_worker(stage, receiver, jobs);
                    })?;
                workers.push(handle);
            }
        }

        snapshots.wait_ready();
        let handlers = registry.into_handlers();
        debug!(
            target: "preprocess",
            prefetch_workers = config.prefetch_workers,
            process_workers = config.process_workers,
            handlers = handlers.len(),
            "Preprocessing workers ready"
        );

        Ok(Self {
            config,
            handlers,
            snapshots,
            ledger: GasLedger::new(),
            pools: Mutex::new(Some(Pools {
                prefetch,
                process,
                workers,
            })),
            active: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn num_handlers(&self) -> usize {
        self.handlers.len()
    }

    pub fn ledger(&self) -> &GasLedger {
        &self.ledger
    }

    /// Evaluate every handler's eligibility and cost for `tx` and record the
    /// reserved gas in the ledger.
    ///
    /// A zero charge is recorded first, so the gas hook never reports the
    /// transaction as unknown. If the gas left after intrinsic gas cannot cover
    /// the summed cost, every handler is marked ineligible and nothing is
    /// reserved. Intrinsic gas above the gas limit means block validation let an
    /// invalid transaction through; it is returned as an error and the ledger
    /// keeps the zero charge.
    pub fn should_process(
        &self,
        tx: &IndexedTx,
        rules: &Rules,
    ) -> Result<Vec<bool>, PreprocessError> {
        let tx_hash = tx.hash();
        self.ledger.reserve(tx_hash);

        let mut total: u64 = 0;
        let mut eligible: Vec<bool> = self
            .handlers
            .iter()
            .map(|handler| match handler.gas(tx, rules) {
                Some(cost) => {
                    total = total.saturating_add(cost);
                    true
                }
                None => false,
            })
            .collect();

        let intrinsic = intrinsic_gas(
            &tx.tx.input,
            &tx.tx.access_list,
            tx.tx.is_create(),
            rules,
        )?;
        let gas_limit = tx.tx.gas_limit;
        if intrinsic > gas_limit {
            error!(
                target: "preprocess",
                txn_idx = tx.index,
                tx_hash = %tx_hash,
                intrinsic,
                gas_limit,
                "Intrinsic gas exceeds gas limit of a validated transaction"
            );
            return Err(PreprocessError::IntrinsicGasExceedsLimit {
                tx_hash,
                intrinsic,
                gas_limit,
            });
        }

        if gas_limit - intrinsic < total {
            trace!(
                target: "preprocess",
                txn_idx = tx.index,
                available = gas_limit - intrinsic,
                required = total,
                "Insufficient gas for preprocessing"
            );
            eligible.fill(false);
            total = 0;
        }

        self.ledger.record(tx_hash, total);
        Ok(eligible)
    }

    /// Set up preprocessing of `block` and dispatch it to the worker pools.
    ///
    /// Returns as soon as the work is dispatched. Any error is found while
    /// scanning the transactions or spawning the block's threads, before any
    /// handler state is touched, and leaves no ledger entries behind.
    pub fn start_block(
        &self,
        store: &S,
        rules: Rules,
        block: Arc<Block>,
    ) -> Result<(), PreprocessError> {
        let mut active = self.active.lock();
        if let Some(active) = active.as_ref() {
            return Err(PreprocessError::BlockInProgress(active.number));
        }
        let (prefetch, process) = match self.pools.lock().as_ref() {
            Some(pools) => (pools.prefetch.clone(), pools.process.clone()),
            None => return Err(PreprocessError::Closed),
        };

        let txs = block.indexed_transactions();
        let tx_hashes: Vec<B256> = txs.iter().map(|tx| tx.hash()).collect();
        let mut eligibility = Vec::with_capacity(txs.len());
        for tx in &txs {
            match self.should_process(tx, &rules) {
                Ok(eligible) => eligibility.push(eligible),
                Err(err) => {
                    self.ledger.clear(&tx_hashes[..=tx.index as usize]);
                    return Err(err);
                }
            }
        }

        let spawned = match BlockThreads::spawn(self.handlers.len()) {
            Ok(spawned) => spawned,
            Err(err) => {
                self.ledger.clear(&tx_hashes);
                return Err(err);
            }
        };

        for handler in &self.handlers {
            handler.begin_block(txs.len());
        }
        self.snapshots.distribute(store);

        let mut threads = Vec::with_capacity(self.handlers.len() + 2);
        for (handler, thread) in self.handlers.iter().zip(spawned.before_block) {
            let handler = Arc::clone(handler);
            let snapshot = store.snapshot();
            let block = Arc::clone(&block);
            threads.push(thread.run(move || {
                handler.before_block(&snapshot, &rules, &block);
            }));
        }

        let mut jobs = Vec::new();
        for (tx, eligible) in txs.iter().zip(&eligibility) {
            for (handler, eligible) in self.handlers.iter().zip(eligible) {
                if *eligible {
                    jobs.push(Job {
                        handler: Arc::clone(handler),
                        tx: Arc::clone(tx),
                    });
                } else {
                    handler.decline(Arc::clone(tx));
                }
            }
        }
        let num_jobs = jobs.len();
        let jobs = Arc::new(jobs);
        let queues = [(Stage::Prefetch, prefetch), (Stage::Process, process)];
        for ((stage, queue), thread) in queues.into_iter().zip(spawned.feeders) {
            let jobs = Arc::clone(&jobs);
            threads.push(thread.run(move || {
                feed(stage, &queue, &jobs);
            }));
        }

        let post_processors = self
            .handlers
            .iter()
            .zip(spawned.post_process)
            .map(|(handler, thread)| {
                let handler = Arc::clone(handler);
                thread.run(move || handler.post_process())
            })
            .collect();

        debug!(
            target: "preprocess",
            block_number = block.number(),
            txs = txs.len(),
            jobs = num_jobs,
            "Started block preprocessing"
        );
        *active = Some(ActiveBlock {
            number: block.number(),
            tx_hashes,
            threads,
            post_processors,
        });
        Ok(())
    }

    /// Run every handler's `after_block`, one at a time in registration order,
    /// then reset the block's cells and ledger entries.
    ///
    /// Once this returns, nothing from the block is running. Results of the
    /// block are no longer readable.
    ///
    /// # Panics
    ///
    /// Re-raises the first panic of a handler stage during the block. Panics in
    /// `prefetch` or `process` are raised after the block is fully reset, so the
    /// processor stays usable.
    pub fn finish_block(&self, store: &mut S, block: &Block, receipts: &[Receipt]) {
        let Some(active) = self.active.lock().take() else {
            warn!(
                target: "preprocess",
                block_number = block.number(),
                "finish_block called without a started block"
            );
            return;
        };
        debug_assert_eq!(
            active.number,
            block.number(),
            "finish_block for a different block than started"
        );

        for handle in active.threads {
            join_block_thread(handle);
        }
        for (handler, post_processor) in self.handlers.iter().zip(active.post_processors) {
            join_block_thread(post_processor);
            handler.after_block(store, block, receipts);
        }
        let mut panic = None;
        for handler in &self.handlers {
            handler.end_block();
            if let Some(payload) = handler.take_panic() {
                panic = panic.or(Some(payload));
            }
        }
        self.ledger.clear(&active.tx_hashes);
        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }

        debug!(
            target: "preprocess",
            block_number = active.number,
            txs = active.tx_hashes.len(),
            "Finished block preprocessing"
        );
    }

    /// Stop both worker pools and wait for every worker to exit. Call after the
    /// last `finish_block`.
    pub fn close(&self) {
        let Some(pools) = self.pools.lock().take() else {
            warn!(target: "preprocess", "Processor already closed");
            return;
        };
        if self.active.lock().is_some() {
            warn!(target: "preprocess", "Closing processor with a block in progress");
        }

        let Pools {
            prefetch,
            process,
            workers,
        } = pools;
        // Disconnected queues end the worker loops
        drop(prefetch);
        drop(process);
        for worker in workers {
            if worker.join().is_err() {
                error!(target: "preprocess", "Preprocessing worker panicked");
            }
        }
        debug!(target: "preprocess", "Processor closed");
    }

    pub fn is_closed(&self) -> bool {
        self.pools.lock().is_none()
    }
}

impl<S: StateStore> PreprocessingGasCharge for Processor<S> {
    fn preprocessing_gas_charge(&self, tx_hash: B256) -> Result<u64, PreprocessError> {
        self.ledger.preprocessing_gas_charge(tx_hash)
    }
}

impl<S: StateStore> Drop for Processor<S> {
    fn drop(&mut self) {
        if self.pools.get_mut().is_some() {
            self.close();
        }
    }
}

fn run_worker<S: StateStore>(
    stage: Stage,
    mut snapshots: SnapshotReceiver<S>,
    jobs: Receiver<Job<S>>,
) {
    snapshots.ready();

    let mut state: Option<S> = None;
    loop {
        let signal = snapshots.signal().clone();
        select! {
            recv(signal) -> _ => {
                state = snapshots.take();
                trace!(target: "preprocess", "Took state snapshot");
            }
            recv(jobs) -> job => {
                let Ok(Job { handler, tx }) = job else {
                    break;
                };
                // Jobs are only dispatched after every worker took its snapshot
                let Some(state) = state.as_ref() else {
                    panic!("{stage} job for transaction {} before any state snapshot", tx.index);
                };
                match stage {
                    Stage::Prefetch => handler.prefetch(state, tx),
                    Stage::Process => handler.process(state, tx),
                }
            }
        }
    }

    debug!(target: "preprocess", "Worker thread exiting");
}

fn feed<S: StateStore>(stage: Stage, queue: &Sender<Job<S>>, jobs: &[Job<S>]) {
    for job in jobs {
        if queue.send(job.clone()).is_err() {
            warn!(target: "preprocess", %stage, "Job queue closed while feeding block");
            return;
        }
    }
}

type BlockTask = Box<dyn FnOnce() + Send + 'static>;

/// A per-block thread, spawned before the block touches any handler state and
/// idle until [`run`](Self::run) hands it its task.
struct BlockThread {
    start: Sender<BlockTask>,
    handle: JoinHandle<()>,
}

impl BlockThread {
    fn spawn(name: &'static str) -> Result<Self, PreprocessError> {
        let (start, task) = bounded::<BlockTask>(1);
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            // Disconnected without a task when the block setup is rolled back
            if let Ok(task) = task.recv() {
                task();
            }
        })?;
        Ok(Self { start, handle })
    }

    fn run(self, task: impl FnOnce() + Send + 'static) -> JoinHandle<()> {
        // The thread holds the receiver until it gets its task
        let _ = self.start.send(Box::new(task));
        self.handle
    }

    /// Release a thread that never got a task and wait for it to exit.
    fn cancel(self) {
        let Self { start, handle } = self;
        drop(start);
        let _ = handle.join();
    }
}

/// Every thread a block needs, spawned up front so that a spawn failure leaves
/// nothing half started.
struct BlockThreads {
    /// One per handler.
    before_block: Vec<BlockThread>,
    /// Prefetch feeder, then process feeder.
    feeders: Vec<BlockThread>,
    /// One per handler.
    post_process: Vec<BlockThread>,
}

impl BlockThreads {
    fn spawn(handlers: usize) -> Result<Self, PreprocessError> {
        Self::spawn_with(handlers, BlockThread::spawn)
    }

    fn spawn_with(
        handlers: usize,
        mut spawn: impl FnMut(&'static str) -> Result<BlockThread, PreprocessError>,
    ) -> Result<Self, PreprocessError> {
        let names = iter::repeat_n("preprocess-before-block", handlers)
            .chain(iter::repeat_n("preprocess-feeder", 2))
            .chain(iter::repeat_n("preprocess-post-process", handlers));

        let mut spawned = Vec::with_capacity(2 * handlers + 2);
        for name in names {
            match spawn(name) {
                Ok(thread) => spawned.push(thread),
                Err(err) => {
                    warn!(target: "preprocess", %err, "Rolling back block threads");
                    spawned.into_iter().for_each(BlockThread::cancel);
                    return Err(err);
                }
            }
        }

        let post_process = spawned.split_off(handlers + 2);
        let feeders = spawned.split_off(handlers);
        Ok(Self {
            before_block: spawned,
            feeders,
            post_process,
        })
    }
}

/// Re-raise a panic from a block's background thread on the caller.
fn join_block_thread(handle: JoinHandle<()>) {
    if let Err(panic) = handle.join() {
        std::panic::resume_unwind(panic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::{
        handler::{Handler, ResultStreams},
        state::InMemoryState,
        types::{Header, Transaction},
    };
    use alloy_primitives::{Address, Bytes};

    /// Accepts every transaction whose first calldata byte is non-zero.
    struct FlagHandler {
        cost: u64,
    }

    impl Handler<InMemoryState> for FlagHandler {
        type Common = ();
        type Data = ();
        type Output = u8;
        type Aggregated = usize;

        fn gas(&self, tx: &IndexedTx, _rules: &Rules) -> Option<u64> {
            tx.tx
                .input
                .first()
                .is_some_and(|flag| *flag != 0)
                .then_some(self.cost)
        }

        fn before_block(&self, _: &InMemoryState, _: &Rules, _: &Block) {}

        fn prefetch(&self, _: &InMemoryState, _: &IndexedTx, _: &()) {}

        fn process(&self, _: &InMemoryState, tx: &IndexedTx, _: &(), _: &()) -> u8 {
            tx.tx.input[0]
        }

        fn post_process(&self, _: &(), results: ResultStreams<u8>) -> usize {
            results.process_order.iter().count()
        }

        fn after_block(&self, _: &mut InMemoryState, _: usize, _: &Block, _: &[Receipt]) {}
    }

    fn tx(i: u8, flag: u8, gas_limit: u64) -> Transaction {
        Transaction {
            hash: B256::with_last_byte(i),
            to: Some(Address::repeat_byte(0x42)),
            gas_limit,
            input: Bytes::from(vec![flag]),
            access_list: Default::default(),
        }
    }

    fn block(number: u64, transactions: Vec<Transaction>) -> Arc<Block> {
        Arc::new(Block::new(
            Header {
                number,
                extra_data: Bytes::new(),
            },
            transactions,
        ))
    }

    fn config() -> ProcessorConfig {
        ProcessorConfig::default()
            .with_prefetch_workers(2)
            .with_process_workers(2)
            .with_job_queue_depth(4)
    }

    fn processor(cost: u64) -> (Processor<InMemoryState>, crate::preprocess::ResultHandle<u8>) {
        let mut registry = HandlerRegistry::new();
        let results = registry.register(FlagHandler { cost });
        (Processor::new(config(), registry).unwrap(), results)
    }

    #[test]
    fn test_config_validation() {
        assert!(config().validate().is_ok());
        assert!(matches!(
            config().with_prefetch_workers(0).validate(),
            Err(PreprocessError::InvalidConfig(_))
        ));
        assert!(matches!(
            Processor::<InMemoryState>::new(config().with_process_workers(0), HandlerRegistry::new()),
            Err(PreprocessError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_new_and_close() {
        let (processor, _) = processor(1);
        assert_eq!(processor.num_handlers(), 1);
        assert!(!processor.is_closed());
        processor.close();
        assert!(processor.is_closed());
        // Second close is a no-op
        processor.close();
    }

    #[test]
    fn test_empty_block() {
        let (processor, _) = processor(1);
        let mut state = InMemoryState::new();
        let empty = block(1, vec![]);

        processor.start_block(&state, Rules::latest(), Arc::clone(&empty)).unwrap();
        processor.finish_block(&mut state, &empty, &[]);
        assert!(processor.ledger().is_empty());
    }

    #[test]
    fn test_should_process_records_charge() {
        let (processor, _) = processor(5_000);
        let rules = Rules::latest();
        let intrinsic = 21_000 + 16;

        let covered = IndexedTx::new(0, tx(0, 1, intrinsic + 5_000));
        assert_eq!(processor.should_process(&covered, &rules).unwrap(), vec![true]);
        assert_eq!(processor.preprocessing_gas_charge(covered.hash()).unwrap(), 5_000);

        let short = IndexedTx::new(1, tx(1, 1, intrinsic + 4_999));
        assert_eq!(processor.should_process(&short, &rules).unwrap(), vec![false]);
        assert_eq!(processor.preprocessing_gas_charge(short.hash()).unwrap(), 0);

        let declined = IndexedTx::new(2, tx(2, 0, intrinsic));
        assert_eq!(processor.should_process(&declined, &rules).unwrap(), vec![false]);
        assert_eq!(processor.preprocessing_gas_charge(declined.hash()).unwrap(), 0);
    }

    #[test]
    fn test_intrinsic_gas_violation_aborts_block() {
        let (processor, results) = processor(1);
        let mut state = InMemoryState::new();
        let bad = block(
            7,
            vec![tx(0, 1, 100_000), tx(1, 1, 20_000), tx(2, 1, 100_000)],
        );

        let err = processor
            .start_block(&state, Rules::latest(), Arc::clone(&bad))
            .unwrap_err();
        assert!(matches!(
            err,
            PreprocessError::IntrinsicGasExceedsLimit { gas_limit: 20_000, .. }
        ));
        assert!(processor.ledger().is_empty());

        // The processor is still usable for the next block
        let good = block(8, vec![tx(0, 3, 100_000), tx(1, 0, 100_000)]);
        processor.start_block(&state, Rules::latest(), Arc::clone(&good)).unwrap();
        assert_eq!(results.result(0), Some(3));
        assert_eq!(results.result(1), None);
        processor.finish_block(&mut state, &good, &[]);
    }

    #[test]
    fn test_start_block_twice_rejected() {
        let (processor, _) = processor(1);
        let mut state = InMemoryState::new();
        let first = block(1, vec![tx(0, 1, 100_000)]);

        processor.start_block(&state, Rules::latest(), Arc::clone(&first)).unwrap();
        assert!(matches!(
            processor.start_block(&state, Rules::latest(), block(2, vec![])),
            Err(PreprocessError::BlockInProgress(1))
        ));
        processor.finish_block(&mut state, &first, &[]);
    }

    #[test]
    fn test_start_block_after_close() {
        let (processor, _) = processor(1);
        processor.close();
        assert!(matches!(
            processor.start_block(&InMemoryState::new(), Rules::latest(), block(1, vec![])),
            Err(PreprocessError::Closed)
        ));
    }

    #[test]
    fn test_block_thread_runs_task() {
        let (done_tx, done_rx) = bounded(1);
        let thread = BlockThread::spawn("preprocess-test").unwrap();
        thread
            .run(move || done_tx.send(7u8).unwrap())
            .join()
            .unwrap();
        assert_eq!(done_rx.try_recv(), Ok(7));
    }

    #[test]
    fn test_block_thread_spawn_failure_rolls_back() {
        let mut calls = 0;
        let result = BlockThreads::spawn_with(2, |name| {
            calls += 1;
            if calls == 3 {
                return Err(PreprocessError::Spawn(std::io::Error::other("no threads left")));
            }
            BlockThread::spawn(name)
        });
        // Both threads spawned before the failure were released and joined
        assert!(matches!(result, Err(PreprocessError::Spawn(_))));
        assert_eq!(calls, 3);

        let threads = BlockThreads::spawn(2).unwrap();
        assert_eq!(threads.before_block.len(), 2);
        assert_eq!(threads.feeders.len(), 2);
        assert_eq!(threads.post_process.len(), 2);
        for thread in threads
            .before_block
            .into_iter()
            .chain(threads.feeders)
            .chain(threads.post_process)
        {
            thread.cancel();
        }
    }

    #[test]
    fn test_finish_without_start_is_noop() {
        let (processor, _) = processor(1);
        let mut state = InMemoryState::new();
        processor.finish_block(&mut state, &block(1, vec![]), &[]);
    }
}
