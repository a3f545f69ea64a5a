//! Per-block distribution of private state copies to worker threads.
//!
//! Workers never share a store. At the start of every block the
//! [`SnapshotDistributor`] publishes a new *generation*: a source copy of the
//! canonical store plus a fresh generation signal. Releasing the previous
//! signal wakes every worker, each of which copies the source under a short
//! exclusive lock (copying is not assumed to be thread-safe), reports on the
//! countdown channel and adopts the new signal. [`SnapshotDistributor::distribute`]
//! returns only once every worker has reported, so no worker can start the
//! block's jobs with a stale copy.
//!
//! The generation signal is a rendezvous channel that never carries a message:
//! dropping its only sender disconnects it, which wakes every receiver at once.

use crate::preprocess::state::StateStore;
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

struct Generation<S> {
    /// Copy of the canonical store that workers copy from, set while distributing.
    source: Option<Arc<Mutex<S>>>,
    /// Signal workers adopt after taking their copy.
    signal: Receiver<()>,
}

pub struct SnapshotDistributor<S> {
    workers: usize,
    generation: Mutex<Generation<S>>,
    /// Dropping this sender releases the generation every worker currently waits on.
    /// Also serializes `distribute` calls.
    release: Mutex<Sender<()>>,
    taken_tx: Sender<()>,
    taken_rx: Receiver<()>,
}

impl<S: StateStore> SnapshotDistributor<S> {
    pub fn new(workers: usize) -> Self {
        let (release, signal) = bounded(0);
        let (taken_tx, taken_rx) = bounded(workers);
        Self {
            workers,
            generation: Mutex::new(Generation {
                source: None,
                signal,
            }),
            release: Mutex::new(release),
            taken_tx,
            taken_rx,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Handle for one worker thread, parked on the current generation.
    pub fn subscribe(self: &Arc<Self>) -> SnapshotReceiver<S> {
        SnapshotReceiver {
            signal: self.generation.lock().signal.clone(),
            distributor: Arc::clone(self),
        }
    }

    /// Block until every worker called [`SnapshotReceiver::ready`].
    pub fn wait_ready(&self) {
        self.wait_for_workers();
    }

    /// Hand every worker a private copy of `store`, returning once all of them
    /// have taken it.
    pub fn distribute(&self, store: &S) {
        let mut release = self.release.lock();
        let (next_release, next_signal) = bounded(0);
        {
            let mut generation = self.generation.lock();
            generation.source = Some(Arc::new(Mutex::new(store.snapshot())));
            generation.signal = next_signal;
        }

        drop(std::mem::replace(&mut *release, next_release));
        self.wait_for_workers();

        self.generation.lock().source = None;
        trace!(target: "preprocess", workers = self.workers, "State snapshots distributed");
    }

    fn wait_for_workers(&self) {
        for _ in 0..self.workers {
            // `taken_tx` lives as long as `self`, so the channel never disconnects.
            let _ = self.taken_rx.recv();
        }
    }
}

/// A worker's view of the distributor.
pub struct SnapshotReceiver<S> {
    distributor: Arc<SnapshotDistributor<S>>,
    signal: Receiver<()>,
}

impl<S: StateStore> SnapshotReceiver<S> {
    /// The signal that disconnects when a new generation is published. Select on
    /// it alongside the job queue, then call [`take`](Self::take).
    pub fn signal(&self) -> &Receiver<()> {
        &self.signal
    }

    /// Initial handshake: report that this worker is up and parked on the
    /// current generation.
    pub fn ready(&self) {
        let _ = self.distributor.taken_tx.send(());
    }

    /// Copy the published source, report it as taken and adopt the next
    /// generation signal. Returns `None` if nothing was published, which only
    /// happens if the signal was released without a `distribute`.
    pub fn take(&mut self) -> Option<S> {
        let (source, signal) = {
            let generation = self.distributor.generation.lock();
            (generation.source.clone(), generation.signal.clone())
        };
        let snapshot = source.map(|source| source.lock().snapshot());
        self.signal = signal;
        let _ = self.distributor.taken_tx.send(());
        snapshot
    }

    /// Block until the next generation is published, then [`take`](Self::take) it.
    pub fn wait(&mut self) -> Option<S> {
        // Nothing is ever sent on the signal; `recv` returns once it disconnects.
        let _ = self.signal.recv();
        self.take()
    }
}
