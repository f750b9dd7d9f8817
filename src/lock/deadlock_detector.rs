use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use crate::common::{DbError, Result, TransactionID, VictimStrategyKind};
use crate::lock::WaitForGraph;

/// Picks the transaction of a deadlock cycle that gets aborted.
pub trait VictimStrategy: Send + Sync {
    /// `cycle` is never empty.
    fn select(&self, cycle: &[TransactionID]) -> TransactionID;
}

/// Aborts the most recently started transaction of the cycle.
pub struct YoungestVictim;

impl VictimStrategy for YoungestVictim {
    fn select(&self, cycle: &[TransactionID]) -> TransactionID {
        cycle.iter().copied().max().unwrap_or(TransactionID::NONE)
    }
}

/// Aborts the earliest started transaction of the cycle.
pub struct OldestVictim;

impl VictimStrategy for OldestVictim {
    fn select(&self, cycle: &[TransactionID]) -> TransactionID {
        cycle.iter().copied().min().unwrap_or(TransactionID::NONE)
    }
}

pub fn victim_strategy(kind: VictimStrategyKind) -> Box<dyn VictimStrategy> {
    match kind {
        VictimStrategyKind::Youngest => Box::new(YoungestVictim),
        VictimStrategyKind::Oldest => Box::new(OldestVictim),
    }
}

#[derive(Debug, Default)]
struct DetectorStats {
    deadlocks_detected: AtomicU64,
    victims_signalled: AtomicU64,
}

/// Periodically searches the wait-for graph for cycles and sends one victim
/// per cycle found to the receiver returned by [`DeadlockDetector::start`].
pub struct DeadlockDetector {
    graph: Arc<WaitForGraph>,
    strategy: Arc<dyn VictimStrategy>,
    stats: Arc<DetectorStats>,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl DeadlockDetector {
    /// Spawns the detector thread.
    pub fn start(
        graph: Arc<WaitForGraph>,
        interval: Duration,
        strategy: Box<dyn VictimStrategy>,
    ) -> Result<(Self, Receiver<TransactionID>)> {
        if interval.is_zero() {
            return Err(DbError::InvalidConfig(
                "deadlock detection interval must be non-zero".to_string(),
            ));
        }

        let strategy: Arc<dyn VictimStrategy> = Arc::from(strategy);
        let stats = Arc::new(DetectorStats::default());
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
        let (victim_tx, victim_rx) = channel::unbounded();

        let worker_graph = Arc::clone(&graph);
        let worker_strategy = Arc::clone(&strategy);
        let worker_stats = Arc::clone(&stats);
        let worker = thread::Builder::new()
            .name("deadlock-detector".to_owned())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let victim = match detect_round(&worker_graph, worker_strategy.as_ref(), &worker_stats) {
                            Some(victim) => victim,
                            None => continue,
                        };
                        if victim_tx.send(victim).is_err() {
                            debug!("victim receiver dropped, deadlock detector exits");
                            break;
                        }
                        worker_stats.victims_signalled.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        info!("deadlock detector started, interval {:?}", interval);
        Ok((
            Self {
                graph,
                strategy,
                stats,
                shutdown: Some(shutdown_tx),
                worker: Some(worker),
            },
            victim_rx,
        ))
    }

    /// Runs one detection round on the calling thread. The victim is returned,
    /// not signalled.
    pub fn detect_once(&self) -> Option<TransactionID> {
        detect_round(&self.graph, self.strategy.as_ref(), &self.stats)
    }

    pub fn deadlocks_detected(&self) -> u64 {
        self.stats.deadlocks_detected.load(Ordering::SeqCst)
    }

    pub fn victims_signalled(&self) -> u64 {
        self.stats.victims_signalled.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn stop(&mut self) {
        // Dropping the sender wakes the worker as well
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("deadlock detector thread panicked");
            }
            info!(
                "deadlock detector stopped: {} deadlocks detected, {} victims signalled",
                self.deadlocks_detected(),
                self.victims_signalled()
            );
        }
    }
}

impl Drop for DeadlockDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn detect_round(graph: &WaitForGraph, strategy: &dyn VictimStrategy, stats: &DetectorStats) -> Option<TransactionID> {
    let cycle = graph.detect_cycle()?;
    let victim = strategy.select(&cycle);
    stats.deadlocks_detected.fetch_add(1, Ordering::SeqCst);
    let ids: Vec<u32> = cycle.iter().map(|tx| tx.0).collect();
    warn!("deadlock among transactions {:?}, aborting {}", ids, victim);
    Some(victim)
}
