//! The polling loop: pull a batch of new lines, run each through
//! extract → store → (terminal) gate → sink, clear the store, sleep,
//! repeat until interrupted.

use crate::emit::EmissionGate;
use crate::extract;
use crate::sink::RotatingSink;
use crate::store::CorrelationStore;
use crate::tail::LineSource;
use std::time::Duration;

/// Counters for one processed batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub lines: u64,
    pub unmatched: u64,
    pub extract_errors: u64,
    pub emitted: u64,
    /// Terminal records the strict gate refused.
    pub dropped: u64,
    /// Terminal lines for ids already written out.
    pub duplicates: u64,
}

/// Single-writer pipeline over one line source. The store is owned here
/// and reset explicitly at the end of each cycle; nothing else touches it.
pub struct Daemon<S: LineSource> {
    source: S,
    store: CorrelationStore,
    gate: EmissionGate,
    sink: RotatingSink,
    interval: Duration,
    clear_between_cycles: bool,
}

impl<S: LineSource> Daemon<S> {
    pub fn new(
        source: S,
        gate: EmissionGate,
        sink: RotatingSink,
        interval: Duration,
        clear_between_cycles: bool,
    ) -> Self {
        Self {
            source,
            store: CorrelationStore::new(),
            gate,
            sink,
            interval,
            clear_between_cycles,
        }
    }

    /// Run until Ctrl-C or SIGTERM. An in-flight batch always finishes;
    /// the signal is honored at the sleep point.
    pub async fn run(&mut self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            clear_between_cycles = self.clear_between_cycles,
            "polling loop started"
        );

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        });

        loop {
            match self.source.next_batch() {
                Ok(lines) => {
                    let stats = self.run_cycle(&lines);
                    if stats.lines > 0 {
                        tracing::debug!(
                            lines = stats.lines,
                            emitted = stats.emitted,
                            dropped = stats.dropped,
                            unmatched = stats.unmatched,
                            extract_errors = stats.extract_errors,
                            duplicates = stats.duplicates,
                            "cycle complete"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "transient input read failure, retrying next cycle");
                }
            }

            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("shutting down");
        println!("\nBye!");
    }

    /// Process one batch, then reset the store. Records that never saw a
    /// terminal line within the batch are discarded by the reset; that
    /// data-loss boundary is the documented cost of bounding memory to a
    /// single poll cycle.
    pub fn run_cycle(&mut self, lines: &[String]) -> CycleStats {
        let mut stats = CycleStats::default();
        for line in lines {
            self.process_line(line, &mut stats);
        }

        if self.clear_between_cycles {
            if !self.store.is_empty() {
                tracing::debug!(
                    discarded = self.store.len(),
                    "dropping records still in flight at cycle end"
                );
            }
            self.store.clear();
        }
        stats
    }

    fn process_line(&mut self, line: &str, stats: &mut CycleStats) {
        stats.lines += 1;

        let parsed = match extract::extract(line) {
            Ok(Some(p)) => p,
            Ok(None) => {
                stats.unmatched += 1;
                tracing::trace!(line, "line outside the mail log shape");
                return;
            }
            Err(e) => {
                stats.extract_errors += 1;
                tracing::warn!(error = %e, "skipping malformed line");
                return;
            }
        };

        // Ids already written out are finished for this store lifetime;
        // re-delivered lines for them do nothing.
        if self.store.is_completed(&parsed.transaction_id) {
            if parsed.event.as_ref().is_some_and(|e| e.is_terminal()) {
                stats.duplicates += 1;
                tracing::debug!(
                    transaction = %parsed.transaction_id,
                    "duplicate terminal line for a completed transaction"
                );
            }
            return;
        }

        let record = self.store.upsert(&parsed.transaction_id);
        let event = match parsed.event {
            Some(event) => event,
            None => return,
        };
        record.apply(&event);

        if !event.is_terminal() {
            return;
        }

        let Some(record) = self.store.remove(&parsed.transaction_id) else {
            return;
        };

        if !self.gate.should_emit(&record) {
            stats.dropped += 1;
            tracing::debug!(
                transaction = %record.transaction_id,
                "incomplete record dropped by strict gate"
            );
            return;
        }

        let document = self.gate.render(&record);
        match self.sink.append(&document) {
            Ok(()) => {
                stats.emitted += 1;
                tracing::debug!(
                    transaction = %record.transaction_id,
                    status = %record.status,
                    "emitted transaction record"
                );
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    transaction = %record.transaction_id,
                    "failed to append to output, record lost"
                );
            }
        }
    }

    #[cfg(test)]
    fn store(&self) -> &CorrelationStore {
        &self.store
    }
}

/// Resolves when the process receives Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
