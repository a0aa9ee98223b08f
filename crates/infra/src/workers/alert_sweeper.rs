use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use agroledger_alerts::AlertScope;
use agroledger_core::FirmId;
use agroledger_events::{EventBus, EventEnvelope};

use crate::alerting::{AlertEngine, EvaluationOutcome};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::store::LedgerStore;

/// Something that can run a full alert evaluation cycle for one firm.
pub trait SweepTarget: Send + Sync + 'static {
    fn sweep(&self, firm_id: FirmId) -> Result<EvaluationOutcome, LedgerError>;
}

impl<S, B> SweepTarget for AlertEngine<S, B>
where
    S: LedgerStore + 'static,
    B: EventBus<EventEnvelope<JsonValue>> + 'static,
{
    fn sweep(&self, firm_id: FirmId) -> Result<EvaluationOutcome, LedgerError> {
        self.evaluate_alerts(firm_id, AlertScope::All)
    }
}

/// Shortest schedule the sweeper accepts; shorter intervals are raised to it.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Config for the periodic alert sweeper.
#[derive(Debug, Clone)]
pub struct AlertSweeper {
    pub interval: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for AlertSweeper {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}

/// Handle for the running sweeper (shutdown + trigger hook).
#[derive(Debug)]
pub struct AlertSweeperHandle {
    shutdown: mpsc::Sender<()>,
    trigger: mpsc::SyncSender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl AlertSweeperHandle {
    /// Request an evaluation cycle now.
    ///
    /// Triggers are coalesced: if a cycle is already requested this is a no-op.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    /// Stop the sweeper thread and wait for it to exit.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

impl AlertSweeper {
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self {
            interval: config.sweep_interval.max(MIN_SWEEP_INTERVAL),
            max_retries: config.sweep_max_retries,
            base_backoff: config.sweep_base_backoff,
        }
    }

    /// Spawn a sweeper over `firms`.
    ///
    /// - Schedule: one cycle at startup, then every `interval`
    /// - On demand: `handle.trigger()`
    /// - Failures: logged and retried with bounded exponential backoff; never propagate
    pub fn spawn<T>(
        &self,
        name: &'static str,
        firms: Vec<FirmId>,
        target: Arc<T>,
    ) -> AlertSweeperHandle
    where
        T: SweepTarget,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (trigger_tx, trigger_rx) = mpsc::sync_channel::<()>(1);

        let mut cfg = self.clone();
        if cfg.interval < MIN_SWEEP_INTERVAL {
            warn!(sweeper = name, interval = ?cfg.interval, "sweep interval raised to the minimum");
            cfg.interval = MIN_SWEEP_INTERVAL;
        }
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || sweeper_loop(name, firms, cfg, shutdown_rx, trigger_rx, target))
            .expect("failed to spawn alert sweeper thread");

        AlertSweeperHandle {
            shutdown: shutdown_tx,
            trigger: trigger_tx,
            join: Some(join),
        }
    }
}

fn sweeper_loop<T>(
    name: &'static str,
    firms: Vec<FirmId>,
    cfg: AlertSweeper,
    shutdown_rx: mpsc::Receiver<()>,
    trigger_rx: mpsc::Receiver<()>,
    target: Arc<T>,
) where
    T: SweepTarget,
{
    info!(sweeper = name, firms = firms.len(), "alert sweeper started");

    let mut next_tick = Instant::now() + cfg.interval;
    let mut pending = true;
    let mut failures: u32 = 0;
    let mut backoff_until: Option<Instant> = None;

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let now = Instant::now();
        if now >= next_tick {
            pending = true;
            while next_tick <= now {
                next_tick += cfg.interval;
            }
        }

        while trigger_rx.try_recv().is_ok() {
            pending = true;
        }

        if let Some(until) = backoff_until {
            if Instant::now() < until {
                thread::sleep(Duration::from_millis(50));
                continue;
            }
            backoff_until = None;
        }

        if !pending {
            let sleep_for = next_tick
                .saturating_duration_since(Instant::now())
                .min(Duration::from_millis(250));
            thread::sleep(sleep_for);
            continue;
        }

        pending = false;

        // Evaluation is idempotent, so a failed cycle is retried for every firm.
        let mut failed = false;
        for firm_id in &firms {
            match target.sweep(*firm_id) {
                Ok(outcome) => {
                    debug!(
                        sweeper = name,
                        firm = %firm_id,
                        created = outcome.created.len(),
                        closed = outcome.closed.len(),
                        "alert sweep completed"
                    );
                }
                Err(e) => {
                    warn!(sweeper = name, firm = %firm_id, error = %e, "alert sweep failed");
                    failed = true;
                }
            }
        }

        if failed {
            failures += 1;
            if failures <= cfg.max_retries {
                pending = true;
                backoff_until = Some(Instant::now() + backoff(cfg.base_backoff, failures));
            } else {
                warn!(sweeper = name, attempts = failures, "giving up until next interval");
                failures = 0;
            }
        } else {
            failures = 0;
        }
    }

    info!(sweeper = name, "alert sweeper stopped");
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    // base * 2^(attempt-1), capped at 10s.
    let pow = 1u32 << attempt.saturating_sub(1).min(10);
    let ms = base.as_millis().saturating_mul(pow as u128);
    Duration::from_millis(ms.min(10_000) as u64)
}
