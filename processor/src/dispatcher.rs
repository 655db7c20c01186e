use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use data_model::ObjectKey;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, trace, warn};

use crate::reconciler::ReconcileHandler;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_concurrent_reconciles: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: 4,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Default)]
struct KeyState {
    running: bool,
    // an enqueue arrived while the key was running
    dirty: bool,
    failures: u32,
}

/// Runs reconcile passes for queued keys. Passes for the same key never
/// overlap; passes for different keys run concurrently up to
/// `max_concurrent_reconciles`. Failed passes are retried with exponential
/// backoff, and a pass can ask to be run again after a delay.
pub struct Dispatcher {
    handler: Arc<dyn ReconcileHandler>,
    config: DispatcherConfig,
    keys: DashMap<ObjectKey, KeyState>,
    permits: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn ReconcileHandler>, config: DispatcherConfig) -> Arc<Self> {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_reconciles.max(1)));
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            handler,
            config,
            keys: DashMap::new(),
            permits,
            shutdown_tx,
        })
    }

    /// Queues a pass for `key`. If a pass is already running the key is
    /// marked dirty and re-run once that pass completes, so bursts of events
    /// collapse into a single extra pass.
    pub fn enqueue(self: &Arc<Self>, key: ObjectKey) {
        if self.is_shutdown() {
            return;
        }
        let start = {
            let mut state = self.keys.entry(key.clone()).or_default();
            if state.running {
                state.dirty = true;
                false
            } else {
                state.running = true;
                true
            }
        };
        if start {
            trace!(key = %key, "starting reconcile worker");
            tokio::spawn(self.clone().run_key(key));
        } else {
            trace!(key = %key, "reconcile already running, marked dirty");
        }
    }

    /// Queues a pass for `key` once `delay` has passed.
    pub fn enqueue_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        let dispatcher = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => dispatcher.enqueue(key),
                _ = shutdown_rx.changed() => {}
            }
        });
    }

    /// Stops accepting work. Passes already running finish on their own.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        self.permits.close();
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// True when no pass is running and none is waiting for a permit.
    pub fn is_idle(&self) -> bool {
        self.keys.iter().all(|state| !state.running)
    }

    fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.config
            .base_backoff
            .saturating_mul(1 << exponent)
            .min(self.config.max_backoff)
    }

    async fn run_key(self: Arc<Self>, key: ObjectKey) {
        loop {
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    debug!(key = %key, "dispatcher closed, dropping queued reconcile");
                    self.release(&key);
                    return;
                }
            };
            let result = self.handler.reconcile(&key).await;
            drop(permit);

            let failures = {
                let mut state = self.keys.entry(key.clone()).or_default();
                match result {
                    Ok(_) => state.failures = 0,
                    Err(_) => state.failures += 1,
                }
                state.failures
            };
            let requeue = match &result {
                Ok(result) => result.requeue_after,
                Err(err) => {
                    let delay = self.backoff(failures);
                    warn!(key = %key, error = %err, failures, retry_in = ?delay, "reconcile failed, requeueing");
                    Some(delay)
                }
            };

            // a failed pass waits out its backoff even when events arrived
            // meanwhile; the delayed requeue below covers them
            let rerun = {
                let mut state = self.keys.entry(key.clone()).or_default();
                if state.dirty && result.is_ok() && !self.is_shutdown() {
                    state.dirty = false;
                    true
                } else {
                    state.running = false;
                    state.dirty = false;
                    false
                }
            };
            if rerun {
                continue;
            }

            self.keys
                .remove_if(&key, |_, state| !state.running && state.failures == 0);
            if let Some(delay) = requeue {
                debug!(key = %key, delay = ?delay, "reconcile requeued");
                self.enqueue_after(key, delay);
            }
            return;
        }
    }

    fn release(&self, key: &ObjectKey) {
        if let Some(mut state) = self.keys.get_mut(key) {
            state.running = false;
            state.dirty = false;
        }
    }
}
