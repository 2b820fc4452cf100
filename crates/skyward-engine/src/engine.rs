//! Engine facade: policy deployment, sample routing, worker lifecycle.
//!
//! The `ScalingEngine` spawns one worker task per application with a
//! deployed policy. All platform I/O goes through two injected
//! callbacks, so the engine itself never talks to a cloud controller.

use std::collections::HashMap;
use std::sync::Arc;

use skyward_core::policy::{ScalingDefaults, ScalingPolicy};
use skyward_core::{AppId, MetricSample, ScaleAction};
use skyward_schedule::ScheduleResolver;
use skyward_state::StateStore;
use skyward_trigger::BreachRule;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::worker::{run_worker, WorkerSeed};

/// Resolves the current instance count for an app, typically by asking
/// the platform API.
pub type InstanceLookup = Arc<dyn Fn(AppId) -> BoxFuture<anyhow::Result<u32>> + Send + Sync>;

/// Receives finalized scale actions for execution. Actions are already
/// recorded in the store when the sink sees them, so a failed delivery
/// can be replayed.
pub type ActionSink = Arc<dyn Fn(ScaleAction) -> BoxFuture<anyhow::Result<()>> + Send + Sync>;

type BoxFuture<T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send>>;

/// Tunables for the engine. The defaults match platform conventions:
/// 300 s fallback durations, the all-samples breach rule, three
/// compare-and-swap attempts.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub defaults: ScalingDefaults,
    pub breach_rule: BreachRule,
    /// Depth of each worker's buffered sample queue.
    pub sample_queue: usize,
    /// Attempts before a persistence conflict is surfaced.
    pub cas_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            defaults: ScalingDefaults::default(),
            breach_rule: BreachRule::default(),
            sample_queue: 64,
            cas_retries: 3,
        }
    }
}

/// Per-application worker state.
struct WorkerSlot {
    /// Handle to the background decision task.
    handle: JoinHandle<()>,
    /// Shutdown signal for this worker.
    shutdown_tx: watch::Sender<bool>,
    /// Live policy updates; the worker rebuilds its triggers in place.
    policy_tx: watch::Sender<Arc<ScalingPolicy>>,
    sample_tx: mpsc::Sender<MetricSample>,
}

/// Manages scaling workers for all applications with a deployed policy.
pub struct ScalingEngine {
    store: StateStore,
    resolver: ScheduleResolver,
    config: EngineConfig,
    instances: InstanceLookup,
    sink: ActionSink,
    /// Active workers: app id → slot.
    workers: Arc<RwLock<HashMap<AppId, WorkerSlot>>>,
}

impl ScalingEngine {
    pub fn new(store: StateStore, instances: InstanceLookup, sink: ActionSink) -> Self {
        Self::with_config(store, instances, sink, EngineConfig::default())
    }

    pub fn with_config(
        store: StateStore,
        instances: InstanceLookup,
        sink: ActionSink,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            resolver: ScheduleResolver::default(),
            config,
            instances,
            sink,
            workers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Persists an already-validated policy and starts (or live-updates)
    /// the app's worker. Callers run the policy through
    /// `skyward-policy` first; the engine trusts its input.
    pub async fn deploy_policy(&self, app_id: &str, policy: ScalingPolicy) -> EngineResult<()> {
        self.store.put_policy(app_id, &policy)?;
        self.spawn_or_update(app_id, Arc::new(policy)).await;
        Ok(())
    }

    /// Deletes the policy and stops the worker. The persisted schedule
    /// record goes with the policy; recorded actions remain. Returns
    /// whether a policy existed.
    pub async fn remove_policy(&self, app_id: &str) -> EngineResult<bool> {
        let existed = self.store.delete_policy(app_id)?;
        let mut workers = self.workers.write().await;
        if let Some(slot) = workers.remove(app_id) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            info!(%app_id, "scaling worker stopped");
        }
        Ok(existed)
    }

    /// Queues a metric sample for the owning worker. Samples for apps
    /// without a deployed policy are rejected, not buffered. The sender
    /// is cloned out of the map so the lock is released before the send;
    /// one app's backpressure never stalls the others.
    pub async fn submit_sample(&self, sample: MetricSample) -> EngineResult<()> {
        let tx = {
            let workers = self.workers.read().await;
            match workers.get(&sample.app_id) {
                Some(slot) => slot.sample_tx.clone(),
                None => return Err(EngineError::UnknownApp { app_id: sample.app_id }),
            }
        };
        if let Err(e) = tx.send(sample).await {
            return Err(EngineError::UnknownApp { app_id: e.0.app_id });
        }
        Ok(())
    }

    /// Restarts workers for every persisted policy. Called once at boot;
    /// each worker re-reconciles its schedule against the stored record,
    /// so boundaries crossed while the process was down are caught up.
    pub async fn restore(&self) -> EngineResult<usize> {
        let policies = self.store.list_policies()?;
        let count = policies.len();
        for (app_id, policy) in policies {
            self.spawn_or_update(&app_id, Arc::new(policy)).await;
        }
        info!(apps = count, "scaling engine restored");
        Ok(count)
    }

    /// List app ids with a running worker.
    pub async fn active_apps(&self) -> Vec<AppId> {
        let workers = self.workers.read().await;
        workers.keys().cloned().collect()
    }

    pub async fn is_managing(&self, app_id: &str) -> bool {
        let workers = self.workers.read().await;
        workers.contains_key(app_id)
    }

    /// Stop all workers (for graceful shutdown).
    pub async fn shutdown(&self) {
        let mut workers = self.workers.write().await;
        for (app_id, slot) in workers.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(%app_id, "scaling worker stopped");
        }
        info!("all scaling workers stopped");
    }

    /// Pushes the policy to a running worker, or spawns one. A worker
    /// whose task has died is replaced.
    async fn spawn_or_update(&self, app_id: &str, policy: Arc<ScalingPolicy>) {
        let mut workers = self.workers.write().await;

        let policy = match workers.get(app_id) {
            Some(slot) => match slot.policy_tx.send(policy) {
                Ok(()) => {
                    debug!(%app_id, "policy pushed to running worker");
                    return;
                }
                Err(e) => e.0,
            },
            None => policy,
        };

        let slot = self.spawn_worker(app_id.to_string(), policy);
        if let Some(old) = workers.insert(app_id.to_string(), slot) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }
        info!(%app_id, "scaling worker started");
    }

    fn spawn_worker(&self, app_id: String, policy: Arc<ScalingPolicy>) -> WorkerSlot {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (policy_tx, policy_rx) = watch::channel(policy.clone());
        let (sample_tx, sample_rx) = mpsc::channel(self.config.sample_queue);

        let seed = WorkerSeed {
            app_id,
            store: self.store.clone(),
            resolver: self.resolver.clone(),
            config: self.config.clone(),
            sink: self.sink.clone(),
            instances: self.instances.clone(),
        };
        let handle = tokio::spawn(async move {
            run_worker(seed, policy, sample_rx, policy_rx, shutdown_rx).await;
        });

        WorkerSlot { handle, shutdown_tx, policy_tx, sample_tx }
    }
}
