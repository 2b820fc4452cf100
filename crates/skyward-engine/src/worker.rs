//! Per-application worker task.
//!
//! One worker owns everything mutable for its app: the trigger windows,
//! the in-memory view of the active schedule, and the persisted record's
//! generation. Schedule wakes, metric samples, policy updates, and
//! shutdown all funnel through one `select!` loop, which is what gives
//! the combiner a consistent `(active schedule, intent)` pair without
//! locks.
//!
//! Two clocks are in play. Boundary wakes run on the wall clock; sample
//! evaluation runs on the sample's own timestamp so decisions replay
//! deterministically. The schedule clock never moves backwards, so a
//! late-stamped sample cannot flap a transition that already happened.
//!
//! A decision that cannot complete because the platform instance lookup
//! failed parks in a pending slot and is retried on the next event, so
//! a transient lookup outage delays an action instead of dropping it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use skyward_core::policy::ScalingPolicy;
use skyward_core::{ActiveSchedule, MetricSample, ScaleAction, ScaleIntent};
use skyward_schedule::{until, ScheduleResolver, ScheduleSnapshot};
use skyward_state::{CasOutcome, StateStore};
use skyward_trigger::TriggerSet;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::combiner::{combine, DecisionInputs};
use crate::engine::{ActionSink, EngineConfig, InstanceLookup};
use crate::error::{EngineError, EngineResult};

pub(crate) struct WorkerSeed {
    pub app_id: String,
    pub store: StateStore,
    pub resolver: ScheduleResolver,
    pub config: EngineConfig,
    pub sink: ActionSink,
    pub instances: InstanceLookup,
}

/// Outcome of folding the schedule state at one instant into the worker.
struct Transition {
    changed: bool,
    just_activated: bool,
}

impl Transition {
    const NONE: Transition = Transition { changed: false, just_activated: false };
}

/// A decision waiting on a successful instance lookup.
struct PendingDecision {
    at: DateTime<Utc>,
    intents: Vec<ScaleIntent>,
    schedule_changed: bool,
    just_activated: bool,
}

struct Worker {
    app_id: String,
    store: StateStore,
    resolver: ScheduleResolver,
    cas_retries: u32,
    sink: ActionSink,
    instances: InstanceLookup,
    policy: Arc<ScalingPolicy>,
    triggers: TriggerSet,
    active: Option<ActiveSchedule>,
    generation: Option<u64>,
    /// Next schedule boundary the loop should wake for.
    boundary: Option<DateTime<Utc>>,
    /// High-water mark of instants schedule state was computed at.
    schedule_clock: DateTime<Utc>,
    /// Decision held back by a failed instance lookup.
    pending: Option<PendingDecision>,
}

pub(crate) async fn run_worker(
    seed: WorkerSeed,
    initial_policy: Arc<ScalingPolicy>,
    mut samples: mpsc::Receiver<MetricSample>,
    mut policy_rx: watch::Receiver<Arc<ScalingPolicy>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let triggers = TriggerSet::new(&initial_policy, seed.config.defaults, seed.config.breach_rule);
    let mut worker = Worker {
        app_id: seed.app_id,
        store: seed.store,
        resolver: seed.resolver,
        cas_retries: seed.config.cas_retries,
        sink: seed.sink,
        instances: seed.instances,
        policy: initial_policy,
        triggers,
        active: None,
        generation: None,
        boundary: None,
        schedule_clock: Utc::now(),
        pending: None,
    };

    worker.restore();
    // Catches boundaries that passed while no worker was running.
    worker.on_boundary(Utc::now()).await;
    debug!(app_id = %worker.app_id, rules = worker.triggers.len(), "worker started");

    loop {
        let boundary = worker.boundary;
        let wake = async move {
            match boundary {
                Some(b) => tokio::time::sleep(until(b, Utc::now())).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = wake => {
                worker.on_boundary(Utc::now()).await;
            }
            sample = samples.recv() => {
                match sample {
                    Some(sample) => worker.on_sample(sample).await,
                    None => break,
                }
            }
            changed = policy_rx.changed() => {
                match changed {
                    Ok(()) => {
                        let policy = policy_rx.borrow_and_update().clone();
                        worker.update_policy(policy);
                        worker.on_boundary(Utc::now()).await;
                    }
                    Err(_) => break,
                }
            }
            _ = shutdown.changed() => {
                break;
            }
        }
    }

    debug!(app_id = %worker.app_id, "worker stopped");
}

impl Worker {
    fn restore(&mut self) {
        match self.store.get_active_schedule(&self.app_id) {
            Ok(Some(record)) => {
                self.generation = Some(record.generation);
                self.active = record.schedule;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(app_id = %self.app_id, error = %e, "could not load persisted schedule state");
            }
        }
    }

    fn update_policy(&mut self, policy: Arc<ScalingPolicy>) {
        self.triggers.rebuild(&policy);
        self.policy = policy;
        info!(app_id = %self.app_id, rules = self.triggers.len(), "policy updated");
    }

    /// Boundary wake: fold the schedule state at `now` and emit a
    /// schedule-change action if a transition happened.
    async fn on_boundary(&mut self, now: DateTime<Utc>) {
        let transition = self.sync_schedule(now);
        if transition.changed {
            self.queue_decision(now, Vec::new(), transition);
        }
        self.flush_pending().await;
    }

    /// Sample arrival: fold any schedule transition the sample reveals,
    /// evaluate triggers on the sample's own timestamp, and emit the
    /// combined decision(s).
    async fn on_sample(&mut self, sample: MetricSample) {
        let now = sample.timestamp;
        let transition = self.sync_schedule(now);

        let intents = match self.triggers.observe(&sample, now) {
            Ok(intents) => intents,
            Err(e) => {
                warn!(app_id = %self.app_id, error = %e, "metric sample dropped");
                Vec::new()
            }
        };

        if transition.changed || !intents.is_empty() {
            self.queue_decision(now, intents, transition);
        }
        self.flush_pending().await;
    }

    /// Folds fresh decision inputs into the pending slot. A later
    /// transition supersedes the flags of an undelivered one; intents
    /// append in arrival order.
    fn queue_decision(&mut self, at: DateTime<Utc>, intents: Vec<ScaleIntent>, transition: Transition) {
        match &mut self.pending {
            Some(pending) => {
                pending.at = at;
                pending.intents.extend(intents);
                if transition.changed {
                    pending.schedule_changed = true;
                    pending.just_activated = transition.just_activated;
                }
            }
            None => {
                self.pending = Some(PendingDecision {
                    at,
                    intents,
                    schedule_changed: transition.changed,
                    just_activated: transition.just_activated,
                });
            }
        }
    }

    /// Combines and delivers the pending decision. A failed instance
    /// lookup puts it back for the next event.
    async fn flush_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let Some(mut current) = self.lookup_instances().await else {
            debug!(app_id = %self.app_id, intents = pending.intents.len(), "decision deferred");
            self.pending = Some(pending);
            return;
        };

        if pending.intents.is_empty() {
            let action = combine(DecisionInputs {
                app_id: &self.app_id,
                at: pending.at,
                policy_bounds: self.policy.bounds(),
                active: self.active.as_ref(),
                intent: None,
                current_instances: current,
                schedule_changed: pending.schedule_changed,
                just_activated: pending.just_activated,
            });
            self.deliver(action).await;
            return;
        }

        // The first intent folds any schedule transition into one action;
        // later intents see the updated count.
        let mut schedule_changed = pending.schedule_changed;
        let mut just_activated = pending.just_activated;
        for intent in &pending.intents {
            let action = combine(DecisionInputs {
                app_id: &self.app_id,
                at: pending.at,
                policy_bounds: self.policy.bounds(),
                active: self.active.as_ref(),
                intent: Some(intent),
                current_instances: current,
                schedule_changed,
                just_activated,
            });
            if !action.no_op {
                current = action.target_instances;
            }
            self.deliver(action).await;
            schedule_changed = false;
            just_activated = false;
        }
    }

    /// Recomputes the active schedule at `now` (monotonic), persists a
    /// transition via compare-and-swap, and re-arms the boundary wake.
    fn sync_schedule(&mut self, now: DateTime<Utc>) -> Transition {
        let now = now.max(self.schedule_clock);
        self.schedule_clock = now;

        let snapshot = match self.policy.schedules.as_ref().filter(|s| !s.is_empty()) {
            Some(schedules) => match self.resolver.snapshot(schedules, now) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    // Unresolvable schedules fall back to static bounds
                    // until a corrected policy arrives.
                    warn!(app_id = %self.app_id, error = %e, "schedule resolution failed, static bounds apply");
                    ScheduleSnapshot { active: None, next_boundary: None }
                }
            },
            None => ScheduleSnapshot { active: None, next_boundary: None },
        };

        self.boundary = snapshot.next_boundary;
        if snapshot.active == self.active {
            return Transition::NONE;
        }

        let just_activated = snapshot.active.as_ref().is_some_and(|next| {
            self.active.as_ref().map(|prev| prev.schedule_id.as_str())
                != Some(next.schedule_id.as_str())
        });

        if let Err(e) = self.persist_active(snapshot.active.as_ref()) {
            error!(app_id = %self.app_id, error = %e, "schedule transition not persisted");
            return Transition::NONE;
        }
        let previous = std::mem::replace(&mut self.active, snapshot.active);
        info!(
            app_id = %self.app_id,
            from = ?previous.map(|a| a.schedule_id),
            to = ?self.active.as_ref().map(|a| &a.schedule_id),
            "schedule transition"
        );
        Transition { changed: true, just_activated }
    }

    /// Compare-and-swap the persisted record, adopting the stored
    /// generation on conflict. Bounded retries; an error leaves the
    /// in-memory schedule unchanged.
    fn persist_active(&mut self, next: Option<&ActiveSchedule>) -> EngineResult<()> {
        for attempt in 1..=self.cas_retries {
            match self
                .store
                .compare_and_swap_active_schedule(&self.app_id, self.generation, next)?
            {
                CasOutcome::Committed(generation) => {
                    self.generation = Some(generation);
                    return Ok(());
                }
                CasOutcome::Conflict(actual) => {
                    let stored = actual.as_ref().map(|r| r.generation);
                    warn!(
                        app_id = %self.app_id,
                        attempt,
                        stored = ?stored,
                        "active schedule write conflicted"
                    );
                    self.generation = stored;
                }
            }
        }
        Err(EngineError::PersistenceConflict {
            app_id: self.app_id.clone(),
            attempts: self.cas_retries,
        })
    }

    async fn lookup_instances(&self) -> Option<u32> {
        match (self.instances)(self.app_id.clone()).await {
            Ok(count) => Some(count),
            Err(e) => {
                error!(app_id = %self.app_id, error = %e, "instance lookup failed");
                None
            }
        }
    }

    /// Persist the action, then hand it to the executor sink. Recording
    /// first means a crashed sink delivery can be replayed from the store.
    async fn deliver(&self, action: ScaleAction) {
        if let Err(e) = self.store.record_action(&action) {
            error!(app_id = %self.app_id, error = %e, "failed to record scale action");
        }
        info!(
            app_id = %self.app_id,
            reason = %action.reason,
            current = action.current_instances,
            target = action.target_instances,
            no_op = action.no_op,
            "scale action"
        );
        if let Err(e) = (self.sink)(action).await {
            error!(app_id = %self.app_id, error = %e, "action sink failed");
        }
    }
}
