//! Daemon mode: the engine plus every stored policy, until ctrl-c.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use skyward_engine::{ActionSink, InstanceLookup, ScalingEngine};
use skyward_state::StateStore;
use tracing::info;

pub async fn run(data_dir: &Path) -> anyhow::Result<()> {
    info!("Skyward daemon starting");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;
    let db_path = data_dir.join("skyward.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let engine = ScalingEngine::new(store.clone(), assumed_instances(store), logging_sink());
    let restored = engine.restore().await?;
    info!(apps = restored, "scaling engine started");

    // ── Shutdown ───────────────────────────────────────────────

    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C handler");
    info!("shutdown signal received");
    engine.shutdown().await;

    info!("Skyward daemon stopped");
    Ok(())
}

/// Current-count estimate while no platform API is wired: the last
/// commanded target, else the policy minimum.
fn assumed_instances(store: StateStore) -> InstanceLookup {
    Arc::new(move |app_id| {
        let store = store.clone();
        Box::pin(async move {
            if let Some(action) = store.list_actions(&app_id)?.pop() {
                return Ok(action.target_instances);
            }
            let min = store.get_policy(&app_id)?.map(|p| p.instance_min).unwrap_or(1);
            Ok(min)
        })
    })
}

/// Executor stand-in: the platform transport is external, so actions are
/// logged here and stay in the store for the real executor to pick up.
fn logging_sink() -> ActionSink {
    Arc::new(|action| {
        Box::pin(async move {
            if !action.no_op {
                info!(
                    app_id = %action.app_id,
                    reason = %action.reason,
                    current = action.current_instances,
                    target = action.target_instances,
                    "scale action dispatched"
                );
            }
            Ok(())
        })
    })
}
