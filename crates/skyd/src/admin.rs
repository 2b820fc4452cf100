//! One-shot administrative commands against the state store.

use std::path::Path;

use anyhow::{bail, Context};
use chrono::Utc;
use skyward_core::{CredentialRedacter, Redact};
use skyward_policy::PolicyValidator;
use skyward_state::StateStore;
use tracing::info;

/// Validate a policy document and persist it. Rejections print the full
/// violation report; nothing is stored on failure.
pub fn apply(data_dir: &Path, app_id: &str, policy_path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(policy_path)
        .with_context(|| format!("reading {}", policy_path.display()))?;
    let document: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", policy_path.display()))?;

    let validator = PolicyValidator::new();
    let policy = match validator.validate(&document, Utc::now()) {
        Ok(policy) => policy,
        Err(e) => bail!("policy rejected:\n{e}"),
    };

    let store = open_store(data_dir)?;
    store.put_policy(app_id, &policy)?;

    // Log the document as submitted, minus anything secret-looking.
    let redacter = CredentialRedacter::standard();
    info!(%app_id, policy = %redacter.redact(document), "policy applied");
    println!("policy for {app_id} applied");
    Ok(())
}

pub fn remove(data_dir: &Path, app_id: &str) -> anyhow::Result<()> {
    let store = open_store(data_dir)?;
    if store.delete_policy(app_id)? {
        info!(%app_id, "policy removed");
        println!("policy for {app_id} removed");
    } else {
        println!("no policy stored for {app_id}");
    }
    Ok(())
}

pub fn show(data_dir: &Path, app_id: &str) -> anyhow::Result<()> {
    let store = open_store(data_dir)?;

    let Some(policy) = store.get_policy(app_id)? else {
        println!("no policy stored for {app_id}");
        return Ok(());
    };
    println!("{}", serde_json::to_string_pretty(&policy)?);

    match store.get_active_schedule(app_id)? {
        Some(record) => match record.schedule {
            Some(active) => println!(
                "active schedule: {} (bounds {}..{}, generation {})",
                active.schedule_id, active.instance_min, active.instance_max, record.generation
            ),
            None => println!("active schedule: none (generation {})", record.generation),
        },
        None => println!("active schedule: none"),
    }
    Ok(())
}

fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;
    Ok(StateStore::open(&data_dir.join("skyward.redb"))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_policy(dir: &Path, contents: &str) -> std::path::PathBuf {
        let path = dir.join("policy.json");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn apply_then_show_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let policy_path = write_policy(
            dir.path(),
            r#"{
                "instance_min_count": 1,
                "instance_max_count": 4,
                "scaling_rules": [{
                    "metric_type": "memoryused",
                    "breach_duration_secs": 600,
                    "threshold": 30,
                    "operator": "<",
                    "cool_down_secs": 300,
                    "adjustment": "-1"
                }]
            }"#,
        );

        apply(dir.path(), "app-1", &policy_path).unwrap();
        // The store takes an exclusive file lock, so finish with it
        // before `show` opens its own handle.
        {
            let store = open_store(dir.path()).unwrap();
            let stored = store.get_policy("app-1").unwrap().unwrap();
            assert_eq!(stored.instance_min, 1);
            assert_eq!(stored.instance_max, 4);
            assert_eq!(stored.scaling_rules.len(), 1);
        }

        show(dir.path(), "app-1").unwrap();
    }

    #[test]
    fn apply_rejects_invalid_documents_without_storing() {
        let dir = tempfile::tempdir().unwrap();
        let policy_path = write_policy(
            dir.path(),
            r#"{"instance_min_count": 5, "instance_max_count": 2,
                "scaling_rules": [{
                    "metric_type": "memoryused",
                    "threshold": 30,
                    "operator": "<",
                    "adjustment": "-1"
                }]}"#,
        );

        let err = apply(dir.path(), "app-1", &policy_path).unwrap_err();
        assert!(err.to_string().contains("policy rejected"));

        let store = open_store(dir.path()).unwrap();
        assert!(store.get_policy("app-1").unwrap().is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        remove(dir.path(), "app-1").unwrap();

        let policy_path = write_policy(
            dir.path(),
            r#"{"instance_min_count": 1, "instance_max_count": 4,
                "scaling_rules": [{
                    "metric_type": "throughput",
                    "threshold": 100,
                    "operator": ">=",
                    "adjustment": "+2"
                }]}"#,
        );
        apply(dir.path(), "app-1", &policy_path).unwrap();
        remove(dir.path(), "app-1").unwrap();

        let store = open_store(dir.path()).unwrap();
        assert!(store.get_policy("app-1").unwrap().is_none());
    }
}
