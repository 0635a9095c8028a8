//! Recurring per-tenant backup runs.
//!
//! Each scheduled tenant gets one tokio task firing at the period of its
//! configured frequency. A firing takes a full backup if the tenant has no
//! restorable backup yet and an incremental one against the latest restorable
//! point otherwise, then applies retention. Failures are logged and the task
//! keeps running.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use super::engine::BackupEngine;
use super::types::{BackupKind, CleanupReport};
use crate::error::Result;

/// Outcome of one scheduled firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledRun {
    pub tenant_id: String,
    /// Kind of backup attempted
    pub kind: BackupKind,
    pub backup_id: String,
    /// False when an incremental run found nothing to back up
    pub created: bool,
    pub cleanup: CleanupReport,
}

pub struct BackupScheduler {
    engine: Arc<BackupEngine>,
    master_key: Arc<SecretString>,
    persist_after_run: bool,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl BackupScheduler {
    pub fn new(engine: Arc<BackupEngine>, master_key: SecretString) -> Self {
        Self {
            engine,
            master_key: Arc::new(master_key),
            persist_after_run: false,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Seal the durable store to disk after every firing.
    pub fn persist_after_run(mut self, persist: bool) -> Self {
        self.persist_after_run = persist;
        self
    }

    /// Schedule `tenant_id` at the frequency of its backup config, replacing
    /// any existing schedule. The first firing is one period from now.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, tenant_id: &str) {
        let period = self.engine.backup_config(tenant_id).frequency.period();
        let engine = Arc::clone(&self.engine);
        let master_key = Arc::clone(&self.master_key);
        let persist = self.persist_after_run;
        let tenant = tenant_id.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = fire(&engine, &tenant, master_key.expose_secret(), persist).await
                {
                    error!(tenant = %tenant, error = %err, "scheduled backup failed");
                }
            }
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = tasks.insert(tenant_id.to_string(), handle) {
            previous.abort();
        }
        info!(tenant = tenant_id, period_secs = period.as_secs(), "scheduled backups");
    }

    /// Stop the tenant's schedule. Returns whether one was running.
    pub fn stop(&self, tenant_id: &str) -> bool {
        let handle = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(tenant_id);
        match handle {
            Some(handle) => {
                handle.abort();
                info!(tenant = tenant_id, "stopped scheduled backups");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }

    pub fn is_scheduled(&self, tenant_id: &str) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(tenant_id)
            .map_or(false, |handle| !handle.is_finished())
    }

    pub fn scheduled_tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        tenants.sort();
        tenants
    }

    /// Perform one firing now, returning its error instead of logging it.
    pub async fn run_once(&self, tenant_id: &str) -> Result<ScheduledRun> {
        fire(
            &self.engine,
            tenant_id,
            self.master_key.expose_secret(),
            self.persist_after_run,
        )
        .await
    }
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

async fn fire(
    engine: &BackupEngine,
    tenant_id: &str,
    master_key: &str,
    persist: bool,
) -> Result<ScheduledRun> {
    let latest = engine
        .get_restore_points(tenant_id)?
        .into_iter()
        .find(|point| point.can_restore);

    let (kind, backup_id, created) = match latest {
        None => {
            let id = engine
                .create_full_backup(tenant_id, master_key, Some("Scheduled full backup"))
                .await?;
            (BackupKind::Full, id, true)
        }
        Some(point) => {
            let id = engine
                .create_incremental_backup(tenant_id, master_key, &point.backup_id)
                .await?;
            let created = id != point.backup_id;
            (BackupKind::Incremental, id, created)
        }
    };

    let cleanup = engine.cleanup_old_backups(tenant_id).await?;
    if persist {
        engine.storage().persist(master_key)?;
    }

    info!(
        tenant = tenant_id,
        kind = %kind,
        backup = %backup_id,
        created,
        "scheduled backup run finished"
    );
    Ok(ScheduledRun {
        tenant_id: tenant_id.to_string(),
        kind,
        backup_id,
        created,
        cleanup,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupConfig, BackupFrequency};
    use crate::cipher::{Cipher, KdfParams};
    use crate::storage::{Collection, NewRecord, StorageRouter};
    use serde_json::json;
    use std::time::Duration;

    const KEY: &str = "clinic-master-key";

    fn scheduler() -> (BackupScheduler, Arc<BackupEngine>) {
        let storage = Arc::new(StorageRouter::in_memory().unwrap());
        let cipher = Arc::new(Cipher::new(KdfParams::insecure_fast()));
        let engine = Arc::new(BackupEngine::new(storage, cipher));
        let scheduler =
            BackupScheduler::new(Arc::clone(&engine), SecretString::from(KEY.to_string()));
        (scheduler, engine)
    }

    #[tokio::test]
    async fn test_run_once_full_then_incremental() {
        let (scheduler, engine) = scheduler();

        let first = scheduler.run_once("t1").await.unwrap();
        assert_eq!(first.kind, BackupKind::Full);
        assert!(first.created);

        let unchanged = scheduler.run_once("t1").await.unwrap();
        assert_eq!(unchanged.kind, BackupKind::Incremental);
        assert!(!unchanged.created);
        assert_eq!(unchanged.backup_id, first.backup_id);

        engine
            .storage()
            .save(
                Collection::Patients,
                "p1",
                &NewRecord::new(json!({"name": "A. Silva"})),
                "t1",
                false,
            )
            .unwrap();
        let changed = scheduler.run_once("t1").await.unwrap();
        assert!(changed.created);
        let snapshot = engine.get_backup("t1", &changed.backup_id).unwrap();
        assert_eq!(snapshot.metadata.dependencies, vec![first.backup_id]);
    }

    #[tokio::test]
    async fn test_run_once_propagates_errors() {
        let (scheduler, engine) = scheduler();
        engine.storage().close();
        assert!(scheduler.run_once("t1").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_task_fires_each_period() {
        let (scheduler, engine) = scheduler();
        let mut config = BackupConfig::for_tenant("t1");
        config.frequency = BackupFrequency::Hourly;
        engine.configure_backup(config).unwrap();

        scheduler.start("t1");
        assert!(scheduler.is_scheduled("t1"));
        assert!(engine.list_backups("t1").unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(3600 + 1)).await;
        assert_eq!(engine.list_backups("t1").unwrap().len(), 1);

        assert!(scheduler.stop("t1"));
        assert!(!scheduler.is_scheduled("t1"));
        assert!(!scheduler.stop("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_kill_the_schedule() {
        let (scheduler, engine) = scheduler();
        let mut config = BackupConfig::for_tenant("t1");
        config.frequency = BackupFrequency::Realtime;
        engine.configure_backup(config).unwrap();

        engine.storage().close();
        scheduler.start("t1");
        tokio::time::sleep(Duration::from_secs(15 * 60 + 1)).await;
        assert!(scheduler.is_scheduled("t1"));

        scheduler.stop_all();
        assert!(scheduler.scheduled_tenants().is_empty());
    }
}
