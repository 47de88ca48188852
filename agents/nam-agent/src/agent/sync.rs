//! Control Plane Sync
//!
//! Inventory push, worker cron refresh and the calls applets make back to the
//! control plane through this agent.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::agent::cron::{jobs_from_user_applets, JobRunner, ReconcileReport, WorkerCronJob};
use crate::agent::manager::AppletManager;
use crate::agent::routing::WorkOptions;
use crate::applet::AppletRoute;
use crate::control_plane::types::DeviceInventory;
use crate::error::{NamError, Result};

/// Runs cron ticks without keeping the manager alive.
struct CronDispatcher {
    manager: Weak<AppletManager>,
}

#[async_trait]
impl JobRunner for CronDispatcher {
    async fn run_job(&self, job: &WorkerCronJob) -> Result<Value> {
        let manager = self.manager.upgrade().ok_or(NamError::ShuttingDown)?;
        manager.execute_cron_job(job).await
    }
}

impl AppletManager {
    /// Push installed and running applets, then refresh worker crons.
    pub async fn update_device(&self) -> Result<()> {
        let token = self.token()?;
        let inventory = DeviceInventory {
            installed_applets: self.images().await?,
            running_applets: self.ps().await?,
        };

        self.control_plane.update_device(&token, &inventory).await?;
        info!(
            installed = inventory.installed_applets.len(),
            running = inventory.running_applets.len(),
            "Device inventory pushed"
        );

        self.refresh_worker_crons().await?;
        Ok(())
    }

    /// Reconcile live worker timers with the control plane's assignment.
    pub async fn refresh_worker_crons(&self) -> Result<ReconcileReport> {
        let token = self.token()?;
        let user_applets = self.control_plane.user_applets(&token).await?;
        debug!(count = user_applets.len(), "Fetched applets for current device");

        let jobs = jobs_from_user_applets(&user_applets);
        let runner: Arc<dyn JobRunner> = Arc::new(CronDispatcher {
            manager: self.this.clone(),
        });
        Ok(self.crons.reconcile(jobs, runner))
    }

    /// One tick of a worker cron: fetch the accounts, then run the worker.
    pub async fn execute_cron_job(&self, job: &WorkerCronJob) -> Result<Value> {
        let token = self.token()?;
        let accounts = self
            .control_plane
            .user_applet_accounts(&token, &job.user_applet)
            .await?;
        debug!(job_id = %job.job_id, "Fetched accounts for worker");

        let result = self
            .work(WorkOptions {
                user_applet: Some(job.user_applet.clone()),
                route: AppletRoute::new(job.applet_id.clone(), job.image.clone()),
                worker: job.worker.clone(),
                payload: json!({ "accounts": accounts }),
            })
            .await?;
        info!(job_id = %job.job_id, "Execute cron job successfully");
        Ok(result)
    }

    /// Relay an account operation on behalf of `applet_id`.
    pub async fn operate_account(
        &self,
        applet_id: &str,
        account_id: &str,
        body: Value,
    ) -> Result<Value> {
        let token = self.token()?;
        debug!(applet_id, account_id, "Operate account");
        self.control_plane
            .operate_account(&token, applet_id, account_id, body)
            .await
    }

    /// Relay execution metrics reported by `applet_id`.
    pub async fn record_metrics(
        &self,
        applet_id: &str,
        execution_id: &str,
        body: Value,
    ) -> Result<Value> {
        let token = self.token()?;
        debug!(applet_id, execution_id, "Record execution metrics");
        self.control_plane
            .record_metrics(&token, applet_id, execution_id, body)
            .await
    }
}
