//! Worker Cron Reconciler
//!
//! Keeps the set of live worker timers equal to the scheduled workers the
//! control plane assigns to this device. Job identity is a name-based UUID, so
//! an unchanged assignment keeps its timer across refreshes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::applet::{AppletImage, Worker};
use crate::control_plane::types::UserApplet;
use crate::error::{NamError, Result};

/// Namespace for worker job ids.
pub const JOB_NAMESPACE: Uuid = Uuid::from_u128(0x5daabcd8_f17e_568c_aa6f_da9d92c7032c);

/// A scheduled worker of a user applet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerCronJob {
    pub job_id: String,
    pub user_applet: String,
    pub applet_id: String,
    pub image: AppletImage,
    pub worker: Worker,
    pub schedule: String,
}

impl WorkerCronJob {
    pub fn new(
        user_applet: impl Into<String>,
        applet_id: impl Into<String>,
        image: AppletImage,
        worker: Worker,
        schedule: impl Into<String>,
    ) -> Self {
        let user_applet = user_applet.into();
        let applet_id = applet_id.into();
        let job_id = job_id(&applet_id, &user_applet, &image, &worker);
        Self {
            job_id,
            user_applet,
            applet_id,
            image,
            worker,
            schedule: schedule.into(),
        }
    }
}

/// UUIDv5 over `appletId:userAppletId:naType:naVersion:packageName:version:handler:name`.
///
/// The schedule is not part of the identity.
pub fn job_id(applet_id: &str, user_applet: &str, image: &AppletImage, worker: &Worker) -> String {
    let name = [
        applet_id,
        user_applet,
        &image.na_type,
        &image.na_version,
        &image.package_name,
        &image.version,
        &worker.handler,
        &worker.name,
    ]
    .join(":");
    Uuid::new_v5(&JOB_NAMESPACE, name.as_bytes()).to_string()
}

/// Expand user applets into one job per worker carrying a schedule.
pub fn jobs_from_user_applets(user_applets: &[UserApplet]) -> Vec<WorkerCronJob> {
    user_applets
        .iter()
        .flat_map(|ua| {
            let config = &ua.config.applet_config;
            config.workers.iter().filter_map(move |worker| {
                let schedule = worker.schedule.as_deref()?.trim();
                if schedule.is_empty() {
                    return None;
                }
                Some(WorkerCronJob::new(
                    ua.id.clone(),
                    ua.applet.id.clone(),
                    config.image.clone(),
                    worker.worker(),
                    schedule,
                ))
            })
        })
        .collect()
}

/// Parse a cron expression. Five-field expressions get a leading seconds
/// field of `0`.
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    let expression = expression.trim();
    let normalized = if expression.split_whitespace().count() == 5 {
        format!("0 {}", expression)
    } else {
        expression.to_string()
    };

    Schedule::from_str(&normalized).map_err(|e| NamError::InvalidSchedule {
        schedule: expression.to_string(),
        message: e.to_string(),
    })
}

/// Executes a job when its timer fires.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, job: &WorkerCronJob) -> Result<Value>;
}

/// Outcome of a reconciliation pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub stopped: Vec<String>,
    pub created: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.stopped.is_empty() && self.created.is_empty()
    }
}

struct LiveJob {
    job: Arc<WorkerCronJob>,
    timer_id: u64,
    handle: Option<JoinHandle<()>>,
}

impl LiveJob {
    fn stop(self) {
        if let Some(handle) = self.handle {
            handle.abort();
        }
    }
}

/// The set of live worker timers, keyed by job id.
#[derive(Default)]
pub struct WorkerCrons {
    jobs: Mutex<HashMap<String, LiveJob>>,
    next_timer: AtomicU64,
}

impl WorkerCrons {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop jobs absent from `candidates`, start candidates not yet live.
    ///
    /// Must be called from within a tokio runtime.
    pub fn reconcile(
        &self,
        candidates: Vec<WorkerCronJob>,
        runner: Arc<dyn JobRunner>,
    ) -> ReconcileReport {
        let wanted: HashSet<String> = candidates.iter().map(|j| j.job_id.clone()).collect();
        let mut report = ReconcileReport::default();
        let mut jobs = self.jobs.lock();

        let stale: Vec<String> = jobs
            .keys()
            .filter(|id| !wanted.contains(*id))
            .cloned()
            .collect();
        for job_id in stale {
            if let Some(live) = jobs.remove(&job_id) {
                info!(
                    job_id = %job_id,
                    package = %live.job.image.package_name,
                    worker = %live.job.worker.name,
                    "Stopping worker cron job"
                );
                live.stop();
                report.stopped.push(job_id);
            }
        }

        for job in candidates {
            if jobs.contains_key(&job.job_id) {
                continue;
            }
            let job = Arc::new(job);
            let timer_id = self.next_timer.fetch_add(1, Ordering::Relaxed) + 1;
            let handle = match parse_schedule(&job.schedule) {
                Ok(schedule) => Some(spawn_timer(job.clone(), schedule, runner.clone())),
                Err(e) => {
                    warn!(job_id = %job.job_id, error = %e, "Worker cron job is not scheduled");
                    None
                }
            };
            info!(
                job_id = %job.job_id,
                schedule = %job.schedule,
                package = %job.image.package_name,
                worker = %job.worker.name,
                "Starting worker cron job"
            );
            report.created.push(job.job_id.clone());
            jobs.insert(
                job.job_id.clone(),
                LiveJob {
                    job,
                    timer_id,
                    handle,
                },
            );
        }

        debug!(
            stopped = report.stopped.len(),
            created = report.created.len(),
            live = jobs.len(),
            "Worker crons reconciled"
        );
        report
    }

    /// Identity of the timer currently backing `job_id`.
    pub fn timer_id(&self, job_id: &str) -> Option<u64> {
        self.jobs.lock().get(job_id).map(|live| live.timer_id)
    }

    pub fn is_scheduled(&self, job_id: &str) -> bool {
        self.jobs
            .lock()
            .get(job_id)
            .map(|live| live.handle.is_some())
            .unwrap_or(false)
    }

    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    pub fn stop_all(&self) {
        let drained: Vec<LiveJob> = self.jobs.lock().drain().map(|(_, live)| live).collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "Stopping all worker cron jobs");
        }
        for live in drained {
            live.stop();
        }
    }
}

/// Next fire time strictly after both `now` and the previous fire, so a
/// wall clock lagging the timer never repeats a tick.
fn next_fire(
    schedule: &Schedule,
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let from = match last {
        Some(last) if last > now => last,
        _ => now,
    };
    schedule.after(&from).next()
}

fn spawn_timer(
    job: Arc<WorkerCronJob>,
    schedule: Schedule,
    runner: Arc<dyn JobRunner>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = None;
        while let Some(next) = next_fire(&schedule, last, Utc::now()) {
            let delay = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(delay).await;
            last = Some(next);

            debug!(job_id = %job.job_id, "Run cron job");
            match runner.run_job(&job).await {
                Ok(result) => info!(job_id = %job.job_id, result = %result, "Run cron job successfully"),
                // A failed tick leaves the timer running.
                Err(e) => error!(job_id = %job.job_id, error = %e, "Run cron job failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_next_fire_never_repeats_a_tick() {
        let schedule = parse_schedule("0 * * * *").unwrap();
        let fired = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let lagging_now = fired - chrono::Duration::milliseconds(5);

        assert_eq!(next_fire(&schedule, None, lagging_now), Some(fired));
        assert_eq!(
            next_fire(&schedule, Some(fired), lagging_now),
            Some(fired + chrono::Duration::hours(1))
        );

        let later = fired + chrono::Duration::minutes(90);
        assert_eq!(
            next_fire(&schedule, Some(fired), later),
            Some(fired + chrono::Duration::hours(2))
        );
    }

    struct CountingRunner {
        runs: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl JobRunner for CountingRunner {
        async fn run_job(&self, _job: &WorkerCronJob) -> Result<Value> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NamError::AppletNotRunning)
            } else {
                Ok(Value::Null)
            }
        }
    }

    fn runner(fail: bool) -> Arc<CountingRunner> {
        Arc::new(CountingRunner {
            runs: AtomicUsize::new(0),
            fail,
        })
    }

    fn job(user_applet: &str, worker: &str, schedule: &str) -> WorkerCronJob {
        WorkerCronJob::new(
            user_applet,
            "applet-1",
            AppletImage::new("npm", "8.3.0", "foo", "1.0.0"),
            Worker {
                handler: "sync".to_string(),
                name: worker.to_string(),
            },
            schedule,
        )
    }

    #[test]
    fn test_job_id_is_stable_and_ignores_schedule() {
        let a = job("ua-1", "daily", "0 0 * * *");
        let b = job("ua-1", "daily", "*/5 * * * *");
        let c = job("ua-2", "daily", "0 0 * * *");
        assert_eq!(a.job_id, b.job_id);
        assert_ne!(a.job_id, c.job_id);
        assert_eq!(Uuid::parse_str(&a.job_id).unwrap().get_version_num(), 5);
    }

    #[test]
    fn test_parse_schedule_accepts_five_and_six_fields() {
        assert!(parse_schedule("0 0 * * *").is_ok());
        assert!(parse_schedule("*/10 * * * * *").is_ok());
        assert!(matches!(
            parse_schedule("not a cron"),
            Err(NamError::InvalidSchedule { .. })
        ));
    }

    #[tokio::test]
    async fn test_reconcile_unchanged_input_is_noop() {
        let crons = WorkerCrons::new();
        let runner = runner(false);
        let jobs = vec![job("ua-1", "a", "0 0 1 1 *"), job("ua-1", "b", "0 0 1 1 *")];

        let first = crons.reconcile(jobs.clone(), runner.clone());
        assert_eq!(first.created.len(), 2);

        let second = crons.reconcile(jobs, runner);
        assert!(second.is_noop());
        assert_eq!(crons.len(), 2);
        crons.stop_all();
    }

    #[tokio::test]
    async fn test_reconcile_replaces_changed_set() {
        let crons = WorkerCrons::new();
        let runner = runner(false);
        let a = job("ua-1", "a", "0 0 1 1 *");
        let b = job("ua-1", "b", "0 0 1 1 *");
        let c = job("ua-1", "c", "0 0 1 1 *");

        crons.reconcile(vec![a.clone(), b.clone()], runner.clone());
        let timer_b = crons.timer_id(&b.job_id).unwrap();

        let report = crons.reconcile(vec![b.clone(), c.clone()], runner);
        assert_eq!(report.stopped, vec![a.job_id.clone()]);
        assert_eq!(report.created, vec![c.job_id.clone()]);
        assert_eq!(crons.timer_id(&b.job_id), Some(timer_b));
        assert!(crons.timer_id(&a.job_id).is_none());
        crons.stop_all();
        assert!(crons.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_schedule_is_tracked_without_timer() {
        let crons = WorkerCrons::new();
        let bad = job("ua-1", "bad", "every tuesday");

        let report = crons.reconcile(vec![bad.clone()], runner(false));
        assert_eq!(report.created, vec![bad.job_id.clone()]);
        assert!(!crons.is_scheduled(&bad.job_id));

        // Re-running does not retry the broken job.
        assert!(crons.reconcile(vec![bad], runner(false)).is_noop());
    }

    #[tokio::test]
    async fn test_failed_tick_keeps_timer_running() {
        let crons = WorkerCrons::new();
        let runner = runner(true);

        crons.reconcile(vec![job("ua-1", "tick", "* * * * * *")], runner.clone());
        tokio::time::sleep(Duration::from_millis(2600)).await;

        assert!(runner.runs.load(Ordering::SeqCst) >= 2);
        crons.stop_all();
    }

    #[test]
    fn test_jobs_from_user_applets_skips_unscheduled() {
        let applets: Vec<UserApplet> = serde_json::from_value(serde_json::json!([{
            "_id": "ua-1",
            "applet": { "_id": "applet-1" },
            "config": { "appletConfig": {
                "naType": "npm", "naVersion": "8.3.0",
                "packageName": "foo", "version": "1.0.0",
                "workers": [
                    { "handler": "sync", "name": "daily", "schedule": "0 0 * * *" },
                    { "handler": "sync", "name": "manual" },
                    { "handler": "sync", "name": "blank", "schedule": "" }
                ]
            }}
        }]))
        .unwrap();

        let jobs = jobs_from_user_applets(&applets);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].worker.name, "daily");
        assert_eq!(jobs[0].applet_id, "applet-1");
        assert_eq!(jobs[0].user_applet, "ua-1");
    }
}
