use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::config::{self, SchedulerConfig};
use crate::models::TriggerReason;
use crate::orchestrator::TriggerEvent;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Scrape,
    Watchdog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub kind: JobKind,
    pub schedule: String,
    pub created_at: DateTime<Utc>,
    pub last_fired: Option<DateTime<Utc>>,
    pub fire_count: u64,
    /// Ticks lost because the trigger channel was full or closed.
    pub dropped_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_jobs: usize,
    pub fired: u64,
    pub dropped: u64,
    pub uptime_seconds: u64,
}

type JobTable = Arc<RwLock<HashMap<Uuid, JobInfo>>>;

/// Periodic beat. Only emits `TriggerEvent`s; the orchestrator does the work.
pub struct ScrapeScheduler {
    scheduler: JobScheduler,
    jobs: JobTable,
    triggers: mpsc::Sender<TriggerEvent>,
    config: SchedulerConfig,
    start_time: DateTime<Utc>,
}

impl ScrapeScheduler {
    pub async fn new(config: SchedulerConfig, triggers: mpsc::Sender<TriggerEvent>) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            triggers,
            config,
            start_time: Utc::now(),
        })
    }

    /// Registers the scrape and watchdog jobs and starts ticking.
    pub async fn start(&mut self) -> Result<()> {
        if self.config.enabled {
            self.schedule_scrape().await?;
        } else {
            tracing::info!("Periodic scraping disabled; only manual triggers will run");
        }
        self.schedule_watchdog().await?;

        self.scheduler.start().await?;
        tracing::info!(interval = %self.config.interval, "Scrape scheduler started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        tracing::info!("Scrape scheduler shutdown");
        Ok(())
    }

    async fn schedule_scrape(&self) -> Result<Uuid> {
        if !config::is_valid_cron(&self.config.interval) {
            return Err(anyhow::anyhow!("Invalid cron expression: {}", self.config.interval));
        }
        let schedule = cron_schedule(&self.config.interval);

        let jobs = Arc::clone(&self.jobs);
        let triggers = self.triggers.clone();
        let job = Job::new_async(schedule.as_str(), move |uuid, _l| {
            let jobs = Arc::clone(&jobs);
            let triggers = triggers.clone();
            Box::pin(async move {
                let event = TriggerEvent::Run {
                    reason: TriggerReason::Scheduled,
                    store_filter: None,
                };
                Self::fire(&jobs, uuid, &triggers, event).await;
            })
        })?;

        self.register(job, JobKind::Scrape, self.config.interval.clone()).await
    }

    async fn schedule_watchdog(&self) -> Result<Uuid> {
        let every = Duration::from_secs(self.config.watchdog_interval.max(1));

        let jobs = Arc::clone(&self.jobs);
        let triggers = self.triggers.clone();
        let job = Job::new_repeated_async(every, move |uuid, _l| {
            let jobs = Arc::clone(&jobs);
            let triggers = triggers.clone();
            Box::pin(async move {
                Self::fire(&jobs, uuid, &triggers, TriggerEvent::Watchdog).await;
            })
        })?;

        self.register(job, JobKind::Watchdog, format!("every {}s", every.as_secs()))
            .await
    }

    async fn register(&self, job: Job, kind: JobKind, schedule: String) -> Result<Uuid> {
        let id = self.scheduler.add(job).await?;
        let info = JobInfo {
            id,
            kind,
            schedule,
            created_at: Utc::now(),
            last_fired: None,
            fire_count: 0,
            dropped_count: 0,
        };
        tracing::debug!(job_id = %id, kind = ?kind, schedule = %info.schedule, "Registered job");

        let mut jobs = self.jobs.write().await;
        jobs.insert(id, info);
        Ok(id)
    }

    /// Never blocks the scheduler thread: a full channel drops the tick.
    async fn fire(jobs: &JobTable, job_id: Uuid, triggers: &mpsc::Sender<TriggerEvent>, event: TriggerEvent) {
        let delivered = match triggers.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(job_id = %job_id, event = ?event, "Trigger channel full, dropping tick");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(job_id = %job_id, "Trigger channel closed");
                false
            }
        };

        let mut jobs = jobs.write().await;
        if let Some(info) = jobs.get_mut(&job_id) {
            info.last_fired = Some(Utc::now());
            if delivered {
                info.fire_count += 1;
            } else {
                info.dropped_count += 1;
            }
        }
    }

    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let jobs = self.jobs.read().await;
        let mut list: Vec<JobInfo> = jobs.values().cloned().collect();
        list.sort_by_key(|j| j.created_at);
        list
    }

    pub async fn get_stats(&self) -> SchedulerStats {
        let jobs = self.jobs.read().await;
        let uptime = Utc::now().signed_duration_since(self.start_time);

        SchedulerStats {
            total_jobs: jobs.len(),
            fired: jobs.values().map(|j| j.fire_count).sum(),
            dropped: jobs.values().map(|j| j.dropped_count).sum(),
            uptime_seconds: uptime.num_seconds().max(0) as u64,
        }
    }
}

/// The cron backend wants a leading seconds field.
fn cron_schedule(five_field: &str) -> String {
    format!("0 {}", five_field.trim())
}
