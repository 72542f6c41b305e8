use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use stayplan_core::config::SchedulerConfig;
use tokio::{
    sync::{watch, Semaphore},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clock::Clock,
    error::{Result, SchedulerError},
    sink::{JobSink, Ledger},
    store::ScheduleStore,
    types::{Payload, RunStatus, Schedule},
};

/// Build the unique job name handed to the sink:
/// `{label}_scheduled_{owner}_{YYYYMMDD_HHMMSS}_{suffix}`, with `@` in the
/// owner replaced by `_`.
pub fn job_name(label: &str, user_id: &str, at: DateTime<Utc>) -> String {
    let owner = user_id.replace('@', "_");
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{label}_scheduled_{owner}_{}_{}",
        at.format("%Y%m%d_%H%M%S"),
        &suffix[..8]
    )
}

/// Polls the store for due schedules and runs each one on its own task.
///
/// Cheap to clone; every clone shares the same store, sink, clock and
/// concurrency budget.
#[derive(Clone)]
pub struct SchedulerEngine {
    store: Arc<ScheduleStore>,
    sink: Arc<dyn JobSink>,
    clock: Arc<dyn Clock>,
    ledger: Option<Arc<dyn Ledger>>,
    poll_interval: Duration,
    submit_timeout: Duration,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Holds a schedule id in the in-flight set until dropped.
struct InFlight {
    ids: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<ScheduleStore>,
        sink: Arc<dyn JobSink>,
        clock: Arc<dyn Clock>,
        cfg: &SchedulerConfig,
    ) -> Self {
        Self {
            store,
            sink,
            clock,
            ledger: None,
            poll_interval: Duration::from_secs(cfg.poll_interval_secs.max(1)),
            submit_timeout: Duration::from_secs(cfg.submit_timeout_secs.max(1)),
            permits: Arc::new(Semaphore::new(cfg.max_concurrent_runs.max(1))),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Reserve funds through `ledger` before each submission.
    pub fn with_ledger(mut self, ledger: Arc<dyn Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Override the submission budget (mostly for tests).
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    /// Main loop. Runs one dispatch pass per poll interval until `shutdown`
    /// broadcasts `true`. Tasks already in flight are left to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            submit_timeout_secs = self.submit_timeout.as_secs(),
            "scheduler engine started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.dispatch_due() {
                        error!("scheduler tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One poll: select every due schedule and spawn an execution task for
    /// each. Returns the task handles so callers can await completion.
    ///
    /// Does not wait for the tasks. A schedule whose task is still queued or
    /// running is skipped until that task has advanced it and finished.
    pub fn dispatch_due(&self) -> Result<Vec<JoinHandle<()>>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let due: Vec<Schedule> = self
            .store
            .list_due(self.clock.now())?
            .into_iter()
            .filter(|schedule| in_flight.insert(schedule.id.clone()))
            .collect();
        if !due.is_empty() {
            info!(count = due.len(), "dispatching due schedules");
        }

        Ok(due
            .into_iter()
            .map(|schedule| {
                let engine = self.clone();
                let guard = InFlight {
                    ids: self.in_flight.clone(),
                    id: schedule.id.clone(),
                };
                tokio::spawn(async move {
                    let _guard = guard;
                    let Ok(_permit) = engine.permits.clone().acquire_owned().await else {
                        return;
                    };
                    engine.execute(schedule).await;
                })
            })
            .collect())
    }

    /// Execute one due schedule: record the attempt, submit its payload,
    /// record the outcome, then move the schedule forward.
    ///
    /// Advancing happens whatever the outcome, so a failing schedule is
    /// retried at its next slot rather than on every poll.
    pub async fn execute(&self, schedule: Schedule) {
        let run = match self.store.record_run_start(&schedule.id, self.clock.now()) {
            Ok(run) => run,
            Err(e) => {
                error!(
                    schedule_id = %schedule.id,
                    "could not record run start, skipping: {e}"
                );
                return;
            }
        };

        let (status, err_msg) = match self.submit(&schedule).await {
            Ok(job) => {
                info!(
                    schedule_id = %schedule.id,
                    run_id = %run.id,
                    %job,
                    "scheduled run completed"
                );
                (RunStatus::Completed, None)
            }
            Err(e) => {
                warn!(
                    schedule_id = %schedule.id,
                    run_id = %run.id,
                    code = e.code(),
                    "scheduled run failed: {e}"
                );
                (RunStatus::Failed, Some(e.to_string()))
            }
        };

        if let Err(e) = self
            .store
            .record_run_end(&run.id, status, err_msg.as_deref(), self.clock.now())
        {
            error!(run_id = %run.id, "could not record run outcome: {e}");
        }

        if let Err(e) = self.store.advance_or_retire(&schedule.id, self.clock.now()) {
            error!(
                schedule_id = %schedule.id,
                "could not advance schedule; it stays due and will run again: {e}"
            );
        }
    }

    /// Resolve the payload and hand it to the sink. Returns the job name.
    async fn submit(&self, schedule: &Schedule) -> Result<String> {
        let payload = self
            .store
            .load_payload(schedule)?
            .ok_or_else(|| SchedulerError::PayloadMissing {
                schedule_id: schedule.id.clone(),
            })?;

        let job = job_name(payload.label(), &schedule.user_id, self.clock.now());
        debug!(schedule_id = %schedule.id, %job, items = payload.items().len(), "submitting");

        if let Some(ref ledger) = self.ledger {
            let ledger = ledger.clone();
            let user_id = schedule.user_id.clone();
            let job = job.clone();
            let count = payload.items().len();
            tokio::spawn(async move {
                if let Err(e) = ledger.reserve(&user_id, &job, count).await {
                    warn!(%user_id, %job, "ledger reservation failed: {e}");
                }
            });
        }

        let submitted = tokio::time::timeout(
            self.submit_timeout,
            self.sink.submit(&job, payload.items(), &schedule.user_id),
        )
        .await;
        match submitted {
            Ok(result) => result?,
            Err(_) => {
                return Err(SchedulerError::SubmissionTimeout {
                    ms: self.submit_timeout.as_millis() as u64,
                })
            }
        }

        if let Payload::Collection { ref id, .. } = payload {
            if let Err(e) = self.store.mark_collection_submitted(id, self.clock.now()) {
                warn!(collection_id = %id, "could not stamp collection: {e}");
            }
        }
        Ok(job)
    }
}
