//! Recurring process execution.
//!
//! Scheduling is split in two: a [`Schedule`] decides *when* a process is
//! next due, and the [`ScheduleDriver`] owns the background polling task
//! that asks schedules for due times and launches the processes. Processes
//! never reschedule themselves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mockall::automock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::context::ExecutionContext;

use super::{ProcessError, ProcessManager, ProcessResult, ProcessStatus};

/// Decides when a process should next run.
#[automock]
pub trait Schedule: Send + Sync {
    /// The next due time strictly after `after`, or `None` when the
    /// schedule has nothing more to offer.
    fn next_run(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Fixed-interval schedule: due every `interval` from the previous run.
pub struct IntervalSchedule {
    interval: Duration,
}

impl IntervalSchedule {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Schedule for IntervalSchedule {
    fn next_run(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let interval = chrono::Duration::from_std(self.interval).ok()?;
        Some(after + interval)
    }
}

struct ScheduleEntry {
    schedule: Arc<dyn Schedule>,
    next: Option<DateTime<Utc>>,
}

struct DriverInner {
    manager: Arc<ProcessManager>,
    entries: DashMap<String, ScheduleEntry>,
    running: AtomicBool,
    poll_interval: Duration,
}

impl DriverInner {
    /// One polling pass: launches every process whose schedule is due and
    /// moves its due time forward. Launch failures are logged, never fatal
    /// to the driver.
    async fn poll_once(&self) {
        let now = Utc::now();
        let due: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().next.is_some_and(|next| next <= now))
            .map(|e| e.key().clone())
            .collect();

        for id in due {
            if let Some(mut entry) = self.entries.get_mut(&id) {
                entry.next = entry.schedule.next_run(now);
            }

            match self.manager.get_status(&id).await {
                Ok(ProcessStatus::Running) | Ok(ProcessStatus::Paused) => {
                    debug!("Process {} still busy, skipping scheduled run", id);
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Dropping schedule for vanished process {}: {}", id, e);
                    self.entries.remove(&id);
                    continue;
                }
            }

            let ctx = ExecutionContext::new();
            if let Err(e) = self.manager.start_process(&ctx, &id).await {
                warn!("Scheduled start of {} failed: {}", id, e);
            }
        }
    }

    async fn run(&self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;
            self.poll_once().await;
        }
    }
}

/// Background task polling schedules and launching due processes.
pub struct ScheduleDriver {
    inner: Arc<DriverInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduleDriver {
    pub fn new(manager: Arc<ProcessManager>, config: &SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(DriverInner {
                manager,
                entries: DashMap::new(),
                running: AtomicBool::new(false),
                poll_interval: config.poll_interval,
            }),
            handle: Mutex::new(None),
        }
    }

    /// Attaches a schedule to an existing process. A process carries at
    /// most one schedule at a time.
    pub async fn schedule_process(
        &self,
        id: &str,
        schedule: Arc<dyn Schedule>,
    ) -> ProcessResult<()> {
        // the process must exist before it can be scheduled
        self.inner.manager.get_process(id).await?;

        match self.inner.entries.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(ProcessError::ScheduleAlreadyExists { id: id.to_string() })
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let next = schedule.next_run(Utc::now());
                entry.insert(ScheduleEntry { schedule, next });
            }
        }
        debug!("Process scheduled: {}", id);
        Ok(())
    }

    pub fn unschedule_process(&self, id: &str) -> ProcessResult<()> {
        self.inner
            .entries
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ProcessError::ScheduleNotFound { id: id.to_string() })
    }

    pub fn is_scheduled(&self, id: &str) -> bool {
        self.inner.entries.contains_key(id)
    }

    pub fn scheduled_ids(&self) -> Vec<String> {
        self.inner.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Spawns the polling task. Starting an already-running driver is a
    /// no-op.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Schedule driver starting");
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.run().await });
        *self.handle.lock().await = Some(handle);
    }

    /// Signals the polling task to finish and waits for it.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        info!("Schedule driver stopped");
    }

    /// Runs a single polling pass immediately, outside the background
    /// task's cadence.
    pub async fn poll_once(&self) {
        self.inner.poll_once().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use crate::component::{
        Component, ComponentConfig, ComponentFactory, ComponentInfo, ComponentKind,
        ComponentResult, Startable,
    };
    use crate::event_bus::EventBus;
    use crate::process::EtlProcessConfig;
    use crate::registry::ComponentRegistry;

    struct IdleComponent {
        info: ComponentInfo,
    }

    impl Component for IdleComponent {
        fn info(&self) -> &ComponentInfo {
            &self.info
        }

        fn as_startable(&self) -> Option<&dyn Startable> {
            Some(self)
        }
    }

    #[async_trait]
    impl Startable for IdleComponent {
        async fn start(&self, _ctx: &ExecutionContext) -> ComponentResult<()> {
            Ok(())
        }

        async fn stop(&self, _ctx: &ExecutionContext) -> ComponentResult<()> {
            Ok(())
        }
    }

    struct IdleFactory;

    #[async_trait]
    impl ComponentFactory for IdleFactory {
        async fn create(&self, config: &ComponentConfig) -> ComponentResult<Arc<dyn Component>> {
            Ok(Arc::new(IdleComponent {
                info: ComponentInfo::new(&config.id, &config.name, "", ComponentKind::Basic),
            }))
        }
    }

    async fn manager_with_process(id: &str) -> Arc<ProcessManager> {
        let event_bus = Arc::new(EventBus::new(16));
        let registry = Arc::new(ComponentRegistry::new(event_bus.clone()));
        registry
            .register_factory("idleFactory", Arc::new(IdleFactory))
            .await
            .unwrap();
        let manager = Arc::new(ProcessManager::new(registry, event_bus));
        manager
            .initialize_process(
                &ExecutionContext::new(),
                EtlProcessConfig {
                    id: Some(id.to_string()),
                    name: id.to_string(),
                    description: String::new(),
                    components: vec![ComponentConfig::new("step", "step", "idleFactory")],
                },
            )
            .await
            .unwrap();
        manager
    }

    #[test]
    fn test_interval_schedule() {
        let schedule = IntervalSchedule::new(Duration::from_secs(60));
        let now = Utc::now();
        let next = schedule.next_run(now).unwrap();
        assert_eq!(next - now, chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_schedule_requires_process() {
        let manager = manager_with_process("etl1").await;
        let driver = ScheduleDriver::new(manager, &SchedulerConfig::default());

        let result = driver
            .schedule_process("ghost", Arc::new(IntervalSchedule::new(Duration::from_secs(1))))
            .await;
        assert!(matches!(result, Err(ProcessError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_schedule_duplicate_fails() {
        let manager = manager_with_process("etl1").await;
        let driver = ScheduleDriver::new(manager, &SchedulerConfig::default());

        driver
            .schedule_process("etl1", Arc::new(IntervalSchedule::new(Duration::from_secs(1))))
            .await
            .unwrap();
        let result = driver
            .schedule_process("etl1", Arc::new(IntervalSchedule::new(Duration::from_secs(5))))
            .await;
        assert!(matches!(
            result,
            Err(ProcessError::ScheduleAlreadyExists { .. })
        ));
        assert_eq!(driver.scheduled_ids(), vec!["etl1".to_string()]);

        driver.unschedule_process("etl1").unwrap();
        assert!(matches!(
            driver.unschedule_process("etl1"),
            Err(ProcessError::ScheduleNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_poll_starts_due_process() {
        let manager = manager_with_process("etl1").await;
        let driver = ScheduleDriver::new(manager.clone(), &SchedulerConfig::default());

        let mut schedule = MockSchedule::new();
        schedule
            .expect_next_run()
            .returning(|after| Some(after));
        driver
            .schedule_process("etl1", Arc::new(schedule))
            .await
            .unwrap();

        driver.poll_once().await;
        assert_eq!(
            manager.get_status("etl1").await.unwrap(),
            ProcessStatus::Running
        );

        // a second pass sees the process busy and leaves it alone
        driver.poll_once().await;
        assert_eq!(
            manager.get_status("etl1").await.unwrap(),
            ProcessStatus::Running
        );
    }

    #[tokio::test]
    async fn test_exhausted_schedule_stops_firing() {
        let manager = manager_with_process("etl1").await;
        let driver = ScheduleDriver::new(manager.clone(), &SchedulerConfig::default());

        let mut schedule = MockSchedule::new();
        schedule.expect_next_run().returning(|_| None);
        driver
            .schedule_process("etl1", Arc::new(schedule))
            .await
            .unwrap();

        driver.poll_once().await;
        assert_eq!(
            manager.get_status("etl1").await.unwrap(),
            ProcessStatus::Initialized
        );
    }

    #[tokio::test]
    async fn test_background_driver_runs_process() {
        let manager = manager_with_process("etl1").await;
        let config = SchedulerConfig {
            enabled: true,
            poll_interval: Duration::from_millis(10),
        };
        let driver = ScheduleDriver::new(manager.clone(), &config);

        let mut schedule = MockSchedule::new();
        schedule.expect_next_run().returning(|after| Some(after));
        driver
            .schedule_process("etl1", Arc::new(schedule))
            .await
            .unwrap();

        driver.start().await;
        driver.start().await; // second start is a no-op
        tokio::time::sleep(Duration::from_millis(100)).await;
        driver.stop().await;

        assert_eq!(
            manager.get_status("etl1").await.unwrap(),
            ProcessStatus::Running
        );
    }
}
