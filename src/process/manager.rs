//! Process lifecycle management.
//!
//! The manager builds processes from declarative configs, owns the live
//! instances, and drives their member components through start/stop as a
//! concurrent fan-out with aggregated failures.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument};

use crate::component::Component;
use crate::context::ExecutionContext;
use crate::error::{Failure, FailureList};
use crate::event_bus::{ErrorEvent, ErrorSeverity, Event, EventBus, EventType, Value};
use crate::registry::ComponentRegistry;
use crate::system::SystemContext;

use super::{EtlProcess, EtlProcessConfig, ProcessError, ProcessResult, ProcessStatus};

pub struct ProcessManager {
    processes: RwLock<HashMap<String, Arc<EtlProcess>>>,
    registry: Arc<ComponentRegistry>,
    event_bus: Arc<EventBus>,
}

impl ProcessManager {
    pub fn new(registry: Arc<ComponentRegistry>, event_bus: Arc<EventBus>) -> Self {
        Self {
            processes: RwLock::new(HashMap::new()),
            registry,
            event_bus,
        }
    }

    /// Builds a process from its config: constructs every member through
    /// the registry's factories, initializes the ones that want wiring,
    /// and records the process as Initialized.
    ///
    /// Members belong to the process, not the shared registry; two
    /// processes built from the same configs get independent instances.
    #[instrument(level = "debug", skip(self, config), fields(name = %config.name))]
    pub async fn initialize_process(
        &self,
        ctx: &ExecutionContext,
        config: EtlProcessConfig,
    ) -> ProcessResult<Arc<EtlProcess>> {
        let id = config.resolve_id();
        {
            let processes = self.processes.read().await;
            if processes.contains_key(&id) {
                return Err(ProcessError::AlreadyExists { id });
            }
        }

        let mut components: Vec<Arc<dyn Component>> = Vec::with_capacity(config.components.len());
        for component_config in &config.components {
            components.push(self.registry.build_component(component_config).await?);
        }

        let system_ctx = SystemContext::new(self.registry.clone(), self.event_bus.clone());
        for component in &components {
            if let Some(initializable) = component.as_initializable() {
                initializable.initialize(ctx, &system_ctx).await?;
            }
        }

        let process = Arc::new(EtlProcess::new(id, config, components));
        {
            let mut processes = self.processes.write().await;
            if processes.contains_key(process.id()) {
                return Err(ProcessError::AlreadyExists {
                    id: process.id().to_string(),
                });
            }
            processes.insert(process.id().to_string(), process.clone());
        }

        info!("Process initialized: {}", process.id());
        let _ = self
            .event_bus
            .publish(
                Event::new(EventType::ProcessInitialized)
                    .with_parameter("process_id", Value::from(process.id())),
            )
            .await;
        Ok(process)
    }

    pub async fn get_process(&self, id: &str) -> ProcessResult<Arc<EtlProcess>> {
        self.processes
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ProcessError::NotFound { id: id.to_string() })
    }

    pub async fn get_status(&self, id: &str) -> ProcessResult<ProcessStatus> {
        Ok(self.get_process(id).await?.status().await)
    }

    pub async fn process_ids(&self) -> Vec<String> {
        self.processes.read().await.keys().cloned().collect()
    }

    pub async fn get_all_processes(&self) -> Vec<Arc<EtlProcess>> {
        self.processes.read().await.values().cloned().collect()
    }

    /// Removes a stopped, completed, or failed process. Running or paused
    /// processes must be stopped first.
    #[instrument(level = "debug", skip(self))]
    pub async fn remove_process(&self, id: &str) -> ProcessResult<()> {
        let process = self.get_process(id).await?;
        let status = process.status().await;
        if matches!(status, ProcessStatus::Running | ProcessStatus::Paused) {
            return Err(ProcessError::InvalidStatus {
                id: id.to_string(),
                from: status,
                to: ProcessStatus::Stopped,
            });
        }
        self.processes.write().await.remove(id);
        Ok(())
    }

    /// Starts every startable member concurrently. All members are
    /// attempted; any failure moves the process to Failed and the
    /// aggregate is returned.
    #[instrument(level = "debug", skip(self, ctx))]
    pub async fn start_process(&self, ctx: &ExecutionContext, id: &str) -> ProcessResult<()> {
        let process = self.get_process(id).await?;
        process.transition(ProcessStatus::Running).await?;

        let failures = run_members(process.components(), ctx, MemberPhase::Start).await;
        if !failures.is_empty() {
            error!("Process {} failed to start: {}", id, failures);
            process.force_status(ProcessStatus::Failed).await;
            let _ = self
                .event_bus
                .publish(
                    Event::new(EventType::ProcessFailed)
                        .with_parameter("process_id", Value::from(id)),
                )
                .await;
            let _ = self
                .event_bus
                .publish_error(ErrorEvent {
                    error_type: "process_start_failed".to_string(),
                    message: failures.to_string(),
                    severity: ErrorSeverity::Error,
                    parameters: HashMap::from([(
                        "process_id".to_string(),
                        Value::from(id),
                    )]),
                })
                .await;
            return Err(ProcessError::StartFailures(failures));
        }

        info!("Process started: {}", id);
        let _ = self
            .event_bus
            .publish(
                Event::new(EventType::ProcessStarted)
                    .with_parameter("process_id", Value::from(id)),
            )
            .await;
        Ok(())
    }

    /// Stops every startable member concurrently. The process is recorded
    /// as Stopped even when some members refuse; the aggregate reports
    /// them.
    #[instrument(level = "debug", skip(self, ctx))]
    pub async fn stop_process(&self, ctx: &ExecutionContext, id: &str) -> ProcessResult<()> {
        let process = self.get_process(id).await?;
        process.transition(ProcessStatus::Stopped).await?;

        let failures = run_members(process.components(), ctx, MemberPhase::Stop).await;

        let _ = self
            .event_bus
            .publish(
                Event::new(EventType::ProcessStopped)
                    .with_parameter("process_id", Value::from(id)),
            )
            .await;
        if !failures.is_empty() {
            error!("Process {} stop reported: {}", id, failures);
            return Err(ProcessError::StopFailures(failures));
        }
        info!("Process stopped: {}", id);
        Ok(())
    }

    /// Stops then starts a process. A stop failure aborts the restart.
    pub async fn restart_process(&self, ctx: &ExecutionContext, id: &str) -> ProcessResult<()> {
        self.stop_process(ctx, id).await?;
        self.start_process(ctx, id).await
    }

    /// Pauses a running process. Status-level only; members stay loaded
    /// and the schedule driver skips paused processes.
    pub async fn pause_process(&self, id: &str) -> ProcessResult<()> {
        let process = self.get_process(id).await?;
        process.transition(ProcessStatus::Paused).await?;
        debug!("Process paused: {}", id);
        Ok(())
    }

    /// Resumes a paused process.
    pub async fn resume_process(&self, id: &str) -> ProcessResult<()> {
        let process = self.get_process(id).await?;
        process.transition(ProcessStatus::Running).await?;
        debug!("Process resumed: {}", id);
        Ok(())
    }

    /// Records a running process as having finished its work.
    pub async fn complete_process(&self, id: &str) -> ProcessResult<()> {
        let process = self.get_process(id).await?;
        process.transition(ProcessStatus::Completed).await?;
        info!("Process completed: {}", id);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum MemberPhase {
    Start,
    Stop,
}

async fn run_members(
    components: &[Arc<dyn Component>],
    ctx: &ExecutionContext,
    phase: MemberPhase,
) -> FailureList {
    let futures = components.iter().filter_map(|component| {
        component.as_startable()?;
        let component = component.clone();
        let ctx = ctx.child();
        Some(async move {
            let Some(startable) = component.as_startable() else {
                return None;
            };
            let id = component.info().id.clone();
            let result = match phase {
                MemberPhase::Start => startable.start(&ctx).await,
                MemberPhase::Stop => startable.stop(&ctx).await,
            };
            result.err().map(|e| Failure::new(&id, e.to_string()))
        })
    });

    let mut failures = FailureList::new();
    for failure in join_all(futures.collect::<Vec<_>>()).await.into_iter().flatten() {
        failures.push(failure);
    }
    failures
}
