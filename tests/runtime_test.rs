use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nagare::plugin::{Plugin, PluginManager, PluginResult};
use nagare::process::{EtlProcessConfig, ProcessManager, ProcessStatus, ScheduleDriver};
use nagare::{
    Component, ComponentConfig, ComponentError, ComponentFactory, ComponentInfo, ComponentKind,
    ComponentResult, EventType, ExecutionContext, Initializable, Operation, OperationInput,
    OperationOutput, Startable, System, SystemConfig, SystemContext,
};
use tokio::time::sleep;

/// A service that records its lifecycle and refuses to start before it has
/// been initialized.
struct PipelineService {
    info: ComponentInfo,
    initialized: AtomicBool,
    running: AtomicBool,
}

impl Component for PipelineService {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    fn as_startable(&self) -> Option<&dyn Startable> {
        Some(self)
    }

    fn as_initializable(&self) -> Option<&dyn Initializable> {
        Some(self)
    }
}

#[async_trait]
impl Initializable for PipelineService {
    async fn initialize(
        &self,
        _ctx: &ExecutionContext,
        _system: &SystemContext,
    ) -> ComponentResult<()> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Startable for PipelineService {
    async fn start(&self, ctx: &ExecutionContext) -> ComponentResult<()> {
        ctx.ensure_active()?;
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(ComponentError::execution("not initialized"));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, ctx: &ExecutionContext) -> ComponentResult<()> {
        ctx.ensure_active()?;
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct PipelineServiceFactory;

#[async_trait]
impl ComponentFactory for PipelineServiceFactory {
    async fn create(&self, config: &ComponentConfig) -> ComponentResult<Arc<dyn Component>> {
        Ok(Arc::new(PipelineService {
            info: ComponentInfo::new(
                &config.id,
                &config.name,
                &config.description,
                ComponentKind::Service,
            ),
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }))
    }
}

/// An operation that doubles every number it receives.
struct DoubleOperation {
    info: ComponentInfo,
}

impl Component for DoubleOperation {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    fn as_operation(&self) -> Option<&dyn Operation> {
        Some(self)
    }
}

#[async_trait]
impl Operation for DoubleOperation {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: OperationInput,
    ) -> ComponentResult<OperationOutput> {
        ctx.ensure_active()?;
        let n = input
            .data
            .get("n")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ComponentError::execution("expected numeric field n"))?;
        Ok(OperationOutput::new(serde_json::json!({ "n": n * 2 })))
    }
}

struct DoubleOperationFactory;

#[async_trait]
impl ComponentFactory for DoubleOperationFactory {
    async fn create(&self, config: &ComponentConfig) -> ComponentResult<Arc<dyn Component>> {
        Ok(Arc::new(DoubleOperation {
            info: ComponentInfo::new(
                &config.id,
                &config.name,
                &config.description,
                ComponentKind::Operation,
            ),
        }))
    }
}

struct InMemoryPlugin {
    info: ComponentInfo,
    running: AtomicBool,
}

impl InMemoryPlugin {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            info: ComponentInfo::new(id, id, "", ComponentKind::Plugin),
            running: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Plugin for InMemoryPlugin {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    async fn start(&self, _ctx: &ExecutionContext) -> PluginResult<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _ctx: &ExecutionContext) -> PluginResult<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn pipeline_system_config() -> SystemConfig {
    let mut config = SystemConfig::default();
    config.services.push(ComponentConfig::new(
        "ingest",
        "ingest service",
        "pipelineFactory",
    ));
    config.services.push(ComponentConfig::new(
        "publish",
        "publish service",
        "pipelineFactory",
    ));
    config.operations.push(ComponentConfig::new(
        "double",
        "double numbers",
        "doubleFactory",
    ));
    config
}

async fn booted_system() -> System {
    let system = System::new(pipeline_system_config());
    system
        .registry()
        .register_factory("pipelineFactory", Arc::new(PipelineServiceFactory))
        .await
        .unwrap();
    system
        .registry()
        .register_factory("doubleFactory", Arc::new(DoubleOperationFactory))
        .await
        .unwrap();
    system.initialize().await.unwrap();
    system
}

#[tokio::test]
async fn test_system_end_to_end() {
    let system = booted_system().await;
    let (mut event_rx, _) = system.event_bus().subscribe();

    system.start().await.unwrap();

    let output = system
        .execute_operation("double", OperationInput::new(serde_json::json!({"n": 21})))
        .await
        .unwrap();
    assert_eq!(output.data, serde_json::json!({"n": 42}));

    system.restart_service("ingest").await.unwrap();
    system.stop().await.unwrap();

    // the bus saw the whole lifecycle, starting with the system going up
    let first = event_rx.recv().await.unwrap();
    assert_eq!(first.event_type, EventType::SystemStarting);
}

#[tokio::test]
async fn test_uninitialized_system_refuses_to_start() {
    let system = System::new(pipeline_system_config());
    assert!(system.start().await.is_err());
}

#[tokio::test]
async fn test_process_lifecycle_over_shared_registry() {
    let system = booted_system().await;
    let manager = Arc::new(ProcessManager::new(system.registry(), system.event_bus()));
    let ctx = ExecutionContext::new();

    let config = EtlProcessConfig {
        id: Some("nightly".to_string()),
        name: "nightly load".to_string(),
        description: String::new(),
        components: vec![
            ComponentConfig::new("extract", "extract", "pipelineFactory"),
            ComponentConfig::new("load", "load", "pipelineFactory"),
        ],
    };
    manager.initialize_process(&ctx, config).await.unwrap();
    assert_eq!(
        manager.get_status("nightly").await.unwrap(),
        ProcessStatus::Initialized
    );

    manager.start_process(&ctx, "nightly").await.unwrap();
    assert_eq!(
        manager.get_status("nightly").await.unwrap(),
        ProcessStatus::Running
    );

    manager.restart_process(&ctx, "nightly").await.unwrap();
    manager.stop_process(&ctx, "nightly").await.unwrap();
    assert_eq!(
        manager.get_status("nightly").await.unwrap(),
        ProcessStatus::Stopped
    );
}

#[tokio::test]
async fn test_scheduled_process_runs_in_background() {
    let system = booted_system().await;
    let manager = Arc::new(ProcessManager::new(system.registry(), system.event_bus()));
    let ctx = ExecutionContext::new();

    manager
        .initialize_process(
            &ctx,
            EtlProcessConfig {
                id: Some("ticker".to_string()),
                name: "ticker".to_string(),
                description: String::new(),
                components: vec![ComponentConfig::new("step", "step", "pipelineFactory")],
            },
        )
        .await
        .unwrap();

    let mut scheduler_config = system.config().scheduler.clone();
    scheduler_config.poll_interval = Duration::from_millis(10);
    let driver = ScheduleDriver::new(manager.clone(), &scheduler_config);
    driver
        .schedule_process(
            "ticker",
            Arc::new(nagare::process::IntervalSchedule::new(Duration::from_millis(1))),
        )
        .await
        .unwrap();

    driver.start().await;
    sleep(Duration::from_millis(100)).await;
    driver.stop().await;

    assert_eq!(
        manager.get_status("ticker").await.unwrap(),
        ProcessStatus::Running
    );
    assert!(driver.is_scheduled("ticker"));
}

#[tokio::test]
async fn test_plugin_manager_with_system_bus() {
    let system = booted_system().await;
    let manager = PluginManager::new(system.config().plugins.clone(), system.event_bus());
    let (mut event_rx, _) = system.event_bus().subscribe();
    let ctx = ExecutionContext::new();

    let alpha = InMemoryPlugin::new("alpha");
    let beta = InMemoryPlugin::new("beta");
    manager.add_plugin(&ctx, alpha.clone()).await.unwrap();
    manager.add_plugin(&ctx, beta.clone()).await.unwrap();

    manager.start_plugins(&ctx).await.unwrap();
    assert!(alpha.running.load(Ordering::SeqCst));
    assert!(beta.running.load(Ordering::SeqCst));

    manager.stop_plugins(&ctx).await.unwrap();
    assert!(!alpha.running.load(Ordering::SeqCst));

    manager.remove_plugin("alpha").await.unwrap();
    assert_eq!(manager.plugin_ids(), vec!["beta".to_string()]);

    assert_eq!(
        event_rx.recv().await.unwrap().event_type,
        EventType::PluginAdded
    );
}
