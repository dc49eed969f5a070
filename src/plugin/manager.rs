//! Plugin lifecycle management.
//!
//! The manager tracks loaded plugins, remembers which of them are running,
//! and drives bulk start/stop as a concurrent fan-out. Bulk calls are
//! idempotent: already-running plugins are not started again and stopped
//! plugins are not stopped again, so a retry after a partial failure only
//! touches the plugins that still need work.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::config::PluginManagerConfig;
use crate::context::ExecutionContext;
use crate::error::{Failure, FailureList};
use crate::event_bus::{Event, EventBus, EventType, Value};

use super::{Plugin, PluginError, PluginLoader, PluginResult};

pub struct PluginManager {
    plugins: DashMap<String, Arc<dyn Plugin>>,
    running: DashSet<String>,
    config: PluginManagerConfig,
    event_bus: Arc<EventBus>,
}

impl PluginManager {
    pub fn new(config: PluginManagerConfig, event_bus: Arc<EventBus>) -> Self {
        Self {
            plugins: DashMap::new(),
            running: DashSet::new(),
            config,
            event_bus,
        }
    }

    /// Initializes a plugin, lets it register its resources, and tracks it
    /// under its own id. A failure in either step leaves the plugin
    /// untracked. Ids must be unique among live plugins; an id becomes
    /// reusable once its plugin is removed.
    #[instrument(level = "debug", skip(self, ctx, plugin), fields(id = %plugin.info().id))]
    pub async fn add_plugin(
        &self,
        ctx: &ExecutionContext,
        plugin: Arc<dyn Plugin>,
    ) -> PluginResult<()> {
        let id = plugin.info().id.clone();
        if self.plugins.contains_key(&id) {
            return Err(PluginError::AlreadyExists { id });
        }

        plugin.initialize(ctx).await?;
        plugin.register_resources(ctx).await?;

        match self.plugins.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(PluginError::AlreadyExists { id })
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(plugin);
            }
        }
        let _ = self
            .event_bus
            .publish(
                Event::new(EventType::PluginAdded).with_parameter("plugin_id", Value::from(id)),
            )
            .await;
        Ok(())
    }

    /// Removes a plugin and shuts it down. Shutdown failures are logged,
    /// not propagated: the plugin is gone from the manager either way.
    #[instrument(level = "debug", skip(self))]
    pub async fn remove_plugin(&self, id: &str) -> PluginResult<()> {
        let (_, plugin) = self
            .plugins
            .remove(id)
            .ok_or_else(|| PluginError::NotFound { id: id.to_string() })?;
        self.running.remove(id);

        if let Err(e) = plugin.shutdown().await {
            warn!("Plugin {} shutdown reported: {}", id, e);
        }
        let _ = self
            .event_bus
            .publish(
                Event::new(EventType::PluginRemoved).with_parameter("plugin_id", Value::from(id)),
            )
            .await;
        Ok(())
    }

    pub fn get_plugin(&self, id: &str) -> PluginResult<Arc<dyn Plugin>> {
        self.plugins
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PluginError::NotFound { id: id.to_string() })
    }

    pub fn plugin_ids(&self) -> Vec<String> {
        self.plugins.iter().map(|e| e.key().clone()).collect()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.running.contains(id)
    }

    /// Starts every plugin that is not already running, concurrently.
    /// All pending plugins are attempted; failures are aggregated and the
    /// successful ones stay running.
    #[instrument(level = "debug", skip(self, ctx))]
    pub async fn start_plugins(&self, ctx: &ExecutionContext) -> PluginResult<()> {
        let pending: Vec<Arc<dyn Plugin>> = self
            .plugins
            .iter()
            .filter(|e| !self.running.contains(e.key()))
            .map(|e| e.value().clone())
            .collect();
        if pending.is_empty() {
            debug!("No plugins pending start");
            return Ok(());
        }
        info!("Starting {} plugin(s)", pending.len());

        let results = join_all(pending.into_iter().map(|plugin| {
            let ctx = ctx.child();
            async move {
                let id = plugin.info().id.clone();
                (id, plugin.start(&ctx).await)
            }
        }))
        .await;

        let mut failures = FailureList::new();
        for (id, result) in results {
            match result {
                Ok(()) => {
                    self.running.insert(id);
                }
                Err(e) => failures.push(Failure::new(&id, e.to_string())),
            }
        }

        if !failures.is_empty() {
            return Err(PluginError::StartFailures(failures));
        }
        let _ = self
            .event_bus
            .publish(Event::new(EventType::PluginsStarted))
            .await;
        Ok(())
    }

    /// Stops every running plugin, concurrently. A plugin that fails to
    /// stop stays marked running so a retry reaches it again.
    #[instrument(level = "debug", skip(self, ctx))]
    pub async fn stop_plugins(&self, ctx: &ExecutionContext) -> PluginResult<()> {
        let running: Vec<Arc<dyn Plugin>> = self
            .plugins
            .iter()
            .filter(|e| self.running.contains(e.key()))
            .map(|e| e.value().clone())
            .collect();
        if running.is_empty() {
            debug!("No plugins running");
            return Ok(());
        }
        info!("Stopping {} plugin(s)", running.len());

        let results = join_all(running.into_iter().map(|plugin| {
            let ctx = ctx.child();
            async move {
                let id = plugin.info().id.clone();
                (id, plugin.stop(&ctx).await)
            }
        }))
        .await;

        let mut failures = FailureList::new();
        for (id, result) in results {
            match result {
                Ok(()) => {
                    self.running.remove(&id);
                }
                Err(e) => failures.push(Failure::new(&id, e.to_string())),
            }
        }

        if !failures.is_empty() {
            return Err(PluginError::StopFailures(failures));
        }
        let _ = self
            .event_bus
            .publish(Event::new(EventType::PluginsStopped))
            .await;
        Ok(())
    }

    /// Runs local and remote discovery per the manager's configuration and
    /// adds everything found. Individual artifacts that fail to load or
    /// collide with an existing id are logged and skipped. Returns how many
    /// plugins were added.
    #[instrument(level = "debug", skip(self, ctx, loader))]
    pub async fn discover(
        &self,
        ctx: &ExecutionContext,
        loader: &PluginLoader,
    ) -> PluginResult<usize> {
        if !self.config.enabled {
            debug!("Plugin discovery disabled");
            return Ok(0);
        }

        let mut added = 0;

        if let Some(dir) = &self.config.plugin_dir {
            for plugin in loader.discover_local(dir).await? {
                match self.add_plugin(ctx, plugin.clone()).await {
                    Ok(()) => added += 1,
                    Err(e) => warn!("Skipping discovered plugin {}: {}", plugin.info().id, e),
                }
            }
        }

        for url in &self.config.remote_urls {
            match loader.load_remote(url).await {
                Ok(plugin) => match self.add_plugin(ctx, plugin.clone()).await {
                    Ok(()) => added += 1,
                    Err(e) => warn!("Skipping remote plugin {}: {}", plugin.info().id, e),
                },
                Err(e) => warn!("Failed to load plugin from {}: {}", url, e),
            }
        }

        info!("Discovery added {} plugin(s)", added);
        Ok(added)
    }
}
