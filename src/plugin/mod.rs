//! # Plugin Subsystem
//!
//! Plugins extend the runtime with functionality packaged and delivered
//! separately from the host binary. A plugin artifact is a directory with a
//! `plugin.json` manifest naming an entry executable; the runtime launches
//! the entry as a child process and speaks a small newline-delimited JSON
//! protocol with it over stdin/stdout, so a misbehaving plugin can crash
//! without taking the host down.
//!
//! The [`manager`] tracks plugins and drives their collective lifecycle,
//! the [`loader`] discovers artifacts locally and remotely, and the
//! [`host`] owns one child process per loaded plugin.

pub mod host;
pub mod loader;
pub mod manager;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::component::ComponentInfo;
use crate::context::ExecutionContext;
use crate::error::FailureList;

pub use host::HostedPlugin;
pub use loader::PluginLoader;
pub use manager::PluginManager;

/// Protocol revision spoken by this host. A plugin whose manifest or
/// handshake names a different revision is rejected at load time.
pub const PLUGIN_PROTOCOL_VERSION: u32 = 1;

/// Manifest file name expected at an artifact directory root.
pub const PLUGIN_MANIFEST_FILE: &str = "plugin.json";

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("plugin already exists: {id}")]
    AlreadyExists { id: String },

    #[error("plugin not found: {id}")]
    NotFound { id: String },

    #[error("invalid plugin manifest: {message}")]
    Manifest { message: String },

    #[error("protocol version mismatch: host speaks {host}, plugin speaks {plugin}")]
    ProtocolMismatch { host: u32, plugin: u32 },

    #[error("handshake failed: {message}")]
    Handshake { message: String },

    #[error("plugin process error: {message}")]
    Process { message: String },

    #[error("failed to fetch plugin artifact: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to start plugins: {0}")]
    StartFailures(FailureList),

    #[error("failed to stop plugins: {0}")]
    StopFailures(FailureList),
}

impl PluginError {
    pub fn manifest<S: Into<String>>(message: S) -> Self {
        PluginError::Manifest {
            message: message.into(),
        }
    }

    pub fn process<S: Into<String>>(message: S) -> Self {
        PluginError::Process {
            message: message.into(),
        }
    }
}

pub type PluginResult<T> = Result<T, PluginError>;

/// Static description of a plugin artifact, read from `plugin.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Entry executable, relative to the artifact directory.
    pub entry: String,
    pub protocol_version: u32,
}

impl PluginManifest {
    pub fn validate(&self) -> PluginResult<()> {
        if self.id.is_empty() {
            return Err(PluginError::manifest("id must not be empty"));
        }
        if self.entry.is_empty() {
            return Err(PluginError::manifest("entry must not be empty"));
        }
        if self.protocol_version != PLUGIN_PROTOCOL_VERSION {
            return Err(PluginError::ProtocolMismatch {
                host: PLUGIN_PROTOCOL_VERSION,
                plugin: self.protocol_version,
            });
        }
        Ok(())
    }
}

/// Frames sent host-to-plugin, one JSON object per line on the plugin's
/// stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostFrame {
    Handshake { protocol_version: u32 },
    Start,
    Stop,
    Shutdown,
}

/// Frames sent plugin-to-host, one JSON object per line on the plugin's
/// stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PluginFrame {
    HandshakeAck {
        protocol_version: u32,
        id: String,
        name: String,
        #[serde(default)]
        description: String,
    },
    Started,
    Stopped,
    Error {
        message: String,
    },
}

/// A loaded plugin under runtime management.
///
/// Implementations must make `start` and `stop` safe to call from the
/// manager's concurrent fan-out; the manager guarantees it will not call
/// either twice without the other in between.
#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    fn info(&self) -> &ComponentInfo;

    /// One-time wiring before the plugin is tracked. The manager only adds
    /// a plugin whose initialization succeeded.
    async fn initialize(&self, _ctx: &ExecutionContext) -> PluginResult<()> {
        Ok(())
    }

    /// Registers whatever resources the plugin contributes to the host.
    /// Runs after [`Plugin::initialize`], still before tracking. Hosted
    /// plugins declare their resources during the handshake instead.
    async fn register_resources(&self, _ctx: &ExecutionContext) -> PluginResult<()> {
        Ok(())
    }

    async fn start(&self, ctx: &ExecutionContext) -> PluginResult<()>;

    async fn stop(&self, ctx: &ExecutionContext) -> PluginResult<()>;

    /// Releases resources held by the plugin. Called once when the plugin
    /// is removed from the manager; the default does nothing.
    async fn shutdown(&self) -> PluginResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_manifest_parse_and_validate() {
        let json = r#"{
            "id": "csv-source",
            "name": "CSV Source",
            "entry": "bin/csv-source",
            "protocol_version": 1
        }"#;
        let manifest: PluginManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.id, "csv-source");
        assert_eq!(manifest.description, "");
        manifest.validate().unwrap();
    }

    #[test]
    fn test_manifest_rejects_protocol_mismatch() {
        let manifest = PluginManifest {
            id: "p1".to_string(),
            name: "p1".to_string(),
            description: String::new(),
            entry: "bin/p1".to_string(),
            protocol_version: 99,
        };
        assert!(matches!(
            manifest.validate(),
            Err(PluginError::ProtocolMismatch { host: 1, plugin: 99 })
        ));
    }

    #[test]
    fn test_manifest_rejects_empty_fields() {
        let manifest = PluginManifest {
            id: String::new(),
            name: "p1".to_string(),
            description: String::new(),
            entry: "bin/p1".to_string(),
            protocol_version: PLUGIN_PROTOCOL_VERSION,
        };
        assert!(matches!(manifest.validate(), Err(PluginError::Manifest { .. })));
    }

    #[test]
    fn test_frame_wire_format() {
        let frame = HostFrame::Handshake {
            protocol_version: PLUGIN_PROTOCOL_VERSION,
        };
        assert_eq!(
            serde_json::to_string(&frame).unwrap(),
            r#"{"type":"handshake","protocol_version":1}"#
        );

        let ack: PluginFrame = serde_json::from_str(
            r#"{"type":"handshake_ack","protocol_version":1,"id":"p1","name":"P1"}"#,
        )
        .unwrap();
        assert!(matches!(ack, PluginFrame::HandshakeAck { .. }));
    }
}
