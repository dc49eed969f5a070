//! Child-process plugin host.
//!
//! Each loaded plugin runs as its own OS process. The host owns the child,
//! exchanges one JSON frame per line over the child's stdin/stdout, and
//! escalates to `kill` when a plugin ignores the shutdown frame past the
//! configured grace period.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::component::{ComponentInfo, ComponentKind};
use crate::context::ExecutionContext;

use super::{HostFrame, Plugin, PluginError, PluginFrame, PluginManifest, PluginResult};
use super::PLUGIN_PROTOCOL_VERSION;

struct PluginIo {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl PluginIo {
    async fn send(&mut self, frame: &HostFrame) -> PluginResult<()> {
        let mut line = serde_json::to_string(frame)
            .map_err(|e| PluginError::process(format!("frame encode failed: {}", e)))?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> PluginResult<PluginFrame> {
        let mut line = String::new();
        let read = self.stdout.read_line(&mut line).await?;
        if read == 0 {
            return Err(PluginError::process("plugin closed its stdout"));
        }
        serde_json::from_str(line.trim())
            .map_err(|e| PluginError::process(format!("malformed frame: {}", e)))
    }

    /// Sends a frame and interprets the plugin's reply, surfacing protocol
    /// error frames as host errors.
    async fn roundtrip(&mut self, frame: &HostFrame) -> PluginResult<PluginFrame> {
        self.send(frame).await?;
        match self.recv().await? {
            PluginFrame::Error { message } => Err(PluginError::process(message)),
            reply => Ok(reply),
        }
    }
}

/// A plugin backed by a child process launched from an artifact directory.
pub struct HostedPlugin {
    info: ComponentInfo,
    manifest: PluginManifest,
    io: Mutex<PluginIo>,
    shutdown_timeout: Duration,
    // keeps an extracted remote artifact alive for the plugin's lifetime
    _workdir: Option<TempDir>,
}

impl HostedPlugin {
    /// Spawns the manifest's entry executable from `dir` and performs the
    /// handshake. Fails without leaving a child behind when the plugin
    /// speaks a different protocol revision or misidentifies itself.
    pub async fn launch(
        dir: &Path,
        manifest: PluginManifest,
        shutdown_timeout: Duration,
        workdir: Option<TempDir>,
    ) -> PluginResult<Self> {
        manifest.validate()?;

        let entry = dir.join(&manifest.entry);
        debug!("Launching plugin {} from {:?}", manifest.id, entry);

        let mut child = Command::new(&entry)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PluginError::process("child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PluginError::process("child stdout unavailable"))?;

        let mut io = PluginIo {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };

        let ack = io
            .roundtrip(&HostFrame::Handshake {
                protocol_version: PLUGIN_PROTOCOL_VERSION,
            })
            .await?;

        let info = match ack {
            PluginFrame::HandshakeAck {
                protocol_version,
                id,
                name,
                description,
            } => {
                if protocol_version != PLUGIN_PROTOCOL_VERSION {
                    return Err(PluginError::ProtocolMismatch {
                        host: PLUGIN_PROTOCOL_VERSION,
                        plugin: protocol_version,
                    });
                }
                if id != manifest.id {
                    return Err(PluginError::Handshake {
                        message: format!(
                            "manifest declares id {} but plugin answered as {}",
                            manifest.id, id
                        ),
                    });
                }
                ComponentInfo::new(&id, &name, &description, ComponentKind::Plugin)
            }
            other => {
                return Err(PluginError::Handshake {
                    message: format!("expected handshake_ack, got {:?}", other),
                })
            }
        };

        Ok(Self {
            info,
            manifest,
            io: Mutex::new(io),
            shutdown_timeout,
            _workdir: workdir,
        })
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }
}

#[async_trait::async_trait]
impl Plugin for HostedPlugin {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    async fn start(&self, ctx: &ExecutionContext) -> PluginResult<()> {
        ctx.ensure_active()
            .map_err(|e| PluginError::process(e.to_string()))?;
        let mut io = self.io.lock().await;
        match io.roundtrip(&HostFrame::Start).await? {
            PluginFrame::Started => Ok(()),
            other => Err(PluginError::process(format!(
                "expected started, got {:?}",
                other
            ))),
        }
    }

    async fn stop(&self, ctx: &ExecutionContext) -> PluginResult<()> {
        ctx.ensure_active()
            .map_err(|e| PluginError::process(e.to_string()))?;
        let mut io = self.io.lock().await;
        match io.roundtrip(&HostFrame::Stop).await? {
            PluginFrame::Stopped => Ok(()),
            other => Err(PluginError::process(format!(
                "expected stopped, got {:?}",
                other
            ))),
        }
    }

    /// Asks the child to exit, then kills it if the grace period elapses.
    async fn shutdown(&self) -> PluginResult<()> {
        let mut io = self.io.lock().await;
        // the child may already be gone; a failed send just means we kill
        if let Err(e) = io.send(&HostFrame::Shutdown).await {
            debug!("Shutdown frame not delivered to {}: {}", self.info.id, e);
        }
        match tokio::time::timeout(self.shutdown_timeout, io.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Plugin {} exited with {}", self.info.id, status);
                Ok(())
            }
            Ok(Err(e)) => Err(PluginError::Io(e)),
            Err(_) => {
                warn!(
                    "Plugin {} ignored shutdown for {:?}, killing",
                    self.info.id, self.shutdown_timeout
                );
                io.child.kill().await?;
                Ok(())
            }
        }
    }
}
