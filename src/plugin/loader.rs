//! Plugin artifact discovery and acquisition.
//!
//! Local discovery scans a configured directory for artifact directories
//! (anything containing a `plugin.json`). Remote acquisition downloads a
//! gzipped tarball, unpacks it into a temporary directory, and launches
//! from there; the temporary directory lives as long as the plugin does.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::config::PluginManagerConfig;

use super::{
    HostedPlugin, Plugin, PluginError, PluginManifest, PluginResult, PLUGIN_MANIFEST_FILE,
};

/// Loads plugins from local directories and remote tarball artifacts.
pub struct PluginLoader {
    http: reqwest::Client,
    shutdown_timeout: Duration,
}

impl PluginLoader {
    pub fn new(config: &PluginManagerConfig) -> PluginResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()?;
        Ok(Self {
            http,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Launches the plugin described by `dir/plugin.json`.
    pub async fn load_dir(&self, dir: &Path) -> PluginResult<Arc<HostedPlugin>> {
        let manifest = read_manifest(dir)?;
        let plugin =
            HostedPlugin::launch(dir, manifest, self.shutdown_timeout, None).await?;
        Ok(Arc::new(plugin))
    }

    /// Scans `root` for artifact directories and launches each one.
    ///
    /// Discovery is best effort: an artifact that fails to load is logged
    /// and skipped so one broken plugin cannot block its neighbors.
    pub async fn discover_local(&self, root: &Path) -> PluginResult<Vec<Arc<HostedPlugin>>> {
        let mut plugins = Vec::new();
        let mut entries = tokio::fs::read_dir(root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() || !path.join(PLUGIN_MANIFEST_FILE).is_file() {
                continue;
            }
            match self.load_dir(&path).await {
                Ok(plugin) => {
                    debug!("Discovered plugin {} at {:?}", plugin.info().id, path);
                    plugins.push(plugin);
                }
                Err(e) => warn!("Skipping plugin artifact at {:?}: {}", path, e),
            }
        }
        Ok(plugins)
    }

    /// Downloads a gzipped tarball artifact, unpacks it, and launches the
    /// plugin inside.
    pub async fn load_remote(&self, url: &str) -> PluginResult<Arc<HostedPlugin>> {
        info!("Fetching plugin artifact from {}", url);
        let bytes = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let (workdir, artifact_dir) = tokio::task::spawn_blocking(move || {
            extract_artifact(&bytes)
        })
        .await
        .map_err(|e| PluginError::process(format!("extraction task failed: {}", e)))??;

        let manifest = read_manifest(&artifact_dir)?;
        let plugin = HostedPlugin::launch(
            &artifact_dir,
            manifest,
            self.shutdown_timeout,
            Some(workdir),
        )
        .await?;
        Ok(Arc::new(plugin))
    }
}

fn read_manifest(dir: &Path) -> PluginResult<PluginManifest> {
    let path = dir.join(PLUGIN_MANIFEST_FILE);
    let raw = std::fs::read_to_string(&path)?;
    let manifest: PluginManifest = serde_json::from_str(&raw)
        .map_err(|e| PluginError::manifest(format!("{:?}: {}", path, e)))?;
    manifest.validate()?;
    Ok(manifest)
}

/// Unpacks a gzipped tarball into a fresh temporary directory and locates
/// the artifact root: either the unpack root itself or the single top-level
/// directory containing the manifest.
fn extract_artifact(bytes: &[u8]) -> PluginResult<(TempDir, PathBuf)> {
    let workdir = tempfile::tempdir()?;
    let mut archive = tar::Archive::new(GzDecoder::new(Cursor::new(bytes)));
    archive.unpack(workdir.path())?;

    if workdir.path().join(PLUGIN_MANIFEST_FILE).is_file() {
        let root = workdir.path().to_path_buf();
        return Ok((workdir, root));
    }
    for entry in std::fs::read_dir(workdir.path())? {
        let path = entry?.path();
        if path.is_dir() && path.join(PLUGIN_MANIFEST_FILE).is_file() {
            return Ok((workdir, path));
        }
    }
    Err(PluginError::manifest(
        "artifact does not contain a plugin.json",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use pretty_assertions::assert_eq;

    use super::super::PLUGIN_PROTOCOL_VERSION;

    fn manifest_json(id: &str) -> String {
        format!(
            r#"{{"id":"{}","name":"{}","entry":"entry.sh","protocol_version":{}}}"#,
            id, id, PLUGIN_PROTOCOL_VERSION
        )
    }

    #[test]
    fn test_read_manifest_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PLUGIN_MANIFEST_FILE), "not json").unwrap();
        assert!(matches!(
            read_manifest(dir.path()),
            Err(PluginError::Manifest { .. })
        ));
    }

    #[test]
    fn test_extract_artifact_with_nested_root() {
        let staging = tempfile::tempdir().unwrap();
        let plugin_dir = staging.path().join("p1");
        std::fs::create_dir(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join(PLUGIN_MANIFEST_FILE), manifest_json("p1")).unwrap();
        std::fs::write(plugin_dir.join("entry.sh"), "#!/bin/sh\n").unwrap();

        let mut tarball = Vec::new();
        {
            let encoder = GzEncoder::new(&mut tarball, Compression::default());
            let mut builder = tar::Builder::new(encoder);
            builder
                .append_dir_all("p1", &plugin_dir)
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let (_workdir, artifact_dir) = extract_artifact(&tarball).unwrap();
        let manifest = read_manifest(&artifact_dir).unwrap();
        assert_eq!(manifest.id, "p1");
    }

    #[test]
    fn test_extract_artifact_without_manifest_fails() {
        let staging = tempfile::tempdir().unwrap();
        std::fs::write(staging.path().join("readme.txt"), "nothing here").unwrap();

        let mut tarball = Vec::new();
        {
            let encoder = GzEncoder::new(&mut tarball, Compression::default());
            let mut builder = tar::Builder::new(encoder);
            builder.append_dir_all(".", staging.path()).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        assert!(matches!(
            extract_artifact(&tarball),
            Err(PluginError::Manifest { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_discover_local_skips_broken_artifacts() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();

        // healthy plugin
        let good = root.path().join("good");
        std::fs::create_dir(&good).unwrap();
        std::fs::write(good.join(PLUGIN_MANIFEST_FILE), manifest_json("good")).unwrap();
        let entry = good.join("entry.sh");
        std::fs::write(
            &entry,
            concat!(
                "#!/bin/sh\nread _h\n",
                "echo '{\"type\":\"handshake_ack\",\"protocol_version\":1,",
                "\"id\":\"good\",\"name\":\"good\"}'\n",
                "while read line; do\n",
                "  case \"$line\" in '{\"type\":\"shutdown\"}') exit 0 ;; esac\n",
                "done\n"
            ),
        )
        .unwrap();
        std::fs::set_permissions(&entry, std::fs::Permissions::from_mode(0o755)).unwrap();

        // manifest is unparseable
        let broken = root.path().join("broken");
        std::fs::create_dir(&broken).unwrap();
        std::fs::write(broken.join(PLUGIN_MANIFEST_FILE), "{").unwrap();

        // not an artifact at all
        std::fs::write(root.path().join("stray.txt"), "ignored").unwrap();

        let loader = PluginLoader::new(&PluginManagerConfig::default()).unwrap();
        let plugins = loader.discover_local(root.path()).await.unwrap();

        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].info().id, "good");
        plugins[0].shutdown().await.unwrap();
    }
}
