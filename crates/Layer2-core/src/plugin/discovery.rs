//! Plugin Discovery - 플러그인 디렉토리 스캔
//!
//! `plugins/<pluginId>/manifest.json` 형태의 하위 디렉토리를 찾는다.

use super::manifest::{load_manifest, PluginManifest, MANIFEST_FILE};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use trellis_foundation::Result;

/// manifest.json 이 있는 하위 디렉토리 이름 (정렬됨)
///
/// 디렉토리가 없으면 빈 목록.
pub async fn discover_available(plugins_dir: &Path) -> Result<Vec<String>> {
    if !fs::try_exists(plugins_dir).await.unwrap_or(false) {
        debug!("Plugins directory {} does not exist", plugins_dir.display());
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    let mut entries = fs::read_dir(plugins_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if !fs::try_exists(path.join(MANIFEST_FILE)).await.unwrap_or(false) {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            found.push(name.to_string());
        }
    }

    found.sort();
    Ok(found)
}

/// 스캔 결과 (매니페스트 검증 포함)
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub directory: String,
    pub path: PathBuf,
    /// 검증 실패 시 에러 메시지
    pub manifest: std::result::Result<PluginManifest, String>,
}

impl DiscoveredPlugin {
    pub fn is_valid(&self) -> bool {
        self.manifest.is_ok()
    }
}

/// 발견된 모든 플러그인의 매니페스트를 검증
pub async fn scan_plugins(plugins_dir: &Path) -> Result<Vec<DiscoveredPlugin>> {
    let mut plugins = Vec::new();
    for directory in discover_available(plugins_dir).await? {
        let path = plugins_dir.join(&directory);
        let manifest = match load_manifest(&path).await {
            Ok(manifest) if manifest.plugin_id == directory => Ok(manifest),
            Ok(manifest) => Err(format!(
                "pluginId '{}' does not match directory '{}'",
                manifest.plugin_id, directory
            )),
            Err(e) => {
                warn!("Invalid plugin in {}: {}", path.display(), e);
                Err(e.to_string())
            }
        };
        plugins.push(DiscoveredPlugin {
            directory,
            path,
            manifest,
        });
    }
    Ok(plugins)
}
