//! 설정 디렉토리의 JSON 파일
//!
//! 글로벌 (`~/.config/trellis/`) 과 프로젝트 (`.trellis/`) 두 범위가 있고,
//! `RuntimeConfig::load` 가 글로벌 → 프로젝트 순으로 덮어쓴다.

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

/// 프로젝트 설정 디렉토리 이름
pub const PROJECT_DIR_NAME: &str = ".trellis";

/// 설정 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigScope {
    Global,
    Project,
    /// 임의 디렉토리 (테스트, `--config`)
    Custom,
}

impl std::fmt::Display for ConfigScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Project => write!(f, "project"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonStore {
    scope: ConfigScope,
    dir: PathBuf,
}

impl JsonStore {
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            scope: ConfigScope::Custom,
            dir: dir.into(),
        }
    }

    pub fn global() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("No user config directory on this platform".into()))?;
        Ok(Self {
            scope: ConfigScope::Global,
            dir: dir.join(PROJECT_DIR_NAME.trim_start_matches('.')),
        })
    }

    pub fn project(root: &Path) -> Self {
        Self {
            scope: ConfigScope::Project,
            dir: root.join(PROJECT_DIR_NAME),
        }
    }

    pub fn current_project() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        Ok(Self::project(&cwd))
    }

    pub fn scope(&self) -> ConfigScope {
        self.scope
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 파일이 없으면 `Ok(None)`, 있는데 깨졌으면 Config 에러
    pub fn read<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        let path = self.dir.join(filename);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.config_error(&path, e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| self.config_error(&path, e))
    }

    /// 임시 파일에 쓴 뒤 rename
    pub fn write<T: Serialize>(&self, filename: &str, value: &T) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| self.config_error(&self.dir, e))?;

        let path = self.dir.join(filename);
        let staging = self.dir.join(format!(".{}.tmp", filename));
        let content = serde_json::to_string_pretty(value)?;
        std::fs::write(&staging, content).map_err(|e| self.config_error(&staging, e))?;
        std::fs::rename(&staging, &path).map_err(|e| self.config_error(&path, e))?;
        Ok(path)
    }

    fn config_error(&self, path: &Path, e: impl std::fmt::Display) -> Error {
        Error::Config(format!("{} config {}: {}", self.scope, path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Settings {
        plugins_dir: String,
        auto_load: bool,
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::at(dir.path().join("nested"));

        let settings = Settings {
            plugins_dir: "plugins".into(),
            auto_load: true,
        };
        let path = store.write("runtime.json", &settings).unwrap();
        assert!(path.ends_with("nested/runtime.json"));
        assert!(!dir.path().join("nested/.runtime.json.tmp").exists());

        let loaded: Option<Settings> = store.read("runtime.json").unwrap();
        assert_eq!(loaded, Some(settings));
    }

    #[test]
    fn test_project_scope_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::project(dir.path());
        assert_eq!(store.scope(), ConfigScope::Project);
        assert!(store.dir().ends_with(PROJECT_DIR_NAME));

        let missing: Option<Settings> = store.read("runtime.json").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_broken_file_names_scope() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("runtime.json"), "{ not json").unwrap();
        let store = JsonStore::at(dir.path());

        let err = store.read::<Settings>("runtime.json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("custom config"));
    }
}
