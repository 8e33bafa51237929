//! Runtime Config - 플러그인 런타임 설정
//!
//! 글로벌(~/.config/trellis/) → 프로젝트(.trellis/) → 환경 변수 순으로 병합

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 설정 파일명
pub const RUNTIME_CONFIG_FILE: &str = "runtime.json";

pub const ENV_PLUGINS_DIR: &str = "TRELLIS_PLUGINS_DIR";
pub const ENV_DATA_DIR: &str = "TRELLIS_DATA_DIR";
pub const ENV_SQL_DIALECT: &str = "TRELLIS_SQL_DIALECT";
pub const ENV_DOCKER_BINARY: &str = "TRELLIS_DOCKER_BINARY";

const DEFAULT_PLUGINS_DIR: &str = "plugins";
const DEFAULT_EVENT_HISTORY: usize = 100;
const DEFAULT_COMPOSE_FILE: &str = "container/docker-compose.yml";

// ============================================================================
// SQL Dialect
// ============================================================================

/// 플러그인 테이블 DDL을 생성할 SQL 방언
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Postgres,
    Sqlite,
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlDialect::Postgres => write!(f, "postgres"),
            SqlDialect::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for SqlDialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(SqlDialect::Postgres),
            "sqlite" => Ok(SqlDialect::Sqlite),
            other => Err(Error::Config(format!("Unknown SQL dialect: {}", other))),
        }
    }
}

// ============================================================================
// Runtime Config
// ============================================================================

/// 플러그인 런타임 설정
///
/// 모든 필드는 선택 사항이며, 접근자 메서드가 기본값을 채운다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// 플러그인 디렉토리 (각 하위 디렉토리에 manifest.json)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugins_dir: Option<PathBuf>,

    /// 플러그인 레코드 DB 위치
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_dialect: Option<SqlDialect>,

    /// 시작 시 설치된 플러그인 자동 로드
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_load: Option<bool>,

    #[serde(default)]
    pub docker: DockerSettings,

    /// 이벤트 히스토리 보관 개수
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_history_size: Option<usize>,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// 글로벌 + 프로젝트 병합 후 환경 변수 적용
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        if let Ok(global) = JsonStore::global() {
            if let Some(global_config) = global.read::<RuntimeConfig>(RUNTIME_CONFIG_FILE)? {
                config.merge(global_config);
            }
        }

        if let Ok(project) = JsonStore::current_project() {
            if let Some(project_config) =
                project.read::<RuntimeConfig>(RUNTIME_CONFIG_FILE)?
            {
                config.merge(project_config);
            }
        }

        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// 지정한 파일 하나만 로드 (환경 변수는 적용)
    pub fn load_from(path: &Path) -> Result<Self> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Config(format!("Invalid config path: {}", path.display())))?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut config = JsonStore::at(dir)
            .read::<RuntimeConfig>(filename)?
            .ok_or_else(|| Error::Config(format!("Config file not found: {}", path.display())))?;
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// 프로젝트 설정 저장
    pub fn save_project(&self) -> Result<()> {
        JsonStore::current_project()?.write(RUNTIME_CONFIG_FILE, self)?;
        Ok(())
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// 다른 설정과 병합 (other가 우선)
    pub fn merge(&mut self, other: RuntimeConfig) {
        if other.plugins_dir.is_some() {
            self.plugins_dir = other.plugins_dir;
        }
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
        if other.sql_dialect.is_some() {
            self.sql_dialect = other.sql_dialect;
        }
        if other.auto_load.is_some() {
            self.auto_load = other.auto_load;
        }
        if other.event_history_size.is_some() {
            self.event_history_size = other.event_history_size;
        }
        self.docker.merge(other.docker);
    }

    /// 환경 변수 오버라이드
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_PLUGINS_DIR).filter(|v| !v.is_empty()) {
            self.plugins_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(dialect) = lookup(ENV_SQL_DIALECT).filter(|v| !v.is_empty()) {
            self.sql_dialect = Some(dialect.parse()?);
        }
        if let Some(binary) = lookup(ENV_DOCKER_BINARY).filter(|v| !v.is_empty()) {
            self.docker.binary = Some(binary);
        }
        Ok(())
    }

    // ========================================================================
    // Accessors (기본값 포함)
    // ========================================================================

    pub fn plugins_dir(&self) -> PathBuf {
        self.plugins_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PLUGINS_DIR))
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|d| d.join("trellis"))
                .unwrap_or_else(|| PathBuf::from(".trellis").join("data"))
        })
    }

    pub fn sql_dialect(&self) -> SqlDialect {
        self.sql_dialect.unwrap_or_default()
    }

    pub fn auto_load(&self) -> bool {
        self.auto_load.unwrap_or(true)
    }

    pub fn event_history_size(&self) -> usize {
        self.event_history_size.unwrap_or(DEFAULT_EVENT_HISTORY)
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_plugins_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugins_dir = Some(dir.into());
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_sql_dialect(mut self, dialect: SqlDialect) -> Self {
        self.sql_dialect = Some(dialect);
        self
    }
}

// ============================================================================
// Docker Settings
// ============================================================================

/// 사이드카 컨테이너 실행 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerSettings {
    /// docker 실행 파일 (기본 "docker")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,

    /// `sudo` 로 감싸서 실행
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_sudo: Option<bool>,

    /// manifest에 composeFile이 없을 때 사용
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_compose_file: Option<String>,

    /// false면 모든 Docker 단계를 건너뜀
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl DockerSettings {
    pub fn merge(&mut self, other: DockerSettings) {
        if other.binary.is_some() {
            self.binary = other.binary;
        }
        if other.use_sudo.is_some() {
            self.use_sudo = other.use_sudo;
        }
        if other.default_compose_file.is_some() {
            self.default_compose_file = other.default_compose_file;
        }
        if other.enabled.is_some() {
            self.enabled = other.enabled;
        }
    }

    pub fn binary(&self) -> &str {
        self.binary.as_deref().unwrap_or("docker")
    }

    pub fn use_sudo(&self) -> bool {
        self.use_sudo.unwrap_or(false)
    }

    pub fn default_compose_file(&self) -> &str {
        self.default_compose_file
            .as_deref()
            .unwrap_or(DEFAULT_COMPOSE_FILE)
    }

    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::new();
        assert_eq!(config.plugins_dir(), PathBuf::from("plugins"));
        assert_eq!(config.sql_dialect(), SqlDialect::Postgres);
        assert!(config.auto_load());
        assert_eq!(config.event_history_size(), 100);
        assert_eq!(config.docker.binary(), "docker");
        assert_eq!(
            config.docker.default_compose_file(),
            "container/docker-compose.yml"
        );
        assert!(config.docker.enabled());
    }

    #[test]
    fn test_parse_camel_case() {
        let json = r#"{
            "pluginsDir": "/srv/plugins",
            "sqlDialect": "sqlite",
            "autoLoad": false,
            "docker": { "useSudo": true, "enabled": false }
        }"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.plugins_dir(), PathBuf::from("/srv/plugins"));
        assert_eq!(config.sql_dialect(), SqlDialect::Sqlite);
        assert!(!config.auto_load());
        assert!(config.docker.use_sudo());
        assert!(!config.docker.enabled());
    }

    #[test]
    fn test_merge_other_wins() {
        let mut base = RuntimeConfig::new()
            .with_plugins_dir("global/plugins")
            .with_sql_dialect(SqlDialect::Sqlite);
        let project = RuntimeConfig::new().with_plugins_dir("project/plugins");

        base.merge(project);
        assert_eq!(base.plugins_dir(), PathBuf::from("project/plugins"));
        assert_eq!(base.sql_dialect(), SqlDialect::Sqlite);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_PLUGINS_DIR, "/env/plugins"),
            (ENV_SQL_DIALECT, "SQLite"),
            (ENV_DOCKER_BINARY, "podman"),
        ]
        .into_iter()
        .collect();

        let mut config = RuntimeConfig::new().with_plugins_dir("file/plugins");
        config
            .apply_env_with(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.plugins_dir(), PathBuf::from("/env/plugins"));
        assert_eq!(config.sql_dialect(), SqlDialect::Sqlite);
        assert_eq!(config.docker.binary(), "podman");
    }

    #[test]
    fn test_bad_dialect_env_is_config_error() {
        let mut config = RuntimeConfig::new();
        let err = config
            .apply_env_with(|k| (k == ENV_SQL_DIALECT).then(|| "oracle".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("runtime.json");
        std::fs::write(&path, r#"{ "eventHistorySize": 8 }"#).unwrap();

        let config = RuntimeConfig::load_from(&path).unwrap();
        assert_eq!(config.event_history_size(), 8);
    }
}
