//! # trellis-foundation
//!
//! Foundation layer for Trellis:
//! - Error: 플러그인 런타임 에러 분류 (Error, Result)
//! - Config: RuntimeConfig (글로벌 + 프로젝트 + 환경 변수 병합)
//! - Storage: SQLite (플러그인 레코드), JsonStore (설정 파일)

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{DockerSettings, RuntimeConfig, SqlDialect, RUNTIME_CONFIG_FILE};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::{ConfigScope, JsonStore, PluginRecord, PluginRecordDb, PLUGIN_DB_FILE};
