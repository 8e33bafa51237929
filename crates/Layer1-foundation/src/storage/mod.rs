//! Storage module for Trellis
//!
//! - `db`: SQLite - 플러그인 설치/활성화 레코드
//! - `json`: JSON - 런타임 설정 파일 저장/로드

mod db;
mod json;

// SQLite Storage (플러그인 레코드)
pub use db::{PluginRecord, PluginRecordDb, PLUGIN_DB_FILE};

// JSON Storage (범용)
pub use json::{ConfigScope, JsonStore, PROJECT_DIR_NAME};
