//! Config - 런타임 설정 관리
//!
//! - `runtime.rs` - RuntimeConfig (플러그인 디렉토리, DB 위치, SQL 방언, Docker)

mod runtime;

pub use runtime::{
    DockerSettings, RuntimeConfig, SqlDialect, ENV_DATA_DIR, ENV_DOCKER_BINARY, ENV_PLUGINS_DIR,
    ENV_SQL_DIALECT, RUNTIME_CONFIG_FILE,
};
