//! Error types for Trellis
//!
//! 플러그인 런타임의 모든 에러를 중앙에서 관리

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trellis 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 플러그인 로딩
    // ========================================================================
    #[error("Invalid plugin manifest: {0}")]
    ManifestInvalid(String),

    #[error("Failed to load plugin module: {0}")]
    ModuleLoadFailed(String),

    #[error("{0}")]
    ExtensionLoadFailed(String),

    // ========================================================================
    // 라이프사이클
    // ========================================================================
    #[error("Lifecycle hook {hook} failed for plugin {plugin_id}: {message}")]
    LifecycleHookFailed {
        plugin_id: String,
        hook: String,
        message: String,
    },

    #[error("Persistence error: {0}")]
    PersistenceFailed(String),

    // ========================================================================
    // Docker
    // ========================================================================
    #[error("Docker unavailable: {0}")]
    DockerUnavailable(String),

    #[error("Docker command failed: {0}")]
    DockerCommandFailed(String),

    // ========================================================================
    // 저장소 관련
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 로그만 남기고 진행해도 되는 에러인지 확인
    ///
    /// 플러그인 훅과 Docker 단계의 실패는 라이프사이클 작업을 중단시키지 않는다.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::LifecycleHookFailed { .. }
                | Error::DockerUnavailable(_)
                | Error::DockerCommandFailed(_)
        )
    }

    /// 사용자에게 보여줄 수 있는 에러인지 확인
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::InvalidInput(_)
                | Error::Validation(_)
                | Error::ManifestInvalid(_)
        )
    }

    /// 라이프사이클 훅 에러 생성 헬퍼
    pub fn hook_failed(
        plugin_id: impl Into<String>,
        hook: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::LifecycleHookFailed {
            plugin_id: plugin_id.into(),
            hook: hook.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
