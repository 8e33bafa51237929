//! trellis-core: Plugin Runtime
//!
//! Layer2 - 플러그인 런타임 레이어
//!
//! # 주요 모듈
//!
//! - `plugin`: 매니페스트 검증, 모듈/확장 로딩, 확장 레지스트리,
//!   라이프사이클 상태 머신, Docker 연동, 웹훅 디스패치
//!
//! # 사용 예시
//!
//! ```ignore
//! use trellis_core::{PluginRuntime, SqlitePluginStore};
//!
//! let runtime = PluginRuntime::builder()
//!     .from_config(&config)
//!     .store(Arc::new(SqlitePluginStore::open(&config.data_dir())?))
//!     .build();
//!
//! runtime.initialize().await;
//! let value = runtime.execute_pre_hooks("post:create", json!({ "title": "hi" })).await?;
//! ```

pub mod plugin;

// Re-exports: Runtime
pub use plugin::{PluginRuntime, PluginRuntimeBuilder, RuntimeStatus};

// Re-exports: Lifecycle
pub use plugin::{LifecyclePhase, LoadedPlugin, PluginErrorRecord, PluginStatus, PluginSummary};

// Re-exports: Manifest
pub use plugin::{is_valid_plugin_id, load_manifest, validate_manifest, PluginManifest};

// Re-exports: Modules
pub use plugin::{Export, ModuleBuilder, ModuleSource, PluginModule, StaticModuleSource};

// Re-exports: Collaborators
pub use plugin::{
    DatabaseExecutor, FieldTarget, SchemaBuilder, SchemaRebuilder, WebhookDispatcher,
    WebhookRequest, WebhookResponse,
};

// Re-exports: Persistence
pub use plugin::{InMemoryPluginStore, PluginRecordStore, SqlitePluginStore};

// Re-exports: Events
pub use plugin::{EventBus, PluginEvent, RuntimeEvent, RuntimeEventListener};
