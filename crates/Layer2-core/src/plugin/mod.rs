//! # Plugin Runtime
//!
//! 서버 재시작 없이 서드파티 플러그인을 설치/로드/활성화/비활성화/제거한다.
//!
//! ## 아키텍처
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        PluginRuntime                         │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                 LifecycleController                    │  │
//! │  │  manifest ─▶ ModuleLoader ─▶ ExtensionLoader           │  │
//! │  │      │                              │                  │  │
//! │  │  PluginRecordStore            ExtensionRegistry        │  │
//! │  │  DockerManager                (graphql/database/       │  │
//! │  │  DatabaseExecutor              hooks/webhooks)         │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │   EventBus (RuntimeEvent)        WebhookDispatcher           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! 외부 협력자: `SchemaRebuilder` / `SchemaBuilder` (GraphQL), `DatabaseExecutor` (DDL),
//! `ModuleSource` (플러그인 코드), `CommandRunner` (docker).
//!
//! ## 예시
//!
//! ```ignore
//! let module = ModuleBuilder::new()
//!     .graphql("resolveForecast", forecast_builder)
//!     .hook("stampCreatedAt", |data| async move { Ok(data) })
//!     .build();
//! let catalog = StaticModuleSource::new().with_module("weather", "index", module)?;
//!
//! let runtime = PluginRuntime::builder()
//!     .plugins_dir("plugins")
//!     .module_source(Arc::new(catalog))
//!     .build();
//! runtime.initialize().await;
//! runtime.install("weather").await?;
//! runtime.load("weather").await?;
//! runtime.activate("weather").await?;
//! ```

mod context;
mod discovery;
mod docker;
mod events;
mod extensions;
mod graphql;
mod lifecycle;
mod manifest;
mod module;
mod registry;
mod runtime;
mod schema;
mod store;
mod webhook;

pub use context::PluginContext;
pub use discovery::{discover_available, scan_plugins, DiscoveredPlugin};
pub use docker::{
    CommandOutput, CommandRunner, CommandSpec, DockerManager, DockerPhase, TokioCommandRunner,
};
pub use events::{EventBus, PluginEvent, RuntimeEvent, RuntimeEventListener};
pub use extensions::ExtensionLoader;
pub use graphql::{
    FieldTarget, GraphqlBuilder, GraphqlFieldBuilder, GraphqlKind, NoopSchemaRebuilder,
    SchemaBuilder, SchemaRebuilder,
};
pub use lifecycle::{
    LifecycleController, LifecyclePhase, LoadedPlugin, PluginErrorRecord, PluginStatus,
    PluginSummary,
};
pub use manifest::{
    generate_plugin_id, is_valid_plugin_id, load_manifest, validate_manifest, DatabaseExtension,
    DockerConfig, ExtensionPoints, GraphqlExtension, HookExtension, ManifestVersion,
    PluginManifest, WebhookExtension, MANIFEST_FILE,
};
pub use module::{
    sanitize_module_path, BuiltModule, Export, FnHook, FnWebhook, HookHandler, ModuleBuilder,
    ModuleLoader, ModuleSource, PluginModule, StaticModuleSource, WebhookHandler,
};
pub use registry::{
    webhook_key, DatabaseContribution, ExtensionRegistry, GraphqlContribution,
    HookDispatchReport, HookErrorPolicy, HookFailure, HookRegistration, HookType,
    StagedContributions, WebhookRegistration,
};
pub use runtime::{PluginRuntime, PluginRuntimeBuilder, RuntimeStatus};
pub use schema::{
    create_index_sql, create_plugin_tables, create_table_sql, drop_plugin_tables, drop_table_sql,
    prefixed_table_name, ColumnDefault, ColumnDefinition, ColumnType, DatabaseExecutor,
    DatabaseKind, EnumDefinition, IndexDefinition, RelationDefinition, RelationKind,
    SchemaDefinition, TableDefinition,
};
pub use store::{InMemoryPluginStore, PluginRecordStore, SqlitePluginStore};
pub use webhook::{parse_query, parse_webhook_uri, WebhookDispatcher, WebhookRequest, WebhookResponse};
