//! Plugin Runtime - 플러그인 시스템 진입점
//!
//! 시작 시 설치된 플러그인을 모두 로드하고, 라이프사이클 명령과 조회,
//! 훅 디스패치, 웹훅 디스패처를 제공한다. 전역 상태 없이 인스턴스 단위로 동작한다.
//!
//! ```ignore
//! let runtime = PluginRuntime::builder()
//!     .plugins_dir("plugins")
//!     .store(Arc::new(SqlitePluginStore::open(&data_dir)?))
//!     .module_source(Arc::new(catalog))
//!     .build();
//!
//! runtime.initialize().await;
//! runtime.activate("weather_widget").await?;
//! ```

use super::context::PluginContext;
use super::docker::{CommandRunner, DockerManager, TokioCommandRunner};
use super::events::{EventBus, PluginEvent, RuntimeEvent, RuntimeEventListener, DEFAULT_CHANNEL_CAPACITY};
use super::graphql::{FieldTarget, NoopSchemaRebuilder, SchemaBuilder, SchemaRebuilder};
use super::lifecycle::{LifecycleController, LifecycleParts, LoadedPlugin, PluginErrorRecord};
use super::module::{ModuleLoader, ModuleSource, StaticModuleSource};
use super::registry::{ExtensionRegistry, HookDispatchReport, HookErrorPolicy, HookFailure};
use super::schema::DatabaseExecutor;
use super::store::{InMemoryPluginStore, PluginRecordStore};
use super::webhook::WebhookDispatcher;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use trellis_foundation::{DockerSettings, PluginRecord, Result, RuntimeConfig, SqlDialect};

/// 런타임 상태 요약
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    pub initialized: bool,
    pub plugin_count: usize,
    pub active_plugin_count: usize,
    pub errors: Vec<PluginErrorRecord>,
}

// ============================================================================
// Builder
// ============================================================================

pub struct PluginRuntimeBuilder {
    plugins_dir: PathBuf,
    store: Option<Arc<dyn PluginRecordStore>>,
    module_source: Option<Arc<dyn ModuleSource>>,
    rebuilder: Arc<dyn SchemaRebuilder>,
    database: Option<Arc<dyn DatabaseExecutor>>,
    dialect: SqlDialect,
    docker_settings: DockerSettings,
    command_runner: Arc<dyn CommandRunner>,
    event_history_size: usize,
    auto_load: bool,
    hook_policy: HookErrorPolicy,
}

impl Default for PluginRuntimeBuilder {
    fn default() -> Self {
        let config = RuntimeConfig::default();
        Self {
            plugins_dir: config.plugins_dir(),
            store: None,
            module_source: None,
            rebuilder: Arc::new(NoopSchemaRebuilder),
            database: None,
            dialect: config.sql_dialect(),
            docker_settings: DockerSettings::default(),
            command_runner: Arc::new(TokioCommandRunner),
            event_history_size: config.event_history_size(),
            auto_load: config.auto_load(),
            hook_policy: HookErrorPolicy::default(),
        }
    }
}

impl PluginRuntimeBuilder {
    /// 설정 파일 값 반영 (plugins dir, dialect, docker, 이벤트 히스토리, 자동 로드)
    pub fn from_config(mut self, config: &RuntimeConfig) -> Self {
        self.plugins_dir = config.plugins_dir();
        self.dialect = config.sql_dialect();
        self.docker_settings = config.docker.clone();
        self.event_history_size = config.event_history_size();
        self.auto_load = config.auto_load();
        self
    }

    pub fn plugins_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugins_dir = dir.into();
        self
    }

    pub fn store(mut self, store: Arc<dyn PluginRecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn module_source(mut self, source: Arc<dyn ModuleSource>) -> Self {
        self.module_source = Some(source);
        self
    }

    pub fn schema_rebuilder(mut self, rebuilder: Arc<dyn SchemaRebuilder>) -> Self {
        self.rebuilder = rebuilder;
        self
    }

    pub fn database(mut self, executor: Arc<dyn DatabaseExecutor>) -> Self {
        self.database = Some(executor);
        self
    }

    pub fn sql_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn docker_settings(mut self, settings: DockerSettings) -> Self {
        self.docker_settings = settings;
        self
    }

    pub fn command_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.command_runner = runner;
        self
    }

    pub fn event_history_size(mut self, size: usize) -> Self {
        self.event_history_size = size;
        self
    }

    pub fn auto_load(mut self, auto_load: bool) -> Self {
        self.auto_load = auto_load;
        self
    }

    pub fn hook_policy(mut self, policy: HookErrorPolicy) -> Self {
        self.hook_policy = policy;
        self
    }

    pub fn build(self) -> PluginRuntime {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryPluginStore::new()));
        let source = self
            .module_source
            .unwrap_or_else(|| Arc::new(StaticModuleSource::new()));

        let mut context = PluginContext::new(self.plugins_dir);
        if let Some(database) = self.database {
            context = context.with_database(database);
        }
        let context = Arc::new(context);

        let registry = Arc::new(ExtensionRegistry::with_policy(self.hook_policy));
        let events = Arc::new(EventBus::with_capacity(
            DEFAULT_CHANNEL_CAPACITY,
            self.event_history_size,
        ));

        let lifecycle = LifecycleController::new(LifecycleParts {
            registry: Arc::clone(&registry),
            store: Arc::clone(&store),
            modules: Arc::new(ModuleLoader::new(source)),
            docker: DockerManager::new(self.docker_settings, self.command_runner),
            rebuilder: self.rebuilder,
            dialect: self.dialect,
            events: Arc::clone(&events),
            context: Arc::clone(&context),
        });

        PluginRuntime {
            inner: Arc::new(RuntimeInner {
                lifecycle,
                registry,
                events,
                context,
                store,
                auto_load: self.auto_load,
                initialized: AtomicBool::new(false),
            }),
        }
    }
}

// ============================================================================
// PluginRuntime
// ============================================================================

struct RuntimeInner {
    lifecycle: LifecycleController,
    registry: Arc<ExtensionRegistry>,
    events: Arc<EventBus>,
    context: Arc<PluginContext>,
    store: Arc<dyn PluginRecordStore>,
    auto_load: bool,
    initialized: AtomicBool,
}

/// 플러그인 런타임 (복제해도 같은 인스턴스를 가리킨다)
#[derive(Clone)]
pub struct PluginRuntime {
    inner: Arc<RuntimeInner>,
}

impl PluginRuntime {
    pub fn builder() -> PluginRuntimeBuilder {
        PluginRuntimeBuilder::default()
    }

    // ========================================================================
    // 시작 / 종료
    // ========================================================================

    /// 설치된 플러그인을 동시에 로드한다. 개별 실패는 기록만 하고 계속 진행
    pub async fn initialize(&self) {
        if self.is_initialized() {
            return;
        }
        let inner = &self.inner;
        inner.events.emit(RuntimeEvent::Initializing).await;
        info!(plugins_dir = %inner.context.plugins_dir().display(), "Initializing plugin runtime");

        let records = if inner.auto_load {
            match inner.store.list_installed().await {
                Ok(records) => records,
                Err(e) => {
                    error!("Failed to read installed plugins: {}", e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let results = join_all(
            records
                .iter()
                .map(|record| inner.lifecycle.load(&record.plugin_id)),
        )
        .await;

        for (record, result) in records.iter().zip(results) {
            if let Err(e) = result {
                warn!(plugin_id = %record.plugin_id, "Plugin failed to load at start-up: {}", e);
            }
        }

        inner.initialized.store(true, Ordering::SeqCst);
        inner.events.emit(RuntimeEvent::Ready).await;

        let plugin_ids = inner.lifecycle.loaded_ids();
        info!(
            loaded = plugin_ids.len(),
            active = inner.lifecycle.active_ids().len(),
            "Plugin runtime initialized"
        );
        inner
            .events
            .emit(RuntimeEvent::Initialized { plugin_ids })
            .await;
    }

    /// 모든 플러그인의 `on_unload` 호출, 레지스트리와 리스너 정리
    pub async fn shutdown(&self) {
        self.inner.lifecycle.shutdown().await;
        self.inner.events.clear_listeners();
        self.inner.initialized.store(false, Ordering::SeqCst);
    }

    // ========================================================================
    // 라이프사이클 명령
    // ========================================================================

    pub async fn install(&self, plugin_id: &str) -> Result<()> {
        self.inner.lifecycle.install(plugin_id).await
    }

    pub async fn load(&self, plugin_id: &str) -> Result<()> {
        self.inner.lifecycle.load(plugin_id).await
    }

    pub async fn activate(&self, plugin_id: &str) -> Result<()> {
        self.inner.lifecycle.activate(plugin_id).await
    }

    pub async fn deactivate(&self, plugin_id: &str, drop_tables: bool) -> Result<()> {
        self.inner.lifecycle.deactivate(plugin_id, drop_tables).await
    }

    pub async fn uninstall(&self, plugin_id: &str) -> Result<()> {
        self.inner.lifecycle.uninstall(plugin_id).await
    }

    pub async fn unload(&self, plugin_id: &str) -> Result<()> {
        self.inner.lifecycle.unload(plugin_id).await
    }

    // ========================================================================
    // 조회
    // ========================================================================

    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            initialized: self.is_initialized(),
            plugin_count: self.inner.lifecycle.loaded_count(),
            active_plugin_count: self.inner.lifecycle.active_ids().len(),
            errors: self.inner.lifecycle.errors(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    pub fn loaded_plugin_ids(&self) -> Vec<String> {
        self.inner.lifecycle.loaded_ids()
    }

    pub fn active_plugins(&self) -> Vec<String> {
        self.inner.lifecycle.active_ids()
    }

    /// 스냅샷 (이후 상태 변경은 반영되지 않음)
    pub fn get_plugin(&self, plugin_id: &str) -> Option<LoadedPlugin> {
        self.inner.lifecycle.get(plugin_id)
    }

    pub fn is_plugin_loaded(&self, plugin_id: &str) -> bool {
        self.inner.lifecycle.is_loaded(plugin_id)
    }

    pub fn is_plugin_active(&self, plugin_id: &str) -> bool {
        self.inner.lifecycle.is_active(plugin_id)
    }

    pub fn plugins_dir(&self) -> &Path {
        self.inner.context.plugins_dir()
    }

    pub fn context(&self) -> &Arc<PluginContext> {
        &self.inner.context
    }

    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.inner.registry
    }

    pub fn errors(&self) -> Vec<PluginErrorRecord> {
        self.inner.lifecycle.errors()
    }

    pub fn clear_errors(&self) {
        self.inner.lifecycle.clear_errors();
    }

    /// 영속 레코드 목록
    pub async fn records(&self) -> Result<Vec<PluginRecord>> {
        self.inner.store.list().await
    }

    // ========================================================================
    // 훅 / GraphQL / 웹훅
    // ========================================================================

    pub async fn execute_pre_hooks(&self, event: &str, data: Value) -> Result<Value> {
        self.inner
            .registry
            .execute_pre_hooks(event, data, &self.inner.context)
            .await
    }

    pub async fn execute_pre_hooks_with_report(&self, event: &str, data: Value) -> HookDispatchReport {
        self.inner
            .registry
            .execute_pre_hooks_with_report(event, data, &self.inner.context)
            .await
    }

    pub async fn execute_post_hooks(&self, event: &str, data: Value) -> Vec<HookFailure> {
        self.inner
            .registry
            .execute_post_hooks(event, data, &self.inner.context)
            .await
    }

    /// ACTIVE 플러그인의 GraphQL 빌더만 호출. 성공한 필드 수를 반환
    pub fn apply_graphql_contributions(&self, schema: &mut dyn SchemaBuilder) -> usize {
        let active: HashSet<String> = self.active_plugins().into_iter().collect();
        let mut applied = 0;

        for contribution in self.inner.registry.graphql_contributions() {
            if !active.contains(&contribution.plugin_id) {
                continue;
            }
            let target = FieldTarget {
                plugin_id: contribution.plugin_id.clone(),
                kind: contribution.kind,
                name: contribution.field_name.clone(),
                description: contribution.description.clone(),
            };
            match contribution.builder.build(schema, &target) {
                Ok(()) => applied += 1,
                Err(e) => warn!(
                    plugin_id = %contribution.plugin_id,
                    field = %contribution.field_name,
                    "GraphQL builder failed: {}",
                    e
                ),
            }
        }

        applied
    }

    pub fn webhook_dispatcher(&self) -> WebhookDispatcher {
        WebhookDispatcher::new(&self.inner.registry, &self.inner.context)
    }

    // ========================================================================
    // 이벤트
    // ========================================================================

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.inner.events.subscribe()
    }

    pub fn add_listener(&self, listener: Arc<dyn RuntimeEventListener>) {
        self.inner.events.register_listener(listener);
    }
}
