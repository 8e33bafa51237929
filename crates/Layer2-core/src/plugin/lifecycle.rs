//! Lifecycle Controller - 플러그인 상태 머신
//!
//! ```text
//!  install ──▶ (durable record) ──load──▶ INACTIVE ◀──deactivate── ACTIVE
//!                                            │                        ▲
//!                                            └────────activate────────┘
//!  unload: 메모리에서 제거 (ACTIVE 면 먼저 deactivate)
//!  uninstall: 테이블/레지스트리/레코드 제거
//! ```
//!
//! 상태는 훅과 스키마 재생성보다 먼저 바뀐다. 훅과 Docker 실패는 경고로 끝나고,
//! 영속화 실패는 작업을 실패시키며 상태를 되돌린다.

use super::context::PluginContext;
use super::docker::{DockerManager, DockerPhase};
use super::events::{EventBus, RuntimeEvent};
use super::extensions::ExtensionLoader;
use super::graphql::{GraphqlBuilder, SchemaRebuilder};
use super::manifest::{is_valid_plugin_id, load_manifest, DockerConfig, PluginManifest};
use super::module::{HookHandler, ModuleLoader, PluginModule, WebhookHandler};
use super::registry::{ExtensionRegistry, HookType, StagedContributions};
use super::schema::{create_plugin_tables, drop_plugin_tables, SchemaDefinition, TableDefinition};
use super::store::PluginRecordStore;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use trellis_foundation::{Error, PluginRecord, Result, SqlDialect};

// ============================================================================
// Status / Loaded Plugin
// ============================================================================

/// 로드된 플러그인 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PluginStatus {
    Loading,
    Active,
    Inactive,
    Error,
}

impl std::fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loading => write!(f, "LOADING"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Inactive => write!(f, "INACTIVE"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// 메모리에 올라온 플러그인
#[derive(Clone)]
pub struct LoadedPlugin {
    pub id: String,
    pub manifest: PluginManifest,
    pub module: Arc<dyn PluginModule>,
    /// 필드 이름 → 빌더
    pub graphql_builders: HashMap<String, GraphqlBuilder>,
    /// 이름 → 정의
    pub database_definitions: BTreeMap<String, SchemaDefinition>,
    /// 이벤트 → 핸들러 (선언 순)
    pub hooks: HashMap<String, Vec<(HookType, Arc<dyn HookHandler>)>>,
    /// 경로 → 핸들러
    pub webhooks: HashMap<String, Arc<dyn WebhookHandler>>,
    pub status: PluginStatus,
    pub last_error: Option<String>,
    pub loaded_at: DateTime<Utc>,
    pub plugin_dir: PathBuf,
}

impl LoadedPlugin {
    fn new(
        manifest: PluginManifest,
        module: Arc<dyn PluginModule>,
        staged: &StagedContributions,
        plugin_dir: PathBuf,
    ) -> Self {
        let mut hooks: HashMap<String, Vec<(HookType, Arc<dyn HookHandler>)>> = HashMap::new();
        for (hook_type, event, registration) in &staged.hooks {
            hooks
                .entry(event.clone())
                .or_default()
                .push((*hook_type, Arc::clone(&registration.handler)));
        }

        Self {
            id: staged.plugin_id.clone(),
            manifest,
            module,
            graphql_builders: staged
                .graphql
                .iter()
                .map(|c| (c.field_name.clone(), Arc::clone(&c.builder)))
                .collect(),
            database_definitions: staged
                .database
                .iter()
                .map(|c| (c.definition.name().to_string(), c.definition.clone()))
                .collect(),
            hooks,
            webhooks: staged
                .webhooks
                .iter()
                .map(|w| (w.path.clone(), Arc::clone(&w.handler)))
                .collect(),
            status: PluginStatus::Loading,
            last_error: None,
            loaded_at: Utc::now(),
            plugin_dir,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PluginStatus::Active
    }

    /// 소유한 테이블 정의
    pub fn tables(&self) -> Vec<TableDefinition> {
        self.database_definitions
            .values()
            .filter_map(SchemaDefinition::as_table)
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> PluginSummary {
        let mut graphql_fields: Vec<String> = self.graphql_builders.keys().cloned().collect();
        graphql_fields.sort();
        let mut webhook_paths: Vec<String> = self.webhooks.keys().cloned().collect();
        webhook_paths.sort();

        PluginSummary {
            plugin_id: self.id.clone(),
            name: self.manifest.name.clone(),
            version: self.manifest.version.clone(),
            status: self.status,
            last_error: self.last_error.clone(),
            loaded_at: self.loaded_at,
            graphql_fields,
            database: self.database_definitions.keys().cloned().collect(),
            hook_events: {
                let mut events: Vec<String> = self.hooks.keys().cloned().collect();
                events.sort();
                events
            },
            webhook_paths,
        }
    }
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("id", &self.id)
            .field("version", &self.manifest.version)
            .field("status", &self.status)
            .field("last_error", &self.last_error)
            .field("graphql", &self.graphql_builders.len())
            .field("database", &self.database_definitions.len())
            .field("hooks", &self.hooks.len())
            .field("webhooks", &self.webhooks.len())
            .finish()
    }
}

/// 직렬화 가능한 플러그인 요약
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSummary {
    pub plugin_id: String,
    pub name: String,
    pub version: String,
    pub status: PluginStatus,
    pub last_error: Option<String>,
    pub loaded_at: DateTime<Utc>,
    pub graphql_fields: Vec<String>,
    pub database: Vec<String>,
    pub hook_events: Vec<String>,
    pub webhook_paths: Vec<String>,
}

// ============================================================================
// Error log
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    Install,
    Load,
    Activate,
    Deactivate,
    Uninstall,
    Unload,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Load => write!(f, "load"),
            Self::Activate => write!(f, "activate"),
            Self::Deactivate => write!(f, "deactivate"),
            Self::Uninstall => write!(f, "uninstall"),
            Self::Unload => write!(f, "unload"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginErrorRecord {
    pub plugin_id: String,
    pub error: String,
    pub phase: LifecyclePhase,
    pub timestamp: DateTime<Utc>,
}

fn persistence_error(e: Error) -> Error {
    match e {
        Error::PersistenceFailed(_) => e,
        other => Error::PersistenceFailed(other.to_string()),
    }
}

// ============================================================================
// Plugin table
// ============================================================================

#[derive(Default)]
struct PluginTable {
    loaded: HashMap<String, LoadedPlugin>,
    /// 로드 진행 중인 ID
    pending: HashSet<String>,
}

/// 로드가 끝나거나 future 가 버려지면 pending 에서 제거
struct PendingGuard<'a> {
    table: &'a RwLock<PluginTable>,
    plugin_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.write().pending.remove(&self.plugin_id);
    }
}

// ============================================================================
// LifecycleController
// ============================================================================

/// 컨트롤러 구성 요소 (`PluginRuntimeBuilder` 가 채운다)
pub(crate) struct LifecycleParts {
    pub registry: Arc<ExtensionRegistry>,
    pub store: Arc<dyn PluginRecordStore>,
    pub modules: Arc<ModuleLoader>,
    pub docker: DockerManager,
    pub rebuilder: Arc<dyn SchemaRebuilder>,
    pub dialect: SqlDialect,
    pub events: Arc<EventBus>,
    pub context: Arc<PluginContext>,
}

pub struct LifecycleController {
    plugins: RwLock<PluginTable>,
    registry: Arc<ExtensionRegistry>,
    store: Arc<dyn PluginRecordStore>,
    modules: Arc<ModuleLoader>,
    extensions: ExtensionLoader,
    docker: DockerManager,
    rebuilder: Arc<dyn SchemaRebuilder>,
    dialect: SqlDialect,
    events: Arc<EventBus>,
    errors: Mutex<Vec<PluginErrorRecord>>,
    context: Arc<PluginContext>,
}

impl LifecycleController {
    pub(crate) fn new(parts: LifecycleParts) -> Self {
        Self {
            plugins: RwLock::new(PluginTable::default()),
            extensions: ExtensionLoader::new(Arc::clone(&parts.modules)),
            registry: parts.registry,
            store: parts.store,
            modules: parts.modules,
            docker: parts.docker,
            rebuilder: parts.rebuilder,
            dialect: parts.dialect,
            events: parts.events,
            errors: Mutex::new(Vec::new()),
            context: parts.context,
        }
    }

    // ========================================================================
    // 조회
    // ========================================================================

    pub fn get(&self, plugin_id: &str) -> Option<LoadedPlugin> {
        self.plugins.read().loaded.get(plugin_id).cloned()
    }

    pub fn status_of(&self, plugin_id: &str) -> Option<PluginStatus> {
        self.plugins.read().loaded.get(plugin_id).map(|p| p.status)
    }

    pub fn is_loaded(&self, plugin_id: &str) -> bool {
        self.plugins.read().loaded.contains_key(plugin_id)
    }

    pub fn is_active(&self, plugin_id: &str) -> bool {
        self.status_of(plugin_id) == Some(PluginStatus::Active)
    }

    pub fn loaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.plugins.read().loaded.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .plugins
            .read()
            .loaded
            .values()
            .filter(|p| p.is_active())
            .map(|p| p.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn loaded_count(&self) -> usize {
        self.plugins.read().loaded.len()
    }

    pub fn errors(&self) -> Vec<PluginErrorRecord> {
        self.errors.lock().clone()
    }

    pub fn clear_errors(&self) {
        self.errors.lock().clear();
    }

    fn plugin_dir(&self, plugin_id: &str) -> PathBuf {
        self.context.plugin_dir(plugin_id)
    }

    fn set_status(&self, plugin_id: &str, status: PluginStatus) {
        if let Some(plugin) = self.plugins.write().loaded.get_mut(plugin_id) {
            plugin.status = status;
        }
    }

    // ========================================================================
    // load
    // ========================================================================

    /// 설치된 플러그인을 메모리에 올린다. 이미 로드되어 있으면 성공
    pub async fn load(&self, plugin_id: &str) -> Result<()> {
        if !is_valid_plugin_id(plugin_id) {
            return Err(Error::InvalidInput(format!("Invalid plugin id: {}", plugin_id)));
        }

        let _pending = {
            let mut table = self.plugins.write();
            if table.loaded.contains_key(plugin_id) || table.pending.contains(plugin_id) {
                debug!(plugin_id = %plugin_id, "Plugin already loaded");
                return Ok(());
            }
            table.pending.insert(plugin_id.to_string());
            PendingGuard {
                table: &self.plugins,
                plugin_id: plugin_id.to_string(),
            }
        };

        match self.load_inner(plugin_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.record_error(plugin_id, LifecyclePhase::Load, &e).await;
                Err(e)
            }
        }
    }

    async fn load_inner(&self, plugin_id: &str) -> Result<()> {
        self.events
            .emit(RuntimeEvent::Loading {
                plugin_id: plugin_id.to_string(),
            })
            .await;
        info!(plugin_id = %plugin_id, "Loading plugin");

        let record = match self.store.get(plugin_id).await.map_err(persistence_error)? {
            Some(record) if record.is_installed => record,
            _ => {
                return Err(Error::NotFound(format!(
                    "Plugin {} is not installed",
                    plugin_id
                )))
            }
        };

        let plugin_dir = self.plugin_dir(plugin_id);
        let (manifest, module) = self.resolve_plugin(plugin_id, &plugin_dir).await?;
        let staged = self.extensions.load(plugin_id, &manifest, &module)?;

        let plugin = LoadedPlugin::new(manifest, module, &staged, plugin_dir);
        self.plugins
            .write()
            .loaded
            .insert(plugin_id.to_string(), plugin);
        self.registry.commit(staged);
        self.set_status(plugin_id, PluginStatus::Inactive);

        if record.is_activated {
            if let Err(e) = self.activate(plugin_id).await {
                warn!(plugin_id = %plugin_id, "Failed to restore activation: {}", e);
            }
        }

        self.events
            .emit(RuntimeEvent::Loaded {
                plugin_id: plugin_id.to_string(),
            })
            .await;
        info!(plugin_id = %plugin_id, status = ?self.status_of(plugin_id), "Plugin loaded");
        Ok(())
    }

    /// manifest 검증 + main 모듈 해석
    async fn resolve_plugin(
        &self,
        plugin_id: &str,
        plugin_dir: &Path,
    ) -> Result<(PluginManifest, Arc<dyn PluginModule>)> {
        let manifest = load_manifest(plugin_dir).await?;
        if manifest.plugin_id != plugin_id {
            return Err(Error::ManifestInvalid(format!(
                "pluginId '{}' does not match plugin directory '{}'",
                manifest.plugin_id, plugin_id
            )));
        }
        let module = self.modules.load_required(plugin_id, &manifest.main)?;
        Ok((manifest, module))
    }

    // ========================================================================
    // activate / deactivate
    // ========================================================================

    pub async fn activate(&self, plugin_id: &str) -> Result<()> {
        let (previous, module, docker, plugin_dir) = {
            let mut table = self.plugins.write();
            let plugin = table
                .loaded
                .get_mut(plugin_id)
                .ok_or_else(|| Error::NotFound(format!("Plugin {} is not loaded", plugin_id)))?;
            if plugin.status == PluginStatus::Active {
                debug!(plugin_id = %plugin_id, "Plugin already active");
                return Ok(());
            }
            let previous = plugin.status;
            plugin.status = PluginStatus::Active;
            (
                previous,
                Arc::clone(&plugin.module),
                plugin.manifest.docker.clone(),
                plugin.plugin_dir.clone(),
            )
        };

        self.events
            .emit(RuntimeEvent::Activating {
                plugin_id: plugin_id.to_string(),
            })
            .await;

        if let Err(e) = module.on_activate(&self.context).await {
            self.hook_failed(plugin_id, "onActivate", &e);
        }

        if let Err(e) = self.store.set_activated(plugin_id, true).await {
            return Err(self
                .abort_transition(plugin_id, previous, LifecyclePhase::Activate, e)
                .await);
        }

        self.rebuild_schema(plugin_id).await;
        self.run_docker(plugin_id, docker.as_ref(), DockerPhase::Activate, &plugin_dir)
            .await;

        self.events
            .emit(RuntimeEvent::Activated {
                plugin_id: plugin_id.to_string(),
            })
            .await;
        info!(plugin_id = %plugin_id, "Plugin activated");
        Ok(())
    }

    /// ACTIVE 가 아니면 이벤트 없이 성공
    pub async fn deactivate(&self, plugin_id: &str, drop_tables: bool) -> Result<()> {
        let (previous, module, docker, plugin_dir, tables) = {
            let mut table = self.plugins.write();
            let plugin = table
                .loaded
                .get_mut(plugin_id)
                .ok_or_else(|| Error::NotFound(format!("Plugin {} is not loaded", plugin_id)))?;
            if plugin.status != PluginStatus::Active {
                debug!(plugin_id = %plugin_id, status = %plugin.status, "Plugin not active");
                return Ok(());
            }
            let previous = plugin.status;
            plugin.status = PluginStatus::Inactive;
            (
                previous,
                Arc::clone(&plugin.module),
                plugin.manifest.docker.clone(),
                plugin.plugin_dir.clone(),
                plugin.tables(),
            )
        };

        self.events
            .emit(RuntimeEvent::Deactivating {
                plugin_id: plugin_id.to_string(),
            })
            .await;

        if let Err(e) = module.on_deactivate(&self.context).await {
            self.hook_failed(plugin_id, "onDeactivate", &e);
        }

        if let Err(e) = self.store.set_activated(plugin_id, false).await {
            return Err(self
                .abort_transition(plugin_id, previous, LifecyclePhase::Deactivate, e)
                .await);
        }

        // 레코드가 비활성으로 저장된 뒤에만 데이터 삭제
        if drop_tables {
            self.drop_tables(plugin_id, &tables).await;
        }

        self.rebuild_schema(plugin_id).await;
        self.run_docker(plugin_id, docker.as_ref(), DockerPhase::Deactivate, &plugin_dir)
            .await;

        self.events
            .emit(RuntimeEvent::Deactivated {
                plugin_id: plugin_id.to_string(),
            })
            .await;
        info!(plugin_id = %plugin_id, "Plugin deactivated");
        Ok(())
    }

    /// 영속화 실패: 상태 복구, 에러 기록
    async fn abort_transition(
        &self,
        plugin_id: &str,
        previous: PluginStatus,
        phase: LifecyclePhase,
        e: Error,
    ) -> Error {
        let e = persistence_error(e);
        self.set_status(plugin_id, previous);
        self.record_error(plugin_id, phase, &e).await;
        e
    }

    // ========================================================================
    // install / uninstall
    // ========================================================================

    /// 영속 레코드 생성 + 테이블 생성. 메모리에는 올리지 않는다
    pub async fn install(&self, plugin_id: &str) -> Result<()> {
        if !is_valid_plugin_id(plugin_id) {
            return Err(Error::InvalidInput(format!("Invalid plugin id: {}", plugin_id)));
        }

        match self.install_inner(plugin_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.record_error(plugin_id, LifecyclePhase::Install, &e).await;
                Err(e)
            }
        }
    }

    async fn install_inner(&self, plugin_id: &str) -> Result<()> {
        let existing = self.store.get(plugin_id).await.map_err(persistence_error)?;
        if existing.as_ref().is_some_and(|r| r.is_installed) {
            return Err(Error::Validation(format!(
                "Plugin {} is already installed",
                plugin_id
            )));
        }

        self.events
            .emit(RuntimeEvent::Installing {
                plugin_id: plugin_id.to_string(),
            })
            .await;
        info!(plugin_id = %plugin_id, "Installing plugin");

        let plugin_dir = self.plugin_dir(plugin_id);
        let (manifest, module) = self.resolve_plugin(plugin_id, &plugin_dir).await?;
        let definitions = self
            .extensions
            .collect_database_definitions(plugin_id, &manifest, &module)?;

        let tables: Vec<&TableDefinition> =
            definitions.iter().filter_map(SchemaDefinition::as_table).collect();
        if !tables.is_empty() {
            match self.context.database() {
                Some(executor) => {
                    create_plugin_tables(executor.as_ref(), plugin_id, &tables, self.dialect).await?
                }
                None => warn!(
                    plugin_id = %plugin_id,
                    count = tables.len(),
                    "No database executor configured, skipping table creation"
                ),
            }
        }

        let persisted = match existing {
            Some(_) => self.store.set_installed(plugin_id, true).await,
            None => self.store.insert(PluginRecord::new(plugin_id)).await,
        };
        persisted.map_err(persistence_error)?;

        if let Err(e) = module.on_install(&self.context).await {
            self.hook_failed(plugin_id, "onInstall", &e);
        }

        self.run_docker(plugin_id, manifest.docker.as_ref(), DockerPhase::Install, &plugin_dir)
            .await;

        self.events
            .emit(RuntimeEvent::Installed {
                plugin_id: plugin_id.to_string(),
            })
            .await;
        info!(plugin_id = %plugin_id, "Plugin installed");
        Ok(())
    }

    /// 테이블, 레지스트리 항목, 메모리 엔트리, 영속 레코드를 모두 제거
    pub async fn uninstall(&self, plugin_id: &str) -> Result<()> {
        match self.uninstall_inner(plugin_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.record_error(plugin_id, LifecyclePhase::Uninstall, &e).await;
                Err(e)
            }
        }
    }

    async fn uninstall_inner(&self, plugin_id: &str) -> Result<()> {
        let loaded = self.get(plugin_id);
        let record = self.store.get(plugin_id).await.map_err(persistence_error)?;
        if loaded.is_none() && record.is_none() {
            return Err(Error::NotFound(format!("Plugin {} is not installed", plugin_id)));
        }

        self.events
            .emit(RuntimeEvent::Uninstalling {
                plugin_id: plugin_id.to_string(),
            })
            .await;
        info!(plugin_id = %plugin_id, "Uninstalling plugin");

        let plugin_dir = self.plugin_dir(plugin_id);
        let resolved: Option<(Arc<dyn PluginModule>, Option<DockerConfig>, Vec<TableDefinition>)> =
            match loaded {
                Some(plugin) => Some((
                    Arc::clone(&plugin.module),
                    plugin.manifest.docker.clone(),
                    plugin.tables(),
                )),
                None => match self.resolve_unloaded(plugin_id, &plugin_dir).await {
                    Ok(resolved) => Some(resolved),
                    Err(e) => {
                        warn!(
                            plugin_id = %plugin_id,
                            "Plugin code unavailable, removing record only: {}",
                            e
                        );
                        None
                    }
                },
            };

        if let Some((module, docker, tables)) = &resolved {
            if let Err(e) = module.on_uninstall(&self.context).await {
                self.hook_failed(plugin_id, "onUninstall", &e);
            }
            self.run_docker(plugin_id, docker.as_ref(), DockerPhase::Uninstall, &plugin_dir)
                .await;
            self.drop_tables(plugin_id, tables).await;
        }

        self.registry.remove_plugin(plugin_id);
        self.plugins.write().loaded.remove(plugin_id);

        if record.is_some() {
            self.store
                .remove(plugin_id)
                .await
                .map_err(persistence_error)?;
        }

        self.rebuild_schema(plugin_id).await;

        self.events
            .emit(RuntimeEvent::Uninstalled {
                plugin_id: plugin_id.to_string(),
            })
            .await;
        info!(plugin_id = %plugin_id, "Plugin uninstalled");
        Ok(())
    }

    async fn resolve_unloaded(
        &self,
        plugin_id: &str,
        plugin_dir: &Path,
    ) -> Result<(Arc<dyn PluginModule>, Option<DockerConfig>, Vec<TableDefinition>)> {
        let (manifest, module) = self.resolve_plugin(plugin_id, plugin_dir).await?;
        let tables = self
            .extensions
            .collect_database_definitions(plugin_id, &manifest, &module)?
            .iter()
            .filter_map(SchemaDefinition::as_table)
            .cloned()
            .collect();
        Ok((module, manifest.docker, tables))
    }

    // ========================================================================
    // unload
    // ========================================================================

    /// 메모리에서 제거. 없으면 성공
    pub async fn unload(&self, plugin_id: &str) -> Result<()> {
        let Some(plugin) = self.get(plugin_id) else {
            debug!(plugin_id = %plugin_id, "Plugin not loaded, nothing to unload");
            return Ok(());
        };

        self.events
            .emit(RuntimeEvent::Unloading {
                plugin_id: plugin_id.to_string(),
            })
            .await;
        info!(plugin_id = %plugin_id, "Unloading plugin");

        if plugin.is_active() {
            if let Err(e) = self.deactivate(plugin_id, false).await {
                self.record_error(plugin_id, LifecyclePhase::Unload, &e).await;
                return Err(e);
            }
        }

        if let Err(e) = plugin.module.on_unload(&self.context).await {
            self.hook_failed(plugin_id, "onUnload", &e);
        }

        self.registry.remove_plugin(plugin_id);
        self.plugins.write().loaded.remove(plugin_id);
        self.rebuild_schema(plugin_id).await;

        self.events
            .emit(RuntimeEvent::Unloaded {
                plugin_id: plugin_id.to_string(),
            })
            .await;
        info!(plugin_id = %plugin_id, "Plugin unloaded");
        Ok(())
    }

    /// 모든 플러그인의 `on_unload` 호출 후 비운다 (비활성화/재생성 없음)
    pub(crate) async fn shutdown(&self) {
        let plugins: Vec<LoadedPlugin> = {
            let mut table = self.plugins.write();
            table.loaded.drain().map(|(_, plugin)| plugin).collect()
        };

        for plugin in &plugins {
            if let Err(e) = plugin.module.on_unload(&self.context).await {
                self.hook_failed(&plugin.id, "onUnload", &e);
            }
        }

        self.registry.clear();
        info!(count = plugins.len(), "Plugin runtime shut down");
    }

    // ========================================================================
    // 공통
    // ========================================================================

    fn hook_failed(&self, plugin_id: &str, hook: &str, e: &Error) {
        let e = Error::hook_failed(plugin_id, hook, e.to_string());
        warn!(plugin_id = %plugin_id, "{}", e);
    }

    async fn rebuild_schema(&self, plugin_id: &str) {
        if let Err(e) = self.rebuilder.rebuild_schema().await {
            warn!(plugin_id = %plugin_id, "Schema rebuild failed: {}", e);
        }
    }

    async fn run_docker(
        &self,
        plugin_id: &str,
        config: Option<&DockerConfig>,
        phase: DockerPhase,
        plugin_dir: &Path,
    ) {
        if let Err(e) = self.docker.run_phase(plugin_id, config, phase, plugin_dir).await {
            warn!(plugin_id = %plugin_id, %phase, "Docker phase failed: {}", e);
        }
    }

    async fn drop_tables(&self, plugin_id: &str, tables: &[TableDefinition]) {
        if tables.is_empty() {
            return;
        }
        let Some(executor) = self.context.database() else {
            warn!(plugin_id = %plugin_id, "No database executor configured, skipping table removal");
            return;
        };
        let refs: Vec<&TableDefinition> = tables.iter().collect();
        drop_plugin_tables(executor.as_ref(), plugin_id, &refs, self.dialect).await;
    }

    async fn record_error(&self, plugin_id: &str, phase: LifecyclePhase, e: &Error) {
        let message = e.to_string();
        error!(plugin_id = %plugin_id, %phase, "{}", message);

        self.errors.lock().push(PluginErrorRecord {
            plugin_id: plugin_id.to_string(),
            error: message.clone(),
            phase,
            timestamp: Utc::now(),
        });

        if let Some(plugin) = self.plugins.write().loaded.get_mut(plugin_id) {
            plugin.last_error = Some(message.clone());
            if matches!(phase, LifecyclePhase::Load | LifecyclePhase::Install) {
                plugin.status = PluginStatus::Error;
            }
        }

        self.events
            .emit(RuntimeEvent::Error {
                plugin_id: plugin_id.to_string(),
                phase: phase.to_string(),
                message,
            })
            .await;
    }
}
