//! Plugin Module - 플러그인 코드의 타입 있는 능력 인터페이스
//!
//! 플러그인 코드는 임의 경로에서 import 되지 않는다. `ModuleSource` 가
//! `(pluginId, 상대 경로)` 를 `PluginModule` 로 해석하고, `ModuleLoader` 가
//! 경로를 먼저 정규화/검사한다.
//!
//! ```ignore
//! let module = ModuleBuilder::new()
//!     .hook("beforeCreate", |data| async move { Ok(data) })
//!     .on_activate(|_ctx| Ok(()))
//!     .build();
//!
//! let mut source = StaticModuleSource::new();
//! source.register("blog", "index", module)?;
//! ```

use super::context::PluginContext;
use super::graphql::GraphqlBuilder;
use super::schema::SchemaDefinition;
use super::webhook::{WebhookRequest, WebhookResponse};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;
use trellis_foundation::{Error, Result};

// ============================================================================
// Handlers
// ============================================================================

/// pre/post 훅 핸들러
///
/// pre 훅은 반환값이 다음 훅의 입력이 되고, post 훅의 반환값은 버려진다.
#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn handle(&self, data: Value, ctx: &PluginContext) -> Result<Value>;
}

/// 클로저 기반 훅
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F, Fut> HookHandler for FnHook<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn handle(&self, data: Value, _ctx: &PluginContext) -> Result<Value> {
        (self.0)(data).await
    }
}

/// 웹훅 핸들러
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    async fn handle(&self, request: WebhookRequest, ctx: &PluginContext) -> Result<WebhookResponse>;
}

/// 클로저 기반 웹훅
pub struct FnWebhook<F>(pub F);

#[async_trait]
impl<F, Fut> WebhookHandler for FnWebhook<F>
where
    F: Fn(WebhookRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<WebhookResponse>> + Send,
{
    async fn handle(&self, request: WebhookRequest, _ctx: &PluginContext) -> Result<WebhookResponse> {
        (self.0)(request).await
    }
}

// ============================================================================
// Export
// ============================================================================

/// 모듈이 이름으로 내보내는 값
#[derive(Clone)]
pub enum Export {
    GraphqlBuilder(GraphqlBuilder),
    Schema(SchemaDefinition),
    Hook(Arc<dyn HookHandler>),
    Webhook(Arc<dyn WebhookHandler>),
    Value(Value),
}

impl Export {
    /// 에러 메시지용 종류 이름
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GraphqlBuilder(_) => "graphql builder",
            Self::Schema(_) => "schema definition",
            Self::Hook(_) => "hook handler",
            Self::Webhook(_) => "webhook handler",
            Self::Value(_) => "value",
        }
    }
}

impl std::fmt::Debug for Export {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Schema(def) => f.debug_tuple("Schema").field(def).finish(),
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            other => write!(f, "Export({})", other.kind()),
        }
    }
}

// ============================================================================
// PluginModule
// ============================================================================

/// 플러그인 모듈 트레이트
///
/// 라이프사이클 콜백은 모두 선택 사항이며 실패해도 작업은 계속된다.
#[async_trait]
pub trait PluginModule: Send + Sync {
    /// 이름으로 export 조회
    fn export(&self, name: &str) -> Option<Export>;

    async fn on_install(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn on_activate(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn on_deactivate(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn on_uninstall(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn on_unload(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }
}

type LifecycleFn = Arc<dyn Fn(&PluginContext) -> Result<()> + Send + Sync>;

/// `ModuleBuilder` 로 만든 모듈
#[derive(Default, Clone)]
pub struct BuiltModule {
    exports: HashMap<String, Export>,
    on_install: Option<LifecycleFn>,
    on_activate: Option<LifecycleFn>,
    on_deactivate: Option<LifecycleFn>,
    on_uninstall: Option<LifecycleFn>,
    on_unload: Option<LifecycleFn>,
}

impl BuiltModule {
    pub fn export_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.exports.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn run_callback(callback: &Option<LifecycleFn>, ctx: &PluginContext) -> Result<()> {
    match callback {
        Some(f) => f(ctx),
        None => Ok(()),
    }
}

#[async_trait]
impl PluginModule for BuiltModule {
    fn export(&self, name: &str) -> Option<Export> {
        self.exports.get(name).cloned()
    }

    async fn on_install(&self, ctx: &PluginContext) -> Result<()> {
        run_callback(&self.on_install, ctx)
    }

    async fn on_activate(&self, ctx: &PluginContext) -> Result<()> {
        run_callback(&self.on_activate, ctx)
    }

    async fn on_deactivate(&self, ctx: &PluginContext) -> Result<()> {
        run_callback(&self.on_deactivate, ctx)
    }

    async fn on_uninstall(&self, ctx: &PluginContext) -> Result<()> {
        run_callback(&self.on_uninstall, ctx)
    }

    async fn on_unload(&self, ctx: &PluginContext) -> Result<()> {
        run_callback(&self.on_unload, ctx)
    }
}

/// 클로저로 모듈을 조립하는 빌더
#[derive(Default)]
pub struct ModuleBuilder {
    module: BuiltModule,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn export(mut self, name: impl Into<String>, export: Export) -> Self {
        self.module.exports.insert(name.into(), export);
        self
    }

    pub fn graphql(self, name: impl Into<String>, builder: GraphqlBuilder) -> Self {
        self.export(name, Export::GraphqlBuilder(builder))
    }

    pub fn schema(self, name: impl Into<String>, definition: SchemaDefinition) -> Self {
        self.export(name, Export::Schema(definition))
    }

    pub fn hook<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.export(name, Export::Hook(Arc::new(FnHook(f))))
    }

    pub fn webhook<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(WebhookRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<WebhookResponse>> + Send + 'static,
    {
        self.export(name, Export::Webhook(Arc::new(FnWebhook(f))))
    }

    pub fn value(self, name: impl Into<String>, value: Value) -> Self {
        self.export(name, Export::Value(value))
    }

    pub fn on_install<F>(mut self, f: F) -> Self
    where
        F: Fn(&PluginContext) -> Result<()> + Send + Sync + 'static,
    {
        self.module.on_install = Some(Arc::new(f));
        self
    }

    pub fn on_activate<F>(mut self, f: F) -> Self
    where
        F: Fn(&PluginContext) -> Result<()> + Send + Sync + 'static,
    {
        self.module.on_activate = Some(Arc::new(f));
        self
    }

    pub fn on_deactivate<F>(mut self, f: F) -> Self
    where
        F: Fn(&PluginContext) -> Result<()> + Send + Sync + 'static,
    {
        self.module.on_deactivate = Some(Arc::new(f));
        self
    }

    pub fn on_uninstall<F>(mut self, f: F) -> Self
    where
        F: Fn(&PluginContext) -> Result<()> + Send + Sync + 'static,
    {
        self.module.on_uninstall = Some(Arc::new(f));
        self
    }

    pub fn on_unload<F>(mut self, f: F) -> Self
    where
        F: Fn(&PluginContext) -> Result<()> + Send + Sync + 'static,
    {
        self.module.on_unload = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Arc<dyn PluginModule> {
        Arc::new(self.module)
    }
}

// ============================================================================
// ModuleSource / ModuleLoader
// ============================================================================

/// 상대 경로 정규화
///
/// 백슬래시를 `/` 로 바꾸고 `.` 세그먼트를 제거한다. 절대 경로, `..`,
/// 빈 경로는 거부한다.
pub fn sanitize_module_path(path: &str) -> Result<String> {
    let unified = path.trim().replace('\\', "/");

    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(Error::InvalidInput(format!(
            "Module path must be relative: {}",
            path
        )));
    }

    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(Error::InvalidInput(format!(
                    "Module path must not contain '..': {}",
                    path
                )))
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(Error::InvalidInput("Module path is empty".to_string()));
    }

    Ok(segments.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// `(pluginId, 정규화된 경로)` → 모듈
pub trait ModuleSource: Send + Sync {
    fn resolve(&self, plugin_id: &str, path: &str) -> Option<Arc<dyn PluginModule>>;
}

/// 컴파일 타임에 포함된 플러그인 모듈 카탈로그
#[derive(Default, Clone)]
pub struct StaticModuleSource {
    modules: HashMap<(String, String), Arc<dyn PluginModule>>,
}

impl StaticModuleSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 모듈 등록. 경로는 정규화된 뒤 키가 된다.
    pub fn register(
        &mut self,
        plugin_id: impl Into<String>,
        path: &str,
        module: Arc<dyn PluginModule>,
    ) -> Result<()> {
        let path = sanitize_module_path(path)?;
        self.modules.insert((plugin_id.into(), path), module);
        Ok(())
    }

    pub fn with_module(
        mut self,
        plugin_id: impl Into<String>,
        path: &str,
        module: Arc<dyn PluginModule>,
    ) -> Result<Self> {
        self.register(plugin_id, path, module)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl ModuleSource for StaticModuleSource {
    fn resolve(&self, plugin_id: &str, path: &str) -> Option<Arc<dyn PluginModule>> {
        self.modules
            .get(&(plugin_id.to_string(), path.to_string()))
            .cloned()
    }
}

/// 경로 검사 후 `ModuleSource` 로 모듈을 해석
pub struct ModuleLoader {
    source: Arc<dyn ModuleSource>,
}

impl ModuleLoader {
    pub fn new(source: Arc<dyn ModuleSource>) -> Self {
        Self { source }
    }

    /// 실패하면 경고만 남기고 `None`
    pub fn safe_load(&self, plugin_id: &str, path: &str) -> Option<Arc<dyn PluginModule>> {
        match self.load_required(plugin_id, path) {
            Ok(module) => Some(module),
            Err(e) => {
                warn!(plugin_id = %plugin_id, path = %path, "{}", e);
                None
            }
        }
    }

    /// 실패하면 `ModuleLoadFailed`
    pub fn load_required(&self, plugin_id: &str, path: &str) -> Result<Arc<dyn PluginModule>> {
        let normalized = sanitize_module_path(path).map_err(|e| {
            Error::ModuleLoadFailed(format!("{} (plugin {}): {}", path, plugin_id, e))
        })?;

        self.source.resolve(plugin_id, &normalized).ok_or_else(|| {
            Error::ModuleLoadFailed(format!(
                "module '{}' not found for plugin {}",
                normalized, plugin_id
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_sanitize_module_path() {
        assert_eq!(sanitize_module_path("index").unwrap(), "index");
        assert_eq!(sanitize_module_path("./graphql/queries").unwrap(), "graphql/queries");
        assert_eq!(sanitize_module_path("db\\tables").unwrap(), "db/tables");
        assert_eq!(sanitize_module_path("a//b/./c").unwrap(), "a/b/c");

        assert!(sanitize_module_path("").is_err());
        assert!(sanitize_module_path("./").is_err());
        assert!(sanitize_module_path("/etc/passwd").is_err());
        assert!(sanitize_module_path("C:\\plugins\\x").is_err());
        assert!(sanitize_module_path("../other_plugin/index").is_err());
        assert!(sanitize_module_path("a/../../b").is_err());
    }

    #[test]
    fn test_static_source_resolves_normalized_paths() {
        let module = ModuleBuilder::new().value("answer", json!(42)).build();
        let source = StaticModuleSource::new()
            .with_module("blog", "./index", module)
            .unwrap();
        let loader = ModuleLoader::new(Arc::new(source));

        let resolved = loader.load_required("blog", "index").unwrap();
        assert!(matches!(resolved.export("answer"), Some(Export::Value(v)) if v == json!(42)));
        assert!(loader.safe_load("blog", "./index").is_some());
    }

    #[test]
    fn test_loader_failures() {
        let loader = ModuleLoader::new(Arc::new(StaticModuleSource::new()));

        assert!(loader.safe_load("blog", "index").is_none());
        assert!(matches!(
            loader.load_required("blog", "index"),
            Err(Error::ModuleLoadFailed(_))
        ));
        assert!(matches!(
            loader.load_required("blog", "../secrets"),
            Err(Error::ModuleLoadFailed(_))
        ));
    }

    #[test]
    fn test_modules_are_scoped_by_plugin() {
        let module = ModuleBuilder::new().build();
        let source = StaticModuleSource::new()
            .with_module("blog", "index", module)
            .unwrap();

        assert!(source.resolve("blog", "index").is_some());
        assert!(source.resolve("shop", "index").is_none());
    }

    #[tokio::test]
    async fn test_builder_hooks_and_callbacks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let module = ModuleBuilder::new()
            .hook("double", |data: Value| async move {
                Ok(json!(data.as_i64().unwrap_or(0) * 2))
            })
            .on_activate(move |_ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .on_deactivate(|_ctx| Err(Error::Internal("nope".into())))
            .build();

        let ctx = PluginContext::new("/tmp/plugins");
        let hook = match module.export("double") {
            Some(Export::Hook(h)) => h,
            other => panic!("unexpected export: {other:?}"),
        };
        assert_eq!(hook.handle(json!(21), &ctx).await.unwrap(), json!(42));

        module.on_activate(&ctx).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(module.on_deactivate(&ctx).await.is_err());
        assert!(module.on_install(&ctx).await.is_ok());
        assert!(module.export("missing").is_none());
    }
}
