//! Extension Registry - 로드된 플러그인들의 기여 집계
//!
//! 종류별 섹션(graphql / database / hooks / webhooks)에 기여를 저장하고,
//! 플러그인 ID 단위로 일괄 제거한다. 훅 디스패치도 여기서 수행한다.

use super::context::PluginContext;
use super::graphql::{GraphqlBuilder, GraphqlKind};
use super::module::{HookHandler, WebhookHandler};
use super::schema::{prefixed_table_name, DatabaseKind, SchemaDefinition};
use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};
use trellis_foundation::{Error, Result};

// ============================================================================
// Contributions
// ============================================================================

#[derive(Clone)]
pub struct GraphqlContribution {
    pub plugin_id: String,
    pub kind: GraphqlKind,
    pub field_name: String,
    pub builder: GraphqlBuilder,
    pub description: Option<String>,
}

impl std::fmt::Debug for GraphqlContribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphqlContribution")
            .field("plugin_id", &self.plugin_id)
            .field("kind", &self.kind)
            .field("field_name", &self.field_name)
            .field("description", &self.description)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseContribution {
    pub plugin_id: String,
    pub definition: SchemaDefinition,
}

#[derive(Clone)]
pub struct HookRegistration {
    pub plugin_id: String,
    pub handler: Arc<dyn HookHandler>,
}

/// 훅 실행 시점
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookType {
    Pre,
    Post,
}

impl std::fmt::Display for HookType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pre => write!(f, "pre"),
            Self::Post => write!(f, "post"),
        }
    }
}

impl FromStr for HookType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pre" => Ok(Self::Pre),
            "post" => Ok(Self::Post),
            other => Err(Error::InvalidInput(format!("Unknown hook type: {}", other))),
        }
    }
}

#[derive(Clone)]
pub struct WebhookRegistration {
    pub plugin_id: String,
    pub path: String,
    /// 선언된 메서드 (디스패치는 메서드와 무관)
    pub method: Option<String>,
    pub description: Option<String>,
    pub handler: Arc<dyn WebhookHandler>,
}

/// 웹훅 레지스트리 키 (`pluginId:path`)
pub fn webhook_key(plugin_id: &str, path: &str) -> String {
    format!("{}:{}", plugin_id, path)
}

/// 한 플러그인의 확장 포인트를 모두 해석한 결과
///
/// `ExtensionRegistry::commit` 으로 한 번에 반영된다.
#[derive(Clone)]
pub struct StagedContributions {
    pub plugin_id: String,
    pub graphql: Vec<GraphqlContribution>,
    pub database: Vec<DatabaseContribution>,
    pub hooks: Vec<(HookType, String, HookRegistration)>,
    pub webhooks: Vec<WebhookRegistration>,
}

impl std::fmt::Debug for StagedContributions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedContributions")
            .field("plugin_id", &self.plugin_id)
            .field("graphql", &self.graphql)
            .field("database", &self.database)
            .field("hooks", &self.hooks.len())
            .field("webhooks", &self.webhooks.len())
            .finish()
    }
}

impl StagedContributions {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            graphql: Vec::new(),
            database: Vec::new(),
            hooks: Vec::new(),
            webhooks: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.graphql.len() + self.database.len() + self.hooks.len() + self.webhooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Hook dispatch policy
// ============================================================================

/// pre 훅 실패 처리 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookErrorPolicy {
    /// 실패를 기록하고 직전 값으로 계속 진행
    #[default]
    ContinueWithPrevious,
    /// 첫 실패에서 중단
    Abort,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HookFailure {
    pub plugin_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HookDispatchReport {
    pub value: Value,
    pub failures: Vec<HookFailure>,
}

impl HookDispatchReport {
    pub fn failed_plugins(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.plugin_id.as_str()).collect()
    }
}

// ============================================================================
// ExtensionRegistry
// ============================================================================

#[derive(Default)]
struct Sections {
    graphql: Vec<GraphqlContribution>,
    tables: HashMap<String, DatabaseContribution>,
    enums: HashMap<String, DatabaseContribution>,
    relations: HashMap<String, DatabaseContribution>,
    pre_hooks: HashMap<String, Vec<HookRegistration>>,
    post_hooks: HashMap<String, Vec<HookRegistration>>,
    webhooks: HashMap<String, WebhookRegistration>,
}

impl Sections {
    fn database_mut(&mut self, kind: DatabaseKind) -> &mut HashMap<String, DatabaseContribution> {
        match kind {
            DatabaseKind::Table => &mut self.tables,
            DatabaseKind::Enum => &mut self.enums,
            DatabaseKind::Relation => &mut self.relations,
        }
    }

    fn hooks_mut(&mut self, hook_type: HookType) -> &mut HashMap<String, Vec<HookRegistration>> {
        match hook_type {
            HookType::Pre => &mut self.pre_hooks,
            HookType::Post => &mut self.post_hooks,
        }
    }

    /// 키는 `{pluginId}_{name}` 이므로 같은 이름을 쓰는 두 플러그인이 서로 덮어쓰지 않는다
    fn insert_database(&mut self, contribution: DatabaseContribution) {
        let name = prefixed_table_name(&contribution.plugin_id, contribution.definition.name());
        let kind = contribution.definition.kind();
        let plugin_id = contribution.plugin_id.clone();
        if let Some(previous) = self.database_mut(kind).insert(name.clone(), contribution) {
            if previous.plugin_id != plugin_id {
                warn!(
                    "Database {} '{}' from plugin {} replaced by plugin {}",
                    kind, name, previous.plugin_id, plugin_id
                );
            }
        }
    }

    fn insert_webhook(&mut self, registration: WebhookRegistration) {
        let key = webhook_key(&registration.plugin_id, &registration.path);
        self.webhooks.insert(key, registration);
    }
}

/// 확장 레지스트리
///
/// 락은 await 지점을 넘어 유지되지 않는다. 디스패치는 핸들러 목록을 복사한 뒤 실행한다.
#[derive(Default)]
pub struct ExtensionRegistry {
    sections: RwLock<Sections>,
    policy: HookErrorPolicy,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: HookErrorPolicy) -> Self {
        Self {
            sections: RwLock::new(Sections::default()),
            policy,
        }
    }

    pub fn policy(&self) -> HookErrorPolicy {
        self.policy
    }

    // ========================================================================
    // 등록
    // ========================================================================

    pub fn add_graphql(&self, contribution: GraphqlContribution) {
        debug!(
            plugin_id = %contribution.plugin_id,
            "Registered {} field {}", contribution.kind, contribution.field_name
        );
        self.sections.write().graphql.push(contribution);
    }

    pub fn add_database(&self, contribution: DatabaseContribution) {
        debug!(
            plugin_id = %contribution.plugin_id,
            "Registered database {} {}",
            contribution.definition.kind(),
            contribution.definition.name()
        );
        self.sections.write().insert_database(contribution);
    }

    pub fn add_hook(&self, hook_type: HookType, event: impl Into<String>, registration: HookRegistration) {
        let event = event.into();
        debug!(plugin_id = %registration.plugin_id, "Registered {} hook for {}", hook_type, event);
        self.sections
            .write()
            .hooks_mut(hook_type)
            .entry(event)
            .or_default()
            .push(registration);
    }

    pub fn add_webhook(&self, registration: WebhookRegistration) {
        debug!(plugin_id = %registration.plugin_id, "Registered webhook {}", registration.path);
        self.sections.write().insert_webhook(registration);
    }

    /// 스테이징된 기여를 하나의 쓰기 락 안에서 반영
    pub fn commit(&self, staged: StagedContributions) {
        let count = staged.len();
        let plugin_id = staged.plugin_id.clone();

        let mut sections = self.sections.write();
        sections.graphql.extend(staged.graphql);
        for contribution in staged.database {
            sections.insert_database(contribution);
        }
        for (hook_type, event, registration) in staged.hooks {
            sections
                .hooks_mut(hook_type)
                .entry(event)
                .or_default()
                .push(registration);
        }
        for registration in staged.webhooks {
            sections.insert_webhook(registration);
        }
        drop(sections);

        debug!(plugin_id = %plugin_id, count, "Committed extension points");
    }

    // ========================================================================
    // 조회
    // ========================================================================

    pub fn graphql_contributions(&self) -> Vec<GraphqlContribution> {
        self.sections.read().graphql.clone()
    }

    pub fn tables(&self) -> HashMap<String, DatabaseContribution> {
        self.sections.read().tables.clone()
    }

    pub fn enums(&self) -> HashMap<String, DatabaseContribution> {
        self.sections.read().enums.clone()
    }

    pub fn relations(&self) -> HashMap<String, DatabaseContribution> {
        self.sections.read().relations.clone()
    }

    pub fn pre_hooks(&self, event: &str) -> Vec<HookRegistration> {
        self.sections
            .read()
            .pre_hooks
            .get(event)
            .cloned()
            .unwrap_or_default()
    }

    pub fn post_hooks(&self, event: &str) -> Vec<HookRegistration> {
        self.sections
            .read()
            .post_hooks
            .get(event)
            .cloned()
            .unwrap_or_default()
    }

    pub fn webhook(&self, plugin_id: &str, path: &str) -> Option<WebhookRegistration> {
        self.sections
            .read()
            .webhooks
            .get(&webhook_key(plugin_id, path))
            .cloned()
    }

    pub fn webhook_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sections.read().webhooks.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// 특정 플러그인이 가진 항목 수 (모든 섹션 합계)
    pub fn entries_for(&self, plugin_id: &str) -> usize {
        let sections = self.sections.read();
        let hooks = |map: &HashMap<String, Vec<HookRegistration>>| {
            map.values()
                .flat_map(|v| v.iter())
                .filter(|h| h.plugin_id == plugin_id)
                .count()
        };
        let database = |map: &HashMap<String, DatabaseContribution>| {
            map.values().filter(|c| c.plugin_id == plugin_id).count()
        };

        sections.graphql.iter().filter(|c| c.plugin_id == plugin_id).count()
            + database(&sections.tables)
            + database(&sections.enums)
            + database(&sections.relations)
            + hooks(&sections.pre_hooks)
            + hooks(&sections.post_hooks)
            + sections
                .webhooks
                .values()
                .filter(|w| w.plugin_id == plugin_id)
                .count()
    }

    pub fn is_empty(&self) -> bool {
        let s = self.sections.read();
        s.graphql.is_empty()
            && s.tables.is_empty()
            && s.enums.is_empty()
            && s.relations.is_empty()
            && s.pre_hooks.is_empty()
            && s.post_hooks.is_empty()
            && s.webhooks.is_empty()
    }

    // ========================================================================
    // 제거
    // ========================================================================

    /// 플러그인 ID로 태그된 항목을 모든 섹션에서 제거
    pub fn remove_plugin(&self, plugin_id: &str) -> usize {
        let mut guard = self.sections.write();
        let sections = &mut *guard;
        let mut removed = 0;

        let before = sections.graphql.len();
        sections.graphql.retain(|c| c.plugin_id != plugin_id);
        removed += before - sections.graphql.len();

        for map in [
            &mut sections.tables,
            &mut sections.enums,
            &mut sections.relations,
        ] {
            let before = map.len();
            map.retain(|_, c| c.plugin_id != plugin_id);
            removed += before - map.len();
        }

        for map in [&mut sections.pre_hooks, &mut sections.post_hooks] {
            for handlers in map.values_mut() {
                let before = handlers.len();
                handlers.retain(|h| h.plugin_id != plugin_id);
                removed += before - handlers.len();
            }
            map.retain(|_, handlers| !handlers.is_empty());
        }

        let before = sections.webhooks.len();
        sections.webhooks.retain(|_, w| w.plugin_id != plugin_id);
        removed += before - sections.webhooks.len();

        drop(guard);
        debug!(plugin_id = %plugin_id, removed, "Removed extension points");
        removed
    }

    pub fn clear(&self) {
        *self.sections.write() = Sections::default();
    }

    // ========================================================================
    // 훅 디스패치
    // ========================================================================

    /// pre 훅을 등록 순서대로 접어서 실행
    pub async fn execute_pre_hooks(&self, event: &str, data: Value, ctx: &PluginContext) -> Result<Value> {
        let report = self.execute_pre_hooks_with_report(event, data, ctx).await;
        match (self.policy, report.failures.first()) {
            (HookErrorPolicy::Abort, Some(failure)) => Err(Error::hook_failed(
                failure.plugin_id.clone(),
                format!("pre:{}", event),
                failure.message.clone(),
            )),
            _ => Ok(report.value),
        }
    }

    /// pre 훅 실행 결과와 실패한 플러그인 목록
    pub async fn execute_pre_hooks_with_report(
        &self,
        event: &str,
        data: Value,
        ctx: &PluginContext,
    ) -> HookDispatchReport {
        let hooks = self.pre_hooks(event);
        let mut value = data;
        let mut failures = Vec::new();

        for hook in hooks {
            match hook.handler.handle(value.clone(), ctx).await {
                Ok(next) => value = next,
                Err(e) => {
                    warn!(
                        plugin_id = %hook.plugin_id,
                        event = %event,
                        "Pre-hook failed: {}",
                        e
                    );
                    failures.push(HookFailure {
                        plugin_id: hook.plugin_id.clone(),
                        message: e.to_string(),
                    });
                    if self.policy == HookErrorPolicy::Abort {
                        break;
                    }
                }
            }
        }

        HookDispatchReport { value, failures }
    }

    /// post 훅을 동시에 실행. 결과는 버리고 실패만 반환
    pub async fn execute_post_hooks(&self, event: &str, data: Value, ctx: &PluginContext) -> Vec<HookFailure> {
        let hooks = self.post_hooks(event);

        let results = join_all(hooks.iter().map(|hook| {
            let data = data.clone();
            async move { (hook.plugin_id.clone(), hook.handler.handle(data, ctx).await) }
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(plugin_id, result)| match result {
                Ok(_) => None,
                Err(e) => {
                    warn!(plugin_id = %plugin_id, event = %event, "Post-hook failed: {}", e);
                    Some(HookFailure {
                        plugin_id,
                        message: e.to_string(),
                    })
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::graphql::{FieldTarget, SchemaBuilder};
    use crate::plugin::module::FnHook;
    use crate::plugin::schema::{EnumDefinition, TableDefinition};
    use crate::plugin::module::FnWebhook;
    use crate::plugin::webhook::WebhookResponse;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hook<F, Fut>(plugin_id: &str, f: F) -> HookRegistration
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        HookRegistration {
            plugin_id: plugin_id.to_string(),
            handler: Arc::new(FnHook(f)),
        }
    }

    fn add_n(n: i64) -> impl Fn(Value) -> futures::future::Ready<Result<Value>> + Send + Sync {
        move |v: Value| futures::future::ready(Ok(json!(v.as_i64().unwrap_or(0) + n)))
    }

    fn failing() -> impl Fn(Value) -> futures::future::Ready<Result<Value>> + Send + Sync {
        |_v: Value| futures::future::ready(Err(Error::Internal("hook exploded".into())))
    }

    fn staged(plugin_id: &str) -> StagedContributions {
        let builder: GraphqlBuilder = Arc::new(|s: &mut dyn SchemaBuilder, t: &FieldTarget| {
            s.add_field(t, json!(null))
        });
        let mut staged = StagedContributions::new(plugin_id);
        staged.graphql.push(GraphqlContribution {
            plugin_id: plugin_id.to_string(),
            kind: GraphqlKind::Query,
            field_name: "items".into(),
            builder,
            description: None,
        });
        staged.database.push(DatabaseContribution {
            plugin_id: plugin_id.to_string(),
            definition: SchemaDefinition::Table(TableDefinition::new(format!("{plugin_id}_items"))),
        });
        staged.database.push(DatabaseContribution {
            plugin_id: plugin_id.to_string(),
            definition: SchemaDefinition::Enum(EnumDefinition {
                name: format!("{plugin_id}_state"),
                values: vec!["on".into(), "off".into()],
            }),
        });
        staged
            .hooks
            .push((HookType::Pre, "item:create".into(), hook(plugin_id, add_n(1))));
        staged
            .hooks
            .push((HookType::Post, "item:create".into(), hook(plugin_id, add_n(1))));
        staged.webhooks.push(WebhookRegistration {
            plugin_id: plugin_id.to_string(),
            path: "/".into(),
            method: None,
            description: None,
            handler: Arc::new(FnWebhook(|_req: crate::plugin::webhook::WebhookRequest| async {
                Ok::<_, Error>(WebhookResponse::ok(json!({})))
            })),
        });
        staged
    }

    #[test]
    fn test_commit_and_remove_plugin() {
        let registry = ExtensionRegistry::new();
        registry.commit(staged("alpha"));
        registry.commit(staged("beta"));

        assert_eq!(registry.entries_for("alpha"), 6);
        assert_eq!(registry.graphql_contributions().len(), 2);
        assert_eq!(registry.pre_hooks("item:create").len(), 2);
        assert!(registry.webhook("alpha", "/").is_some());
        assert_eq!(registry.webhook_keys(), vec!["alpha:/".to_string(), "beta:/".to_string()]);

        assert_eq!(registry.remove_plugin("alpha"), 6);
        assert_eq!(registry.entries_for("alpha"), 0);
        assert_eq!(registry.entries_for("beta"), 6);
        assert!(registry.webhook("alpha", "/").is_none());
        assert!(registry.tables().contains_key("beta_items"));
        assert!(!registry.tables().contains_key("alpha_items"));

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_same_table_name_from_two_plugins() {
        let registry = ExtensionRegistry::new();
        for plugin_id in ["alpha", "beta"] {
            registry.add_database(DatabaseContribution {
                plugin_id: plugin_id.to_string(),
                definition: SchemaDefinition::Table(TableDefinition::new("settings")),
            });
        }

        assert_eq!(registry.tables().len(), 2);
        assert_eq!(registry.entries_for("alpha"), 1);
        assert_eq!(registry.entries_for("beta"), 1);

        registry.remove_plugin("beta");
        assert_eq!(registry.entries_for("alpha"), 1);
        let tables = registry.tables();
        assert_eq!(tables["alpha_settings"].plugin_id, "alpha");
        assert!(!tables.contains_key("beta_settings"));
    }

    #[tokio::test]
    async fn test_pre_hooks_fold_in_order() {
        let registry = ExtensionRegistry::new();
        registry.add_hook(HookType::Pre, "e", hook("a", |v: Value| async move {
            Ok(json!(format!("{}+a", v.as_str().unwrap_or(""))))
        }));
        registry.add_hook(HookType::Pre, "e", hook("b", |v: Value| async move {
            Ok(json!(format!("{}+b", v.as_str().unwrap_or(""))))
        }));

        let ctx = PluginContext::new("/tmp");
        let out = registry.execute_pre_hooks("e", json!("x"), &ctx).await.unwrap();
        assert_eq!(out, json!("x+a+b"));

        let untouched = registry.execute_pre_hooks("other", json!(7), &ctx).await.unwrap();
        assert_eq!(untouched, json!(7));
    }

    #[tokio::test]
    async fn test_failing_pre_hook_carries_previous_value() {
        let registry = ExtensionRegistry::new();
        registry.add_hook(HookType::Pre, "e", hook("bad", failing()));
        registry.add_hook(HookType::Pre, "e", hook("good", add_n(10)));

        let ctx = PluginContext::new("/tmp");
        let report = registry.execute_pre_hooks_with_report("e", json!(1), &ctx).await;
        assert_eq!(report.value, json!(11));
        assert_eq!(report.failed_plugins(), vec!["bad"]);
    }

    #[tokio::test]
    async fn test_abort_policy_stops_at_first_failure() {
        let registry = ExtensionRegistry::with_policy(HookErrorPolicy::Abort);
        registry.add_hook(HookType::Pre, "e", hook("bad", failing()));
        registry.add_hook(HookType::Pre, "e", hook("good", add_n(10)));

        let ctx = PluginContext::new("/tmp");
        let err = registry.execute_pre_hooks("e", json!(1), &ctx).await.unwrap_err();
        assert!(matches!(err, Error::LifecycleHookFailed { ref plugin_id, .. } if plugin_id == "bad"));
    }

    #[tokio::test]
    async fn test_post_hooks_all_run_despite_failures() {
        let registry = ExtensionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for id in ["one", "two"] {
            let calls = Arc::clone(&calls);
            registry.add_hook(HookType::Post, "e", hook(id, move |v: Value| {
                calls.fetch_add(1, Ordering::SeqCst);
                futures::future::ready(Ok(v))
            }));
        }
        registry.add_hook(HookType::Post, "e", hook("bad", failing()));

        let ctx = PluginContext::new("/tmp");
        let failures = registry.execute_post_hooks("e", json!({}), &ctx).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].plugin_id, "bad");
    }

    #[test]
    fn test_hook_type_parse() {
        assert_eq!("pre".parse::<HookType>().unwrap(), HookType::Pre);
        assert!("around".parse::<HookType>().is_err());
        assert_eq!(webhook_key("test_plugin", "custom/path"), "test_plugin:custom/path");
    }
}
