//! Webhook Dispatch
//!
//! HTTP 프레임워크와 무관한 디스패처. 호스트 서버는
//! `ANY /api/plugins/:pluginId/webhook[/*]` 요청을 `WebhookRequest` 로 바꿔 넘긴다.

use super::context::PluginContext;
use super::registry::ExtensionRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

/// 웹훅 라우트 접두사
pub const WEBHOOK_ROUTE_PREFIX: &str = "/api/plugins/";

const WEBHOOK_SEGMENT: &str = "webhook";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequest {
    pub plugin_id: String,
    /// 플러그인 내부 경로 (없으면 "/")
    pub path: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default)]
    pub body: Value,
}

impl WebhookRequest {
    pub fn new(plugin_id: impl Into<String>, path: Option<&str>, method: impl Into<String>) -> Self {
        let path = match path {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => "/".to_string(),
        };
        Self {
            plugin_id: plugin_id.into(),
            path,
            method: method.into(),
            headers: HashMap::new(),
            query: HashMap::new(),
            body: Value::Null,
        }
    }

    /// `/api/plugins/{pluginId}/webhook[/{rest}][?query]` 형태의 URI 에서 생성
    pub fn from_uri(uri: &str, method: impl Into<String>) -> Option<Self> {
        let (uri_path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (uri, None),
        };
        let (plugin_id, path) = parse_webhook_uri(uri_path)?;
        let mut request = Self::new(plugin_id, path.as_deref(), method);
        if let Some(query) = query {
            request.query = parse_query(query);
        }
        Some(request)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }
}

/// URI 경로 → (pluginId, 나머지 경로). 쿼리 문자열은 무시
pub fn parse_webhook_uri(uri_path: &str) -> Option<(String, Option<String>)> {
    let uri_path = uri_path.split_once('?').map_or(uri_path, |(path, _)| path);
    let rest = uri_path.strip_prefix(WEBHOOK_ROUTE_PREFIX)?;
    let (plugin_id, rest) = rest.split_once('/')?;
    if plugin_id.is_empty() {
        return None;
    }
    let tail = match rest.strip_prefix(WEBHOOK_SEGMENT)? {
        "" | "/" => None,
        t => Some(t.strip_prefix('/')?.to_string()),
    };
    Some((plugin_id.to_string(), tail))
}

/// `a=1&b=two` → 맵. 같은 키가 반복되면 마지막 값
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(name), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl WebhookResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub fn not_found(plugin_id: &str, path: &str) -> Self {
        Self::new(
            404,
            json!({
                "error": "Webhook not found",
                "pluginId": plugin_id,
                "path": path,
            }),
        )
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(
            500,
            json!({
                "error": "Webhook handler failed",
                "message": message.into(),
            }),
        )
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// `pluginId:path` → 등록된 웹훅 핸들러
///
/// 런타임을 약한 참조로 잡고 있어서, 런타임이 사라지면 500을 돌려준다.
#[derive(Clone)]
pub struct WebhookDispatcher {
    registry: Weak<ExtensionRegistry>,
    context: Weak<PluginContext>,
}

impl WebhookDispatcher {
    pub fn new(registry: &Arc<ExtensionRegistry>, context: &Arc<PluginContext>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            context: Arc::downgrade(context),
        }
    }

    /// 런타임 없이 만든 디스패처 (모든 요청에 500)
    pub fn unavailable() -> Self {
        Self {
            registry: Weak::new(),
            context: Weak::new(),
        }
    }

    pub async fn dispatch(&self, request: WebhookRequest) -> WebhookResponse {
        let (Some(registry), Some(context)) = (self.registry.upgrade(), self.context.upgrade()) else {
            error!(plugin_id = %request.plugin_id, "Webhook received but plugin runtime is not available");
            return WebhookResponse::new(500, json!({ "error": "Plugin runtime not available" }));
        };

        let Some(registration) = registry.webhook(&request.plugin_id, &request.path) else {
            debug!(plugin_id = %request.plugin_id, path = %request.path, "No webhook registered");
            return WebhookResponse::not_found(&request.plugin_id, &request.path);
        };
        drop(registry);

        let plugin_id = request.plugin_id.clone();
        let path = request.path.clone();
        match registration.handler.handle(request, &context).await {
            Ok(response) => response,
            Err(e) => {
                warn!(plugin_id = %plugin_id, path = %path, "Webhook handler failed: {}", e);
                WebhookResponse::internal_error(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::module::FnWebhook;
    use crate::plugin::registry::WebhookRegistration;
    use trellis_foundation::Error;

    fn dispatcher_with(registry: &Arc<ExtensionRegistry>, ctx: &Arc<PluginContext>) -> WebhookDispatcher {
        registry.add_webhook(WebhookRegistration {
            plugin_id: "test_plugin".into(),
            path: "/".into(),
            method: Some("POST".into()),
            description: None,
            handler: Arc::new(FnWebhook(|req: WebhookRequest| async move {
                Ok::<_, Error>(WebhookResponse::ok(json!({ "echo": req.body })))
            })),
        });
        registry.add_webhook(WebhookRegistration {
            plugin_id: "test_plugin".into(),
            path: "custom/path".into(),
            method: None,
            description: None,
            handler: Arc::new(FnWebhook(|_req: WebhookRequest| async move {
                Err::<WebhookResponse, _>(Error::Internal("handler blew up".into()))
            })),
        });
        WebhookDispatcher::new(registry, ctx)
    }

    #[test]
    fn test_parse_webhook_uri() {
        assert_eq!(
            parse_webhook_uri("/api/plugins/test_plugin/webhook"),
            Some(("test_plugin".to_string(), None))
        );
        assert_eq!(
            parse_webhook_uri("/api/plugins/test_plugin/webhook/custom/path"),
            Some(("test_plugin".to_string(), Some("custom/path".to_string())))
        );
        assert_eq!(parse_webhook_uri("/api/plugins/test_plugin/other"), None);
        assert_eq!(parse_webhook_uri("/api/plugins/test_plugin/webhooks"), None);
        assert_eq!(parse_webhook_uri("/graphql"), None);
        assert_eq!(
            parse_webhook_uri("/api/plugins/test_plugin/webhook?param=value"),
            Some(("test_plugin".to_string(), None))
        );
    }

    #[test]
    fn test_query_string_split_from_path() {
        let request =
            WebhookRequest::from_uri("/api/plugins/p/webhook/endpoint?param=value&q=a+b%21&flag", "GET")
                .unwrap();
        assert_eq!(request.plugin_id, "p");
        assert_eq!(request.path, "endpoint");
        assert_eq!(request.query["param"], "value");
        assert_eq!(request.query["q"], "a b!");
        assert_eq!(request.query["flag"], "");

        let bare = WebhookRequest::from_uri("/api/plugins/p/webhook", "GET").unwrap();
        assert!(bare.query.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_with_query_string() {
        let registry = Arc::new(ExtensionRegistry::new());
        let ctx = Arc::new(PluginContext::new("/tmp"));
        let dispatcher = dispatcher_with(&registry, &ctx);

        let request =
            WebhookRequest::from_uri("/api/plugins/test_plugin/webhook?source=ci", "POST")
                .unwrap()
                .with_body(json!({ "n": 2 }));
        assert_eq!(request.path, "/");
        assert_eq!(request.query["source"], "ci");

        let response = dispatcher.dispatch(request).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!({ "echo": { "n": 2 } }));
    }

    #[tokio::test]
    async fn test_dispatch_root_path() {
        let registry = Arc::new(ExtensionRegistry::new());
        let ctx = Arc::new(PluginContext::new("/tmp"));
        let dispatcher = dispatcher_with(&registry, &ctx);

        let request = WebhookRequest::from_uri("/api/plugins/test_plugin/webhook", "GET")
            .unwrap()
            .with_body(json!({ "n": 1 }));
        assert_eq!(request.path, "/");

        let response = dispatcher.dispatch(request).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!({ "echo": { "n": 1 } }));
    }

    #[tokio::test]
    async fn test_dispatch_missing_and_failing_handlers() {
        let registry = Arc::new(ExtensionRegistry::new());
        let ctx = Arc::new(PluginContext::new("/tmp"));
        let dispatcher = dispatcher_with(&registry, &ctx);

        let missing = dispatcher
            .dispatch(WebhookRequest::new("test_plugin", Some("nope"), "POST"))
            .await;
        assert_eq!(missing.status, 404);

        let failing = dispatcher
            .dispatch(WebhookRequest::new("test_plugin", Some("custom/path"), "POST"))
            .await;
        assert_eq!(failing.status, 500);
        assert_eq!(failing.body["message"], "Internal error: handler blew up");
    }

    #[tokio::test]
    async fn test_dispatch_without_runtime() {
        let response = WebhookDispatcher::unavailable()
            .dispatch(WebhookRequest::new("test_plugin", None, "GET"))
            .await;
        assert_eq!(response.status, 500);

        let registry = Arc::new(ExtensionRegistry::new());
        let ctx = Arc::new(PluginContext::new("/tmp"));
        let dispatcher = WebhookDispatcher::new(&registry, &ctx);
        drop(registry);
        let response = dispatcher
            .dispatch(WebhookRequest::new("test_plugin", None, "GET"))
            .await;
        assert_eq!(response.status, 500);
    }
}
