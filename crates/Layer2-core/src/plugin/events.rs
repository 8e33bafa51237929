//! Plugin Events - 런타임 라이프사이클 이벤트

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

// ============================================================================
// RuntimeEvent - 이벤트 종류
// ============================================================================

/// 런타임 이벤트
///
/// 직렬화하면 `{"event": "plugin:loaded", "data": {"pluginId": ...}}` 형태가 된다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RuntimeEvent {
    #[serde(rename = "plugins:initializing")]
    Initializing,
    #[serde(rename = "plugins:initialized", rename_all = "camelCase")]
    Initialized { plugin_ids: Vec<String> },
    #[serde(rename = "plugins:ready")]
    Ready,

    #[serde(rename = "plugin:loading", rename_all = "camelCase")]
    Loading { plugin_id: String },
    #[serde(rename = "plugin:loaded", rename_all = "camelCase")]
    Loaded { plugin_id: String },
    #[serde(rename = "plugin:installing", rename_all = "camelCase")]
    Installing { plugin_id: String },
    #[serde(rename = "plugin:installed", rename_all = "camelCase")]
    Installed { plugin_id: String },
    #[serde(rename = "plugin:activating", rename_all = "camelCase")]
    Activating { plugin_id: String },
    #[serde(rename = "plugin:activated", rename_all = "camelCase")]
    Activated { plugin_id: String },
    #[serde(rename = "plugin:deactivating", rename_all = "camelCase")]
    Deactivating { plugin_id: String },
    #[serde(rename = "plugin:deactivated", rename_all = "camelCase")]
    Deactivated { plugin_id: String },
    #[serde(rename = "plugin:unloading", rename_all = "camelCase")]
    Unloading { plugin_id: String },
    #[serde(rename = "plugin:unloaded", rename_all = "camelCase")]
    Unloaded { plugin_id: String },
    #[serde(rename = "plugin:uninstalling", rename_all = "camelCase")]
    Uninstalling { plugin_id: String },
    #[serde(rename = "plugin:uninstalled", rename_all = "camelCase")]
    Uninstalled { plugin_id: String },

    #[serde(rename = "plugin:error", rename_all = "camelCase")]
    Error {
        plugin_id: String,
        phase: String,
        message: String,
    },
}

impl RuntimeEvent {
    /// 와이어 이름 (`plugin:loaded` 등)
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initializing => "plugins:initializing",
            Self::Initialized { .. } => "plugins:initialized",
            Self::Ready => "plugins:ready",
            Self::Loading { .. } => "plugin:loading",
            Self::Loaded { .. } => "plugin:loaded",
            Self::Installing { .. } => "plugin:installing",
            Self::Installed { .. } => "plugin:installed",
            Self::Activating { .. } => "plugin:activating",
            Self::Activated { .. } => "plugin:activated",
            Self::Deactivating { .. } => "plugin:deactivating",
            Self::Deactivated { .. } => "plugin:deactivated",
            Self::Unloading { .. } => "plugin:unloading",
            Self::Unloaded { .. } => "plugin:unloaded",
            Self::Uninstalling { .. } => "plugin:uninstalling",
            Self::Uninstalled { .. } => "plugin:uninstalled",
            Self::Error { .. } => "plugin:error",
        }
    }

    /// 대상 플러그인 (런타임 전체 이벤트는 None)
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::Initializing | Self::Initialized { .. } | Self::Ready => None,
            Self::Loading { plugin_id }
            | Self::Loaded { plugin_id }
            | Self::Installing { plugin_id }
            | Self::Installed { plugin_id }
            | Self::Activating { plugin_id }
            | Self::Activated { plugin_id }
            | Self::Deactivating { plugin_id }
            | Self::Deactivated { plugin_id }
            | Self::Unloading { plugin_id }
            | Self::Unloaded { plugin_id }
            | Self::Uninstalling { plugin_id }
            | Self::Uninstalled { plugin_id }
            | Self::Error { plugin_id, .. } => Some(plugin_id),
        }
    }
}

impl std::fmt::Display for RuntimeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.plugin_id() {
            Some(id) => write!(f, "{} ({})", self.name(), id),
            None => write!(f, "{}", self.name()),
        }
    }
}

// ============================================================================
// PluginEvent - 이벤트 봉투
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginEvent {
    #[serde(flatten)]
    pub event: RuntimeEvent,

    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// 발생 위치
    pub source: String,
}

impl PluginEvent {
    pub fn new(event: RuntimeEvent, source: impl Into<String>) -> Self {
        Self {
            event,
            timestamp: chrono::Utc::now(),
            source: source.into(),
        }
    }

    pub fn runtime(event: RuntimeEvent) -> Self {
        Self::new(event, "runtime")
    }

    pub fn name(&self) -> &'static str {
        self.event.name()
    }
}

// ============================================================================
// RuntimeEventListener
// ============================================================================

#[async_trait]
pub trait RuntimeEventListener: Send + Sync {
    fn name(&self) -> &str;

    /// 기본값은 모든 이벤트
    fn interested(&self, _event: &RuntimeEvent) -> bool {
        true
    }

    async fn handle(&self, event: &PluginEvent);
}

// ============================================================================
// EventBus
// ============================================================================

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
pub const DEFAULT_HISTORY_SIZE: usize = 100;

/// 이벤트 버스 - broadcast 채널 + 리스너 + 최근 N개 히스토리
pub struct EventBus {
    sender: broadcast::Sender<PluginEvent>,
    listeners: RwLock<HashMap<String, Arc<dyn RuntimeEventListener>>>,
    history: RwLock<VecDeque<PluginEvent>>,
    history_size: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY, DEFAULT_HISTORY_SIZE)
    }

    pub fn with_capacity(channel_capacity: usize, history_size: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            sender,
            listeners: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::with_capacity(history_size)),
            history_size,
        }
    }

    /// 리스너 등록 (같은 이름이면 교체)
    pub fn register_listener(&self, listener: Arc<dyn RuntimeEventListener>) {
        let name = listener.name().to_string();
        self.listeners.write().insert(name, listener);
    }

    pub fn unregister_listener(&self, name: &str) -> bool {
        self.listeners.write().remove(name).is_some()
    }

    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// 이벤트 발행
    pub async fn publish(&self, event: PluginEvent) {
        debug!("Publishing event: {}", event.event);

        if self.history_size > 0 {
            let mut history = self.history.write();
            if history.len() >= self.history_size {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // 구독자가 없어도 OK
        let _ = self.sender.send(event.clone());

        let listeners: Vec<Arc<dyn RuntimeEventListener>> = self
            .listeners
            .read()
            .values()
            .filter(|l| l.interested(&event.event))
            .cloned()
            .collect();

        for listener in listeners {
            listener.handle(&event).await;
        }
    }

    pub async fn emit(&self, event: RuntimeEvent) {
        self.publish(PluginEvent::runtime(event)).await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.sender.subscribe()
    }

    pub fn history(&self) -> Vec<PluginEvent> {
        self.history.read().iter().cloned().collect()
    }

    /// 특정 플러그인의 이벤트 이름들 (발생 순)
    pub fn history_for(&self, plugin_id: &str) -> Vec<&'static str> {
        self.history
            .read()
            .iter()
            .filter(|e| e.event.plugin_id() == Some(plugin_id))
            .map(PluginEvent::name)
            .collect()
    }

    pub fn clear_history(&self) {
        self.history.write().clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ErrorCounter {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl RuntimeEventListener for ErrorCounter {
        fn name(&self) -> &str {
            "error-counter"
        }

        fn interested(&self, event: &RuntimeEvent) -> bool {
            matches!(event, RuntimeEvent::Error { .. })
        }

        async fn handle(&self, _event: &PluginEvent) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn loaded(id: &str) -> RuntimeEvent {
        RuntimeEvent::Loaded {
            plugin_id: id.into(),
        }
    }

    #[test]
    fn test_event_names() {
        assert_eq!(RuntimeEvent::Initializing.name(), "plugins:initializing");
        assert_eq!(loaded("blog").name(), "plugin:loaded");
        assert_eq!(loaded("blog").plugin_id(), Some("blog"));
        assert_eq!(RuntimeEvent::Ready.plugin_id(), None);
        assert_eq!(loaded("blog").to_string(), "plugin:loaded (blog)");
    }

    #[test]
    fn test_event_serialization() {
        let event = PluginEvent::runtime(RuntimeEvent::Error {
            plugin_id: "blog".into(),
            phase: "load".into(),
            message: "boom".into(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "plugin:error");
        assert_eq!(value["data"]["pluginId"], "blog");
        assert_eq!(value["source"], "runtime");
    }

    #[tokio::test]
    async fn test_listener_filter_and_history_bound() {
        let bus = EventBus::with_capacity(16, 2);
        let counter = Arc::new(ErrorCounter {
            seen: AtomicUsize::new(0),
        });
        bus.register_listener(counter.clone());
        assert_eq!(bus.listener_count(), 1);

        bus.emit(loaded("a")).await;
        bus.emit(RuntimeEvent::Error {
            plugin_id: "a".into(),
            phase: "load".into(),
            message: "x".into(),
        })
        .await;
        bus.emit(loaded("b")).await;

        assert_eq!(counter.seen.load(Ordering::SeqCst), 1);
        let history = bus.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].event, loaded("b"));
        assert_eq!(bus.history_for("a"), vec!["plugin:error"]);

        bus.clear_listeners();
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_event_subscribe() {
        let bus = Arc::new(EventBus::new());
        let mut receiver = bus.subscribe();

        let publisher = Arc::clone(&bus);
        tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
            publisher.emit(RuntimeEvent::Ready).await;
        });

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event, RuntimeEvent::Ready);
    }
}
