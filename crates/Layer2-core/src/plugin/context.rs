//! Plugin Context - 플러그인 코드에 전달되는 런타임 핸들

use super::schema::DatabaseExecutor;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// 훅, 웹훅, 라이프사이클 콜백이 받는 공유 컨텍스트
///
/// 런타임 인스턴스당 하나만 존재한다.
pub struct PluginContext {
    /// 플러그인 루트 디렉토리
    plugins_dir: PathBuf,

    /// 플러그인 테이블 DDL/쿼리 실행기
    database: Option<Arc<dyn DatabaseExecutor>>,

    /// 호스트가 주입하는 설정
    config: RwLock<HashMap<String, Value>>,

    /// 플러그인이 남기는 상태
    state: RwLock<HashMap<String, Value>>,
}

impl PluginContext {
    pub fn new(plugins_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            database: None,
            config: RwLock::new(HashMap::new()),
            state: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_database(mut self, database: Arc<dyn DatabaseExecutor>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    /// 특정 플러그인의 디렉토리
    pub fn plugin_dir(&self, plugin_id: &str) -> PathBuf {
        self.plugins_dir.join(plugin_id)
    }

    pub fn database(&self) -> Option<&Arc<dyn DatabaseExecutor>> {
        self.database.as_ref()
    }

    // ========================================================================
    // 설정
    // ========================================================================

    pub async fn get_config(&self, key: &str) -> Option<Value> {
        let config = self.config.read().await;
        config.get(key).cloned()
    }

    pub async fn set_config(&self, key: impl Into<String>, value: Value) {
        let mut config = self.config.write().await;
        config.insert(key.into(), value);
    }

    /// 설정 전체 교체 (외부에서 주입)
    pub async fn load_config(&self, config: HashMap<String, Value>) {
        let mut current = self.config.write().await;
        *current = config;
    }

    // ========================================================================
    // 상태 저장
    // ========================================================================

    pub async fn save_state(&self, key: impl Into<String>, value: Value) {
        let mut state = self.state.write().await;
        state.insert(key.into(), value);
    }

    pub async fn load_state(&self, key: &str) -> Option<Value> {
        let state = self.state.read().await;
        state.get(key).cloned()
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugins_dir", &self.plugins_dir)
            .field("database", &self.database.is_some())
            .finish()
    }
}
