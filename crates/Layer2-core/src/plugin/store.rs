//! Plugin Store - 플러그인 영속 레코드 어댑터
//!
//! 설치/활성화 상태는 `plugins` 테이블에 저장된다. 런타임은 `PluginRecordStore`
//! 트레이트만 알고, SQLite 구현과 메모리 구현이 이를 제공한다.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use trellis_foundation::{Error, PluginRecord, PluginRecordDb, Result};

/// 영속 레코드 저장소
#[async_trait]
pub trait PluginRecordStore: Send + Sync {
    async fn get(&self, plugin_id: &str) -> Result<Option<PluginRecord>>;

    async fn list(&self) -> Result<Vec<PluginRecord>>;

    /// `is_installed = true` 인 레코드
    async fn list_installed(&self) -> Result<Vec<PluginRecord>>;

    async fn insert(&self, record: PluginRecord) -> Result<()>;

    /// 플래그 갱신. 레코드가 없으면 `NotFound`
    async fn update_flags(
        &self,
        plugin_id: &str,
        is_installed: Option<bool>,
        is_activated: Option<bool>,
    ) -> Result<()>;

    /// 레코드 삭제. 삭제했으면 true
    async fn remove(&self, plugin_id: &str) -> Result<bool>;

    async fn set_activated(&self, plugin_id: &str, activated: bool) -> Result<()> {
        self.update_flags(plugin_id, None, Some(activated)).await
    }

    async fn set_installed(&self, plugin_id: &str, installed: bool) -> Result<()> {
        self.update_flags(plugin_id, Some(installed), None).await
    }
}

fn persistence(e: Error) -> Error {
    match e {
        Error::PersistenceFailed(_) | Error::NotFound(_) => e,
        other => Error::PersistenceFailed(other.to_string()),
    }
}

fn missing(plugin_id: &str) -> Error {
    Error::NotFound(format!("Plugin record {} not found", plugin_id))
}

// ============================================================================
// SqlitePluginStore
// ============================================================================

/// `PluginRecordDb` 위의 저장소. rusqlite 호출은 blocking 스레드에서 실행한다.
#[derive(Clone)]
pub struct SqlitePluginStore {
    db: PluginRecordDb,
}

impl SqlitePluginStore {
    pub fn new(db: PluginRecordDb) -> Self {
        Self { db }
    }

    /// `data_dir/plugins.db` 열기
    pub fn open(data_dir: &Path) -> Result<Self> {
        Ok(Self::new(PluginRecordDb::new(data_dir)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(PluginRecordDb::in_memory()?))
    }

    pub fn db(&self) -> &PluginRecordDb {
        &self.db
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(PluginRecordDb) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(db))
            .await
            .map_err(|e| Error::Internal(format!("Storage task failed: {}", e)))?
            .map_err(persistence)
    }
}

#[async_trait]
impl PluginRecordStore for SqlitePluginStore {
    async fn get(&self, plugin_id: &str) -> Result<Option<PluginRecord>> {
        let plugin_id = plugin_id.to_string();
        self.run(move |db| db.get(&plugin_id)).await
    }

    async fn list(&self) -> Result<Vec<PluginRecord>> {
        self.run(|db| db.list()).await
    }

    async fn list_installed(&self) -> Result<Vec<PluginRecord>> {
        self.run(|db| db.list_installed()).await
    }

    async fn insert(&self, record: PluginRecord) -> Result<()> {
        debug!(plugin_id = %record.plugin_id, "Inserting plugin record");
        self.run(move |db| db.insert(&record)).await
    }

    async fn update_flags(
        &self,
        plugin_id: &str,
        is_installed: Option<bool>,
        is_activated: Option<bool>,
    ) -> Result<()> {
        let id = plugin_id.to_string();
        let updated = self
            .run(move |db| db.update_flags(&id, is_installed, is_activated))
            .await?;
        if updated {
            Ok(())
        } else {
            Err(missing(plugin_id))
        }
    }

    async fn remove(&self, plugin_id: &str) -> Result<bool> {
        let plugin_id = plugin_id.to_string();
        self.run(move |db| db.delete(&plugin_id)).await
    }
}

// ============================================================================
// InMemoryPluginStore
// ============================================================================

/// 메모리 저장소 (테스트/임베딩용)
#[derive(Default)]
pub struct InMemoryPluginStore {
    records: RwLock<BTreeMap<String, PluginRecord>>,
    fail_writes: AtomicBool,
}

impl InMemoryPluginStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = PluginRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.write();
            for record in records {
                map.insert(record.plugin_id.clone(), record);
            }
        }
        store
    }

    /// 이후 모든 쓰기를 `PersistenceFailed` 로 실패시킨다
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn snapshot(&self, plugin_id: &str) -> Option<PluginRecord> {
        self.records.read().get(plugin_id).cloned()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(Error::PersistenceFailed("store is read-only".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PluginRecordStore for InMemoryPluginStore {
    async fn get(&self, plugin_id: &str) -> Result<Option<PluginRecord>> {
        Ok(self.snapshot(plugin_id))
    }

    async fn list(&self) -> Result<Vec<PluginRecord>> {
        Ok(self.records.read().values().cloned().collect())
    }

    async fn list_installed(&self) -> Result<Vec<PluginRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.is_installed)
            .cloned()
            .collect())
    }

    async fn insert(&self, record: PluginRecord) -> Result<()> {
        self.check_writable()?;
        let mut records = self.records.write();
        if records.contains_key(&record.plugin_id) {
            return Err(Error::PersistenceFailed(format!(
                "Plugin record {} already exists",
                record.plugin_id
            )));
        }
        records.insert(record.plugin_id.clone(), record);
        Ok(())
    }

    async fn update_flags(
        &self,
        plugin_id: &str,
        is_installed: Option<bool>,
        is_activated: Option<bool>,
    ) -> Result<()> {
        self.check_writable()?;
        let mut records = self.records.write();
        let record = records.get_mut(plugin_id).ok_or_else(|| missing(plugin_id))?;
        if let Some(installed) = is_installed {
            record.is_installed = installed;
        }
        if let Some(activated) = is_activated {
            record.is_activated = activated;
        }
        record.updated_at = chrono::Utc::now().to_rfc3339();
        Ok(())
    }

    async fn remove(&self, plugin_id: &str) -> Result<bool> {
        self.check_writable()?;
        Ok(self.records.write().remove(plugin_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn exercise(store: &dyn PluginRecordStore) {
        store.insert(PluginRecord::new("alpha")).await.unwrap();
        store.insert(PluginRecord::new("beta").activated(true)).await.unwrap();
        assert!(store.insert(PluginRecord::new("alpha")).await.is_err());

        store.set_activated("alpha", true).await.unwrap();
        assert!(store.get("alpha").await.unwrap().unwrap().is_activated);

        store.set_installed("beta", false).await.unwrap();
        let installed: Vec<String> = store
            .list_installed()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.plugin_id)
            .collect();
        assert_eq!(installed, vec!["alpha".to_string()]);

        assert!(matches!(
            store.set_activated("ghost", true).await,
            Err(Error::NotFound(_))
        ));

        assert!(store.remove("alpha").await.unwrap());
        assert!(!store.remove("alpha").await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        let dir = TempDir::new().unwrap();
        let store = SqlitePluginStore::open(dir.path()).unwrap();
        exercise(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_duplicate_is_persistence_error() {
        let store = SqlitePluginStore::in_memory().unwrap();
        store.insert(PluginRecord::new("dup")).await.unwrap();
        let err = store.insert(PluginRecord::new("dup")).await.unwrap_err();
        assert!(matches!(err, Error::PersistenceFailed(_)));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = InMemoryPluginStore::new();
        exercise(&store).await;
    }

    #[tokio::test]
    async fn test_memory_store_write_failures() {
        let store = InMemoryPluginStore::with_records([PluginRecord::new("alpha")]);
        store.set_fail_writes(true);

        assert!(matches!(
            store.set_activated("alpha", true).await,
            Err(Error::PersistenceFailed(_))
        ));
        assert!(!store.snapshot("alpha").unwrap().is_activated);
        assert!(store.get("alpha").await.unwrap().is_some());
    }
}
