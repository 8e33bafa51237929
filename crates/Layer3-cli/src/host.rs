//! Host collaborators for the CLI
//!
//! CLI 에는 GraphQL 서버가 없으므로 스키마 재생성은 로그만 남기고,
//! DDL 은 SQLite 파일에 실행하거나 (sqlite) 출력만 한다 (postgres).

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};
use trellis_core::plugin::{DatabaseExecutor, FieldTarget, SchemaBuilder, SchemaRebuilder};
use trellis_foundation::{Error, PluginRecordDb, Result};

/// 재생성 요청을 기록만 하는 rebuilder
#[derive(Debug, Default)]
pub struct LoggingSchemaRebuilder;

#[async_trait]
impl SchemaRebuilder for LoggingSchemaRebuilder {
    async fn rebuild_schema(&self) -> Result<()> {
        info!("GraphQL schema rebuild requested");
        Ok(())
    }
}

/// 플러그인 레코드와 같은 SQLite 파일에 DDL 실행
#[derive(Clone)]
pub struct SqliteExecutor {
    db: PluginRecordDb,
}

impl SqliteExecutor {
    pub fn new(db: PluginRecordDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DatabaseExecutor for SqliteExecutor {
    async fn execute(&self, sql: &str) -> Result<()> {
        debug!("{}", sql);
        let db = self.db.clone();
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || db.execute_batch(&sql))
            .await
            .map_err(|e| Error::Internal(format!("DDL task failed: {}", e)))?
    }
}

/// 연결할 DB 가 없을 때: SQL 을 stdout 으로
#[derive(Debug, Default)]
pub struct PrintingExecutor;

#[async_trait]
impl DatabaseExecutor for PrintingExecutor {
    async fn execute(&self, sql: &str) -> Result<()> {
        println!("{}", sql);
        Ok(())
    }
}

/// 활성 플러그인이 추가할 필드를 모아 보여주는 SchemaBuilder
#[derive(Debug, Default)]
pub struct FieldListing {
    pub lines: Vec<String>,
}

impl SchemaBuilder for FieldListing {
    fn add_field(&mut self, target: &FieldTarget, definition: Value) -> Result<()> {
        let type_name = definition
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("?");
        self.lines.push(format!(
            "{:<9} {}: {}",
            target.kind.to_string(),
            target.qualified_name(),
            type_name
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sqlite_executor_runs_ddl() {
        let dir = TempDir::new().unwrap();
        let db = PluginRecordDb::new(dir.path()).unwrap();
        let executor = SqliteExecutor::new(db.clone());

        executor
            .execute("CREATE TABLE IF NOT EXISTS \"hello_world_greetings\" (\"id\" TEXT);")
            .await
            .unwrap();
        assert!(db.table_exists("hello_world_greetings").unwrap());

        executor
            .execute("DROP TABLE IF EXISTS \"hello_world_greetings\";")
            .await
            .unwrap();
        assert!(!db.table_exists("hello_world_greetings").unwrap());

        assert!(executor.execute("NOT SQL AT ALL").await.is_err());
    }

    #[test]
    fn test_field_listing() {
        let mut listing = FieldListing::default();
        let target = FieldTarget {
            plugin_id: "hello_world".into(),
            kind: trellis_core::plugin::GraphqlKind::Query,
            name: "hello".into(),
            description: None,
        };
        listing
            .add_field(&target, serde_json::json!({ "type": "String!" }))
            .unwrap();
        assert_eq!(listing.lines.len(), 1);
        assert!(listing.lines[0].contains("hello_world_hello: String!"));
    }
}
