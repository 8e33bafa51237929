//! Database Schema - 플러그인이 기여하는 영속 스키마와 DDL 생성
//!
//! 테이블 / enum / relation 을 정의할 수 있지만 DDL 을 만드는 건 테이블뿐이다.
//! enum 과 relation 은 호스트 ORM 계층을 위해 레지스트리에만 남는다.
//! 플러그인 테이블은 항상 `{pluginId}_` 접두사로 생성된다.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info, warn};
use trellis_foundation::{Error, Result, SqlDialect};

// ============================================================================
// 정의
// ============================================================================

/// 매니페스트의 `database[].type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Table,
    Enum,
    Relation,
}

impl std::fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Enum => write!(f, "enum"),
            Self::Relation => write!(f, "relation"),
        }
    }
}

impl FromStr for DatabaseKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "table" => Ok(Self::Table),
            "enum" => Ok(Self::Enum),
            "relation" => Ok(Self::Relation),
            other => Err(Error::InvalidInput(format!(
                "Unknown database extension type: {}",
                other
            ))),
        }
    }
}

/// 영속 스키마 기여 하나
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SchemaDefinition {
    Table(TableDefinition),
    Enum(EnumDefinition),
    Relation(RelationDefinition),
}

impl SchemaDefinition {
    pub fn kind(&self) -> DatabaseKind {
        match self {
            Self::Table(_) => DatabaseKind::Table,
            Self::Enum(_) => DatabaseKind::Enum,
            Self::Relation(_) => DatabaseKind::Relation,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Table(t) => &t.name,
            Self::Enum(e) => &e.name,
            Self::Relation(r) => &r.name,
        }
    }

    pub fn as_table(&self) -> Option<&TableDefinition> {
        match self {
            Self::Table(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Uuid,
    Text,
    Varchar(Option<u32>),
    Boolean,
    Timestamp {
        precision: Option<u32>,
        with_timezone: bool,
    },
    Date,
    Integer,
    Real,
    Numeric,
    Serial,
    BigSerial,
    /// 모르는 타입은 text 로 취급
    Other(String),
}

impl ColumnType {
    fn is_timestamp(&self) -> bool {
        matches!(self, Self::Timestamp { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnDefault {
    Literal(String),
    Bool(bool),
    Null,
    /// DB 가 채우는 기본값 (`id` 는 랜덤 uuid, 타임스탬프는 now())
    Generated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ColumnDefault>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            not_null: false,
            primary_key: false,
            unique: false,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDefinition {
    pub fn on<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDefinition {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    OneToOne,
    OneToMany,
    ManyToOne,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDefinition {
    pub name: String,
    pub source_table: String,
    pub target_table: String,
    pub kind: RelationKind,
}

// ============================================================================
// 실행기
// ============================================================================

/// 플러그인 DDL 을 실행할 호스트 DB 핸들
#[async_trait]
pub trait DatabaseExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<()>;
}

// ============================================================================
// SQL 생성
// ============================================================================

/// `{pluginId}_{name}`. 앞의 `plugin_` 은 떼고, 이미 접두사가 있으면 그대로
pub fn prefixed_table_name(plugin_id: &str, name: &str) -> String {
    if name.starts_with(&format!("{}_", plugin_id)) {
        return name.to_string();
    }
    let bare = name.strip_prefix("plugin_").unwrap_or(name);
    format!("{}_{}", plugin_id, bare)
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn column_type_sql(column_type: &ColumnType, dialect: SqlDialect) -> String {
    match dialect {
        SqlDialect::Postgres => match column_type {
            ColumnType::Uuid => "uuid".to_string(),
            ColumnType::Text | ColumnType::Other(_) => "text".to_string(),
            ColumnType::Varchar(len) => format!("varchar({})", len.unwrap_or(255)),
            ColumnType::Boolean => "boolean".to_string(),
            ColumnType::Timestamp {
                precision,
                with_timezone,
            } => {
                let precision = precision.map(|p| format!("({})", p)).unwrap_or_default();
                let timezone = if *with_timezone { " with time zone" } else { "" };
                format!("timestamp{}{}", precision, timezone)
            }
            ColumnType::Date => "date".to_string(),
            ColumnType::Integer => "integer".to_string(),
            ColumnType::Real => "real".to_string(),
            ColumnType::Numeric => "numeric".to_string(),
            ColumnType::Serial => "serial".to_string(),
            ColumnType::BigSerial => "bigserial".to_string(),
        },
        SqlDialect::Sqlite => match column_type {
            ColumnType::Varchar(len) => format!("varchar({})", len.unwrap_or(255)),
            ColumnType::Boolean
            | ColumnType::Integer
            | ColumnType::Serial
            | ColumnType::BigSerial => "integer".to_string(),
            ColumnType::Real => "real".to_string(),
            ColumnType::Numeric => "numeric".to_string(),
            ColumnType::Uuid
            | ColumnType::Text
            | ColumnType::Timestamp { .. }
            | ColumnType::Date
            | ColumnType::Other(_) => "text".to_string(),
        },
    }
}

fn default_sql(column: &ColumnDefinition, dialect: SqlDialect) -> Option<String> {
    let default = column.default.as_ref()?;
    match default {
        ColumnDefault::Literal(s) => Some(format!(" DEFAULT {}", quote_literal(s))),
        ColumnDefault::Bool(b) => Some(match dialect {
            SqlDialect::Postgres => format!(" DEFAULT {}", b),
            SqlDialect::Sqlite => format!(" DEFAULT {}", u8::from(*b)),
        }),
        ColumnDefault::Null => Some(" DEFAULT NULL".to_string()),
        ColumnDefault::Generated => {
            if column.name == "id" && column.column_type == ColumnType::Uuid {
                Some(match dialect {
                    SqlDialect::Postgres => " DEFAULT gen_random_uuid()".to_string(),
                    SqlDialect::Sqlite => " DEFAULT (lower(hex(randomblob(16))))".to_string(),
                })
            } else if column.column_type.is_timestamp() {
                Some(match dialect {
                    SqlDialect::Postgres => " DEFAULT now()".to_string(),
                    SqlDialect::Sqlite => " DEFAULT CURRENT_TIMESTAMP".to_string(),
                })
            } else {
                None
            }
        }
    }
}

fn column_sql(column: &ColumnDefinition, dialect: SqlDialect) -> String {
    let mut def = format!(
        "{} {}",
        quote_ident(&column.name),
        column_type_sql(&column.column_type, dialect)
    );
    if column.not_null {
        def.push_str(" NOT NULL");
    }
    if column.primary_key {
        def.push_str(" PRIMARY KEY");
    }
    if let Some(default) = default_sql(column, dialect) {
        def.push_str(&default);
    }
    if column.unique {
        def.push_str(" UNIQUE");
    }
    def
}

/// 플러그인 테이블의 `CREATE TABLE IF NOT EXISTS`
pub fn create_table_sql(table: &TableDefinition, plugin_id: &str, dialect: SqlDialect) -> String {
    let table_name = prefixed_table_name(plugin_id, &table.name);
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("  {}", column_sql(c, dialect)))
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
        quote_ident(&table_name),
        columns.join(",\n")
    )
}

/// 선언된 인덱스마다 `CREATE [UNIQUE] INDEX IF NOT EXISTS` 하나
pub fn create_index_sql(table: &TableDefinition, plugin_id: &str) -> Vec<String> {
    let table_name = prefixed_table_name(plugin_id, &table.name);

    table
        .indexes
        .iter()
        .map(|index| {
            let index_name = format!("{}_{}_index", table_name, index.columns.join("_"));
            let columns: Vec<String> = index.columns.iter().map(|c| quote_ident(c)).collect();
            let unique = if index.unique { "UNIQUE " } else { "" };
            format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});",
                unique,
                quote_ident(&index_name),
                quote_ident(&table_name),
                columns.join(", ")
            )
        })
        .collect()
}

pub fn drop_table_sql(plugin_id: &str, table_name: &str, dialect: SqlDialect) -> String {
    let name = quote_ident(&prefixed_table_name(plugin_id, table_name));
    match dialect {
        SqlDialect::Postgres => format!("DROP TABLE IF EXISTS {} CASCADE;", name),
        SqlDialect::Sqlite => format!("DROP TABLE IF EXISTS {};", name),
    }
}

/// 모든 테이블과 인덱스 생성. 첫 실패에서 멈춘다
pub async fn create_plugin_tables(
    executor: &dyn DatabaseExecutor,
    plugin_id: &str,
    tables: &[&TableDefinition],
    dialect: SqlDialect,
) -> Result<()> {
    info!(plugin_id = %plugin_id, count = tables.len(), "Creating plugin tables");

    for table in tables {
        let sql = create_table_sql(table, plugin_id, dialect);
        debug!(plugin_id = %plugin_id, table = %table.name, sql = %sql, "CREATE TABLE");
        executor.execute(&sql).await.map_err(|e| {
            Error::Storage(format!(
                "Failed to create table {} for plugin {}: {}",
                table.name, plugin_id, e
            ))
        })?;

        for sql in create_index_sql(table, plugin_id) {
            debug!(plugin_id = %plugin_id, sql = %sql, "CREATE INDEX");
            executor.execute(&sql).await.map_err(|e| {
                Error::Storage(format!(
                    "Failed to create index on {} for plugin {}: {}",
                    table.name, plugin_id, e
                ))
            })?;
        }
    }

    Ok(())
}

/// 모든 테이블 삭제. 실패한 삭제는 로그만 남기고 나머지를 계속 진행
///
/// 삭제한 테이블 수를 반환
pub async fn drop_plugin_tables(
    executor: &dyn DatabaseExecutor,
    plugin_id: &str,
    tables: &[&TableDefinition],
    dialect: SqlDialect,
) -> usize {
    info!(plugin_id = %plugin_id, count = tables.len(), "Dropping plugin tables");

    let mut dropped = 0;
    for table in tables {
        let sql = drop_table_sql(plugin_id, &table.name, dialect);
        match executor.execute(&sql).await {
            Ok(()) => dropped += 1,
            Err(e) => warn!(
                plugin_id = %plugin_id,
                table = %table.name,
                "Failed to drop plugin table: {}",
                e
            ),
        }
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        statements: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl DatabaseExecutor for Recording {
        async fn execute(&self, sql: &str) -> Result<()> {
            self.statements.lock().push(sql.to_string());
            match self.fail_on {
                Some(needle) if sql.contains(needle) => Err(Error::Storage("boom".into())),
                _ => Ok(()),
            }
        }
    }

    fn posts_table() -> TableDefinition {
        TableDefinition::new("plugin_posts")
            .column(
                ColumnDefinition::new("id", ColumnType::Uuid)
                    .primary_key()
                    .default_value(ColumnDefault::Generated),
            )
            .column(ColumnDefinition::new("title", ColumnType::Varchar(None)).not_null())
            .column(
                ColumnDefinition::new("published", ColumnType::Boolean)
                    .default_value(ColumnDefault::Bool(false)),
            )
            .column(
                ColumnDefinition::new(
                    "created_at",
                    ColumnType::Timestamp {
                        precision: Some(3),
                        with_timezone: true,
                    },
                )
                .default_value(ColumnDefault::Generated),
            )
            .column(ColumnDefinition::new("slug", ColumnType::Text).unique())
            .index(IndexDefinition::on(["title", "published"]))
    }

    #[test]
    fn test_prefixed_table_name() {
        assert_eq!(prefixed_table_name("blog", "posts"), "blog_posts");
        assert_eq!(prefixed_table_name("blog", "plugin_posts"), "blog_posts");
        assert_eq!(prefixed_table_name("blog", "blog_posts"), "blog_posts");
    }

    #[test]
    fn test_create_table_postgres() {
        let sql = create_table_sql(&posts_table(), "blog", SqlDialect::Postgres);
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"blog_posts\" (\n\
             \x20 \"id\" uuid PRIMARY KEY DEFAULT gen_random_uuid(),\n\
             \x20 \"title\" varchar(255) NOT NULL,\n\
             \x20 \"published\" boolean DEFAULT false,\n\
             \x20 \"created_at\" timestamp(3) with time zone DEFAULT now(),\n\
             \x20 \"slug\" text UNIQUE\n\
             );"
        );
    }

    #[test]
    fn test_create_table_sqlite() {
        let sql = create_table_sql(&posts_table(), "blog", SqlDialect::Sqlite);
        assert!(sql.contains("\"id\" text PRIMARY KEY DEFAULT (lower(hex(randomblob(16))))"));
        assert!(sql.contains("\"published\" integer DEFAULT 0"));
        assert!(sql.contains("\"created_at\" text DEFAULT CURRENT_TIMESTAMP"));
    }

    #[test]
    fn test_literal_default_is_escaped() {
        let table = TableDefinition::new("notes").column(
            ColumnDefinition::new("body", ColumnType::Other("jsonb".into()))
                .default_value(ColumnDefault::Literal("it's".into())),
        );
        let sql = create_table_sql(&table, "n", SqlDialect::Postgres);
        assert!(sql.contains("\"body\" text DEFAULT 'it''s'"));
    }

    #[test]
    fn test_index_and_drop_sql() {
        let table = posts_table().index(IndexDefinition::on(["slug"]).unique());
        let indexes = create_index_sql(&table, "blog");
        assert_eq!(
            indexes,
            vec![
                "CREATE INDEX IF NOT EXISTS \"blog_posts_title_published_index\" ON \"blog_posts\" (\"title\", \"published\");".to_string(),
                "CREATE UNIQUE INDEX IF NOT EXISTS \"blog_posts_slug_index\" ON \"blog_posts\" (\"slug\");".to_string(),
            ]
        );

        assert_eq!(
            drop_table_sql("blog", "posts", SqlDialect::Postgres),
            "DROP TABLE IF EXISTS \"blog_posts\" CASCADE;"
        );
        assert_eq!(
            drop_table_sql("blog", "posts", SqlDialect::Sqlite),
            "DROP TABLE IF EXISTS \"blog_posts\";"
        );
    }

    #[tokio::test]
    async fn test_create_stops_at_first_failure() {
        let exec = Recording {
            fail_on: Some("CREATE TABLE"),
            ..Default::default()
        };
        let table = posts_table();
        let err = create_plugin_tables(&exec, "blog", &[&table], SqlDialect::Postgres)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(exec.statements.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_drop_continues_after_failure() {
        let exec = Recording {
            fail_on: Some("blog_first"),
            ..Default::default()
        };
        let first = TableDefinition::new("first");
        let second = TableDefinition::new("second");

        let dropped =
            drop_plugin_tables(&exec, "blog", &[&first, &second], SqlDialect::Postgres).await;
        assert_eq!(dropped, 1);
        assert_eq!(exec.statements.lock().len(), 2);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("relation".parse::<DatabaseKind>().unwrap(), DatabaseKind::Relation);
        assert!("view".parse::<DatabaseKind>().is_err());

        let def = SchemaDefinition::Enum(EnumDefinition {
            name: "mood".into(),
            values: vec!["happy".into()],
        });
        assert_eq!(def.kind(), DatabaseKind::Enum);
        assert_eq!(def.name(), "mood");
        assert!(def.as_table().is_none());
    }
}
