//! GraphQL 스키마 협력자
//!
//! 런타임은 GraphQL 타입 시스템을 다루지 않는다. 플러그인의 필드 빌더를
//! 호스트의 `SchemaBuilder` 에 넘기고, 상태가 바뀌면 `SchemaRebuilder` 를 호출할 뿐이다.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use trellis_foundation::{Error, Result};

/// 루트 타입 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphqlKind {
    Query,
    Mutation,
    Subscription,
}

impl std::fmt::Display for GraphqlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Mutation => write!(f, "mutation"),
            Self::Subscription => write!(f, "subscription"),
        }
    }
}

impl FromStr for GraphqlKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "query" => Ok(Self::Query),
            "mutation" => Ok(Self::Mutation),
            "subscription" => Ok(Self::Subscription),
            other => Err(Error::InvalidInput(format!(
                "Unknown GraphQL extension type: {}",
                other
            ))),
        }
    }
}

/// 빌더가 채워야 할 필드
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTarget {
    pub plugin_id: String,
    pub kind: GraphqlKind,
    pub name: String,
    pub description: Option<String>,
}

impl FieldTarget {
    /// 스키마에 노출되는 이름 (`{pluginId}_{name}`)
    pub fn qualified_name(&self) -> String {
        format!("{}_{}", self.plugin_id, self.name)
    }
}

/// 호스트 스키마 빌더 핸들
pub trait SchemaBuilder {
    fn add_field(&mut self, target: &FieldTarget, definition: Value) -> Result<()>;
}

/// 플러그인이 내보내는 필드 빌더
pub trait GraphqlFieldBuilder: Send + Sync {
    fn build(&self, schema: &mut dyn SchemaBuilder, target: &FieldTarget) -> Result<()>;
}

impl<F> GraphqlFieldBuilder for F
where
    F: Fn(&mut dyn SchemaBuilder, &FieldTarget) -> Result<()> + Send + Sync,
{
    fn build(&self, schema: &mut dyn SchemaBuilder, target: &FieldTarget) -> Result<()> {
        self(schema, target)
    }
}

pub type GraphqlBuilder = Arc<dyn GraphqlFieldBuilder>;

/// 서빙 중인 스키마 재생성
#[async_trait]
pub trait SchemaRebuilder: Send + Sync {
    async fn rebuild_schema(&self) -> Result<()>;
}

/// 스키마를 다시 만들지 않는 기본 구현
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSchemaRebuilder;

#[async_trait]
impl SchemaRebuilder for NoopSchemaRebuilder {
    async fn rebuild_schema(&self) -> Result<()> {
        Ok(())
    }
}
