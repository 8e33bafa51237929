//! 내장 데모 플러그인 카탈로그
//!
//! `plugins/` 아래 매니페스트와 짝을 이루는 모듈들.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use trellis_core::plugin::{
    ColumnDefault, ColumnDefinition, ColumnType, FieldTarget, GraphqlBuilder, IndexDefinition,
    ModuleBuilder, PluginModule, SchemaBuilder, SchemaDefinition, StaticModuleSource,
    TableDefinition, WebhookRequest, WebhookResponse,
};
use trellis_foundation::Result;
use tracing::info;

/// 데모 플러그인을 모두 등록한 모듈 소스
pub fn demo_catalog() -> Result<StaticModuleSource> {
    StaticModuleSource::new()
        .with_module("hello_world", "index", hello_world())?
        .with_module("audit_log", "src/index", audit_log())
}

fn field(type_name: &'static str) -> GraphqlBuilder {
    Arc::new(move |schema: &mut dyn SchemaBuilder, target: &FieldTarget| {
        schema.add_field(
            target,
            json!({
                "type": type_name,
                "description": target.description,
            }),
        )
    })
}

fn hello_world() -> Arc<dyn PluginModule> {
    let greetings = TableDefinition::new("plugin_greetings")
        .column(
            ColumnDefinition::new("id", ColumnType::Uuid)
                .primary_key()
                .default_value(ColumnDefault::Generated),
        )
        .column(ColumnDefinition::new("message", ColumnType::Text).not_null())
        .column(ColumnDefinition::new("author", ColumnType::Varchar(Some(120))))
        .column(
            ColumnDefinition::new(
                "created_at",
                ColumnType::Timestamp {
                    precision: None,
                    with_timezone: true,
                },
            )
            .not_null()
            .default_value(ColumnDefault::Generated),
        )
        .index(IndexDefinition::on(["author"]));

    ModuleBuilder::new()
        .graphql("helloQuery", field("String!"))
        .graphql("addGreetingMutation", field("Greeting!"))
        .schema("plugin_greetings", SchemaDefinition::Table(greetings))
        .hook("stampGreeting", |mut data: Value| async move {
            if let Some(obj) = data.as_object_mut() {
                obj.entry("createdAt")
                    .or_insert_with(|| json!(Utc::now().to_rfc3339()));
            }
            Ok(data)
        })
        .webhook("receiveGreeting", |req: WebhookRequest| async move {
            let message = req.body.get("message").cloned().unwrap_or(Value::Null);
            Ok(WebhookResponse::ok(json!({ "received": message })))
        })
        .on_activate(|_ctx| {
            info!("hello_world ready to greet");
            Ok(())
        })
        .build()
}

fn audit_log() -> Arc<dyn PluginModule> {
    let entries = TableDefinition::new("entries")
        .column(ColumnDefinition::new("id", ColumnType::Serial).primary_key())
        .column(ColumnDefinition::new("payload", ColumnType::Text).not_null())
        .column(ColumnDefinition::new("recorded_at", ColumnType::Text));

    ModuleBuilder::new()
        .schema("entries", SchemaDefinition::Table(entries))
        .hook("recordEntry", |data: Value| async move {
            info!(payload = %data, "audit entry recorded");
            Ok(data)
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::plugin::ModuleSource;

    #[test]
    fn test_catalog_exports_match_manifests() {
        let catalog = demo_catalog().unwrap();
        assert_eq!(catalog.len(), 2);

        let hello = catalog.resolve("hello_world", "index").unwrap();
        for name in [
            "helloQuery",
            "addGreetingMutation",
            "plugin_greetings",
            "stampGreeting",
            "receiveGreeting",
        ] {
            assert!(hello.export(name).is_some(), "missing export {}", name);
        }

        let audit = catalog.resolve("audit_log", "src/index").unwrap();
        assert!(audit.export("recordEntry").is_some());
        assert!(catalog.resolve("audit_log", "index").is_none());
    }
}
