//! Extension Loader
//!
//! 매니페스트의 확장 포인트를 모두 해석해 `StagedContributions` 로 만든다.
//! 하나라도 실패하면 플러그인 전체가 실패하고, 레지스트리에는 아무것도 들어가지 않는다.

use super::graphql::GraphqlKind;
use super::manifest::PluginManifest;
use super::module::{Export, ModuleLoader, PluginModule};
use super::registry::{
    DatabaseContribution, GraphqlContribution, HookRegistration, HookType, StagedContributions,
    WebhookRegistration,
};
use super::schema::{DatabaseKind, SchemaDefinition};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};
use trellis_foundation::{Error, Result};

/// export 해석 캐시 (한 번의 로드 동안 같은 file 모듈을 재사용)
struct Resolver<'a> {
    plugin_id: &'a str,
    main: &'a Arc<dyn PluginModule>,
    modules: &'a ModuleLoader,
    files: HashMap<String, Arc<dyn PluginModule>>,
}

impl<'a> Resolver<'a> {
    fn new(plugin_id: &'a str, main: &'a Arc<dyn PluginModule>, modules: &'a ModuleLoader) -> Self {
        Self {
            plugin_id,
            main,
            modules,
            files: HashMap::new(),
        }
    }

    /// `file` 이 있으면 그 모듈에서, 없으면 main 모듈에서 export 조회
    fn export(&mut self, file: Option<&str>, name: &str, what: &str) -> Result<Export> {
        let module = match file {
            Some(file) => match self.files.get(file) {
                Some(module) => Arc::clone(module),
                None => {
                    let module = self.modules.load_required(self.plugin_id, file)?;
                    self.files.insert(file.to_string(), Arc::clone(&module));
                    module
                }
            },
            None => Arc::clone(self.main),
        };

        module.export(name).ok_or_else(|| {
            Error::NotFound(format!(
                "{} '{}' not found in plugin {}",
                what, name, self.plugin_id
            ))
        })
    }
}

fn wrong_export(what: &str, name: &str, export: &Export) -> Error {
    Error::Validation(format!(
        "{} '{}' must export a {}, found {}",
        what,
        name,
        what.to_lowercase(),
        export.kind()
    ))
}

pub struct ExtensionLoader {
    modules: Arc<ModuleLoader>,
}

impl ExtensionLoader {
    pub fn new(modules: Arc<ModuleLoader>) -> Self {
        Self { modules }
    }

    /// 모든 확장 포인트를 순서대로 해석
    ///
    /// 실패는 `ExtensionLoadFailed("Failed to load extension points: …")`.
    pub fn load(
        &self,
        plugin_id: &str,
        manifest: &PluginManifest,
        main: &Arc<dyn PluginModule>,
    ) -> Result<StagedContributions> {
        self.stage(plugin_id, manifest, main).map_err(|e| {
            error!(plugin_id = %plugin_id, "Extension loading failed: {}", e);
            Error::ExtensionLoadFailed(format!("Failed to load extension points: {}", e))
        })
    }

    fn stage(
        &self,
        plugin_id: &str,
        manifest: &PluginManifest,
        main: &Arc<dyn PluginModule>,
    ) -> Result<StagedContributions> {
        let points = &manifest.extension_points;
        let mut resolver = Resolver::new(plugin_id, main, &self.modules);
        let mut staged = StagedContributions::new(plugin_id);

        for ext in &points.graphql {
            if ext.builder_definition.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "GraphQL extension '{}' is missing builderDefinition",
                    ext.name
                )));
            }
            let kind: GraphqlKind = ext.kind.parse()?;
            let export = resolver.export(ext.file.as_deref(), &ext.builder_definition, "GraphQL builder")?;
            let builder = match export {
                Export::GraphqlBuilder(builder) => builder,
                other => return Err(wrong_export("GraphQL builder", &ext.builder_definition, &other)),
            };
            staged.graphql.push(GraphqlContribution {
                plugin_id: plugin_id.to_string(),
                kind,
                field_name: ext.name.clone(),
                builder,
                description: ext.description.clone(),
            });
        }

        for definition in self.resolve_database(&mut resolver, manifest)? {
            staged.database.push(DatabaseContribution {
                plugin_id: plugin_id.to_string(),
                definition,
            });
        }

        for ext in &points.hooks {
            let hook_type: HookType = ext.kind.parse()?;
            let export = resolver.export(ext.file.as_deref(), &ext.handler, "Hook handler")?;
            let handler = match export {
                Export::Hook(handler) => handler,
                other => return Err(wrong_export("Hook handler", &ext.handler, &other)),
            };
            staged.hooks.push((
                hook_type,
                ext.event.clone(),
                HookRegistration {
                    plugin_id: plugin_id.to_string(),
                    handler,
                },
            ));
        }

        for ext in &points.webhooks {
            let export = resolver.export(ext.file.as_deref(), &ext.handler, "Webhook handler")?;
            let handler = match export {
                Export::Webhook(handler) => handler,
                other => return Err(wrong_export("Webhook handler", &ext.handler, &other)),
            };
            staged.webhooks.push(WebhookRegistration {
                plugin_id: plugin_id.to_string(),
                path: ext.path.clone(),
                method: ext.method.clone(),
                description: ext.description.clone(),
                handler,
            });
        }

        debug!(plugin_id = %plugin_id, count = staged.len(), "Staged extension points");
        Ok(staged)
    }

    fn resolve_database(
        &self,
        resolver: &mut Resolver<'_>,
        manifest: &PluginManifest,
    ) -> Result<Vec<SchemaDefinition>> {
        let mut definitions = Vec::with_capacity(manifest.extension_points.database.len());

        for ext in &manifest.extension_points.database {
            let kind: DatabaseKind = ext.kind.parse()?;
            let what = format!("Database {}", kind);
            let definition = match resolver.export(ext.file.as_deref(), &ext.name, &what)? {
                Export::Schema(definition) => definition,
                other => return Err(wrong_export(&what, &ext.name, &other)),
            };
            if definition.kind() != kind {
                return Err(Error::Validation(format!(
                    "Database extension '{}' declared as {} but exports a {}",
                    ext.name,
                    kind,
                    definition.kind()
                )));
            }
            definitions.push(definition);
        }

        Ok(definitions)
    }

    /// 레지스트리를 건드리지 않고 database 정의만 해석 (install/uninstall 용)
    pub fn collect_database_definitions(
        &self,
        plugin_id: &str,
        manifest: &PluginManifest,
        main: &Arc<dyn PluginModule>,
    ) -> Result<Vec<SchemaDefinition>> {
        let mut resolver = Resolver::new(plugin_id, main, &self.modules);
        self.resolve_database(&mut resolver, manifest).map_err(|e| {
            Error::ExtensionLoadFailed(format!("Failed to load extension points: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::graphql::{FieldTarget, GraphqlBuilder, SchemaBuilder};
    use crate::plugin::manifest::{
        DatabaseExtension, GraphqlExtension, HookExtension, WebhookExtension,
    };
    use crate::plugin::module::{ModuleBuilder, StaticModuleSource};
    use crate::plugin::schema::{EnumDefinition, TableDefinition};
    use crate::plugin::webhook::{WebhookRequest, WebhookResponse};
    use serde_json::json;

    fn builder() -> GraphqlBuilder {
        Arc::new(|s: &mut dyn SchemaBuilder, t: &FieldTarget| s.add_field(t, json!("String")))
    }

    fn gql(kind: &str, name: &str, def: &str) -> GraphqlExtension {
        GraphqlExtension {
            kind: kind.into(),
            name: name.into(),
            builder_definition: def.into(),
            file: None,
            description: None,
        }
    }

    fn loader(source: StaticModuleSource) -> ExtensionLoader {
        ExtensionLoader::new(Arc::new(ModuleLoader::new(Arc::new(source))))
    }

    #[test]
    fn test_single_query_contribution() {
        let main = ModuleBuilder::new().graphql("resolve", builder()).build();
        let manifest = PluginManifest::new("test_plugin", "Test").with_graphql(gql("query", "hello", "resolve"));

        let staged = loader(StaticModuleSource::new())
            .load("test_plugin", &manifest, &main)
            .unwrap();

        assert_eq!(staged.graphql.len(), 1);
        assert_eq!(staged.graphql[0].plugin_id, "test_plugin");
        assert_eq!(staged.graphql[0].field_name, "hello");
        assert_eq!(staged.graphql[0].kind, GraphqlKind::Query);
    }

    #[test]
    fn test_file_module_is_preferred() {
        let main = ModuleBuilder::new().build();
        let tables = ModuleBuilder::new()
            .schema("events", SchemaDefinition::Table(TableDefinition::new("events")))
            .schema(
                "state",
                SchemaDefinition::Enum(EnumDefinition {
                    name: "state".into(),
                    values: vec!["a".into()],
                }),
            )
            .build();
        let source = StaticModuleSource::new()
            .with_module("test_plugin", "db/tables", tables)
            .unwrap();

        let manifest = PluginManifest::new("test_plugin", "Test")
            .with_database(DatabaseExtension {
                kind: "table".into(),
                name: "events".into(),
                file: Some("./db/tables".into()),
            })
            .with_database(DatabaseExtension {
                kind: "enum".into(),
                name: "state".into(),
                file: Some("db/tables".into()),
            });

        let loader = loader(source);
        let staged = loader.load("test_plugin", &manifest, &main).unwrap();
        assert_eq!(staged.database.len(), 2);

        let defs = loader
            .collect_database_definitions("test_plugin", &manifest, &main)
            .unwrap();
        assert_eq!(defs[0].name(), "events");
        assert_eq!(defs[1].kind(), DatabaseKind::Enum);
    }

    #[test]
    fn test_hooks_and_webhooks_keep_declaration_order() {
        let main = ModuleBuilder::new()
            .hook("audit", |v| async move { Ok(v) })
            .webhook("receive", |_req: WebhookRequest| async move {
                Ok(WebhookResponse::ok(json!({})))
            })
            .build();
        let hook = |kind: &str| HookExtension {
            kind: kind.into(),
            event: "post:create".into(),
            handler: "audit".into(),
            file: None,
        };
        let manifest = PluginManifest::new("test_plugin", "Test")
            .with_hook(hook("pre"))
            .with_hook(hook("pre"))
            .with_hook(hook("post"))
            .with_webhook(WebhookExtension {
                path: "/".into(),
                method: Some("POST".into()),
                handler: "receive".into(),
                file: None,
                description: None,
            });

        let staged = loader(StaticModuleSource::new())
            .load("test_plugin", &manifest, &main)
            .unwrap();
        let types: Vec<HookType> = staged.hooks.iter().map(|(t, _, _)| *t).collect();
        assert_eq!(types, vec![HookType::Pre, HookType::Pre, HookType::Post]);
        assert_eq!(staged.webhooks[0].path, "/");
    }

    #[test]
    fn test_failures_are_all_or_nothing() {
        let main = ModuleBuilder::new()
            .graphql("resolve", builder())
            .value("notABuilder", json!(1))
            .build();
        let loader = loader(StaticModuleSource::new());

        let cases = vec![
            PluginManifest::new("p", "P")
                .with_graphql(gql("query", "ok", "resolve"))
                .with_graphql(gql("query", "missing", "nothing")),
            PluginManifest::new("p", "P").with_graphql(gql("query", "empty", "")),
            PluginManifest::new("p", "P").with_graphql(gql("fragment", "bad", "resolve")),
            PluginManifest::new("p", "P").with_graphql(gql("query", "wrong", "notABuilder")),
            PluginManifest::new("p", "P").with_database(DatabaseExtension {
                kind: "view".into(),
                name: "x".into(),
                file: None,
            }),
            PluginManifest::new("p", "P").with_hook(HookExtension {
                kind: "around".into(),
                event: "e".into(),
                handler: "resolve".into(),
                file: None,
            }),
        ];

        for manifest in cases {
            let err = loader.load("p", &manifest, &main).unwrap_err();
            match err {
                Error::ExtensionLoadFailed(msg) => {
                    assert!(msg.starts_with("Failed to load extension points: "), "{msg}")
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn test_database_kind_mismatch_and_missing() {
        let main = ModuleBuilder::new()
            .schema("events", SchemaDefinition::Table(TableDefinition::new("events")))
            .build();
        let loader = loader(StaticModuleSource::new());

        let mismatch = PluginManifest::new("p", "P").with_database(DatabaseExtension {
            kind: "enum".into(),
            name: "events".into(),
            file: None,
        });
        assert!(loader.load("p", &mismatch, &main).is_err());

        let missing = PluginManifest::new("p", "P").with_database(DatabaseExtension {
            kind: "table".into(),
            name: "ghost".into(),
            file: None,
        });
        let err = loader.load("p", &missing, &main).unwrap_err().to_string();
        assert!(err.contains("not found"), "{err}");
        assert!(err.contains("ghost"), "{err}");
        assert!(err.contains('p'), "{err}");
    }
}
