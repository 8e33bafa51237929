//! Plugin commands

use crate::catalog::demo_catalog;
use crate::host::{FieldListing, LoggingSchemaRebuilder, PrintingExecutor, SqliteExecutor};
use std::path::Path;
use std::sync::Arc;
use trellis_core::plugin::{scan_plugins, DatabaseExecutor, PluginRuntime, SqlitePluginStore};
use trellis_core::load_manifest;
use trellis_foundation::{PluginRecordDb, Result, RuntimeConfig, SqlDialect};

/// 설정으로부터 런타임 조립
///
/// 레코드는 `{dataDir}/plugins.db` 에 저장된다. sqlite 방언이면 플러그인
/// 테이블도 같은 파일에 만들고, postgres 면 DDL 을 출력만 한다.
pub fn build_runtime(config: &RuntimeConfig) -> Result<PluginRuntime> {
    let db = PluginRecordDb::new(&config.data_dir())?;
    let executor: Arc<dyn DatabaseExecutor> = match config.sql_dialect() {
        SqlDialect::Sqlite => Arc::new(SqliteExecutor::new(db.clone())),
        SqlDialect::Postgres => Arc::new(PrintingExecutor),
    };

    Ok(PluginRuntime::builder()
        .from_config(config)
        .store(Arc::new(SqlitePluginStore::new(db)))
        .module_source(Arc::new(demo_catalog()?))
        .schema_rebuilder(Arc::new(LoggingSchemaRebuilder))
        .database(executor)
        .build())
}

/// 설치된 플러그인을 로드한 런타임
async fn initialized(config: &RuntimeConfig) -> Result<PluginRuntime> {
    let runtime = build_runtime(config)?;
    runtime.initialize().await;
    Ok(runtime)
}

pub async fn validate(dir: &Path) -> Result<()> {
    let manifest = load_manifest(dir).await?;
    println!("✓ {} ({}) v{}", manifest.name, manifest.plugin_id, manifest.version);

    let points = &manifest.extension_points;
    println!("  graphql:  {}", points.graphql.len());
    println!("  database: {}", points.database.len());
    println!("  hooks:    {}", points.hooks.len());
    println!("  webhooks: {}", points.webhooks.len());
    if manifest.docker.is_some() {
        println!("  docker:   configured");
    }
    Ok(())
}

pub async fn available(config: &RuntimeConfig) -> Result<()> {
    let plugins_dir = config.plugins_dir();
    let found = scan_plugins(&plugins_dir).await?;
    if found.is_empty() {
        println!("No plugins found in {}", plugins_dir.display());
        return Ok(());
    }

    println!("\nAvailable plugins ({})\n", plugins_dir.display());
    for plugin in found {
        match &plugin.manifest {
            Ok(manifest) => println!(
                "  {:<24} {:<10} {}",
                plugin.directory, manifest.version, manifest.description
            ),
            Err(e) => println!("  {:<24} {:<10} {}", plugin.directory, "invalid", e),
        }
    }
    println!();
    Ok(())
}

pub async fn list(config: &RuntimeConfig) -> Result<()> {
    let runtime = build_runtime(config)?;
    let records = runtime.records().await?;
    if records.is_empty() {
        println!("No plugins installed.");
        return Ok(());
    }

    println!("{:<24} {:<10} {:<10} {}", "PLUGIN", "INSTALLED", "ACTIVE", "UPDATED");
    println!("{}", "-".repeat(72));
    for record in records {
        println!(
            "{:<24} {:<10} {:<10} {}",
            record.plugin_id, record.is_installed, record.is_activated, record.updated_at
        );
    }
    Ok(())
}

pub async fn install(config: &RuntimeConfig, plugin_id: &str) -> Result<()> {
    let runtime = build_runtime(config)?;
    runtime.install(plugin_id).await?;
    println!("✓ Installed {}. Run 'trellis activate {}' to enable it.", plugin_id, plugin_id);
    Ok(())
}

pub async fn activate(config: &RuntimeConfig, plugin_id: &str) -> Result<()> {
    let runtime = initialized(config).await?;
    runtime.activate(plugin_id).await?;
    println!("✓ Activated {}", plugin_id);
    print_fields(&runtime);
    runtime.shutdown().await;
    Ok(())
}

pub async fn deactivate(config: &RuntimeConfig, plugin_id: &str, drop_tables: bool) -> Result<()> {
    let runtime = initialized(config).await?;
    runtime.deactivate(plugin_id, drop_tables).await?;
    println!("✓ Deactivated {}", plugin_id);
    runtime.shutdown().await;
    Ok(())
}

pub async fn uninstall(config: &RuntimeConfig, plugin_id: &str) -> Result<()> {
    let runtime = initialized(config).await?;
    runtime.uninstall(plugin_id).await?;
    println!("✓ Uninstalled {}", plugin_id);
    runtime.shutdown().await;
    Ok(())
}

pub async fn status(config: &RuntimeConfig, json: bool) -> Result<()> {
    let runtime = initialized(config).await?;
    let status = runtime.status();

    if json {
        let plugins: Vec<_> = runtime
            .loaded_plugin_ids()
            .iter()
            .filter_map(|id| runtime.get_plugin(id))
            .map(|p| p.summary())
            .collect();
        let report = serde_json::json!({ "status": status, "plugins": plugins });
        println!("{}", serde_json::to_string_pretty(&report)?);
        runtime.shutdown().await;
        return Ok(());
    }

    println!(
        "Plugins: {} loaded, {} active",
        status.plugin_count, status.active_plugin_count
    );
    for id in runtime.loaded_plugin_ids() {
        if let Some(plugin) = runtime.get_plugin(&id) {
            println!("  {:<24} {:<9} v{}", id, plugin.status.to_string(), plugin.manifest.version);
        }
    }
    print_fields(&runtime);

    if !status.errors.is_empty() {
        println!("\nErrors:");
        for e in &status.errors {
            println!("  [{}] {} ({}): {}", e.timestamp.format("%H:%M:%S"), e.plugin_id, e.phase, e.error);
        }
    }

    runtime.shutdown().await;
    Ok(())
}

fn print_fields(runtime: &PluginRuntime) {
    let mut listing = FieldListing::default();
    if runtime.apply_graphql_contributions(&mut listing) > 0 {
        println!("\nGraphQL fields:");
        for line in listing.lines {
            println!("  {}", line);
        }
    }
}
