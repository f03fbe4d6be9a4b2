//! PostgreSQL extension surface
//!
//! SQL-callable trigger generation for any registered backend, deployment
//! helpers, and skip flags for the current transaction. Models and
//! configuration are passed as `jsonb` in the same shape the Rust API loads
//! from JSON.

use pgrx::prelude::*;
use pgrx::JsonB;

use crate::config::TrackingConfig;
use crate::deploy::{catalog_query, drop_statements};
use crate::dialect::PostgresDialect;
use crate::error::ChangelogResult;
use crate::generator::{generate_entity, generate_model, Backend, GeneratorRegistry, TriggerGenerator};
use crate::schema::{analyze, analyze_model, SchemaModel};
use crate::skip::{read_flag, reset_flag, set_flag, SessionUpdate, SkipFlag};

fn load_config(config: Option<JsonB>) -> ChangelogResult<TrackingConfig> {
    match config {
        Some(JsonB(value)) => TrackingConfig::from_json_str(&value.to_string()),
        None => Ok(TrackingConfig::default()),
    }
}

fn load_model(model: JsonB) -> ChangelogResult<SchemaModel> {
    SchemaModel::from_json_str(&model.0.to_string())
}

fn generator(backend: &str, config: &TrackingConfig) -> ChangelogResult<std::sync::Arc<dyn TriggerGenerator>> {
    GeneratorRegistry::with_builtins(config).require(backend)
}

fn generate_all(model: JsonB, backend: &str, config: Option<JsonB>) -> ChangelogResult<serde_json::Value> {
    let config = load_config(config)?;
    let model = load_model(model)?;
    let generator = generator(backend, &config)?;
    let report = generate_model(generator.as_ref(), &model, analyze_model(&model, &config)?, &config)?;
    for (entity, e) in &report.failures {
        warning!("changelog_triggers: skipped {}: {}", entity, e);
    }
    Ok(serde_json::to_value(&report.artifacts)?)
}

fn generate_one(model: JsonB, entity: &str, backend: &str, config: Option<JsonB>) -> ChangelogResult<serde_json::Value> {
    let config = load_config(config)?;
    let model = load_model(model)?;
    let generator = generator(backend, &config)?;
    let analysis = analyze(&model, entity, &config)?;
    for warning in &analysis.warnings {
        warning!("changelog_triggers: {}", warning);
    }
    let artifacts = generate_entity(generator.as_ref(), &model, &analysis.entity, &config)?;
    Ok(serde_json::to_value(&artifacts)?)
}

fn run_update(update: SessionUpdate) -> ChangelogResult<()> {
    match update {
        SessionUpdate::Sql(sql) => {
            Spi::run(&sql).map_err(|e| crate::internal_error!("SPI failed for '{}': {}", sql, e))
        }
        SessionUpdate::HostValue { key, .. } => Err(crate::internal_error!(
            "session value '{}' cannot be set from PostgreSQL",
            key
        )),
    }
}

/// Version of the changelog_triggers extension
#[pg_extern]
fn changelog_triggers_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Support artifacts plus every tracked entity's triggers, as a jsonb array
#[pg_extern]
fn changelog_generate(model: JsonB, backend: &str, config: default!(Option<JsonB>, "NULL")) -> JsonB {
    match generate_all(model, backend, config) {
        Ok(artifacts) => JsonB(artifacts),
        Err(e) => error!("changelog_triggers: generation failed: {}", e),
    }
}

/// Triggers of one entity (own set and composition sets)
#[pg_extern]
fn changelog_generate_entity(
    model: JsonB,
    entity: &str,
    backend: &str,
    config: default!(Option<JsonB>, "NULL"),
) -> JsonB {
    match generate_one(model, entity, backend, config) {
        Ok(artifacts) => JsonB(artifacts),
        Err(e) => error!("changelog_triggers: generation for {} failed: {}", entity, e),
    }
}

/// Catalog query listing an entity's generated triggers on `backend`
#[pg_extern]
fn changelog_catalog_query(backend: &str, entity: &str, config: default!(Option<JsonB>, "NULL")) -> String {
    let result = load_config(config).and_then(|config| generator(backend, &config));
    match result {
        Ok(generator) => catalog_query(generator.as_ref(), entity),
        Err(e) => error!("changelog_triggers: {}", e),
    }
}

/// Drop statements for the generated triggers among `existing`
#[pg_extern]
fn changelog_drop_statements(
    backend: &str,
    entity: &str,
    existing: Vec<String>,
    config: default!(Option<JsonB>, "NULL"),
) -> Vec<String> {
    let result = load_config(config).and_then(|config| generator(backend, &config));
    match result {
        Ok(generator) => drop_statements(generator.as_ref(), entity, &existing),
        Err(e) => error!("changelog_triggers: {}", e),
    }
}

/// Suppress change records for the rest of the transaction
///
/// No arguments skips everything; an entity skips that entity; entity and
/// attribute skip one attribute.
#[pg_extern]
fn changelog_skip(entity: default!(Option<&str>, "NULL"), attribute: default!(Option<&str>, "NULL")) {
    let result = SkipFlag::scoped(entity, attribute).and_then(|flag| {
        info!("changelog_triggers: skipping {}", flag.name());
        run_update(set_flag(Backend::Postgres, &flag.name()))
    });
    if let Err(e) = result {
        error!("changelog_triggers: {}", e);
    }
}

/// Clear a flag set by `changelog_skip`
#[pg_extern]
fn changelog_unskip(entity: default!(Option<&str>, "NULL"), attribute: default!(Option<&str>, "NULL")) {
    let result = SkipFlag::scoped(entity, attribute).and_then(|flag| run_update(reset_flag(Backend::Postgres, &flag.name())));
    if let Err(e) = result {
        error!("changelog_triggers: {}", e);
    }
}

/// Whether the flag of this scope is currently set
#[pg_extern]
fn changelog_is_skipped(entity: default!(Option<&str>, "NULL"), attribute: default!(Option<&str>, "NULL")) -> bool {
    let flag = match SkipFlag::scoped(entity, attribute) {
        Ok(flag) => flag,
        Err(e) => error!("changelog_triggers: {}", e),
    };
    let query = format!("SELECT {}", read_flag(&PostgresDialect::default(), &flag.name()));
    match Spi::get_one::<bool>(&query) {
        Ok(Some(set)) => set,
        Ok(None) => false,
        Err(e) => error!("changelog_triggers: reading {} failed: {}", flag.name(), e),
    }
}

#[cfg(feature = "pg_test")]
#[pg_schema]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::generator::GeneratedTrigger;
    use crate::plan::target::{CHANGELOG_COLUMNS, CHANGES_COLUMNS};
    use serde_json::json;

    fn order_model() -> JsonB {
        JsonB(json!({"entities": {"Order": {"elements": [
            {"name": "ID", "type": "cds.Integer", "key": true},
            {"name": "status", "changelog": true}
        ]}}}))
    }

    fn storage_table(d: &PostgresDialect, entity: &str, columns: &[&str]) -> String {
        let columns = columns
            .iter()
            .map(|c| format!("{} TEXT", d.column_name(c)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE {} ({columns})", d.table_name(entity))
    }

    /// Order table and storage tables with the generated triggers installed
    fn install_order_triggers() -> Vec<GeneratedTrigger> {
        let d = PostgresDialect::default();
        let config = TrackingConfig::default();
        Spi::run("CREATE TABLE \"order\" (\"id\" INTEGER PRIMARY KEY, \"status\" TEXT)").unwrap();
        Spi::run(&storage_table(&d, &config.changes_table, &CHANGES_COLUMNS)).unwrap();
        Spi::run(&storage_table(&d, &config.change_log_table, &CHANGELOG_COLUMNS)).unwrap();

        let JsonB(artifacts) = changelog_generate(order_model(), "postgres", None);
        let artifacts: Vec<GeneratedTrigger> = serde_json::from_value(artifacts).unwrap();
        for artifact in &artifacts {
            Spi::run(&artifact.source_text).unwrap();
        }
        artifacts
    }

    fn count(query: &str) -> i64 {
        Spi::get_one::<i64>(query).unwrap().unwrap_or_default()
    }

    fn status_changes() -> i64 {
        count("SELECT count(*) FROM \"sap_changelog_changes\" WHERE \"attribute\" = 'status'")
    }

    #[pg_test]
    fn test_version() {
        let version = Spi::get_one::<String>("SELECT changelog_triggers_version()").unwrap();
        assert_eq!(version.as_deref(), Some(env!("CARGO_PKG_VERSION")));
    }

    #[pg_test]
    fn test_skip_unskip_and_is_skipped() {
        assert!(!changelog_is_skipped(Some("Order"), None));
        Spi::run("SELECT changelog_skip('Order')").unwrap();
        assert!(changelog_is_skipped(Some("Order"), None));
        assert!(!changelog_is_skipped(Some("Order"), Some("status")));
        assert!(!changelog_is_skipped(None, None));

        changelog_unskip(Some("Order"), None);
        assert!(!changelog_is_skipped(Some("Order"), None));

        changelog_skip(None, None);
        let skipped = Spi::get_one::<bool>("SELECT changelog_is_skipped()").unwrap();
        assert_eq!(skipped, Some(true));
    }

    #[pg_test]
    fn test_create_and_update_round_trip() {
        let artifacts = install_order_triggers();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].trigger_name, "order_ct_trigger");

        Spi::run("INSERT INTO \"order\" VALUES (1, 'New')").unwrap();
        assert_eq!(status_changes(), 1);
        assert_eq!(count("SELECT count(*) FROM \"sap_changelog_changelog\""), 1);

        Spi::run("UPDATE \"order\" SET \"status\" = 'New' WHERE \"id\" = 1").unwrap();
        assert_eq!(status_changes(), 1);

        Spi::run("UPDATE \"order\" SET \"status\" = 'Shipped' WHERE \"id\" = 1").unwrap();
        assert_eq!(status_changes(), 2);
        let last = Spi::get_two::<String, String>(
            "SELECT \"valuechangedfrom\", \"valuechangedto\" FROM \"sap_changelog_changes\" \
             WHERE \"modification\" = 'update'",
        )
        .unwrap();
        assert_eq!(last, (Some("New".to_string()), Some("Shipped".to_string())));
        // one header per entity key
        assert_eq!(count("SELECT count(*) FROM \"sap_changelog_changelog\""), 1);
    }

    #[pg_test]
    fn test_skip_suppresses_records() {
        install_order_triggers();
        changelog_skip(Some("Order"), Some("status"));
        Spi::run("INSERT INTO \"order\" VALUES (1, 'New')").unwrap();
        assert_eq!(status_changes(), 0);

        changelog_unskip(Some("Order"), Some("status"));
        Spi::run("INSERT INTO \"order\" VALUES (2, 'New')").unwrap();
        assert_eq!(status_changes(), 1);
    }

    #[pg_test]
    fn test_cleared_user_falls_back_to_session_user() {
        install_order_triggers();
        Spi::run("SELECT set_config('changelog.user', 'alice', true)").unwrap();
        Spi::run("INSERT INTO \"order\" VALUES (1, 'New')").unwrap();
        Spi::run("SELECT set_config('changelog.user', '', true)").unwrap();
        Spi::run("INSERT INTO \"order\" VALUES (2, 'New')").unwrap();

        let users = Spi::get_two::<String, bool>(
            "SELECT string_agg(\"createdby\", ',' ORDER BY \"entitykey\"), \
             bool_and(\"createdby\" <> '') FROM \"sap_changelog_changes\"",
        )
        .unwrap();
        let current = Spi::get_one::<String>("SELECT current_user::text").unwrap().unwrap();
        assert_eq!(users, (Some(format!("alice,{current}")), Some(true)));
    }

    #[pg_test]
    fn test_catalog_query_and_drop_statements() {
        install_order_triggers();
        let query = changelog_catalog_query("postgres", "Order", None);
        let listed = Spi::get_one::<String>(&format!("SELECT string_agg(tgname::text, ',') FROM ({query}) q"))
            .unwrap();
        assert_eq!(listed.as_deref(), Some("order_ct_trigger"));

        let drops = changelog_drop_statements("postgres", "Order", vec!["order_ct_trigger".to_string()], None);
        assert_eq!(drops.len(), 2);
        for sql in &drops {
            Spi::run(sql).unwrap();
        }
        assert_eq!(count(&format!("SELECT count(*) FROM ({query}) q")), 0);

        Spi::run("INSERT INTO \"order\" VALUES (1, 'New')").unwrap();
        assert_eq!(status_changes(), 0);
    }
}
