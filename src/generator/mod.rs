//! Dialect Trigger Generators
//!
//! Every backend implements [`TriggerGenerator`] over the same
//! [`TriggerPlan`]; only the rendering differs:
//!
//! | Backend | Artifact |
//! |---|---|
//! | `sqlite` | `CREATE TRIGGER ... BEGIN ... END;` per operation |
//! | `hana` | `.hdbtrigger` per operation + shared `.hdbprocedure` support artifacts |
//! | `h2` | Java source trigger per operation |
//! | `postgres` | one plpgsql function + one trigger per table |
//!
//! Generated text is never executed here; see [`crate::deploy`].

mod h2;
mod hana;
mod postgres;
pub mod registry;
mod sqlite;

pub use h2::H2Generator;
pub use hana::HanaGenerator;
pub use postgres::PostgresGenerator;
pub use registry::GeneratorRegistry;
pub use sqlite::SqliteGenerator;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::TrackingConfig;
use crate::dialect::{Dialect, RenderContext};
use crate::error::{ChangelogError, ChangelogResult};
use crate::plan::expr::{Expr, Filter};
use crate::plan::target::{ColumnPlan, Invocation, Operation, CHANGELOG_COLUMNS, CHANGES_COLUMNS};
use crate::plan::{plan_compositions, plan_entity, TriggerPlan};
use crate::schema::{ModelAnalysis, SchemaModel, TrackedEntity};

/// Database kind a generator targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    Hana,
    H2,
    Postgres,
}

impl Backend {
    pub const ALL: [Backend; 4] = [Backend::Sqlite, Backend::Hana, Backend::H2, Backend::Postgres];

    pub const fn name(self) -> &'static str {
        match self {
            Backend::Sqlite => "sqlite",
            Backend::Hana => "hana",
            Backend::H2 => "h2",
            Backend::Postgres => "postgres",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = ChangelogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Backend::Sqlite),
            "hana" => Ok(Backend::Hana),
            "h2" => Ok(Backend::H2),
            "postgres" | "postgresql" | "pg" => Ok(Backend::Postgres),
            _ => Err(ChangelogError::UnsupportedBackend {
                backend: s.to_string(),
                registered: Backend::ALL.map(Backend::name).join(", "),
            }),
        }
    }
}

/// Install mechanism of a generated artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// Executable `CREATE TRIGGER` statement
    SqlTrigger,
    /// HDI trigger design-time file
    HdbTrigger,
    /// HDI procedure design-time file
    HdbProcedure,
    /// `CREATE TRIGGER ... AS $$ <java> $$` statement
    JavaTrigger,
    /// `CREATE FUNCTION` followed by `CREATE TRIGGER`
    FunctionTriggerPair,
}

impl ArtifactKind {
    /// File suffix used when the artifact is written out
    pub const fn suffix(self) -> &'static str {
        match self {
            ArtifactKind::HdbTrigger => ".hdbtrigger",
            ArtifactKind::HdbProcedure => ".hdbprocedure",
            ArtifactKind::SqlTrigger | ArtifactKind::JavaTrigger | ArtifactKind::FunctionTriggerPair => ".sql",
        }
    }

    /// Whether the text is executed over a connection (HDI artifacts are deployed as files)
    pub const fn is_executable(self) -> bool {
        !matches!(self, ArtifactKind::HdbTrigger | ArtifactKind::HdbProcedure)
    }
}

/// One generated artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedTrigger {
    pub trigger_name: String,
    /// Entity whose table the trigger is attached to, `None` for support artifacts
    pub entity: Option<String>,
    pub source_text: String,
    pub artifact_kind: ArtifactKind,
}

impl GeneratedTrigger {
    pub fn file_name(&self) -> String {
        format!("{}{}", self.trigger_name, self.artifact_kind.suffix())
    }
}

/// Trigger synthesis for one backend
pub trait TriggerGenerator: Send + Sync {
    fn backend(&self) -> Backend;

    fn dialect(&self) -> &dyn Dialect;

    fn generate_create(&self, plan: &TriggerPlan) -> ChangelogResult<GeneratedTrigger>;

    fn generate_update(&self, plan: &TriggerPlan) -> ChangelogResult<GeneratedTrigger>;

    fn generate_delete(&self, plan: &TriggerPlan) -> ChangelogResult<GeneratedTrigger>;

    /// Trigger name for one operation of a set (`SHOP_ORDERS_CT_CREATE`)
    fn trigger_name(&self, plan: &TriggerPlan, op: Operation) -> String {
        self.dialect().fold(&format!("{}_{}", plan.artifact_stem(), op.suffix()))
    }

    /// All triggers of one set, one per enabled operation
    fn generate(&self, plan: &TriggerPlan) -> ChangelogResult<Vec<GeneratedTrigger>> {
        let mut triggers = Vec::with_capacity(plan.operations.len());
        for op in &plan.operations {
            triggers.push(match op {
                Operation::Create => self.generate_create(plan)?,
                Operation::Update => self.generate_update(plan)?,
                Operation::Delete => self.generate_delete(plan)?,
            });
        }
        Ok(triggers)
    }

    /// Trigger set of a composition of many, attached to the target's table
    fn generate_composition_trigger(&self, plan: &TriggerPlan) -> ChangelogResult<Vec<GeneratedTrigger>> {
        if plan.set_name.is_none() {
            return Err(crate::internal_error!(
                "plan for '{}' is not a composition trigger set",
                plan.entity
            ));
        }
        self.generate(plan)
    }

    /// Artifacts shared by every trigger of this backend
    fn support_artifacts(&self, _config: &TrackingConfig) -> Vec<GeneratedTrigger> {
        Vec::new()
    }
}

/// All artifacts of one tracked entity: its own set, then one set per composition of many
pub fn generate_entity(
    generator: &dyn TriggerGenerator,
    model: &SchemaModel,
    tracked: &TrackedEntity,
    config: &TrackingConfig,
) -> ChangelogResult<Vec<GeneratedTrigger>> {
    let mut artifacts = Vec::new();
    if let Some(plan) = plan_entity(model, tracked, config)? {
        artifacts.extend(generator.generate(&plan)?);
    }
    for plan in plan_compositions(model, tracked, config)? {
        artifacts.extend(generator.generate_composition_trigger(&plan)?);
    }
    info!(
        entity = %tracked.name,
        backend = %generator.backend(),
        artifacts = artifacts.len(),
        "Generated trigger set"
    );
    Ok(artifacts)
}

/// Output of a whole-model generation run
#[derive(Debug, Default)]
pub struct GenerationReport {
    pub artifacts: Vec<GeneratedTrigger>,
    /// Entities skipped during analysis or generation, with the reason
    pub failures: Vec<(String, ChangelogError)>,
}

/// Generate support artifacts plus every analyzed entity's triggers
///
/// A failing entity is reported and skipped; errors that invalidate the whole
/// run are returned.
pub fn generate_model(
    generator: &dyn TriggerGenerator,
    model: &SchemaModel,
    analysis: ModelAnalysis,
    config: &TrackingConfig,
) -> ChangelogResult<GenerationReport> {
    let mut report = GenerationReport {
        artifacts: generator.support_artifacts(config),
        failures: analysis.failures,
    };
    for entity in &analysis.entities {
        match generate_entity(generator, model, &entity.entity, config) {
            Ok(artifacts) => report.artifacts.extend(artifacts),
            Err(e) if e.is_fatal_for_run() => return Err(e),
            Err(e) => {
                warn!(entity = %entity.entity.name, error = %e, "Generation failed");
                report.failures.push((entity.entity.name.clone(), e));
            }
        }
    }
    Ok(report)
}

// ============ Statement building shared by the generators ============

/// `entity = '<entity>' AND entityKey = <key>` over either storage table
pub(crate) fn history_filters(plan: &TriggerPlan, key: &Expr) -> Vec<Filter> {
    vec![
        Filter::new("entity", Expr::text(plan.entity.clone())),
        Filter::new("entityKey", key.clone()),
    ]
}

/// Header row id of the invocation's entity key
pub(crate) fn change_log_id(plan: &TriggerPlan, key: &Expr) -> Expr {
    Expr::Lookup {
        entity: plan.change_log_table.clone(),
        column: "ID".to_string(),
        filters: history_filters(plan, key),
    }
}

pub(crate) fn where_sql<D: Dialect + ?Sized>(d: &D, ctx: &mut RenderContext, filters: &[Filter]) -> String {
    filters
        .iter()
        .map(|f| format!("{} = {}", d.column_name(&f.column), d.render(ctx, &f.value)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

pub(crate) fn column_list<D: Dialect + ?Sized>(d: &D, columns: &[&str]) -> String {
    columns.iter().map(|c| d.column_name(c)).collect::<Vec<_>>().join(", ")
}

fn service_entity(plan: &TriggerPlan) -> &str {
    plan.service_entity.as_deref().unwrap_or(&plan.entity)
}

/// Header row values in [`CHANGELOG_COLUMNS`] order
pub(crate) fn header_values<D: Dialect + ?Sized>(
    d: &D,
    ctx: &mut RenderContext,
    plan: &TriggerPlan,
    id: &str,
    key: &Expr,
) -> Vec<String> {
    vec![
        id.to_string(),
        d.string_literal(&plan.entity),
        d.render(ctx, key),
        d.string_literal(service_entity(plan)),
        d.now().to_string(),
        d.current_user(ctx),
    ]
}

/// `INSERT INTO <header> (...) VALUES (...)`
pub(crate) fn insert_header_sql<D: Dialect + ?Sized>(
    d: &D,
    ctx: &mut RenderContext,
    plan: &TriggerPlan,
    id: &str,
    key: &Expr,
) -> String {
    let values = header_values(d, ctx, plan, id, key);
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        d.table_name(&plan.change_log_table),
        column_list(d, &CHANGELOG_COLUMNS),
        values.join(", ")
    )
}

/// Change row values in [`CHANGES_COLUMNS`] order
pub(crate) fn change_values<D: Dialect + ?Sized>(
    d: &D,
    ctx: &mut RenderContext,
    plan: &TriggerPlan,
    column: &ColumnPlan,
    op: Operation,
    invocation: &Invocation,
    change_log_id: &Expr,
) -> Vec<String> {
    let [from, to, from_label, to_label] = column.transition(op);
    let root_entity = invocation.root_entity.as_ref().map_or(Expr::Null, |e| Expr::text(e.clone()));
    vec![
        d.uuid().to_string(),
        d.string_literal(&column.attribute),
        d.render(ctx, &from),
        d.render(ctx, &to),
        d.render(ctx, &from_label),
        d.render(ctx, &to_label),
        d.string_literal(&plan.entity),
        d.render(ctx, &invocation.entity_key),
        d.render(ctx, &root_entity),
        d.render(ctx, &invocation.root_key),
        d.render(ctx, &invocation.object_id),
        d.render(ctx, &invocation.root_object_id),
        d.string_literal(&column.declared_type),
        d.string_literal(op.modification()),
        d.now().to_string(),
        d.current_user(ctx),
        d.transaction_id(ctx),
        d.render(ctx, change_log_id),
    ]
}

/// `INSERT INTO <changes> (...) VALUES (...)`
pub(crate) fn insert_change_sql<D: Dialect + ?Sized>(
    d: &D,
    ctx: &mut RenderContext,
    plan: &TriggerPlan,
    column: &ColumnPlan,
    op: Operation,
    invocation: &Invocation,
    change_log_id: &Expr,
) -> String {
    let values = change_values(d, ctx, plan, column, op, invocation, change_log_id);
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        d.table_name(&plan.changes_table),
        column_list(d, &CHANGES_COLUMNS),
        values.join(", ")
    )
}

/// Cascading delete: change rows first, then the header
pub(crate) fn purge_sql<D: Dialect + ?Sized>(d: &D, plan: &TriggerPlan, key: &Expr) -> Vec<(String, Vec<String>)> {
    [&plan.changes_table, &plan.change_log_table]
        .into_iter()
        .map(|table| {
            let mut ctx = RenderContext::new();
            let sql = format!(
                "DELETE FROM {} WHERE {}",
                d.table_name(table),
                where_sql(d, &mut ctx, &history_filters(plan, key))
            );
            (sql, ctx.take_params())
        })
        .collect()
}

/// Indent every line of `text` by `depth` levels of four spaces
pub(crate) fn indent(text: &str, depth: usize) -> String {
    let pad = "    ".repeat(depth);
    text.lines()
        .map(|line| if line.is_empty() { String::new() } else { format!("{pad}{line}") })
        .collect::<Vec<_>>()
        .join("\n")
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::testing::{assert_error_contains, assert_error_sqlstate};
    use crate::schema::analyze_model;
    use crate::schema::testing::bookshop;

    #[test]
    fn test_backend_from_str() {
        assert_eq!("SQLite".parse::<Backend>().unwrap(), Backend::Sqlite);
        assert_eq!("postgresql".parse::<Backend>().unwrap(), Backend::Postgres);
        assert_eq!("pg".parse::<Backend>().unwrap(), Backend::Postgres);
        assert_error_sqlstate("oracle".parse::<Backend>(), "0A000");
        assert_error_contains("oracle".parse::<Backend>(), "sqlite, hana, h2, postgres");
    }

    #[test]
    fn test_artifact_kinds() {
        assert_eq!(ArtifactKind::HdbTrigger.suffix(), ".hdbtrigger");
        assert!(!ArtifactKind::HdbProcedure.is_executable());
        assert!(ArtifactKind::JavaTrigger.is_executable());
    }

    #[test]
    fn test_default_trigger_names() {
        let generator = SqliteGenerator::new(false);
        let plans = testing::bookshop_plans();
        assert_eq!(generator.trigger_name(&plans[0], Operation::Create), "SHOP_ORDERS_CT_CREATE");
        assert_eq!(
            generator.trigger_name(&plans[1], Operation::Delete),
            "SHOP_ORDERITEMS_CT_ITEMS_DELETE"
        );
    }

    #[test]
    fn test_composition_trigger_requires_set() {
        let generator = SqliteGenerator::new(false);
        let own = &testing::bookshop_plans()[0];
        assert_error_sqlstate(generator.generate_composition_trigger(own), "XX000");
    }

    #[test]
    fn test_generate_model_every_backend() {
        let model = bookshop();
        let config = TrackingConfig::default();
        let registry = GeneratorRegistry::with_builtins(&config);
        for backend in Backend::ALL {
            let generator = registry.require(backend.name()).unwrap();
            let analysis = analyze_model(&model, &config).unwrap();
            let report = generate_model(generator.as_ref(), &model, analysis, &config).unwrap();
            assert!(report.failures.is_empty(), "{backend}: {:?}", report.failures);
            // Orders own set, Orders items set, OrderItems own set
            let attached: Vec<_> = report.artifacts.iter().filter(|a| a.entity.is_some()).collect();
            let expected = if backend == Backend::Postgres { 3 } else { 9 };
            assert_eq!(attached.len(), expected, "{backend}");
        }
    }

    #[test]
    fn test_purge_statements() {
        let d = crate::dialect::SqliteDialect::new(false);
        let plan = testing::order_plan(&TrackingConfig::default());
        let statements = purge_sql(&d, &plan, &plan.invocation(crate::plan::RowRef::Old).entity_key);
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0].0,
            "DELETE FROM \"SAP_CHANGELOG_CHANGES\" WHERE \"entity\" = 'Order' AND \"entityKey\" = CAST(old.\"ID\" AS TEXT)"
        );
        assert!(statements[1].0.starts_with("DELETE FROM \"SAP_CHANGELOG_CHANGELOG\""));
    }

    #[test]
    fn test_indent() {
        assert_eq!(indent("a\n\nb", 1), "    a\n\n    b");
    }
}
