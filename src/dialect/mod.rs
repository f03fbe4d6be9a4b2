//! SQL dialects (Strategy pattern)
//!
//! A [`Dialect`] knows how one engine spells identifiers, row access, casts,
//! session values and correlated lookups. Rendering of the shared expression IR
//! is provided here once; dialects override only the hooks that differ.

mod h2;
mod hana;
mod postgres;
mod sqlite;

pub use h2::{java_string, H2Dialect};
pub use hana::HanaDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use crate::encoding::{self, Encoding};
use crate::plan::expr::{Cond, Expr, Filter, RowRef};
use crate::schema::ValueType;

/// Per-statement rendering state
///
/// Dialects that bind row values as statement parameters record one host-language
/// expression per `?` placeholder, in placeholder order.
#[derive(Debug, Default)]
pub struct RenderContext {
    params: Vec<String>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_param(&mut self, binding: String) {
        self.params.push(binding);
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn take_params(&mut self) -> Vec<String> {
        std::mem::take(&mut self.params)
    }
}

/// SQL syntax strategy for one database engine
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Quote an identifier, doubling embedded quote characters
    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Case folding applied to unquoted names (`shop_Orders` -> `SHOP_ORDERS`)
    fn fold(&self, name: &str) -> String;

    /// Whether names are kept verbatim as quoted identifiers
    fn quoted_identifiers(&self) -> bool;

    /// Physical table name of an entity
    fn table_name(&self, entity: &str) -> String {
        if self.quoted_identifiers() {
            self.quote_ident(entity)
        } else {
            self.quote_ident(&self.fold(&entity.replace('.', "_")))
        }
    }

    /// Bare (unquoted) table name used to derive trigger names
    fn table_stem(&self, entity: &str) -> String {
        self.fold(&entity.replace('.', "_"))
    }

    fn column_name(&self, column: &str) -> String {
        if self.quoted_identifiers() {
            self.quote_ident(column)
        } else {
            self.quote_ident(&self.fold(column))
        }
    }

    /// Column of a trigger row
    fn row_column(&self, ctx: &mut RenderContext, row: RowRef, column: &str) -> String;

    /// Value precomputed into a local variable
    fn var(&self, ctx: &mut RenderContext, name: &str) -> String;

    fn string_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Native text cast for a non-text value
    fn text_cast(&self, expr: &str, value_type: ValueType) -> String;

    fn is_true(&self, expr: &str) -> String {
        format!("{expr} = TRUE")
    }

    fn length(&self, expr: &str) -> String {
        format!("LENGTH({expr})")
    }

    fn substring(&self, expr: &str, start: usize, len: usize) -> String {
        format!("SUBSTRING({expr}, {start}, {len})")
    }

    fn substring_from(&self, expr: &str, start: usize) -> String {
        format!("SUBSTRING({expr}, {start})")
    }

    fn concat(&self, parts: &[String]) -> String {
        parts.join(" || ")
    }

    /// Session-scoped value by name
    fn session_value(&self, ctx: &mut RenderContext, key: &str) -> String;

    fn locale(&self, ctx: &mut RenderContext) -> String;

    /// Skip flag test; an unset flag reads as not set
    fn flag_set(&self, ctx: &mut RenderContext, flag: &str) -> String {
        format!("COALESCE({}, 'false') = 'true'", self.session_value(ctx, flag))
    }

    fn uuid(&self) -> &'static str;

    fn now(&self) -> &'static str;

    fn current_user(&self, ctx: &mut RenderContext) -> String;

    fn transaction_id(&self, ctx: &mut RenderContext) -> String;

    /// Correlated scalar lookup
    fn lookup(&self, ctx: &mut RenderContext, entity: &str, column: &str, filters: &[Filter]) -> String {
        let conditions: Vec<String> = filters
            .iter()
            .map(|f| format!("{} = {}", self.column_name(&f.column), self.render(ctx, &f.value)))
            .collect();
        format!(
            "(SELECT {} FROM {} WHERE {})",
            self.column_name(column),
            self.table_name(entity),
            conditions.join(" AND ")
        )
    }

    fn first_of(&self, ctx: &mut RenderContext, parts: &[Expr]) -> String {
        let rendered: Vec<String> = parts.iter().map(|p| self.render(ctx, p)).collect();
        format!("COALESCE({})", rendered.join(", "))
    }

    fn render(&self, ctx: &mut RenderContext, expr: &Expr) -> String {
        match expr {
            Expr::Null => "NULL".to_string(),
            Expr::Text(value) => self.string_literal(value),
            Expr::Column { row, column } => self.row_column(ctx, *row, column),
            Expr::Var(name) => self.var(ctx, name),
            Expr::Locale => self.locale(ctx),
            Expr::Lookup {
                entity,
                column,
                filters,
            } => self.lookup(ctx, entity, column, filters),
            Expr::KeyJoin(parts) => encoding::key_join_sql(self, ctx, parts),
            Expr::JoinNonEmpty(parts) => encoding::join_non_empty_sql(self, ctx, parts),
            Expr::FirstOf(parts) => self.first_of(ctx, parts),
            Expr::Encoded { encoding, inner } => match encoding {
                Encoding::BooleanText => encoding::boolean_sql(self, ctx, inner),
                Encoding::Truncated => encoding::truncated_sql(self, ctx, inner),
                Encoding::Cast(value_type) => {
                    let value = self.render(ctx, inner);
                    self.text_cast(&value, *value_type)
                }
            },
        }
    }

    fn render_cond(&self, ctx: &mut RenderContext, cond: &Cond) -> String {
        match cond {
            Cond::IsNotNull(expr) => format!("{} IS NOT NULL", self.render(ctx, expr)),
            Cond::Changed { old, new } => encoding::changed_sql(self, ctx, old, new),
            Cond::Any(conds) => join_conds(self, ctx, conds, " OR "),
            Cond::All(conds) => join_conds(self, ctx, conds, " AND "),
            Cond::Not(inner) => format!("NOT ({})", self.render_cond(ctx, inner)),
            Cond::FlagSet(flag) => self.flag_set(ctx, flag),
        }
    }
}

fn join_conds<D: Dialect + ?Sized>(d: &D, ctx: &mut RenderContext, conds: &[Cond], op: &str) -> String {
    if conds.is_empty() {
        return if op == " OR " { "1 = 0" } else { "1 = 1" }.to_string();
    }
    let rendered: Vec<String> = conds.iter().map(|c| d.render_cond(ctx, c)).collect();
    format!("({})", rendered.join(op))
}
