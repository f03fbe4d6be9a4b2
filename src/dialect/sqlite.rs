//! SQLite dialect: embedded-SQL triggers
//!
//! Rows are `old.`/`new.`, session values come from the host-registered
//! `session_context(key)` function. Table names fold dots to underscores and
//! upper-case unless quoted identifiers are configured. Every identifier is
//! emitted quoted: entity and column names such as `Order` or `group` are
//! keywords in SQLite.

use super::{Dialect, RenderContext};
use crate::plan::expr::{Expr, RowRef};
use crate::schema::ValueType;

#[derive(Debug, Clone, Default)]
pub struct SqliteDialect {
    quoted: bool,
}

impl SqliteDialect {
    pub fn new(quoted: bool) -> Self {
        Self { quoted }
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn fold(&self, name: &str) -> String {
        name.to_uppercase()
    }

    fn quoted_identifiers(&self) -> bool {
        self.quoted
    }

    fn table_name(&self, entity: &str) -> String {
        if self.quoted {
            self.quote_ident(entity)
        } else {
            self.quote_ident(&self.table_stem(entity))
        }
    }

    /// Column names keep their declared case; SQLite matches them case-insensitively
    fn column_name(&self, column: &str) -> String {
        self.quote_ident(column)
    }

    fn row_column(&self, _ctx: &mut RenderContext, row: RowRef, column: &str) -> String {
        let prefix = match row {
            RowRef::Old => "old",
            RowRef::New | RowRef::Record | RowRef::Subject => "new",
        };
        format!("{prefix}.{}", self.column_name(column))
    }

    /// SQLite triggers have no local variables; named values come from the session context
    fn var(&self, ctx: &mut RenderContext, name: &str) -> String {
        self.session_value(ctx, name)
    }

    fn text_cast(&self, expr: &str, value_type: ValueType) -> String {
        // temporals are stored as ISO text already
        if value_type.is_temporal() {
            expr.to_string()
        } else {
            format!("CAST({expr} AS TEXT)")
        }
    }

    fn is_true(&self, expr: &str) -> String {
        format!("{expr} IN (1, '1', 'true')")
    }

    fn substring(&self, expr: &str, start: usize, len: usize) -> String {
        format!("SUBSTR({expr}, {start}, {len})")
    }

    fn substring_from(&self, expr: &str, start: usize) -> String {
        format!("SUBSTR({expr}, {start})")
    }

    fn session_value(&self, _ctx: &mut RenderContext, key: &str) -> String {
        format!("session_context({})", self.string_literal(key))
    }

    fn locale(&self, ctx: &mut RenderContext) -> String {
        self.session_value(ctx, "$user.locale")
    }

    fn uuid(&self) -> &'static str {
        "lower(hex(randomblob(16)))"
    }

    fn now(&self) -> &'static str {
        "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')"
    }

    fn current_user(&self, ctx: &mut RenderContext) -> String {
        self.session_value(ctx, "$user.id")
    }

    fn transaction_id(&self, ctx: &mut RenderContext) -> String {
        self.session_value(ctx, "$transaction.id")
    }

    /// Localized fallbacks become one UNION ALL sub-select ordered by preference
    fn first_of(&self, ctx: &mut RenderContext, parts: &[Expr]) -> String {
        let all_lookups = parts.iter().all(|p| matches!(p, Expr::Lookup { .. }));
        if !all_lookups || parts.len() < 2 {
            let rendered: Vec<String> = parts.iter().map(|p| self.render(ctx, p)).collect();
            return format!("COALESCE({})", rendered.join(", "));
        }

        let mut branches = Vec::with_capacity(parts.len());
        for (priority, part) in parts.iter().enumerate() {
            let Expr::Lookup {
                entity,
                column,
                filters,
            } = part
            else {
                continue;
            };
            let conditions: Vec<String> = filters
                .iter()
                .map(|f| format!("{} = {}", self.column_name(&f.column), self.render(ctx, &f.value)))
                .collect();
            branches.push(format!(
                "SELECT {} AS value, {priority} AS priority FROM {} WHERE {}",
                self.column_name(column),
                self.table_name(entity),
                conditions.join(" AND ")
            ));
        }
        format!(
            "(SELECT value FROM ({}) WHERE value IS NOT NULL ORDER BY priority LIMIT 1)",
            branches.join(" UNION ALL ")
        )
    }
}
