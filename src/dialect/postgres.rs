//! PostgreSQL dialect: plpgsql function + trigger pairs
//!
//! Identifiers fold to lower case and are always requoted. The function reads
//! the operation's row through a local `rec` record.

use super::{Dialect, RenderContext};
use crate::plan::expr::RowRef;
use crate::schema::ValueType;

#[derive(Debug, Clone, Default)]
pub struct PostgresDialect {
    quoted: bool,
}

impl PostgresDialect {
    pub fn new(quoted: bool) -> Self {
        Self { quoted }
    }

    pub fn local(&self, name: &str) -> String {
        format!("v_{name}")
    }

    /// A session setting, or NULL when it is unset or was reset to `''`
    ///
    /// `set_config` cannot remove a setting, so a cleared one reads as the empty string.
    fn setting_or_null(&self, ctx: &mut RenderContext, key: &str) -> String {
        format!("NULLIF({}, '')", self.session_value(ctx, key))
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn fold(&self, name: &str) -> String {
        name.to_lowercase()
    }

    fn quoted_identifiers(&self) -> bool {
        self.quoted
    }

    fn row_column(&self, _ctx: &mut RenderContext, row: RowRef, column: &str) -> String {
        let prefix = match row {
            RowRef::Old => "OLD",
            RowRef::New => "NEW",
            RowRef::Record | RowRef::Subject => "rec",
        };
        format!("{prefix}.{}", self.column_name(column))
    }

    fn var(&self, _ctx: &mut RenderContext, name: &str) -> String {
        self.local(name)
    }

    fn text_cast(&self, expr: &str, _value_type: ValueType) -> String {
        format!("({expr})::text")
    }

    fn session_value(&self, _ctx: &mut RenderContext, key: &str) -> String {
        format!("current_setting({}, true)", self.string_literal(key))
    }

    fn locale(&self, ctx: &mut RenderContext) -> String {
        self.setting_or_null(ctx, "changelog.locale")
    }

    fn uuid(&self) -> &'static str {
        "gen_random_uuid()"
    }

    fn now(&self) -> &'static str {
        "now()"
    }

    fn current_user(&self, ctx: &mut RenderContext) -> String {
        format!("COALESCE({}, current_user)", self.setting_or_null(ctx, "changelog.user"))
    }

    fn transaction_id(&self, _ctx: &mut RenderContext) -> String {
        "txid_current()::text".to_string()
    }
}
