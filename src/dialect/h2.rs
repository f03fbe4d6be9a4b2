//! H2 dialect: Java source triggers
//!
//! SQL issued from the trigger callback binds every row value and local variable
//! as a `?` parameter; the [`RenderContext`] records the Java expression for each
//! placeholder. Parameters are cast to `VARCHAR` so H2 can type them.

use super::{Dialect, RenderContext};
use crate::plan::expr::RowRef;
use crate::schema::ValueType;

#[derive(Debug, Clone, Default)]
pub struct H2Dialect {
    quoted: bool,
}

const PARAM: &str = "CAST(? AS VARCHAR)";

impl H2Dialect {
    pub fn new(quoted: bool) -> Self {
        Self { quoted }
    }

    /// Column name as reported by `INFORMATION_SCHEMA.COLUMNS`
    pub fn catalog_column(&self, column: &str) -> String {
        if self.quoted {
            column.to_string()
        } else {
            self.fold(column)
        }
    }

    /// User variable holding a session value (`changelog.skip` -> `@changelog_skip`)
    pub fn user_variable(&self, key: &str) -> String {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        format!("@{name}")
    }
}

/// Java string literal
pub fn java_string(value: &str) -> String {
    format!(
        "\"{}\"",
        value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
    )
}

impl Dialect for H2Dialect {
    fn name(&self) -> &'static str {
        "h2"
    }

    fn fold(&self, name: &str) -> String {
        name.to_uppercase()
    }

    fn quoted_identifiers(&self) -> bool {
        self.quoted
    }

    fn row_column(&self, ctx: &mut RenderContext, row: RowRef, column: &str) -> String {
        let java_row = match row {
            RowRef::Old => "oldRow",
            RowRef::New | RowRef::Record | RowRef::Subject => "newRow",
        };
        ctx.push_param(format!("value({java_row}, {})", java_string(&self.catalog_column(column))));
        PARAM.to_string()
    }

    fn var(&self, ctx: &mut RenderContext, name: &str) -> String {
        ctx.push_param(name.to_string());
        PARAM.to_string()
    }

    fn text_cast(&self, expr: &str, _value_type: ValueType) -> String {
        format!("CAST({expr} AS VARCHAR)")
    }

    fn is_true(&self, expr: &str) -> String {
        format!("{expr} IN ('TRUE', 'true', '1')")
    }

    fn session_value(&self, _ctx: &mut RenderContext, key: &str) -> String {
        self.user_variable(key)
    }

    fn locale(&self, ctx: &mut RenderContext) -> String {
        self.session_value(ctx, "changelog.locale")
    }

    fn uuid(&self) -> &'static str {
        "RANDOM_UUID()"
    }

    fn now(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }

    fn current_user(&self, ctx: &mut RenderContext) -> String {
        format!("COALESCE({}, CURRENT_USER)", self.session_value(ctx, "changelog.user"))
    }

    fn transaction_id(&self, ctx: &mut RenderContext) -> String {
        self.session_value(ctx, "changelog.transaction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::encode;
    use crate::plan::expr::Expr;

    #[test]
    fn test_params_follow_placeholder_order() {
        let d = H2Dialect::new(false);
        let mut ctx = RenderContext::new();
        let sql = d.render(&mut ctx, &encode(ValueType::Boolean, Expr::column(RowRef::New, "isActive")));
        assert_eq!(sql.matches('?').count(), 2);
        assert_eq!(
            ctx.params(),
            ["value(newRow, \"ISACTIVE\")", "value(newRow, \"ISACTIVE\")"]
        );
    }

    #[test]
    fn test_vars_and_session_values() {
        let d = H2Dialect::new(false);
        let mut ctx = RenderContext::new();
        assert_eq!(d.render(&mut ctx, &Expr::var("entity_key")), "CAST(? AS VARCHAR)");
        assert_eq!(ctx.take_params(), vec!["entity_key"]);
        assert_eq!(d.user_variable("changelog.skip_entity_shop_2eorders"), "@changelog_skip_entity_shop_2eorders");
    }

    #[test]
    fn test_java_string_escaping() {
        assert_eq!(java_string("a\"b\\c"), "\"a\\\"b\\\\c\"");
    }
}
