//! SAP HANA dialect: declarative stored-procedure triggers (SQLScript)

use super::{Dialect, RenderContext};
use crate::plan::expr::RowRef;
use crate::schema::ValueType;

#[derive(Debug, Clone, Default)]
pub struct HanaDialect {
    quoted: bool,
}

impl HanaDialect {
    pub fn new(quoted: bool) -> Self {
        Self { quoted }
    }

    /// Local variable name inside a trigger or procedure body
    pub fn local(&self, name: &str) -> String {
        name.to_uppercase()
    }
}

impl Dialect for HanaDialect {
    fn name(&self) -> &'static str {
        "hana"
    }

    fn fold(&self, name: &str) -> String {
        name.to_uppercase()
    }

    fn quoted_identifiers(&self) -> bool {
        self.quoted
    }

    fn row_column(&self, _ctx: &mut RenderContext, row: RowRef, column: &str) -> String {
        let prefix = match row {
            RowRef::Old => ":OLD",
            RowRef::New | RowRef::Record | RowRef::Subject => ":NEW",
        };
        format!("{prefix}.{}", self.column_name(column))
    }

    fn var(&self, _ctx: &mut RenderContext, name: &str) -> String {
        format!(":{}", self.local(name))
    }

    fn text_cast(&self, expr: &str, _value_type: ValueType) -> String {
        format!("TO_NVARCHAR({expr})")
    }

    fn session_value(&self, _ctx: &mut RenderContext, key: &str) -> String {
        format!("SESSION_CONTEXT({})", self.string_literal(key))
    }

    fn locale(&self, ctx: &mut RenderContext) -> String {
        self.session_value(ctx, "LOCALE")
    }

    fn uuid(&self) -> &'static str {
        "SYSUUID"
    }

    fn now(&self) -> &'static str {
        "CURRENT_UTCTIMESTAMP"
    }

    fn current_user(&self, ctx: &mut RenderContext) -> String {
        self.session_value(ctx, "APPLICATIONUSER")
    }

    fn transaction_id(&self, _ctx: &mut RenderContext) -> String {
        "CURRENT_UPDATE_TRANSACTION()".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::expr::Expr;

    #[test]
    fn test_identifiers() {
        let d = HanaDialect::new(false);
        assert_eq!(d.table_name("sap.changelog.Changes"), "\"SAP_CHANGELOG_CHANGES\"");
        assert_eq!(d.column_name("valueChangedFrom"), "\"VALUECHANGEDFROM\"");
        assert_eq!(HanaDialect::new(true).table_name("shop.Orders"), "\"shop.Orders\"");
    }

    #[test]
    fn test_rows_and_vars() {
        let d = HanaDialect::new(false);
        let mut ctx = RenderContext::new();
        assert_eq!(d.render(&mut ctx, &Expr::column(RowRef::Old, "status")), ":OLD.\"STATUS\"");
        assert_eq!(d.render(&mut ctx, &Expr::var("entity_key")), ":ENTITY_KEY");
        assert_eq!(d.current_user(&mut ctx), "SESSION_CONTEXT('APPLICATIONUSER')");
    }
}
