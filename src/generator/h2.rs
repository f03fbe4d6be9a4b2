//! H2 generator: Java source triggers compiled by the database
//!
//! Each trigger is an anonymous `org.h2.api.Trigger`. Row values are read by
//! column name through an index built from `INFORMATION_SCHEMA.COLUMNS` in
//! `init`, and every SQL statement the callback issues binds row values and
//! locals as parameters.

use super::{
    history_filters, indent, insert_change_sql, insert_header_sql, purge_sql, where_sql, ArtifactKind,
    Backend, GeneratedTrigger, TriggerGenerator,
};
use crate::dialect::{java_string, Dialect, H2Dialect, RenderContext};
use crate::error::ChangelogResult;
use crate::plan::expr::{Cond, Expr};
use crate::plan::target::{Operation, ENTITY_KEY};
use crate::plan::TriggerPlan;

const CHANGELOG_ID: &str = "changeLogId";

/// Trigger members shared by every generated class
const MEMBERS: &str = r#"private final java.util.Map<String, Integer> columns = new java.util.HashMap<>();

@Override
public void init(java.sql.Connection conn, String schemaName, String triggerName, String tableName,
        boolean before, int type) throws java.sql.SQLException {
    try (java.sql.PreparedStatement ps = conn.prepareStatement(
            "SELECT COLUMN_NAME, ORDINAL_POSITION FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?")) {
        ps.setString(1, schemaName);
        ps.setString(2, tableName);
        try (java.sql.ResultSet rs = ps.executeQuery()) {
            while (rs.next()) {
                columns.put(rs.getString(1), rs.getInt(2) - 1);
            }
        }
    }
}

private Object value(Object[] row, String column) {
    Integer index = columns.get(column);
    return row == null || index == null ? null : row[index];
}

private java.sql.PreparedStatement prepare(java.sql.Connection conn, String sql, Object... params)
        throws java.sql.SQLException {
    java.sql.PreparedStatement ps = conn.prepareStatement(sql);
    for (int i = 0; i < params.length; i++) {
        ps.setObject(i + 1, params[i]);
    }
    return ps;
}

private String scalar(java.sql.Connection conn, String sql, Object... params) throws java.sql.SQLException {
    try (java.sql.PreparedStatement ps = prepare(conn, sql, params);
            java.sql.ResultSet rs = ps.executeQuery()) {
        return rs.next() ? rs.getString(1) : null;
    }
}

private void execute(java.sql.Connection conn, String sql, Object... params) throws java.sql.SQLException {
    try (java.sql.PreparedStatement ps = prepare(conn, sql, params)) {
        ps.executeUpdate();
    }
}

@Override
public void close() {
}

@Override
public void remove() {
}"#;

#[derive(Debug, Clone, Default)]
pub struct H2Generator {
    dialect: H2Dialect,
}

/// `name(conn, "<sql>", p1, p2, ...)`
fn call(name: &str, sql: &str, params: &[String]) -> String {
    let args: String = params.iter().map(|p| format!(", {p}")).collect();
    format!("{name}(conn, {}{args})", java_string(sql))
}

impl H2Generator {
    pub fn new(quoted_identifiers: bool) -> Self {
        Self {
            dialect: H2Dialect::new(quoted_identifiers),
        }
    }

    /// Java boolean expression evaluating `cond` in the database
    fn test(&self, cond: &Cond) -> String {
        let mut ctx = RenderContext::new();
        let sql = format!("SELECT CASE WHEN {} THEN 'true' END", self.dialect.render_cond(&mut ctx, cond));
        format!("{} != null", call("scalar", &sql, ctx.params()))
    }

    /// Finds or creates the header row, once per invocation
    fn open_header(&self, plan: &TriggerPlan) -> String {
        let d = &self.dialect;
        let key = Expr::var(ENTITY_KEY);

        let mut ctx = RenderContext::new();
        let select = format!(
            "SELECT {} FROM {} WHERE {}",
            d.column_name("ID"),
            d.table_name(&plan.change_log_table),
            where_sql(d, &mut ctx, &history_filters(plan, &key))
        );
        let lookup = call("scalar", &select, ctx.params());

        let mut ctx = RenderContext::new();
        let id = d.var(&mut ctx, CHANGELOG_ID);
        let insert = insert_header_sql(d, &mut ctx, plan, &id, &key);
        let insert = call("execute", &insert, ctx.params());

        format!(
            "if ({CHANGELOG_ID} == null) {{\n    {CHANGELOG_ID} = {lookup};\n    if ({CHANGELOG_ID} == null) {{\n        {CHANGELOG_ID} = java.util.UUID.randomUUID().toString();\n        {insert};\n    }}\n}}"
        )
    }

    fn fire_body(&self, plan: &TriggerPlan, op: Operation) -> String {
        let d = &self.dialect;
        let invocation = plan.invocation(op.subject());
        let mut lines = vec![format!("if ({}) {{\n    return;\n}}", self.test(&plan.skip_guard()))];

        for (var, expr) in invocation.values() {
            if *expr == Expr::Null {
                continue;
            }
            let mut ctx = RenderContext::new();
            let sql = format!("SELECT {}", d.render(&mut ctx, expr));
            lines.push(format!("String {var} = {};", call("scalar", &sql, ctx.params())));
        }

        let locals = invocation.to_vars();
        if op == Operation::Delete && !plan.records_deletes() {
            for (sql, params) in purge_sql(d, plan, &locals.entity_key) {
                lines.push(format!("{};", call("execute", &sql, &params)));
            }
            return lines.join("\n");
        }

        lines.push(format!("String {CHANGELOG_ID} = null;"));
        let header = Expr::var(CHANGELOG_ID);
        let open = self.open_header(plan);
        for column in &plan.columns {
            let mut ctx = RenderContext::new();
            let insert = insert_change_sql(d, &mut ctx, plan, column, op, &locals, &header);
            lines.push(format!(
                "if ({}) {{\n{}\n    {};\n}}",
                self.test(&column.guarded(op)),
                indent(&open, 1),
                call("execute", &insert, ctx.params())
            ));
        }
        lines.join("\n")
    }

    fn render(&self, plan: &TriggerPlan, op: Operation) -> GeneratedTrigger {
        let d = &self.dialect;
        let name = self.trigger_name(plan, op);
        let fire = format!(
            "@Override\npublic void fire(java.sql.Connection conn, Object[] oldRow, Object[] newRow)\n        throws java.sql.SQLException {{\n{}\n}}",
            indent(&self.fire_body(plan, op), 1)
        );
        let class = format!("{MEMBERS}\n\n{fire}");
        GeneratedTrigger {
            source_text: format!(
                "CREATE TRIGGER {} AFTER {} ON {} FOR EACH ROW AS $$\norg.h2.api.Trigger create() {{\n    return new org.h2.api.Trigger() {{\n{}\n    }};\n}}\n$$;",
                d.quote_ident(&name),
                op.event(),
                d.table_name(&plan.entity),
                indent(&class, 2)
            ),
            trigger_name: name,
            entity: Some(plan.entity.clone()),
            artifact_kind: ArtifactKind::JavaTrigger,
        }
    }
}

impl TriggerGenerator for H2Generator {
    fn backend(&self) -> Backend {
        Backend::H2
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn generate_create(&self, plan: &TriggerPlan) -> ChangelogResult<GeneratedTrigger> {
        Ok(self.render(plan, Operation::Create))
    }

    fn generate_update(&self, plan: &TriggerPlan) -> ChangelogResult<GeneratedTrigger> {
        Ok(self.render(plan, Operation::Update))
    }

    fn generate_delete(&self, plan: &TriggerPlan) -> ChangelogResult<GeneratedTrigger> {
        Ok(self.render(plan, Operation::Delete))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingConfig;
    use crate::generator::testing::{bookshop_plans, order_plan};

    #[test]
    fn test_java_trigger_shape() {
        let generator = H2Generator::new(false);
        let trigger = generator.generate_create(&order_plan(&TrackingConfig::default())).unwrap();
        assert_eq!(trigger.trigger_name, "ORDER_CT_CREATE");
        assert_eq!(trigger.artifact_kind, ArtifactKind::JavaTrigger);

        let src = &trigger.source_text;
        assert!(src.starts_with("CREATE TRIGGER \"ORDER_CT_CREATE\" AFTER INSERT ON \"ORDER\" FOR EACH ROW AS $$\n"));
        assert!(src.contains("org.h2.api.Trigger create() {"));
        assert!(src.contains("INFORMATION_SCHEMA.COLUMNS"));
        assert!(src.contains("String entity_key = scalar(conn, "));
        assert!(src.contains("value(newRow, \"ID\")"));
        assert!(src.contains("@changelog_skip"));
        assert!(src.ends_with("\n$$;"));
    }

    #[test]
    fn test_row_values_bound_as_parameters() {
        let generator = H2Generator::new(false);
        let src = generator
            .generate_update(&order_plan(&TrackingConfig::default()))
            .unwrap()
            .source_text;
        assert!(src.contains("value(oldRow, \"STATUS\")"));
        assert!(src.contains("value(newRow, \"STATUS\")"));
        // no row value is spliced into SQL text
        assert!(!src.contains("oldRow[") && !src.contains("newRow["));
    }

    #[test]
    fn test_header_opened_lazily() {
        let generator = H2Generator::new(false);
        let src = generator
            .generate_create(&order_plan(&TrackingConfig::default()))
            .unwrap()
            .source_text;
        assert!(src.contains("String changeLogId = null;"));
        assert!(src.contains("changeLogId = java.util.UUID.randomUUID().toString();"));
        // two tracked columns, each with the outer and inner null check
        assert_eq!(src.matches("if (changeLogId == null) {").count(), 4);
        assert!(src.contains("execute(conn, \"INSERT INTO \\\"SAP_CHANGELOG_CHANGES\\\""));
    }

    #[test]
    fn test_cascade_delete_binds_key() {
        let generator = H2Generator::new(false);
        let src = generator
            .generate_delete(&order_plan(&TrackingConfig::default()))
            .unwrap()
            .source_text;
        assert!(src.contains(
            "execute(conn, \"DELETE FROM \\\"SAP_CHANGELOG_CHANGES\\\" WHERE \\\"ENTITY\\\" = 'Order' \
             AND \\\"ENTITYKEY\\\" = CAST(? AS VARCHAR)\", entity_key);"
        ));
        assert!(src.contains("String entity_key = scalar(conn, "));
        assert!(src.contains("value(oldRow, \"ID\")"));
        assert!(!src.contains("INSERT INTO"));
    }

    #[test]
    fn test_composition_set() {
        let generator = H2Generator::new(false);
        let triggers = generator.generate_composition_trigger(&bookshop_plans()[1]).unwrap();
        assert_eq!(triggers.len(), 3);
        let src = &triggers[0].source_text;
        assert!(src.contains("ON \"SHOP_ORDERITEMS\" FOR EACH ROW"));
        assert!(src.contains("String root_key = scalar(conn, "));
        assert!(src.contains("'shop.Orders'"));
    }

    #[test]
    fn test_member_helpers_present() {
        for name in ["private Object value(", "private String scalar(", "private void execute(", "public void close()"] {
            assert!(MEMBERS.contains(name), "{name}");
        }
    }
}
