//! SAP HANA generator: `.hdbtrigger` bodies calling two shared procedures
//!
//! `CHANGELOG_OPEN` finds or creates the header row, `CHANGELOG_APPEND` writes
//! one change row. Both take identity, timestamp, acting user and transaction
//! from the session, so trigger bodies never pass them. SQLScript cannot use
//! arbitrary expressions as `CALL` arguments or `IF` conditions, so values and
//! guards are first selected into locals `FROM DUMMY`.

use super::{column_list, indent, purge_sql, ArtifactKind, Backend, GeneratedTrigger, TriggerGenerator};
use crate::config::TrackingConfig;
use crate::dialect::{Dialect, HanaDialect, RenderContext};
use crate::error::ChangelogResult;
use crate::plan::expr::{Cond, Expr};
use crate::plan::target::{Operation, CHANGELOG_COLUMNS, CHANGES_COLUMNS};
use crate::plan::TriggerPlan;

pub const OPEN_PROCEDURE: &str = "CHANGELOG_OPEN";
pub const APPEND_PROCEDURE: &str = "CHANGELOG_APPEND";

/// `CHANGELOG_APPEND` input parameters; all but the first map onto `CHANGES_COLUMNS[1..14]`
const APPEND_PARAMS: [&str; 14] = [
    "CHANGELOG_ID",
    "ATTRIBUTE",
    "VALUE_FROM",
    "VALUE_TO",
    "LABEL_FROM",
    "LABEL_TO",
    "ENTITY",
    "ENTITY_KEY",
    "ROOT_ENTITY",
    "ROOT_ENTITY_KEY",
    "OBJECT_ID",
    "ROOT_OBJECT_ID",
    "VALUE_DATA_TYPE",
    "MODIFICATION",
];

const TEXT_TYPE: &str = "NVARCHAR(5000)";
const ID_TYPE: &str = "NVARCHAR(36)";

#[derive(Debug, Clone, Default)]
pub struct HanaGenerator {
    dialect: HanaDialect,
}

impl HanaGenerator {
    pub fn new(quoted_identifiers: bool) -> Self {
        Self {
            dialect: HanaDialect::new(quoted_identifiers),
        }
    }

    /// `SELECT CASE WHEN <cond> THEN 1 ELSE 0 END INTO <target> FROM DUMMY;`
    fn select_flag(&self, cond: &Cond, target: &str) -> String {
        let test = self.dialect.render_cond(&mut RenderContext::new(), cond);
        format!("SELECT CASE WHEN {test} THEN 1 ELSE 0 END INTO {target} FROM DUMMY;")
    }

    fn record_column(&self, plan: &TriggerPlan, op: Operation, index: usize) -> String {
        let d = &self.dialect;
        let column = &plan.columns[index];
        let mut ctx = RenderContext::new();
        let invocation = plan.invocation(op.subject()).to_vars();

        let transition: Vec<String> = column.transition(op).iter().map(|e| d.render(&mut ctx, e)).collect();
        let root_entity = invocation
            .root_entity
            .as_ref()
            .map_or_else(|| "NULL".to_string(), |e| d.string_literal(e));
        let args = [
            d.var(&mut ctx, "changelog_id"),
            d.string_literal(&column.attribute),
            d.var(&mut ctx, "value_from"),
            d.var(&mut ctx, "value_to"),
            d.var(&mut ctx, "label_from"),
            d.var(&mut ctx, "label_to"),
            d.string_literal(&plan.entity),
            d.render(&mut ctx, &invocation.entity_key),
            root_entity,
            d.render(&mut ctx, &invocation.root_key),
            d.render(&mut ctx, &invocation.object_id),
            d.render(&mut ctx, &invocation.root_object_id),
            d.string_literal(&column.declared_type),
            d.string_literal(op.modification()),
        ];

        let open = format!(
            "IF :CHANGELOG_ID IS NULL THEN\n    CALL {}({}, {}, {}, CHANGELOG_ID);\nEND IF;",
            d.quote_ident(OPEN_PROCEDURE),
            d.string_literal(&plan.entity),
            d.render(&mut ctx, &invocation.entity_key),
            d.string_literal(plan.service_entity.as_deref().unwrap_or(&plan.entity)),
        );

        let recorded = format!(
            "{open}\nSELECT {} INTO VALUE_FROM, VALUE_TO, LABEL_FROM, LABEL_TO FROM DUMMY;\nCALL {}({});",
            transition.join(", "),
            d.quote_ident(APPEND_PROCEDURE),
            args.join(", ")
        );
        format!(
            "{}\nIF :RECORDED = 1 THEN\n{}\nEND IF;",
            self.select_flag(&column.guarded(op), "RECORDED"),
            indent(&recorded, 1)
        )
    }

    fn render(&self, plan: &TriggerPlan, op: Operation) -> GeneratedTrigger {
        let d = &self.dialect;
        let row = op.subject();
        let invocation = plan.invocation(row);

        let mut declarations = Vec::new();
        let mut statements = Vec::new();
        for (var, expr) in invocation.values() {
            if *expr == Expr::Null {
                continue;
            }
            let local = d.local(var);
            declarations.push(format!("DECLARE {local} {TEXT_TYPE};"));
            statements.push(format!(
                "SELECT {} INTO {local} FROM DUMMY;",
                d.render(&mut RenderContext::new(), expr)
            ));
        }

        if op == Operation::Delete && !plan.records_deletes() {
            let key = invocation.to_vars().entity_key;
            statements.extend(purge_sql(d, plan, &key).into_iter().map(|(sql, _)| format!("{sql};")));
        } else {
            declarations.push(format!("DECLARE CHANGELOG_ID {ID_TYPE} = NULL;"));
            declarations.push("DECLARE RECORDED INTEGER;".to_string());
            for local in ["VALUE_FROM", "VALUE_TO", "LABEL_FROM", "LABEL_TO"] {
                declarations.push(format!("DECLARE {local} {TEXT_TYPE};"));
            }
            statements.extend((0..plan.columns.len()).map(|i| self.record_column(plan, op, i)));
        }
        declarations.push("DECLARE SKIPPED INTEGER;".to_string());

        let referencing = match op {
            Operation::Create => "NEW ROW NEW",
            Operation::Update => "OLD ROW OLD, NEW ROW NEW",
            Operation::Delete => "OLD ROW OLD",
        };
        let name = self.trigger_name(plan, op);
        let body = format!(
            "{}\n{}\nIF :SKIPPED = 0 THEN\n{}\nEND IF;",
            declarations.join("\n"),
            self.select_flag(&plan.skip_guard(), "SKIPPED"),
            indent(&statements.join("\n"), 1)
        );
        GeneratedTrigger {
            source_text: format!(
                "TRIGGER {} AFTER {}\nON {}\nREFERENCING {referencing}\nFOR EACH ROW\nBEGIN\n{}\nEND",
                d.quote_ident(&name),
                op.event(),
                d.table_name(&plan.entity),
                indent(&body, 1)
            ),
            trigger_name: name,
            entity: Some(plan.entity.clone()),
            artifact_kind: ArtifactKind::HdbTrigger,
        }
    }

    fn open_procedure(&self, config: &TrackingConfig) -> GeneratedTrigger {
        let d = &self.dialect;
        let mut ctx = RenderContext::new();
        let table = d.table_name(&config.change_log_table);
        let values = [
            ":CHANGELOG_ID".to_string(),
            ":ENTITY".to_string(),
            ":ENTITY_KEY".to_string(),
            ":SERVICE_ENTITY".to_string(),
            d.now().to_string(),
            d.current_user(&mut ctx),
        ];
        let body = format!(
            "SELECT MAX({id}) INTO CHANGELOG_ID FROM {table}\n    WHERE {entity} = :ENTITY AND {key} = :ENTITY_KEY;\nIF :CHANGELOG_ID IS NULL THEN\n    CHANGELOG_ID = {uuid};\n    INSERT INTO {table} ({columns}) VALUES ({values});\nEND IF;",
            id = d.column_name("ID"),
            entity = d.column_name("entity"),
            key = d.column_name("entityKey"),
            uuid = d.uuid(),
            columns = column_list(d, &CHANGELOG_COLUMNS),
            values = values.join(", "),
        );
        procedure(
            d,
            OPEN_PROCEDURE,
            &[
                format!("IN ENTITY {TEXT_TYPE}"),
                format!("IN ENTITY_KEY {TEXT_TYPE}"),
                format!("IN SERVICE_ENTITY {TEXT_TYPE}"),
                format!("OUT CHANGELOG_ID {ID_TYPE}"),
            ],
            &body,
        )
    }

    fn append_procedure(&self, config: &TrackingConfig) -> GeneratedTrigger {
        let d = &self.dialect;
        let mut ctx = RenderContext::new();
        let mut values = vec![d.uuid().to_string()];
        values.extend(APPEND_PARAMS[1..].iter().map(|p| format!(":{p}")));
        values.push(d.now().to_string());
        values.push(d.current_user(&mut ctx));
        values.push(d.transaction_id(&mut ctx));
        values.push(":CHANGELOG_ID".to_string());

        let body = format!(
            "INSERT INTO {} ({})\n    VALUES ({});",
            d.table_name(&config.changes_table),
            column_list(d, &CHANGES_COLUMNS),
            values.join(", ")
        );
        let params: Vec<String> = APPEND_PARAMS
            .iter()
            .map(|p| {
                let ty = if *p == "CHANGELOG_ID" { ID_TYPE } else { TEXT_TYPE };
                format!("IN {p} {ty}")
            })
            .collect();
        procedure(d, APPEND_PROCEDURE, &params, &body)
    }
}

fn procedure(d: &HanaDialect, name: &str, params: &[String], body: &str) -> GeneratedTrigger {
    GeneratedTrigger {
        trigger_name: name.to_string(),
        entity: None,
        source_text: format!(
            "PROCEDURE {} (\n{}\n)\nLANGUAGE SQLSCRIPT\nSQL SECURITY INVOKER\nAS\nBEGIN\n{}\nEND",
            d.quote_ident(name),
            indent(&params.join(",\n"), 1),
            indent(body, 1)
        ),
        artifact_kind: ArtifactKind::HdbProcedure,
    }
}

impl TriggerGenerator for HanaGenerator {
    fn backend(&self) -> Backend {
        Backend::Hana
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

    fn support_artifacts(&self, config: &TrackingConfig) -> Vec<GeneratedTrigger> {
        vec![self.open_procedure(config), self.append_procedure(config)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::testing::{bookshop_plans, order_plan};

    #[test]
    fn test_trigger_calls_procedures() {
        let generator = HanaGenerator::new(false);
        let trigger = generator.generate_create(&order_plan(&TrackingConfig::default())).unwrap();
        assert_eq!(trigger.artifact_kind, ArtifactKind::HdbTrigger);
        assert_eq!(trigger.file_name(), "ORDER_CT_CREATE.hdbtrigger");

        let sql = &trigger.source_text;
        assert!(sql.starts_with("TRIGGER \"ORDER_CT_CREATE\" AFTER INSERT\nON \"ORDER\"\nREFERENCING NEW ROW NEW\nFOR EACH ROW\nBEGIN"));
        assert!(sql.contains("SELECT TO_NVARCHAR(:NEW.\"ID\") INTO ENTITY_KEY FROM DUMMY;"));
        assert!(sql.contains("CALL \"CHANGELOG_OPEN\"('Order', :ENTITY_KEY, 'Order', CHANGELOG_ID);"));
        assert!(sql.contains("CALL \"CHANGELOG_APPEND\"(:CHANGELOG_ID, 'status', :VALUE_FROM, :VALUE_TO"));
        assert!(sql.contains("SESSION_CONTEXT('changelog.skip')"));
        assert!(sql.contains("IF :SKIPPED = 0 THEN"));
        // acting user comes from the procedure, never from the trigger
        assert!(!sql.contains("APPLICATIONUSER"));
        assert!(sql.ends_with("END"));
    }

    #[test]
    fn test_update_references_both_rows() {
        let generator = HanaGenerator::new(false);
        let sql = generator
            .generate_update(&order_plan(&TrackingConfig::default()))
            .unwrap()
            .source_text;
        assert!(sql.contains("REFERENCING OLD ROW OLD, NEW ROW NEW"));
        assert!(sql.contains(":OLD.\"STATUS\" <> :NEW.\"STATUS\""));
    }

    #[test]
    fn test_cascade_delete_inline() {
        let generator = HanaGenerator::new(false);
        let sql = generator
            .generate_delete(&order_plan(&TrackingConfig::default()))
            .unwrap()
            .source_text;
        assert!(sql.contains(
            "DELETE FROM \"SAP_CHANGELOG_CHANGES\" WHERE \"ENTITY\" = 'Order' AND \"ENTITYKEY\" = :ENTITY_KEY;"
        ));
        assert!(!sql.contains("CHANGELOG_APPEND"));
    }

    #[test]
    fn test_support_procedures() {
        let generator = HanaGenerator::new(false);
        let artifacts = generator.support_artifacts(&TrackingConfig::default());
        assert_eq!(artifacts.len(), 2);
        assert!(artifacts.iter().all(|a| a.artifact_kind == ArtifactKind::HdbProcedure && a.entity.is_none()));

        let open = &artifacts[0].source_text;
        assert!(open.starts_with("PROCEDURE \"CHANGELOG_OPEN\" ("));
        assert!(open.contains("OUT CHANGELOG_ID NVARCHAR(36)"));
        assert!(open.contains("CHANGELOG_ID = SYSUUID;"));

        let append = &artifacts[1].source_text;
        assert!(append.contains("INSERT INTO \"SAP_CHANGELOG_CHANGES\""));
        assert!(append.contains(
            "CURRENT_UTCTIMESTAMP, SESSION_CONTEXT('APPLICATIONUSER'), CURRENT_UPDATE_TRANSACTION(), :CHANGELOG_ID)"
        ));
    }

    #[test]
    fn test_composition_root_values() {
        let generator = HanaGenerator::new(false);
        let sql = &generator.generate_composition_trigger(&bookshop_plans()[1]).unwrap()[0].source_text;
        assert!(sql.contains("SELECT TO_NVARCHAR(:NEW.\"UP__ID\") INTO ROOT_KEY FROM DUMMY;"));
        assert!(sql.contains("'shop.Orders', :ROOT_KEY, "));
        assert!(sql.contains(":ROOT_OBJECT_ID, 'cds.Composition', 'create')"));
    }
}
