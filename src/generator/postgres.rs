//! PostgreSQL generator: plpgsql function + trigger pairs
//!
//! [`generate`](TriggerGenerator::generate) emits one function per table that
//! branches on `TG_OP`, plus one trigger for all enabled operations. The
//! single-operation methods emit a pair scoped to that operation.
//!
//! Per-invocation values are computed once into `v_*` locals from the `rec`
//! record (`NEW`, or `OLD` on delete). The header row is opened lazily by the
//! first change row of the invocation.

use super::{
    history_filters, indent, insert_change_sql, insert_header_sql, purge_sql, where_sql, ArtifactKind,
    Backend, GeneratedTrigger, TriggerGenerator,
};
use crate::dialect::{Dialect, PostgresDialect, RenderContext};
use crate::error::ChangelogResult;
use crate::plan::expr::{Expr, RowRef};
use crate::plan::target::{Operation, ENTITY_KEY};
use crate::plan::TriggerPlan;

const CHANGELOG_ID: &str = "changelog_id";

#[derive(Debug, Clone, Default)]
pub struct PostgresGenerator {
    dialect: PostgresDialect,
}

impl PostgresGenerator {
    pub fn new(quoted_identifiers: bool) -> Self {
        Self {
            dialect: PostgresDialect::new(quoted_identifiers),
        }
    }

    fn stem(&self, plan: &TriggerPlan, op: Option<Operation>) -> String {
        let stem = match op {
            Some(op) => format!("{}_{}", plan.artifact_stem(), op.suffix()),
            None => plan.artifact_stem(),
        };
        self.dialect.fold(&stem)
    }

    /// Header lookup, created when absent; runs at most once per invocation
    fn open_header(&self, plan: &TriggerPlan) -> String {
        let d = &self.dialect;
        let mut ctx = RenderContext::new();
        let key = Expr::var(ENTITY_KEY);
        let id = d.local(CHANGELOG_ID);
        let filters = where_sql(d, &mut ctx, &history_filters(plan, &key));
        let insert = insert_header_sql(d, &mut ctx, plan, &id, &key);
        format!(
            "IF {id} IS NULL THEN\n    SELECT {id_col} INTO {id} FROM {table} WHERE {filters};\n    IF {id} IS NULL THEN\n        {id} := ({uuid})::text;\n        {insert};\n    END IF;\nEND IF;",
            id_col = d.column_name("ID"),
            table = d.table_name(&plan.change_log_table),
            uuid = d.uuid(),
        )
    }

    /// Statements of one operation branch
    fn branch(&self, plan: &TriggerPlan, op: Operation) -> String {
        let d = &self.dialect;
        let invocation = plan.invocation(RowRef::Record).to_vars();

        if op == Operation::Delete && !plan.records_deletes() {
            return purge_sql(d, plan, &invocation.entity_key)
                .into_iter()
                .map(|(sql, _)| format!("{sql};"))
                .collect::<Vec<_>>()
                .join("\n");
        }

        let header = Expr::var(CHANGELOG_ID);
        let open = self.open_header(plan);
        plan.columns
            .iter()
            .map(|column| {
                let mut ctx = RenderContext::new();
                let guard = d.render_cond(&mut ctx, &column.guarded(op));
                let insert = insert_change_sql(d, &mut ctx, plan, column, op, &invocation, &header);
                format!("IF {guard} THEN\n{}\n    {insert};\nEND IF;", indent(&open, 1))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn function(&self, plan: &TriggerPlan, operations: &[Operation], name: &str) -> String {
        let d = &self.dialect;
        let mut ctx = RenderContext::new();
        let invocation = plan.invocation(RowRef::Record);

        let mut declarations = vec!["rec RECORD;".to_string()];
        let mut assignments = Vec::new();
        for (var, expr) in invocation.values() {
            if *expr == Expr::Null {
                continue;
            }
            declarations.push(format!("{} TEXT;", d.local(var)));
            assignments.push(format!("{} := {};", d.local(var), d.render(&mut ctx, expr)));
        }
        declarations.push(format!("{} TEXT;", d.local(CHANGELOG_ID)));

        let branches = operations
            .iter()
            .enumerate()
            .map(|(i, op)| {
                let keyword = if i == 0 { "IF" } else { "ELSIF" };
                format!(
                    "{keyword} TG_OP = '{}' THEN\n{}",
                    op.event(),
                    indent(&self.branch(plan, *op), 1)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let skip = d.render_cond(&mut ctx, &plan.skip_guard());
        let body = format!(
            "IF {skip} THEN\n    RETURN NULL;\nEND IF;\nIF TG_OP = 'DELETE' THEN\n    rec := OLD;\nELSE\n    rec := NEW;\nEND IF;\n{}\n{branches}\nEND IF;\nRETURN NULL;",
            assignments.join("\n"),
        );

        format!(
            "CREATE OR REPLACE FUNCTION {name}() RETURNS TRIGGER AS $$\nDECLARE\n{}\nBEGIN\n{}\nEND;\n$$ LANGUAGE plpgsql;",
            indent(&declarations.join("\n"), 1),
            indent(&body, 1),
        )
    }

    fn pair(&self, plan: &TriggerPlan, operations: &[Operation], stem: &str) -> GeneratedTrigger {
        let d = &self.dialect;
        let function_name = d.quote_ident(&format!("{stem}_func"));
        let trigger_name = format!("{stem}_trigger");
        let events = operations.iter().map(|op| op.event()).collect::<Vec<_>>().join(" OR ");
        let source_text = format!(
            "{}\n\nCREATE TRIGGER {} AFTER {events} ON {} FOR EACH ROW EXECUTE FUNCTION {function_name}();",
            self.function(plan, operations, &function_name),
            d.quote_ident(&trigger_name),
            d.table_name(&plan.entity),
        );
        GeneratedTrigger {
            trigger_name,
            entity: Some(plan.entity.clone()),
            source_text,
            artifact_kind: ArtifactKind::FunctionTriggerPair,
        }
    }

    fn single(&self, plan: &TriggerPlan, op: Operation) -> GeneratedTrigger {
        self.pair(plan, &[op], &self.stem(plan, Some(op)))
    }
}

impl TriggerGenerator for PostgresGenerator {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn trigger_name(&self, plan: &TriggerPlan, op: Operation) -> String {
        format!("{}_trigger", self.stem(plan, Some(op)))
    }

    fn generate_create(&self, plan: &TriggerPlan) -> ChangelogResult<GeneratedTrigger> {
        Ok(self.single(plan, Operation::Create))
    }

    fn generate_update(&self, plan: &TriggerPlan) -> ChangelogResult<GeneratedTrigger> {
        Ok(self.single(plan, Operation::Update))
    }

    fn generate_delete(&self, plan: &TriggerPlan) -> ChangelogResult<GeneratedTrigger> {
        Ok(self.single(plan, Operation::Delete))
    }

    /// One function branching on `TG_OP` and one trigger for the whole set
    fn generate(&self, plan: &TriggerPlan) -> ChangelogResult<Vec<GeneratedTrigger>> {
        if plan.operations.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![self.pair(plan, &plan.operations, &self.stem(plan, None))])
    }
}
