//! SQLite generator: one embedded-SQL trigger per operation
//!
//! SQLite triggers have no variables, so every per-invocation value is inlined
//! into each statement. The skip guard becomes the trigger's `WHEN` clause and
//! each change row is an `INSERT ... SELECT ... WHERE <guard>`.

use super::{
    change_log_id, change_values, column_list, header_values, history_filters, indent, purge_sql, where_sql,
    ArtifactKind, Backend, GeneratedTrigger, TriggerGenerator,
};
use crate::dialect::{Dialect, RenderContext, SqliteDialect};
use crate::error::ChangelogResult;
use crate::plan::expr::Cond;
use crate::plan::target::{Operation, CHANGELOG_COLUMNS, CHANGES_COLUMNS};
use crate::plan::TriggerPlan;

#[derive(Debug, Clone, Default)]
pub struct SqliteGenerator {
    dialect: SqliteDialect,
}

impl SqliteGenerator {
    pub fn new(quoted_identifiers: bool) -> Self {
        Self {
            dialect: SqliteDialect::new(quoted_identifiers),
        }
    }

    /// Header insert-if-absent, only when the invocation records anything
    fn open_header(&self, plan: &TriggerPlan, op: Operation) -> String {
        let d = &self.dialect;
        let mut ctx = RenderContext::new();
        let key = plan.invocation(op.subject()).entity_key;
        let values = header_values(d, &mut ctx, plan, d.uuid(), &key);
        let exists = where_sql(d, &mut ctx, &history_filters(plan, &key));
        let any_change = d.render_cond(&mut ctx, &plan.any_change(op).bind(op.subject()));
        format!(
            "INSERT INTO {table} ({columns})\nSELECT {values}\nWHERE NOT EXISTS (SELECT 1 FROM {table} WHERE {exists})\n  AND {any_change};",
            table = d.table_name(&plan.change_log_table),
            columns = column_list(d, &CHANGELOG_COLUMNS),
            values = values.join(", "),
        )
    }

    fn body(&self, plan: &TriggerPlan, op: Operation) -> Vec<String> {
        let d = &self.dialect;
        let row = op.subject();
        let invocation = plan.invocation(row);

        if op == Operation::Delete && !plan.records_deletes() {
            return purge_sql(d, plan, &invocation.entity_key)
                .into_iter()
                .map(|(sql, _)| format!("{sql};"))
                .collect();
        }

        let header = change_log_id(plan, &invocation.entity_key);
        let mut statements = vec![self.open_header(plan, op)];
        for column in &plan.columns {
            let mut ctx = RenderContext::new();
            let values = change_values(d, &mut ctx, plan, column, op, &invocation, &header);
            let guard = d.render_cond(&mut ctx, &column.guarded(op).bind(row));
            statements.push(format!(
                "INSERT INTO {} ({})\nSELECT {}\nWHERE {guard};",
                d.table_name(&plan.changes_table),
                column_list(d, &CHANGES_COLUMNS),
                values.join(", ")
            ));
        }
        statements
    }

    fn render(&self, plan: &TriggerPlan, op: Operation) -> GeneratedTrigger {
        let d = &self.dialect;
        let name = self.trigger_name(plan, op);
        let skip = d.render_cond(&mut RenderContext::new(), &Cond::negate(plan.skip_guard()));
        let body = self
            .body(plan, op)
            .iter()
            .map(|s| indent(s, 1))
            .collect::<Vec<_>>()
            .join("\n");
        GeneratedTrigger {
            source_text: format!(
                "CREATE TRIGGER {name} AFTER {event}\nON {table}\nFOR EACH ROW WHEN {skip}\nBEGIN\n{body}\nEND;",
                event = op.event(),
                table = d.table_name(&plan.entity),
            ),
            trigger_name: name,
            entity: Some(plan.entity.clone()),
            artifact_kind: ArtifactKind::SqlTrigger,
        }
    }
}

impl TriggerGenerator for SqliteGenerator {
    fn backend(&self) -> Backend {
        Backend::Sqlite
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
    fn test_create_trigger_shape() {
        let generator = SqliteGenerator::new(false);
        let trigger = generator.generate_create(&order_plan(&TrackingConfig::default())).unwrap();
        assert_eq!(trigger.trigger_name, "ORDER_CT_CREATE");
        assert_eq!(trigger.artifact_kind, ArtifactKind::SqlTrigger);

        let sql = &trigger.source_text;
        assert!(sql.starts_with("CREATE TRIGGER ORDER_CT_CREATE AFTER INSERT\nON \"ORDER\"\nFOR EACH ROW WHEN NOT ("));
        assert!(sql.contains("session_context('changelog.skip')"));
        assert!(sql.contains("session_context('changelog.skip_entity_order')"));
        assert!(sql.contains("WHERE NOT EXISTS (SELECT 1 FROM \"SAP_CHANGELOG_CHANGELOG\""));
        // one header + two change inserts
        assert_eq!(sql.matches("INSERT INTO").count(), 3);
        assert!(sql.contains("'status'"));
        assert!(sql.contains("'create'"));
        assert!(sql.contains(
            "WHERE (new.\"status\" IS NOT NULL AND NOT \
             (COALESCE(session_context('changelog.skip_element_order__status'), 'false') = 'true'));"
        ));
        assert!(sql.ends_with("END;"));
    }

    #[test]
    fn test_composition_set_carries_root() {
        let generator = SqliteGenerator::new(false);
        let plans = bookshop_plans();
        let triggers = generator.generate_composition_trigger(&plans[1]).unwrap();
        assert_eq!(triggers.len(), 3);
        let create = &triggers[0];
        assert_eq!(create.trigger_name, "SHOP_ORDERITEMS_CT_ITEMS_CREATE");
        assert!(create.source_text.contains("ON \"SHOP_ORDERITEMS\"\n"));
        assert!(create.source_text.contains("'shop.Orders', CAST(new.\"up__ID\" AS TEXT)"));
        assert!(create.source_text.contains("session_context('changelog.skip_entity_shop_2eorderitems')"));
    }

    #[test]
    fn test_quoted_identifiers() {
        let generator = SqliteGenerator::new(true);
        let sql = generator.generate_create(&bookshop_plans()[0]).unwrap().source_text;
        assert!(sql.contains("ON \"shop.Orders\"\n"));
        assert!(sql.contains("INSERT INTO \"sap.changelog.Changes\""));
    }

    /// Generated triggers installed into an in-memory SQLite database
    mod execution {
        use std::collections::HashMap;
        use std::sync::{Arc, Mutex};

        use rusqlite::functions::FunctionFlags;
        use rusqlite::{params, Connection};

        use super::*;
        use crate::generator::{generate_model, GeneratedTrigger};
        use crate::schema::testing::{bookshop, orders_only};
        use crate::schema::{analyze_model, SchemaModel};
        use crate::skip::{SessionUpdate, TransactionContext};

        #[derive(Debug, Clone, PartialEq, Eq)]
        struct Change {
            entity: String,
            attribute: String,
            from: Option<String>,
            to: Option<String>,
            to_label: Option<String>,
            entity_key: Option<String>,
            root_entity: Option<String>,
            root_key: Option<String>,
            object_id: Option<String>,
            root_object_id: Option<String>,
            modification: String,
            change_log: Option<String>,
        }

        struct Database {
            conn: Connection,
            dialect: SqliteDialect,
            config: TrackingConfig,
            /// Values served by `session_context(key)`
            session: Arc<Mutex<HashMap<String, String>>>,
        }

        fn create_table(d: &SqliteDialect, entity: &str, columns: &[&str]) -> String {
            format!("CREATE TABLE {} ({});", d.table_name(entity), column_list(d, columns))
        }

        impl Database {
            /// Storage tables plus one table per database entity of `model`, with every model trigger installed
            fn new(model: &SchemaModel, config: TrackingConfig) -> Self {
                let conn = Connection::open_in_memory().unwrap();
                let session: Arc<Mutex<HashMap<String, String>>> = Arc::default();
                let values = Arc::clone(&session);
                conn.create_scalar_function("session_context", 1, FunctionFlags::SQLITE_UTF8, move |ctx| {
                    let key: String = ctx.get(0)?;
                    Ok(values.lock().unwrap().get(&key).cloned())
                })
                .unwrap();

                let dialect = SqliteDialect::new(config.quoted_identifiers);
                let mut ddl = vec![
                    create_table(&dialect, &config.changes_table, &CHANGES_COLUMNS),
                    create_table(&dialect, &config.change_log_table, &CHANGELOG_COLUMNS),
                ];
                for entity in model.entities.values().filter(|e| !e.is_projection()) {
                    let columns: Vec<&str> = entity
                        .elements
                        .iter()
                        .filter(|e| e.is_physical())
                        .map(|e| e.name.as_str())
                        .collect();
                    ddl.push(create_table(&dialect, &entity.name, &columns));
                }
                conn.execute_batch(&ddl.join("\n")).unwrap();

                let db = Self {
                    conn,
                    dialect,
                    config,
                    session,
                };
                let generator = SqliteGenerator::new(db.config.quoted_identifiers);
                let analysis = analyze_model(model, &db.config).unwrap();
                let report = generate_model(&generator, model, analysis, &db.config).unwrap();
                assert!(report.failures.is_empty(), "{:?}", report.failures);
                db.install(&report.artifacts);
                db
            }

            fn install(&self, triggers: &[GeneratedTrigger]) {
                for trigger in triggers {
                    self.conn
                        .execute_batch(&trigger.source_text)
                        .unwrap_or_else(|e| panic!("{} failed to install: {e}", trigger.trigger_name));
                }
            }

            fn run(&self, updates: Vec<SessionUpdate>) {
                let mut session = self.session.lock().unwrap();
                for update in updates {
                    match update {
                        SessionUpdate::HostValue { key, value: Some(value) } => {
                            session.insert(key, value);
                        }
                        SessionUpdate::HostValue { key, value: None } => {
                            session.remove(&key);
                        }
                        SessionUpdate::Sql(sql) => panic!("unexpected statement for sqlite: {sql}"),
                    }
                }
            }

            fn execute(&self, sql: &str) {
                self.conn.execute_batch(sql).unwrap();
            }

            fn changes(&self) -> Vec<Change> {
                let d = &self.dialect;
                let columns = [
                    "entity",
                    "attribute",
                    "valueChangedFrom",
                    "valueChangedTo",
                    "valueChangedToLabel",
                    "entityKey",
                    "rootEntity",
                    "rootEntityKey",
                    "objectID",
                    "rootObjectID",
                    "modification",
                    "changeLog_ID",
                ];
                let sql = format!(
                    "SELECT {} FROM {} ORDER BY rowid",
                    column_list(d, &columns),
                    d.table_name(&self.config.changes_table)
                );
                let mut stmt = self.conn.prepare(&sql).unwrap();
                let rows = stmt
                    .query_map([], |row| {
                        Ok(Change {
                            entity: row.get(0)?,
                            attribute: row.get(1)?,
                            from: row.get(2)?,
                            to: row.get(3)?,
                            to_label: row.get(4)?,
                            entity_key: row.get(5)?,
                            root_entity: row.get(6)?,
                            root_key: row.get(7)?,
                            object_id: row.get(8)?,
                            root_object_id: row.get(9)?,
                            modification: row.get(10)?,
                            change_log: row.get(11)?,
                        })
                    })
                    .unwrap();
                rows.map(Result::unwrap).collect()
            }

            /// `(ID, entityKey)` of every header row
            fn headers(&self) -> Vec<(String, String)> {
                let d = &self.dialect;
                let sql = format!(
                    "SELECT {}, {} FROM {} ORDER BY rowid",
                    d.column_name("ID"),
                    d.column_name("entityKey"),
                    d.table_name(&self.config.change_log_table)
                );
                let mut stmt = self.conn.prepare(&sql).unwrap();
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?))).unwrap();
                rows.map(Result::unwrap).collect()
            }
        }

        fn orders(config: TrackingConfig) -> Database {
            Database::new(&orders_only(), config)
        }

        #[test]
        fn test_keyword_table_installs_and_records_create() {
            let db = orders(TrackingConfig::default());
            db.execute(r#"INSERT INTO "ORDER" ("ID", "status") VALUES (1, 'New')"#);

            let changes = db.changes();
            assert_eq!(changes.len(), 1);
            let change = &changes[0];
            assert_eq!(change.entity, "Order");
            assert_eq!(change.attribute, "status");
            assert_eq!(change.from, None);
            assert_eq!(change.to.as_deref(), Some("New"));
            assert_eq!(change.entity_key.as_deref(), Some("1"));
            assert_eq!(change.modification, "create");

            let headers = db.headers();
            assert_eq!(headers.len(), 1);
            assert_eq!(headers[0].1, "1");
            assert_eq!(change.change_log.as_deref(), Some(headers[0].0.as_str()));
        }

        #[test]
        fn test_update_records_only_real_changes() {
            let db = orders(TrackingConfig::default());
            db.execute(r#"INSERT INTO "ORDER" ("ID", "status") VALUES (1, 'New')"#);
            db.execute(r#"UPDATE "ORDER" SET "status" = 'New' WHERE "ID" = 1"#);
            assert_eq!(db.changes().len(), 1);

            db.execute(r#"UPDATE "ORDER" SET "status" = 'Shipped' WHERE "ID" = 1"#);
            let changes = db.changes();
            assert_eq!(changes.len(), 2);
            assert_eq!(changes[1].from.as_deref(), Some("New"));
            assert_eq!(changes[1].to.as_deref(), Some("Shipped"));
            assert_eq!(changes[1].modification, "update");
            // both records hang off the one header of key 1
            assert_eq!(db.headers().len(), 1);
            assert_eq!(changes[0].change_log, changes[1].change_log);

            // NULL -> value and value -> NULL are changes too
            db.execute(r#"UPDATE "ORDER" SET "status" = NULL WHERE "ID" = 1"#);
            db.execute(r#"UPDATE "ORDER" SET "status" = NULL WHERE "ID" = 1"#);
            db.execute(r#"UPDATE "ORDER" SET "status" = 'Open' WHERE "ID" = 1"#);
            let changes = db.changes();
            assert_eq!(changes.len(), 4);
            assert_eq!((changes[2].from.as_deref(), changes[2].to.as_deref()), (Some("Shipped"), None));
            assert_eq!((changes[3].from.as_deref(), changes[3].to.as_deref()), (None, Some("Open")));
        }

        #[test]
        fn test_booleans_stored_as_text() {
            let db = orders(TrackingConfig::default());
            db.conn
                .execute(r#"INSERT INTO "ORDER" ("ID", "isActive") VALUES (?1, ?2)"#, params![1, false])
                .unwrap();
            db.conn
                .execute(r#"INSERT INTO "ORDER" ("ID", "isActive") VALUES (?1, ?2)"#, params![2, true])
                .unwrap();

            let values: Vec<_> = db.changes().into_iter().map(|c| (c.attribute, c.to)).collect();
            assert_eq!(
                values,
                vec![
                    ("isActive".to_string(), Some("false".to_string())),
                    ("isActive".to_string(), Some("true".to_string()))
                ]
            );
        }

        #[test]
        fn test_truncation_boundary() {
            let db = orders(TrackingConfig::default());
            let exact = "a".repeat(5000);
            let long = "b".repeat(5001);
            db.conn
                .execute(r#"INSERT INTO "ORDER" ("ID", "status") VALUES (?1, ?2)"#, params![1, exact])
                .unwrap();
            db.conn
                .execute(r#"INSERT INTO "ORDER" ("ID", "status") VALUES (?1, ?2)"#, params![2, long])
                .unwrap();

            let changes = db.changes();
            assert_eq!(changes[0].to.as_deref(), Some(exact.as_str()));
            let stored = changes[1].to.as_deref().unwrap();
            assert_eq!(stored.chars().count(), 5000);
            assert_eq!(stored, format!("{}...", "b".repeat(4997)));
        }

        #[test]
        fn test_skip_flags_through_transaction_context() {
            let db = orders(TrackingConfig::default());

            let mut ctx = TransactionContext::new();
            ctx.skip_attribute("Order", "status");
            db.run(ctx.apply_statements(Backend::Sqlite));
            db.execute(r#"INSERT INTO "ORDER" ("ID", "status", "isActive") VALUES (1, 'New', 1)"#);
            db.run(ctx.finish(Backend::Sqlite));
            let attributes: Vec<_> = db.changes().into_iter().map(|c| c.attribute).collect();
            assert_eq!(attributes, vec!["isActive"]);

            let mut ctx = TransactionContext::new();
            ctx.skip_entity("Order");
            db.run(ctx.apply_statements(Backend::Sqlite));
            db.execute(r#"INSERT INTO "ORDER" ("ID", "status") VALUES (2, 'New')"#);
            db.run(ctx.finish(Backend::Sqlite));
            assert_eq!(db.changes().len(), 1);
            // a skipped invocation opens no header either
            assert_eq!(db.headers().len(), 1);

            let mut ctx = TransactionContext::new();
            ctx.skip_all();
            db.run(ctx.apply_statements(Backend::Sqlite));
            db.execute(r#"UPDATE "ORDER" SET "status" = 'Shipped' WHERE "ID" = 1"#);
            db.run(ctx.finish(Backend::Sqlite));
            assert_eq!(db.changes().len(), 1);

            // flags were reset: the next write records again
            db.execute(r#"UPDATE "ORDER" SET "status" = 'Closed' WHERE "ID" = 1"#);
            let changes = db.changes();
            assert_eq!(changes.len(), 2);
            assert_eq!(changes[1].from.as_deref(), Some("Shipped"));
        }

        #[test]
        fn test_cascade_delete_purges_key_history() {
            let db = orders(TrackingConfig::default());
            db.execute(r#"INSERT INTO "ORDER" ("ID", "status") VALUES (1, 'New'), (2, 'New')"#);
            db.execute(r#"UPDATE "ORDER" SET "status" = 'Shipped' WHERE "ID" = 1"#);
            db.execute(r#"DELETE FROM "ORDER" WHERE "ID" = 1"#);

            let changes = db.changes();
            assert_eq!(changes.len(), 1);
            assert_eq!(changes[0].entity_key.as_deref(), Some("2"));
            let headers = db.headers();
            assert_eq!(headers.len(), 1);
            assert_eq!(headers[0].1, "2");
        }

        #[test]
        fn test_preserve_delete_appends_transitions() {
            let db = orders(TrackingConfig {
                preserve_deletes: true,
                ..TrackingConfig::default()
            });
            db.execute(r#"INSERT INTO "ORDER" ("ID", "status", "isActive") VALUES (1, 'New', 0)"#);
            db.execute(r#"DELETE FROM "ORDER" WHERE "ID" = 1"#);

            let changes = db.changes();
            assert_eq!(changes.len(), 4);
            let deletes: Vec<_> = changes.iter().filter(|c| c.modification == "delete").collect();
            assert_eq!(deletes.len(), 2);
            assert!(deletes.iter().all(|c| c.to.is_none()));
            assert_eq!(deletes[0].from.as_deref(), Some("New"));
            assert_eq!(deletes[1].from.as_deref(), Some("false"));
            assert_eq!(db.headers().len(), 1);
        }

        #[test]
        fn test_disabled_operation_installs_nothing() {
            let db = orders(TrackingConfig {
                disable_update_tracking: true,
                ..TrackingConfig::default()
            });
            db.execute(r#"INSERT INTO "ORDER" ("ID", "status") VALUES (1, 'New')"#);
            db.execute(r#"UPDATE "ORDER" SET "status" = 'Shipped' WHERE "ID" = 1"#);
            assert_eq!(db.changes().len(), 1);
        }

        fn shop() -> Database {
            let db = Database::new(&bookshop(), TrackingConfig::default());
            db.execute(
                r#"INSERT INTO "SHOP_CUSTOMERS" ("ID", "name") VALUES ('c1', 'Ada');
                   INSERT INTO "SHOP_COUNTRIES" ("code", "name") VALUES ('DE', 'Germany'), ('FR', 'France');
                   INSERT INTO "SHOP_COUNTRIES_TEXTS" ("locale", "code", "name") VALUES ('de', 'DE', 'Deutschland');"#,
            );
            db
        }

        #[test]
        fn test_composition_children_record_root() {
            let db = shop();
            db.execute(
                r#"INSERT INTO "SHOP_ORDERS" ("ID", "orderNo", "customer_ID") VALUES ('o1', 'A-100', 'c1');
                   INSERT INTO "SHOP_ORDERITEMS" ("ID", "up__ID", "product") VALUES ('i1', 'o1', 'Pen'), ('i2', 'o1', 'Ink');"#,
            );

            let items: Vec<_> = db.changes().into_iter().filter(|c| c.attribute == "items").collect();
            assert_eq!(items.len(), 2);
            for (change, (key, product)) in items.iter().zip([("i1", "Pen"), ("i2", "Ink")]) {
                assert_eq!(change.entity, "shop.OrderItems");
                assert_eq!(change.entity_key.as_deref(), Some(key));
                assert_eq!(change.to.as_deref(), Some(product));
                assert_eq!(change.root_entity.as_deref(), Some("shop.Orders"));
                assert_eq!(change.root_key.as_deref(), Some("o1"));
                assert_eq!(change.root_object_id.as_deref(), Some("A-100, Ada"));
            }
        }

        #[test]
        fn test_reference_labels_and_object_id() {
            let db = shop();
            db.run(vec![SessionUpdate::HostValue {
                key: "$user.locale".to_string(),
                value: Some("de".to_string()),
            }]);
            db.execute(
                r#"INSERT INTO "SHOP_ORDERS" ("ID", "orderNo", "status", "customer_ID", "country_code")
                   VALUES ('o1', 'A-100', 'New', 'c1', 'DE')"#,
            );

            let changes = db.changes();
            let customer = changes.iter().find(|c| c.attribute == "customer").unwrap();
            assert_eq!(customer.to.as_deref(), Some("c1"));
            assert_eq!(customer.to_label.as_deref(), Some("Ada"));
            assert_eq!(customer.object_id.as_deref(), Some("A-100, Ada"));
            let country = changes.iter().find(|c| c.attribute == "country").unwrap();
            assert_eq!(country.to_label.as_deref(), Some("Deutschland"));

            // no translation for FR: the base value
            db.execute(r#"UPDATE "SHOP_ORDERS" SET "country_code" = 'FR' WHERE "ID" = 'o1'"#);
            let changes = db.changes();
            let moved = changes.last().unwrap();
            assert_eq!(moved.attribute, "country");
            assert_eq!(moved.to_label.as_deref(), Some("France"));
        }
    }
}
