//! In-memory evaluation of trigger plans
//!
//! Executes a [`TriggerPlan`] against text rows the way a generated trigger
//! does inside the database: same guards, same encodings, same lookups. Used as
//! the reference semantics every dialect rendering must agree with, and by the
//! deployment harness for dry runs.

use std::collections::BTreeMap;

use super::expr::{Cond, Expr, RowRef};
use super::target::{Operation, TriggerPlan};
use crate::encoding::{boolean_text, is_changed, join_key, join_non_empty, truncate_value, Encoding};
use crate::skip::TransactionContext;

/// A row: column name to text value, absent columns are NULL
pub type Row = BTreeMap<String, String>;

/// Build a [`Row`] from `(column, value)` pairs
pub fn row<'a>(values: impl IntoIterator<Item = (&'a str, &'a str)>) -> Row {
    values.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Tables visible to correlated lookups
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: BTreeMap<String, Vec<Row>>,
    locale: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: &str, row: Row) -> &mut Self {
        self.tables.entry(entity.to_string()).or_default().push(row);
        self
    }

    pub fn with_locale(mut self, locale: &str) -> Self {
        self.locale = Some(locale.to_string());
        self
    }

    fn find(&self, entity: &str, filters: &[(String, String)]) -> Option<&Row> {
        self.tables
            .get(entity)?
            .iter()
            .find(|r| filters.iter().all(|(c, v)| r.get(c) == Some(v)))
    }
}

/// One record appended to the fact table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub attribute: String,
    pub value_changed_from: Option<String>,
    pub value_changed_to: Option<String>,
    pub value_changed_from_label: Option<String>,
    pub value_changed_to_label: Option<String>,
    pub entity: String,
    pub entity_key: Option<String>,
    pub root_entity: Option<String>,
    pub root_entity_key: Option<String>,
    pub object_id: Option<String>,
    pub root_object_id: Option<String>,
    pub value_data_type: String,
    pub modification: &'static str,
}

/// Effect of one trigger invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub records: Vec<ChangeRecord>,
    /// `(entity, key)` whose history is removed (cascading delete)
    pub purged: Option<(String, Option<String>)>,
}

struct Env<'a> {
    old: Option<&'a Row>,
    new: Option<&'a Row>,
    record: Option<&'a Row>,
    store: &'a MemoryStore,
    ctx: &'a TransactionContext,
}

impl Env<'_> {
    fn row(&self, row: RowRef) -> Option<&Row> {
        match row {
            RowRef::Old => self.old,
            RowRef::New => self.new,
            RowRef::Record | RowRef::Subject => self.record,
        }
    }

    fn eval(&self, expr: &Expr) -> Option<String> {
        match expr {
            Expr::Null => None,
            Expr::Text(value) => Some(value.clone()),
            Expr::Column { row, column } => self.row(*row)?.get(column).cloned(),
            // locals are bound by the caller before evaluation
            Expr::Var(_) => None,
            Expr::Locale => self.store.locale.clone(),
            Expr::Lookup {
                entity,
                column,
                filters,
            } => {
                let resolved: Option<Vec<(String, String)>> = filters
                    .iter()
                    .map(|f| self.eval(&f.value).map(|v| (f.column.clone(), v)))
                    .collect();
                self.store.find(entity, &resolved?)?.get(column).cloned()
            }
            Expr::KeyJoin(parts) => {
                let values: Vec<Option<String>> = parts.iter().map(|p| self.eval(p)).collect();
                join_key(values.iter().map(Option::as_deref))
            }
            Expr::JoinNonEmpty(parts) => {
                let values: Vec<Option<String>> = parts.iter().map(|p| self.eval(p)).collect();
                join_non_empty(values.iter().map(Option::as_deref))
            }
            Expr::FirstOf(parts) => parts.iter().find_map(|p| self.eval(p)),
            Expr::Encoded { encoding, inner } => {
                let value = self.eval(inner)?;
                match encoding {
                    Encoding::BooleanText => boolean_text(Some(value.as_str())).map(str::to_string),
                    Encoding::Truncated => Some(truncate_value(&value).into_owned()),
                    Encoding::Cast(_) => Some(value),
                }
            }
        }
    }

    fn check(&self, cond: &Cond) -> bool {
        match cond {
            Cond::IsNotNull(expr) => self.eval(expr).is_some(),
            Cond::Changed { old, new } => is_changed(self.eval(old), self.eval(new)),
            Cond::Any(conds) => conds.iter().any(|c| self.check(c)),
            Cond::All(conds) => conds.iter().all(|c| self.check(c)),
            Cond::Not(inner) => !self.check(inner),
            Cond::FlagSet(name) => self.ctx.is_flag_set(name),
        }
    }
}

/// Run `plan`'s trigger for `op` over the `old`/`new` row pair
///
/// `store` must already reflect the write, as it does for an AFTER trigger.
pub fn fire(
    plan: &TriggerPlan,
    op: Operation,
    old: Option<&Row>,
    new: Option<&Row>,
    store: &MemoryStore,
    ctx: &TransactionContext,
) -> Outcome {
    let record = match op.subject() {
        RowRef::Old => old,
        _ => new,
    };
    let env = Env {
        old,
        new,
        record,
        store,
        ctx,
    };

    if !plan.enabled(op) || env.check(&plan.skip_guard()) {
        return Outcome::default();
    }

    let invocation = plan.invocation(RowRef::Record);
    let entity_key = env.eval(&invocation.entity_key);

    if op == Operation::Delete && !plan.records_deletes() {
        return Outcome {
            records: Vec::new(),
            purged: Some((plan.entity.clone(), entity_key)),
        };
    }

    let object_id = env.eval(&invocation.object_id);
    let root_entity_key = env.eval(&invocation.root_key);
    let root_object_id = env.eval(&invocation.root_object_id);

    let records = plan
        .columns
        .iter()
        .filter(|column| env.check(&column.guarded(op)))
        .map(|column| {
            let [from, to, from_label, to_label] = column.transition(op);
            ChangeRecord {
                attribute: column.attribute.clone(),
                value_changed_from: env.eval(&from),
                value_changed_to: env.eval(&to),
                value_changed_from_label: env.eval(&from_label),
                value_changed_to_label: env.eval(&to_label),
                entity: plan.entity.clone(),
                entity_key: entity_key.clone(),
                root_entity: invocation.root_entity.clone(),
                root_entity_key: root_entity_key.clone(),
                object_id: object_id.clone(),
                root_object_id: root_object_id.clone(),
                value_data_type: column.declared_type.clone(),
                modification: op.modification(),
            }
        })
        .collect();

    Outcome { records, purged: None }
}

/// Accumulated fact table of a test or dry run
#[derive(Debug, Clone, Default)]
pub struct History {
    pub records: Vec<ChangeRecord>,
}

impl History {
    pub fn apply(&mut self, outcome: Outcome) {
        if let Some((entity, key)) = outcome.purged {
            self.records.retain(|r| r.entity != entity || r.entity_key != key);
        }
        self.records.extend(outcome.records);
    }

    pub fn for_key(&self, entity: &str, key: &str) -> Vec<&ChangeRecord> {
        self.records
            .iter()
            .filter(|r| r.entity == entity && r.entity_key.as_deref() == Some(key))
            .collect()
    }
}
