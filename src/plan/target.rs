//! Trigger plans: everything a generator needs for one trigger set
//!
//! A [`TriggerPlan`] is dialect-neutral. Its expressions read the
//! [`RowRef::Subject`] placeholder, bound to `OLD`/`NEW` per operation (or to
//! the operation's record variable for values computed once per invocation).
//!
//! An entity yields one plan for its own tracked attributes plus one smaller
//! plan per composition of many, scoped to the composition target's table.

use tracing::debug;

use super::expr::{Cond, Expr, Filter, RowRef};
use super::identity::{object_id_expr, Source};
use super::label::label_expr;
use crate::config::{DeleteMode, TrackingConfig};
use crate::encoding::{column_changed, encode, encode_key, Encoding};
use crate::error::ChangelogResult;
use crate::schema::model::{EntityDef, SchemaModel};
use crate::schema::{
    CompositionOfMany, ObjectIdentifierSpec, RootLink, TrackedAttribute, TrackedEntity, ValueType,
};
use crate::skip::SkipFlag;

/// Columns of the fact table, in insert order
pub const CHANGES_COLUMNS: [&str; 18] = [
    "ID",
    "attribute",
    "valueChangedFrom",
    "valueChangedTo",
    "valueChangedFromLabel",
    "valueChangedToLabel",
    "entity",
    "entityKey",
    "rootEntity",
    "rootEntityKey",
    "objectID",
    "rootObjectID",
    "valueDataType",
    "modification",
    "createdAt",
    "createdBy",
    "transactionID",
    "changeLog_ID",
];

/// Columns of the header table, in insert order
pub const CHANGELOG_COLUMNS: [&str; 6] = ["ID", "entity", "entityKey", "serviceEntity", "createdAt", "createdBy"];

/// Declared type recorded for composition-of-many changes
pub const COMPOSITION_TYPE: &str = "cds.Composition";

/// Row-level operation a trigger fires on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Create, Operation::Update, Operation::Delete];

    /// Value stored in the `modification` column
    pub const fn modification(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Trigger event keyword
    pub const fn event(self) -> &'static str {
        match self {
            Operation::Create => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }

    /// Trigger name suffix
    pub const fn suffix(self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }

    /// Row the operation's identity is read from
    pub const fn subject(self) -> RowRef {
        match self {
            Operation::Create | Operation::Update => RowRef::New,
            Operation::Delete => RowRef::Old,
        }
    }
}

/// One tracked column of a trigger set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPlan {
    pub attribute: String,
    pub declared_type: String,
    /// Row columns compared on update; empty compares the encoded values instead
    pub watched: Vec<String>,
    /// Encoded value (raw key for references)
    pub value: Expr,
    pub label: Option<Expr>,
    pub skip_flag: String,
}

impl ColumnPlan {
    pub fn old_value(&self) -> Expr {
        self.value.bind(RowRef::Old)
    }

    pub fn new_value(&self) -> Expr {
        self.value.bind(RowRef::New)
    }

    pub fn old_label(&self) -> Option<Expr> {
        self.label.as_ref().map(|l| l.bind(RowRef::Old))
    }

    pub fn new_label(&self) -> Option<Expr> {
        self.label.as_ref().map(|l| l.bind(RowRef::New))
    }

    /// Whether `op` produces a record for this column
    pub fn condition(&self, op: Operation) -> Cond {
        match op {
            Operation::Create => not_null(self.new_value()),
            Operation::Delete => not_null(self.old_value()),
            Operation::Update if self.watched.is_empty() => Cond::changed(self.old_value(), self.new_value()),
            Operation::Update => Cond::any(self.watched.iter().map(|c| column_changed(c)).collect()),
        }
    }

    /// [`condition`](Self::condition) unless the attribute's skip flag is set
    pub fn guarded(&self, op: Operation) -> Cond {
        Cond::all(vec![
            self.condition(op),
            Cond::negate(Cond::FlagSet(self.skip_flag.clone())),
        ])
    }

    /// Values written to (from, to, from label, to label)
    pub fn transition(&self, op: Operation) -> [Expr; 4] {
        let label_or_null = |l: Option<Expr>| l.unwrap_or(Expr::Null);
        match op {
            Operation::Create => [Expr::Null, self.new_value(), Expr::Null, label_or_null(self.new_label())],
            Operation::Update => [
                self.old_value(),
                self.new_value(),
                label_or_null(self.old_label()),
                label_or_null(self.new_label()),
            ],
            Operation::Delete => [self.old_value(), Expr::Null, label_or_null(self.old_label()), Expr::Null],
        }
    }
}

/// `expr IS NOT NULL`, tested on the row columns directly when encodings preserve nullness
fn not_null(expr: Expr) -> Cond {
    let columns: Option<Vec<Cond>> = expr.null_columns().map(|columns| {
        columns
            .into_iter()
            .map(|(row, column)| Cond::IsNotNull(Expr::column(row, column)))
            .collect()
    });
    match columns {
        Some(columns) => Cond::all(columns),
        None => Cond::IsNotNull(expr),
    }
}

/// Owning root of a composition child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootPlan {
    pub entity: String,
    pub key: Expr,
    pub object_id: Option<Expr>,
}

/// Local variable names of per-invocation values
pub const ENTITY_KEY: &str = "entity_key";
pub const OBJECT_ID: &str = "object_id";
pub const ROOT_KEY: &str = "root_key";
pub const ROOT_OBJECT_ID: &str = "root_object_id";

/// Values computed once per trigger invocation, bound to one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub entity_key: Expr,
    pub object_id: Expr,
    pub root_entity: Option<String>,
    pub root_key: Expr,
    pub root_object_id: Expr,
}

impl Invocation {
    /// `(variable, expression)` pairs in evaluation order
    pub fn values(&self) -> [(&'static str, &Expr); 4] {
        [
            (ENTITY_KEY, &self.entity_key),
            (OBJECT_ID, &self.object_id),
            (ROOT_KEY, &self.root_key),
            (ROOT_OBJECT_ID, &self.root_object_id),
        ]
    }

    /// The same values read back from locals named after [`values`](Self::values); NULLs stay literal
    pub fn to_vars(&self) -> Invocation {
        let local = |name: &str, expr: &Expr| {
            if *expr == Expr::Null {
                Expr::Null
            } else {
                Expr::var(name)
            }
        };
        Invocation {
            entity_key: local(ENTITY_KEY, &self.entity_key),
            object_id: local(OBJECT_ID, &self.object_id),
            root_entity: self.root_entity.clone(),
            root_key: local(ROOT_KEY, &self.root_key),
            root_object_id: local(ROOT_OBJECT_ID, &self.root_object_id),
        }
    }
}

/// Dialect-neutral plan of one trigger set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerPlan {
    /// Entity whose table carries the triggers
    pub entity: String,
    /// Composition element for a composition-of-many set, `None` for the entity's own set
    pub set_name: Option<String>,
    pub service_entity: Option<String>,
    pub primary_key: Vec<String>,
    pub key: Expr,
    pub object_id: Option<Expr>,
    pub root: Option<RootPlan>,
    pub columns: Vec<ColumnPlan>,
    pub operations: Vec<Operation>,
    pub delete_mode: DeleteMode,
    /// Flags suppressing the whole set
    pub skip_flags: Vec<String>,
    pub changes_table: String,
    pub change_log_table: String,
}

impl TriggerPlan {
    pub fn enabled(&self, op: Operation) -> bool {
        self.operations.contains(&op)
    }

    /// True when any of the set's skip flags is set
    pub fn skip_guard(&self) -> Cond {
        Cond::any(self.skip_flags.iter().map(|f| Cond::FlagSet(f.clone())).collect())
    }

    /// Whether a delete appends transition records
    pub fn records_deletes(&self) -> bool {
        self.delete_mode == DeleteMode::Preserve
    }

    /// True when `op` records at least one column
    pub fn any_change(&self, op: Operation) -> Cond {
        Cond::any(self.columns.iter().map(|c| c.guarded(op)).collect())
    }

    /// Per-invocation values read from `row`
    pub fn invocation(&self, row: RowRef) -> Invocation {
        let or_null = |e: Option<&Expr>| e.map_or(Expr::Null, |e| e.bind(row));
        Invocation {
            entity_key: self.key.bind(row),
            object_id: or_null(self.object_id.as_ref()),
            root_entity: self.root.as_ref().map(|r| r.entity.clone()),
            root_key: or_null(self.root.as_ref().map(|r| &r.key)),
            root_object_id: or_null(self.root.as_ref().and_then(|r| r.object_id.as_ref())),
        }
    }

    /// Stem shared by every artifact of this set (`shop.Orders` + `items` -> `shop_Orders_CT_items`)
    pub fn artifact_stem(&self) -> String {
        let table = self.entity.replace('.', "_");
        match &self.set_name {
            Some(set) => format!("{table}_CT_{set}"),
            None => format!("{table}_CT"),
        }
    }
}

fn enabled_operations(config: &TrackingConfig) -> Vec<Operation> {
    Operation::ALL
        .into_iter()
        .filter(|op| match op {
            Operation::Create => !config.disable_create_tracking,
            Operation::Update => !config.disable_update_tracking,
            Operation::Delete => !config.disable_delete_tracking,
        })
        .collect()
}

fn column_plan(model: &SchemaModel, entity: &EntityDef, attribute: &TrackedAttribute) -> ColumnPlan {
    let watched = attribute.watched_columns();
    let value = if attribute.is_relationship() {
        encode_key(&watched, RowRef::Subject)
    } else {
        encode(attribute.value_type, Expr::column(RowRef::Subject, attribute.name.clone()))
    };
    ColumnPlan {
        attribute: attribute.name.clone(),
        declared_type: attribute.declared_type.clone(),
        watched,
        value,
        label: label_expr(model, entity, attribute, &Source::Row(RowRef::Subject)),
        skip_flag: SkipFlag::attribute(&entity.name, &attribute.name).name(),
    }
}

/// Root key and identifier of a child of `root_entity`, read from the child row
fn root_plan(
    model: &SchemaModel,
    child: &str,
    child_key: &[String],
    root_entity: &str,
    link: &RootLink,
    root_object_id: &ObjectIdentifierSpec,
) -> ChangelogResult<RootPlan> {
    let root = model.entity(root_entity)?;
    let child_source = match link {
        RootLink::ForeignKeys { .. } => Source::Row(RowRef::Subject),
        RootLink::BackReference { .. } => Source::Row(RowRef::Subject).read_back(child, child_key),
    };

    let mut parts: Vec<Expr> = link
        .joins()
        .iter()
        .map(|j| Expr::encoded(Encoding::Cast(ValueType::Other), child_source.column(&j.source_column)))
        .collect();
    let key = if parts.len() == 1 { parts.remove(0) } else { Expr::KeyJoin(parts) };

    let root_source = Source::Keyed {
        entity: root.name.clone(),
        filters: link
            .joins()
            .iter()
            .map(|j| Filter::new(j.target_column.clone(), child_source.column(&j.source_column)))
            .collect(),
    };
    let root_key: Vec<String> = link.joins().iter().map(|j| j.target_column.clone()).collect();

    Ok(RootPlan {
        entity: root.name.clone(),
        key,
        object_id: object_id_expr(model, root, root_object_id, &root_key, &root_source),
    })
}

fn base_flags(entity: &str) -> Vec<String> {
    vec![SkipFlag::All.name(), SkipFlag::entity(entity).name()]
}

/// Plan of the entity's own trigger set; `None` without tracked attributes
pub fn plan_entity(
    model: &SchemaModel,
    tracked: &TrackedEntity,
    config: &TrackingConfig,
) -> ChangelogResult<Option<TriggerPlan>> {
    if tracked.tracked_attributes.is_empty() {
        return Ok(None);
    }
    let entity = model.entity(&tracked.name)?;
    let pk = &tracked.primary_key_fields;

    let root = match &tracked.root_binding {
        Some(binding) => Some(root_plan(
            model,
            &tracked.name,
            pk,
            &binding.root_entity,
            &binding.link,
            &binding.root_object_id,
        )?),
        None => None,
    };

    let plan = TriggerPlan {
        entity: tracked.name.clone(),
        set_name: None,
        service_entity: tracked.service_entity.clone(),
        primary_key: pk.clone(),
        key: encode_key(pk, RowRef::Subject),
        object_id: object_id_expr(model, entity, &tracked.object_id, pk, &Source::Row(RowRef::Subject)),
        root,
        columns: tracked
            .tracked_attributes
            .iter()
            .map(|a| column_plan(model, entity, a))
            .collect(),
        operations: enabled_operations(config),
        delete_mode: config.delete_mode(),
        skip_flags: base_flags(&tracked.name),
        changes_table: config.changes_table.clone(),
        change_log_table: config.change_log_table.clone(),
    };
    debug!(entity = %plan.entity, columns = plan.columns.len(), rooted = plan.root.is_some(), "Planned trigger set");
    Ok(Some(plan))
}

fn composition_plan(
    model: &SchemaModel,
    tracked: &TrackedEntity,
    composition: &CompositionOfMany,
    config: &TrackingConfig,
) -> ChangelogResult<TriggerPlan> {
    let target = model.entity(&composition.target)?;
    let keys = &composition.target_keys;
    let object_id = object_id_expr(model, target, &composition.object_id, keys, &Source::Row(RowRef::Subject));
    let value = object_id.clone().unwrap_or_else(|| encode_key(keys, RowRef::Subject));

    let root = match &composition.root_link {
        Some(link) => Some(root_plan(model, &target.name, keys, &tracked.name, link, &tracked.object_id)?),
        None => None,
    };

    let mut skip_flags = base_flags(&tracked.name);
    skip_flags.push(SkipFlag::entity(&target.name).name());

    Ok(TriggerPlan {
        entity: target.name.clone(),
        set_name: Some(composition.element.clone()),
        service_entity: tracked.service_entity.clone(),
        primary_key: keys.clone(),
        key: encode_key(keys, RowRef::Subject),
        object_id,
        root,
        columns: vec![ColumnPlan {
            attribute: composition.element.clone(),
            declared_type: COMPOSITION_TYPE.to_string(),
            watched: Vec::new(),
            value,
            label: None,
            skip_flag: SkipFlag::attribute(&tracked.name, &composition.element).name(),
        }],
        operations: enabled_operations(config),
        delete_mode: config.delete_mode(),
        skip_flags,
        changes_table: config.changes_table.clone(),
        change_log_table: config.change_log_table.clone(),
    })
}

/// One plan per composition of many, on the target's table
pub fn plan_compositions(
    model: &SchemaModel,
    tracked: &TrackedEntity,
    config: &TrackingConfig,
) -> ChangelogResult<Vec<TriggerPlan>> {
    tracked
        .compositions_of_many
        .iter()
        .map(|c| composition_plan(model, tracked, c, config))
        .collect()
}

/// The entity's own set followed by its composition sets
pub fn plan_all(model: &SchemaModel, tracked: &TrackedEntity, config: &TrackingConfig) -> ChangelogResult<Vec<TriggerPlan>> {
    let mut plans: Vec<TriggerPlan> = plan_entity(model, tracked, config)?.into_iter().collect();
    plans.extend(plan_compositions(model, tracked, config)?);
    Ok(plans)
}
