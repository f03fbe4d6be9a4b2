use std::fmt;

use serde::{Deserialize, Serialize};

/// Type class of a tracked value, deciding how it is encoded as text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    String,
    LargeString,
    Boolean,
    Integer,
    Decimal,
    Double,
    Date,
    Time,
    DateTime,
    Timestamp,
    Uuid,
    Binary,
    Association,
    Composition,
    Other,
}

impl ValueType {
    /// Map a declared model type (`cds.String`, `Boolean`, ...) to its type class
    pub fn from_declared(declared: &str) -> Self {
        let short = declared.strip_prefix("cds.").unwrap_or(declared);
        match short {
            "String" => ValueType::String,
            "LargeString" => ValueType::LargeString,
            "Boolean" => ValueType::Boolean,
            "Integer" | "Int16" | "Int32" | "Int64" | "UInt8" | "Integer64" => ValueType::Integer,
            "Decimal" | "DecimalFloat" => ValueType::Decimal,
            "Double" => ValueType::Double,
            "Date" => ValueType::Date,
            "Time" => ValueType::Time,
            "DateTime" => ValueType::DateTime,
            "Timestamp" => ValueType::Timestamp,
            "UUID" => ValueType::Uuid,
            "Binary" | "LargeBinary" => ValueType::Binary,
            "Association" => ValueType::Association,
            "Composition" => ValueType::Composition,
            _ => ValueType::Other,
        }
    }

    pub const fn is_text(self) -> bool {
        matches!(self, ValueType::String | ValueType::LargeString)
    }

    pub const fn is_temporal(self) -> bool {
        matches!(
            self,
            ValueType::Date | ValueType::Time | ValueType::DateTime | ValueType::Timestamp
        )
    }
}

/// How an attribute relates to other entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipKind {
    None,
    Reference,
    /// Composition of one: a lifecycle-bound child record
    OwnedSubrecord,
}

/// Join term of a correlated lookup: `<target>.target_column = <source>.source_column`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Join {
    pub target_column: String,
    pub source_column: String,
}

impl Join {
    pub fn new(target_column: impl Into<String>, source_column: impl Into<String>) -> Self {
        Self {
            target_column: target_column.into(),
            source_column: source_column.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAttribute {
    pub name: String,
    /// Declared model type, stored verbatim as the change row's value type
    pub declared_type: String,
    pub value_type: ValueType,
    pub relationship: RelationshipKind,
    /// Target entity of a reference or owned sub-record
    pub target: Option<String>,
    /// Local columns of a managed association
    pub foreign_key_fields: Vec<String>,
    /// Local source columns of an unmanaged association's ON condition
    pub on_condition_fields: Vec<Join>,
    /// Resolvable label paths, in declared order
    pub label_paths: Vec<String>,
}

impl TrackedAttribute {
    /// Local columns whose old/new values decide whether this attribute changed
    pub fn watched_columns(&self) -> Vec<String> {
        match self.relationship {
            RelationshipKind::None => vec![self.name.clone()],
            _ if !self.foreign_key_fields.is_empty() => self.foreign_key_fields.clone(),
            _ => self
                .on_condition_fields
                .iter()
                .map(|j| j.source_column.clone())
                .collect(),
        }
    }

    pub fn is_relationship(&self) -> bool {
        self.relationship != RelationshipKind::None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectIdField {
    pub path: String,
    /// False when the value must be read back through a correlated lookup
    pub is_locally_stored: bool,
}

/// Ordered field paths forming an entity's human-readable identifier
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectIdentifierSpec {
    pub fields: Vec<ObjectIdField>,
}

impl ObjectIdentifierSpec {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.path.as_str())
    }
}

/// How a composition child reaches its owning root's key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootLink {
    /// Foreign-key columns on the child row
    ForeignKeys { joins: Vec<Join> },
    /// Back-reference association; the key columns are read back by the child's own primary key
    BackReference { field: String, joins: Vec<Join> },
}

impl RootLink {
    /// Joins from root key (target) to child column (source)
    pub fn joins(&self) -> &[Join] {
        match self {
            RootLink::ForeignKeys { joins } | RootLink::BackReference { joins, .. } => joins,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootBinding {
    pub root_entity: String,
    pub link: RootLink,
    /// Root's own object identifier, evaluated against the root row
    pub root_object_id: ObjectIdentifierSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionOfMany {
    /// Composition element on the root
    pub element: String,
    pub target: String,
    pub target_keys: Vec<String>,
    pub object_id: ObjectIdentifierSpec,
    /// How target rows reach the root; `None` when no binding could be determined
    pub root_link: Option<RootLink>,
}

/// Snapshot of one entity's tracking descriptors, derived once per schema load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub name: String,
    /// Originating logical service entity recorded on the header row
    pub service_entity: Option<String>,
    pub primary_key_fields: Vec<String>,
    pub tracked_attributes: Vec<TrackedAttribute>,
    pub object_id: ObjectIdentifierSpec,
    pub compositions_of_many: Vec<CompositionOfMany>,
    pub root_binding: Option<RootBinding>,
}

impl TrackedEntity {
    pub fn attribute(&self, name: &str) -> Option<&TrackedAttribute> {
        self.tracked_attributes.iter().find(|a| a.name == name)
    }
}

/// Non-fatal problem found while resolving the model; the offending field is omitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionWarning {
    pub entity: String,
    pub element: Option<String>,
    pub path: Option<String>,
    pub reason: String,
}

impl ResolutionWarning {
    pub fn new(entity: &str, element: Option<&str>, path: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            entity: entity.to_string(),
            element: element.map(str::to_string),
            path: path.map(str::to_string),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ResolutionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entity)?;
        if let Some(element) = &self.element {
            write!(f, ".{element}")?;
        }
        if let Some(path) = &self.path {
            write!(f, " [{path}]")?;
        }
        write!(f, ": {}", self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_from_declared() {
        assert_eq!(ValueType::from_declared("cds.String"), ValueType::String);
        assert_eq!(ValueType::from_declared("Boolean"), ValueType::Boolean);
        assert_eq!(ValueType::from_declared("cds.Timestamp"), ValueType::Timestamp);
        assert_eq!(ValueType::from_declared("cds.Int64"), ValueType::Integer);
        assert_eq!(ValueType::from_declared("my.Custom"), ValueType::Other);
        assert!(ValueType::LargeString.is_text());
        assert!(ValueType::Date.is_temporal());
        assert!(!ValueType::Uuid.is_temporal());
    }

    #[test]
    fn test_watched_columns() {
        let scalar = TrackedAttribute {
            name: "status".to_string(),
            declared_type: "cds.String".to_string(),
            value_type: ValueType::String,
            relationship: RelationshipKind::None,
            target: None,
            foreign_key_fields: vec![],
            on_condition_fields: vec![],
            label_paths: vec![],
        };
        assert_eq!(scalar.watched_columns(), vec!["status"]);

        let unmanaged = TrackedAttribute {
            name: "author".to_string(),
            relationship: RelationshipKind::Reference,
            on_condition_fields: vec![Join::new("ID", "author_ID")],
            ..scalar
        };
        assert_eq!(unmanaged.watched_columns(), vec!["author_ID"]);
    }

    #[test]
    fn test_warning_display() {
        let w = ResolutionWarning::new("shop.Orders", Some("customer"), Some("customer.nme"), "not found");
        assert_eq!(w.to_string(), "shop.Orders.customer [customer.nme]: not found");
    }
}
