//! Schema Analysis: from the annotated host model to tracking descriptors
//!
//! - **Model** (`model`): the host framework's entity/relationship graph as JSON
//! - **Path walk** (`path`): hop-by-hop resolution of annotation field paths
//! - **Analyzer** (`analyzer`): one [`TrackedEntity`] snapshot per database entity
//! - **Descriptors** (`types`): the dialect-agnostic output every generator consumes
//!
//! ## Example
//!
//! ```rust
//! use changelog_triggers::config::TrackingConfig;
//! use changelog_triggers::schema::{analyze, SchemaModel};
//!
//! let model = SchemaModel::from_json_str(r#"{"entities": {"Order": {"elements": [
//!     {"name": "ID", "type": "cds.Integer", "key": true},
//!     {"name": "status", "changelog": true}
//! ]}}}"#).unwrap();
//!
//! let analysis = analyze(&model, "Order", &TrackingConfig::default()).unwrap();
//! assert_eq!(analysis.entity.primary_key_fields, vec!["ID"]);
//! assert_eq!(analysis.entity.tracked_attributes[0].name, "status");
//! ```

pub mod analyzer;
pub mod model;
pub mod path;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use analyzer::{analyze, analyze_model, Analysis, ModelAnalysis};
pub use model::{Annotation, AssociationDef, AssociationKind, ElementDef, EntityDef, SchemaModel};
pub use types::{
    CompositionOfMany, Join, ObjectIdField, ObjectIdentifierSpec, RelationshipKind, ResolutionWarning,
    RootBinding, RootLink, TrackedAttribute, TrackedEntity, ValueType,
};
