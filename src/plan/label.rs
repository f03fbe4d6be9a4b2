//! Label Resolution Planner
//!
//! A reference attribute annotated with target field paths (`customer.name`)
//! records a human-readable label next to the raw key. Several paths join like
//! object identifier fragments; localized target fields prefer their
//! translation and fall back to the base value.

use super::expr::Expr;
use super::identity::{joined_paths, Source};
use crate::schema::model::{EntityDef, SchemaModel};
use crate::schema::TrackedAttribute;

/// Label expression for `attribute`, `None` without label paths
pub fn label_expr(
    model: &SchemaModel,
    entity: &EntityDef,
    attribute: &TrackedAttribute,
    source: &Source,
) -> Option<Expr> {
    if attribute.label_paths.is_empty() {
        return None;
    }
    joined_paths(
        model,
        entity,
        attribute.label_paths.iter().map(|p| (p.as_str(), source.clone())),
    )
}
