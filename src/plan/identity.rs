//! Identity Resolution Planner
//!
//! Turns annotation field paths into expressions: a path that stays on the
//! written row reads the row; each association hop becomes a correlated lookup
//! keyed by the previous record. Object identifiers join the resolved fragments
//! in declared order.

use tracing::warn;

use super::expr::{Expr, Filter, RowRef};
use crate::encoding::{encode, Encoding};
use crate::schema::model::{EntityDef, SchemaModel};
use crate::schema::path::resolve_path;
use crate::schema::{ObjectIdentifierSpec, ValueType};

/// Where the columns of a record are read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// The trigger row itself
    Row(RowRef),
    /// A record of `entity` located by `filters`
    Keyed { entity: String, filters: Vec<Filter> },
}

impl Source {
    pub fn column(&self, column: &str) -> Expr {
        match self {
            Source::Row(row) => Expr::column(*row, column),
            Source::Keyed { entity, filters } => Expr::Lookup {
                entity: entity.clone(),
                column: column.to_string(),
                filters: filters.clone(),
            },
        }
    }

    /// Same record, read back from `entity`'s table by primary key instead of trusting the row
    pub fn read_back(&self, entity: &str, primary_key: &[String]) -> Source {
        match self {
            Source::Row(row) => Source::Keyed {
                entity: entity.to_string(),
                filters: primary_key
                    .iter()
                    .map(|k| Filter::new(k.clone(), Expr::column(*row, k.clone())))
                    .collect(),
            },
            keyed @ Source::Keyed { .. } => keyed.clone(),
        }
    }
}

/// Encoded text expression for one annotation path starting at `start`
///
/// A localized terminal field prefers the entity's texts counterpart for the
/// session locale and falls back to the base value.
pub fn path_expr(model: &SchemaModel, start: &EntityDef, path: &str, source: &Source) -> Result<Expr, String> {
    let resolved = resolve_path(model, start, path)?;

    let mut current = source.clone();
    for hop in &resolved.hops {
        let filters = hop
            .joins
            .iter()
            .map(|j| Filter::new(j.target_column.clone(), current.column(&j.source_column)))
            .collect();
        current = Source::Keyed {
            entity: hop.entity.clone(),
            filters,
        };
    }

    if let [column] = resolved.columns.as_slice() {
        let mut value = current.column(column);
        if resolved.localized {
            if let Some(texts) = model.get(&resolved.terminal_entity).and_then(|e| e.texts.as_deref()) {
                value = Expr::FirstOf(vec![localized_lookup(model, &resolved.terminal_entity, texts, column, &current), value]);
            }
        }
        return Ok(encode(ValueType::from_declared(&resolved.declared_type), value));
    }

    Ok(Expr::KeyJoin(
        resolved
            .columns
            .iter()
            .map(|c| Expr::encoded(Encoding::Cast(ValueType::Other), current.column(c)))
            .collect(),
    ))
}

fn localized_lookup(model: &SchemaModel, entity: &str, texts: &str, column: &str, current: &Source) -> Expr {
    let mut filters = match current {
        Source::Keyed { filters, .. } => filters.clone(),
        Source::Row(row) => model
            .get(entity)
            .map(|e| {
                e.key_elements()
                    .map(|k| Filter::new(k.name.clone(), Expr::column(*row, k.name.clone())))
                    .collect()
            })
            .unwrap_or_default(),
    };
    filters.push(Filter::new("locale", Expr::Locale));
    Expr::Lookup {
        entity: texts.to_string(),
        column: column.to_string(),
        filters,
    }
}

/// Join the given paths' fragments with `", "`, skipping empties; `None` when no path resolves
pub fn joined_paths<'a>(
    model: &SchemaModel,
    entity: &EntityDef,
    paths: impl IntoIterator<Item = (&'a str, Source)>,
) -> Option<Expr> {
    let fragments: Vec<Expr> = paths
        .into_iter()
        .filter_map(|(path, source)| match path_expr(model, entity, path, &source) {
            Ok(expr) => Some(expr),
            Err(reason) => {
                warn!(entity = %entity.name, path, %reason, "Dropping unresolvable path");
                None
            }
        })
        .collect();
    if fragments.is_empty() {
        return None;
    }
    Some(Expr::encoded(Encoding::Truncated, Expr::JoinNonEmpty(fragments)))
}

/// Object identifier expression for `entity` read through `source`
///
/// Fields that are not locally stored (computed values) are read back from the
/// entity's own table by primary key.
pub fn object_id_expr(
    model: &SchemaModel,
    entity: &EntityDef,
    spec: &ObjectIdentifierSpec,
    primary_key: &[String],
    source: &Source,
) -> Option<Expr> {
    let paths = spec.fields.iter().map(|field| {
        let local_computed = !field.is_locally_stored
            && resolve_path(model, entity, &field.path).is_ok_and(|r| r.is_local());
        let field_source = if local_computed {
            source.read_back(&entity.name, primary_key)
        } else {
            source.clone()
        };
        (field.path.as_str(), field_source)
    });
    joined_paths(model, entity, paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::testing::bookshop;
    use crate::schema::ObjectIdField;

    fn field(path: &str, is_locally_stored: bool) -> ObjectIdField {
        ObjectIdField {
            path: path.to_string(),
            is_locally_stored,
        }
    }

    #[test]
    fn test_local_path() {
        let model = bookshop();
        let orders = model.entity("shop.Orders").unwrap();
        let expr = path_expr(&model, orders, "orderNo", &Source::Row(RowRef::Subject)).unwrap();
        assert_eq!(
            expr,
            Expr::encoded(Encoding::Truncated, Expr::column(RowRef::Subject, "orderNo"))
        );
    }

    #[test]
    fn test_hop_becomes_lookup() {
        let model = bookshop();
        let orders = model.entity("shop.Orders").unwrap();
        let expr = path_expr(&model, orders, "customer.name", &Source::Row(RowRef::New)).unwrap();
        assert_eq!(
            expr,
            Expr::encoded(
                Encoding::Truncated,
                Expr::Lookup {
                    entity: "shop.Customers".to_string(),
                    column: "name".to_string(),
                    filters: vec![Filter::new("ID", Expr::column(RowRef::New, "customer_ID"))],
                }
            )
        );
    }

    #[test]
    fn test_localized_prefers_texts() {
        let model = bookshop();
        let orders = model.entity("shop.Orders").unwrap();
        let expr = path_expr(&model, orders, "country.name", &Source::Row(RowRef::New)).unwrap();
        let Expr::Encoded { inner, .. } = expr else {
            panic!("encoded expected")
        };
        let Expr::FirstOf(alternatives) = *inner else {
            panic!("localized fallback expected")
        };
        assert_eq!(alternatives.len(), 2);
        assert!(matches!(&alternatives[0], Expr::Lookup { entity, filters, .. }
            if entity == "shop.Countries_texts" && filters.last() == Some(&Filter::new("locale", Expr::Locale))));
        assert!(matches!(&alternatives[1], Expr::Lookup { entity, .. } if entity == "shop.Countries"));
    }

    #[test]
    fn test_object_id_preserves_declared_order() {
        let model = bookshop();
        let orders = model.entity("shop.Orders").unwrap();
        let spec = ObjectIdentifierSpec {
            fields: vec![field("customer.country.name", false), field("orderNo", true)],
        };
        let expr = object_id_expr(&model, orders, &spec, &["ID".to_string()], &Source::Row(RowRef::Subject)).unwrap();
        let Expr::Encoded { inner, .. } = expr else {
            panic!("truncation expected")
        };
        let Expr::JoinNonEmpty(parts) = *inner else {
            panic!("join expected")
        };
        assert!(parts[0].has_lookup());
        assert!(!parts[1].has_lookup());
    }

    #[test]
    fn test_computed_field_read_back_by_key() {
        let model = bookshop();
        let orders = model.entity("shop.Orders").unwrap();
        let spec = ObjectIdentifierSpec {
            fields: vec![field("total", false)],
        };
        let expr = object_id_expr(&model, orders, &spec, &["ID".to_string()], &Source::Row(RowRef::New)).unwrap();
        let Expr::Encoded { inner, .. } = expr else {
            panic!("truncation expected")
        };
        let Expr::JoinNonEmpty(parts) = *inner else {
            panic!("join expected")
        };
        assert_eq!(
            parts[0],
            Expr::encoded(
                Encoding::Cast(ValueType::Decimal),
                Expr::Lookup {
                    entity: "shop.Orders".to_string(),
                    column: "total".to_string(),
                    filters: vec![Filter::new("ID", Expr::column(RowRef::New, "ID"))],
                }
            )
        );
    }

    #[test]
    fn test_empty_spec_has_no_expression() {
        let model = bookshop();
        let orders = model.entity("shop.Orders").unwrap();
        let spec = ObjectIdentifierSpec::default();
        assert!(object_id_expr(&model, orders, &spec, &[], &Source::Row(RowRef::New)).is_none());
    }
}
