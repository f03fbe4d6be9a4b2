//! Annotation path resolution: walks a dotted path hop by hop through the
//! relationship graph.
//!
//! A path either ends on a column of the starting entity (local) or on a column
//! reached through one or more correlated lookups (hops).

use super::model::{ElementDef, EntityDef, SchemaModel};
use super::types::Join;
use crate::config::MAX_PATH_DEPTH;

/// One correlated lookup step: read from `entity` where each join matches the previous record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub entity: String,
    pub joins: Vec<Join>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub path: String,
    pub hops: Vec<Hop>,
    /// Terminal columns on the last record (several when a path ends on a composite FK)
    pub columns: Vec<String>,
    /// Entity holding the terminal columns
    pub terminal_entity: String,
    pub declared_type: String,
    pub localized: bool,
    /// Terminal element is computed and must not be trusted from the written row
    pub computed: bool,
}

impl ResolvedPath {
    /// Resolves to columns of the starting record
    pub fn is_local(&self) -> bool {
        self.hops.is_empty()
    }

    /// Locally stored and not computed: the written row value can be used directly
    pub fn is_locally_stored(&self) -> bool {
        self.is_local() && !self.computed
    }
}

/// Resolve `path` starting at `start` (a database entity)
///
/// A trailing segment that does not resolve is retried as the flattened tail
/// (`a.b` -> `a_b`) against the current record, which covers pre-flattened
/// foreign-key columns. Anything else is reported as a reason string.
pub fn resolve_path(model: &SchemaModel, start: &EntityDef, path: &str) -> Result<ResolvedPath, String> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = start;
    let mut hops: Vec<Hop> = Vec::new();
    let mut i = 0;

    loop {
        let segment = segments[i];
        let is_last = i + 1 == segments.len();
        let tail = segments[i..].join("_");

        let Some(element) = current.element(segment) else {
            return flattened(current, &tail, path, hops)
                .ok_or_else(|| format!("'{segment}' is not an element of {}", current.name));
        };

        let Some(assoc) = &element.association else {
            if is_last {
                if element.is_virtual {
                    return Err(format!("'{segment}' is virtual and has no stored value"));
                }
                return Ok(terminal(current, element, vec![element.name.clone()], path, hops));
            }
            return flattened(current, &tail, path, hops)
                .ok_or_else(|| format!("'{segment}' is not a relationship, cannot follow '{path}'"));
        };

        if is_last {
            let columns = element.foreign_key_columns();
            if columns.is_empty() {
                return Err(format!("unmanaged association '{segment}' has no local value"));
            }
            return Ok(ResolvedPath {
                path: path.to_string(),
                hops,
                columns,
                terminal_entity: current.name.clone(),
                declared_type: "cds.Association".to_string(),
                localized: false,
                computed: false,
            });
        }

        let next = segments[i + 1];
        if i + 2 == segments.len() && assoc.keys.iter().any(|k| k == next) {
            let column = format!("{segment}_{next}");
            if let Some(fk) = current.element(&column) {
                return Ok(terminal(current, fk, vec![column], path, hops));
            }
            return Ok(ResolvedPath {
                path: path.to_string(),
                hops,
                columns: vec![column],
                terminal_entity: current.name.clone(),
                declared_type: "cds.String".to_string(),
                localized: false,
                computed: false,
            });
        }

        if let Some(resolved) = flattened(current, &tail, path, hops.clone()) {
            return Ok(resolved);
        }

        let joins: Vec<Join> = if assoc.is_managed() {
            assoc
                .keys
                .iter()
                .map(|k| Join::new(k.replace('.', "_"), format!("{segment}_{}", k.replace('.', "_"))))
                .collect()
        } else {
            assoc.on.iter().map(|c| Join::new(&c.target, &c.source)).collect()
        };
        if joins.is_empty() {
            return Err(format!("association '{segment}' has neither foreign keys nor ON condition"));
        }

        let target = model
            .get(&assoc.target)
            .ok_or_else(|| format!("target '{}' of '{segment}' is not in the model", assoc.target))?;
        let target = model.database_entity(target).map_err(|e| e.to_string())?;

        hops.push(Hop {
            entity: target.name.clone(),
            joins,
        });
        if hops.len() > MAX_PATH_DEPTH {
            return Err(format!("more than {MAX_PATH_DEPTH} association hops"));
        }

        current = target;
        i += 1;
    }
}

fn terminal(
    entity: &EntityDef,
    element: &ElementDef,
    columns: Vec<String>,
    path: &str,
    hops: Vec<Hop>,
) -> ResolvedPath {
    ResolvedPath {
        path: path.to_string(),
        hops,
        columns,
        terminal_entity: entity.name.clone(),
        declared_type: element.data_type.clone(),
        localized: element.localized,
        computed: element.computed,
    }
}

fn flattened(entity: &EntityDef, tail: &str, path: &str, hops: Vec<Hop>) -> Option<ResolvedPath> {
    entity
        .element(tail)
        .filter(|e| e.is_physical())
        .map(|e| terminal(entity, e, vec![tail.to_string()], path, hops))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::testing::bookshop;

    fn resolve(entity: &str, path: &str) -> Result<ResolvedPath, String> {
        let model = bookshop();
        let start = model.entity(entity).unwrap();
        resolve_path(&model, start, path)
    }

    #[test]
    fn test_local_column() {
        let r = resolve("shop.Orders", "orderNo").unwrap();
        assert!(r.is_local());
        assert!(r.is_locally_stored());
        assert_eq!(r.columns, vec!["orderNo"]);
    }

    #[test]
    fn test_literal_foreign_key_column() {
        let r = resolve("shop.Orders", "customer.ID").unwrap();
        assert!(r.is_local());
        assert_eq!(r.columns, vec!["customer_ID"]);
    }

    #[test]
    fn test_single_hop() {
        let r = resolve("shop.Orders", "customer.name").unwrap();
        assert_eq!(r.hops.len(), 1);
        assert_eq!(r.hops[0].entity, "shop.Customers");
        assert_eq!(r.hops[0].joins, vec![Join::new("ID", "customer_ID")]);
        assert_eq!(r.columns, vec!["name"]);
        assert_eq!(r.terminal_entity, "shop.Customers");
    }

    #[test]
    fn test_multi_hop() {
        let r = resolve("shop.Orders", "customer.country.name").unwrap();
        assert_eq!(r.hops.len(), 2);
        assert_eq!(r.hops[1].entity, "shop.Countries");
        assert_eq!(r.hops[1].joins, vec![Join::new("code", "country_code")]);
        assert!(r.localized);
    }

    #[test]
    fn test_path_ending_on_association() {
        let r = resolve("shop.Orders", "customer").unwrap();
        assert_eq!(r.columns, vec!["customer_ID"]);
        assert_eq!(r.declared_type, "cds.Association");
    }

    #[test]
    fn test_flattened_tail_fallback() {
        // shippingAddress is a structured element stored flattened as shippingAddress_city
        let r = resolve("shop.Orders", "shippingAddress.city").unwrap();
        assert!(r.is_local());
        assert_eq!(r.columns, vec!["shippingAddress_city"]);
    }

    #[test]
    fn test_unresolvable_path() {
        let err = resolve("shop.Orders", "customer.nickname").unwrap_err();
        assert!(err.contains("nickname"));
    }

    #[test]
    fn test_computed_column_not_locally_stored() {
        let r = resolve("shop.Orders", "total").unwrap();
        assert!(r.is_local());
        assert!(!r.is_locally_stored());
    }

    #[test]
    fn test_unmanaged_hop_uses_on_condition() {
        let r = resolve("shop.Orders", "invoice.number").unwrap();
        assert_eq!(r.hops[0].joins, vec![Join::new("order_ID", "ID")]);
    }
}
