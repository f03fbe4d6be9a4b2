//! Schema Analyzer: derives a [`TrackedEntity`] snapshot from the annotated model
//!
//! - **Annotation merging**: a database entity and every projection over it
//!   contribute annotations; incompatible path lists are a hard error
//! - **Attribute filtering**: shadow foreign keys, sensitive, virtual and to-many
//!   elements are never tracked directly
//! - **Path resolution**: label and object-identifier paths that do not resolve are
//!   dropped with a [`ResolutionWarning`]
//! - **Root binding**: composition children are linked back to their owning root

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::model::{Annotation, AssociationKind, ElementDef, EntityDef, SchemaModel};
use super::path::resolve_path;
use super::types::{
    CompositionOfMany, Join, ObjectIdField, ObjectIdentifierSpec, RelationshipKind, ResolutionWarning,
    RootBinding, RootLink, TrackedAttribute, TrackedEntity, ValueType,
};
use crate::config::{TrackingConfig, BACK_REFERENCE_FIELD};
use crate::error::{ChangelogError, ChangelogResult};

/// Analyzer output for one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub entity: TrackedEntity,
    pub warnings: Vec<ResolutionWarning>,
}

/// Analyzer output for a whole model
#[derive(Debug, Default)]
pub struct ModelAnalysis {
    pub entities: Vec<Analysis>,
    /// Entities whose generation was aborted, with the reason
    pub failures: Vec<(String, ChangelogError)>,
}

/// Annotations of one database entity after merging all sources
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct MergedAnnotations {
    entity: Option<Annotation>,
    elements: BTreeMap<String, Annotation>,
    service_entity: Option<String>,
}

/// Analyze every tracked entity of the model
///
/// Per-entity errors are collected into `failures`; only errors that invalidate
/// the whole run are returned.
pub fn analyze_model(model: &SchemaModel, config: &TrackingConfig) -> ChangelogResult<ModelAnalysis> {
    let mut result = ModelAnalysis::default();
    for name in model.tracked_entity_names() {
        match analyze(model, &name, config) {
            Ok(analysis) => result.entities.push(analysis),
            Err(e) if e.is_fatal_for_run() => return Err(e),
            Err(e) => {
                warn!(entity = %name, error = %e, "Skipping entity");
                result.failures.push((name, e));
            }
        }
    }
    Ok(result)
}

/// Analyze one entity (database or service entity name)
pub fn analyze(model: &SchemaModel, name: &str, config: &TrackingConfig) -> ChangelogResult<Analysis> {
    let requested = model.entity(name)?;
    let db = model.database_entity(requested)?;
    let mut warnings = Vec::new();

    let mut merged = merge_annotations(model, db)?;
    if requested.is_projection() {
        merged.service_entity = Some(requested.name.clone());
    }

    let primary_key_fields = primary_key_fields(db, &mut warnings);

    let mut tracked_attributes = Vec::new();
    let mut compositions_of_many = Vec::new();
    for element in &db.elements {
        let Some(annotation) = merged.elements.get(&element.name) else { continue };
        if !annotation.is_enabled() {
            continue;
        }

        if let Some(assoc) = &element.association {
            if assoc.is_composition_of_many() {
                compositions_of_many.push(composition_of_many(model, db, element, annotation, &mut warnings)?);
                continue;
            }
        }

        if let Some(attribute) = tracked_attribute(model, db, element, annotation, &mut warnings) {
            tracked_attributes.push(attribute);
        }
    }

    let object_id = object_identifier(model, db, merged.entity.as_ref(), &mut warnings);

    let root_binding = root_binding(model, db, config, &mut warnings)?;

    if primary_key_fields.is_empty() && (!tracked_attributes.is_empty() || !compositions_of_many.is_empty()) {
        return Err(ChangelogError::InvalidModel {
            location: db.name.clone(),
            reason: "tracked entity has no usable primary key".to_string(),
        });
    }

    for warning in &warnings {
        warn!("{warning}");
    }
    debug!(
        entity = %db.name,
        attributes = tracked_attributes.len(),
        compositions = compositions_of_many.len(),
        object_id = ?object_id.paths().collect::<Vec<_>>(),
        "Analyzed entity"
    );

    Ok(Analysis {
        entity: TrackedEntity {
            name: db.name.clone(),
            service_entity: merged.service_entity,
            primary_key_fields,
            tracked_attributes,
            object_id,
            compositions_of_many,
            root_binding,
        },
        warnings,
    })
}

/// Merge annotations of `db` and of every projection over it
///
/// Sources are visited in a fixed order (database entity first, then projections
/// by name) so the outcome never depends on model iteration.
fn merge_annotations(model: &SchemaModel, db: &EntityDef) -> ChangelogResult<MergedAnnotations> {
    let mut merged = MergedAnnotations::default();
    let mut entity_source: Option<String> = None;
    let mut element_sources: BTreeMap<String, String> = BTreeMap::new();

    let projections = model.projections_of(&db.name);
    let sources = std::iter::once(db).chain(projections.iter().copied());

    for source in sources {
        if let Some(annotation) = &source.changelog {
            merged.entity = Some(merge_one(
                &db.name,
                "<entity>",
                merged.entity.take(),
                entity_source.as_deref(),
                annotation,
                &source.name,
            )?);
            entity_source.get_or_insert_with(|| source.name.clone());
        }

        for element in &source.elements {
            let Some(annotation) = &element.changelog else { continue };
            if db.element(&element.name).is_none() {
                debug!(entity = %db.name, source = %source.name, element = %element.name, "Ignoring annotation on element without storage");
                continue;
            }
            let previous = merged.elements.remove(&element.name);
            let combined = merge_one(
                &db.name,
                &element.name,
                previous,
                element_sources.get(&element.name).map(String::as_str),
                annotation,
                &source.name,
            )?;
            merged.elements.insert(element.name.clone(), combined);
            element_sources
                .entry(element.name.clone())
                .or_insert_with(|| source.name.clone());
        }

        if source.is_projection() && merged.service_entity.is_none() && source.has_tracking_annotation() {
            merged.service_entity = Some(source.name.clone());
        }
    }

    Ok(merged)
}

fn merge_one(
    entity: &str,
    element: &str,
    previous: Option<Annotation>,
    previous_source: Option<&str>,
    next: &Annotation,
    next_source: &str,
) -> ChangelogResult<Annotation> {
    let Some(previous) = previous else {
        return Ok(next.clone());
    };

    match (&previous, next) {
        (Annotation::Flag(a), Annotation::Flag(b)) => Ok(Annotation::Flag(*a || *b)),
        (Annotation::Flag(_), Annotation::Paths(_)) => Ok(next.clone()),
        (Annotation::Paths(_), Annotation::Flag(_)) => Ok(previous),
        (Annotation::Paths(a), Annotation::Paths(b)) if a == b => Ok(previous),
        (Annotation::Paths(_), Annotation::Paths(_)) => Err(ChangelogError::ConflictingAnnotation {
            entity: entity.to_string(),
            element: element.to_string(),
            first_source: previous_source.unwrap_or(entity).to_string(),
            first: previous.describe(),
            second_source: next_source.to_string(),
            second: next.describe(),
        }),
    }
}

/// Primary key columns in declared order; relationship keys flatten into their foreign keys
fn primary_key_fields(db: &EntityDef, warnings: &mut Vec<ResolutionWarning>) -> Vec<String> {
    let mut fields = Vec::new();
    for key in db.key_elements() {
        if key.association.is_some() {
            let columns = key.foreign_key_columns();
            if columns.is_empty() {
                warnings.push(ResolutionWarning::new(
                    &db.name,
                    Some(&key.name),
                    None,
                    "relationship key has no foreign key columns; skipped",
                ));
            }
            fields.extend(columns);
        } else {
            fields.push(key.name.clone());
        }
    }
    fields
}

fn tracked_attribute(
    model: &SchemaModel,
    db: &EntityDef,
    element: &ElementDef,
    annotation: &Annotation,
    warnings: &mut Vec<ResolutionWarning>,
) -> Option<TrackedAttribute> {
    if element.foreign_key_of.is_some() {
        debug!(entity = %db.name, element = %element.name, "Skipping foreign key shadow column");
        return None;
    }
    if element.personal_data {
        warnings.push(ResolutionWarning::new(
            &db.name,
            Some(&element.name),
            None,
            "classified as personal data; never tracked",
        ));
        return None;
    }
    if element.is_virtual {
        warnings.push(ResolutionWarning::new(&db.name, Some(&element.name), None, "virtual element has no stored value"));
        return None;
    }

    let Some(assoc) = &element.association else {
        return Some(TrackedAttribute {
            name: element.name.clone(),
            declared_type: element.data_type.clone(),
            value_type: ValueType::from_declared(&element.data_type),
            relationship: RelationshipKind::None,
            target: None,
            foreign_key_fields: Vec::new(),
            on_condition_fields: Vec::new(),
            label_paths: Vec::new(),
        });
    };

    if assoc.many {
        warnings.push(ResolutionWarning::new(
            &db.name,
            Some(&element.name),
            None,
            "to-many reference has no local value",
        ));
        return None;
    }

    let foreign_key_fields = element.foreign_key_columns();
    let on_condition_fields: Vec<Join> = if foreign_key_fields.is_empty() {
        assoc.on.iter().map(|c| Join::new(&c.target, &c.source)).collect()
    } else {
        Vec::new()
    };
    if foreign_key_fields.is_empty() && on_condition_fields.is_empty() {
        warnings.push(ResolutionWarning::new(
            &db.name,
            Some(&element.name),
            None,
            "association has neither foreign keys nor ON condition",
        ));
        return None;
    }

    let mut label_paths = Vec::new();
    for path in annotation.paths() {
        match resolve_path(model, db, path) {
            Ok(_) => label_paths.push(path.clone()),
            Err(reason) => warnings.push(ResolutionWarning::new(&db.name, Some(&element.name), Some(path), reason)),
        }
    }

    let (relationship, declared_type) = match assoc.kind {
        AssociationKind::Reference => (RelationshipKind::Reference, "cds.Association"),
        AssociationKind::Composition => (RelationshipKind::OwnedSubrecord, "cds.Composition"),
    };

    Some(TrackedAttribute {
        name: element.name.clone(),
        declared_type: declared_type.to_string(),
        value_type: ValueType::from_declared(declared_type),
        relationship,
        target: Some(assoc.target.clone()),
        foreign_key_fields,
        on_condition_fields,
        label_paths,
    })
}

/// Object identifier fields in declared order
fn object_identifier(
    model: &SchemaModel,
    entity: &EntityDef,
    annotation: Option<&Annotation>,
    warnings: &mut Vec<ResolutionWarning>,
) -> ObjectIdentifierSpec {
    let paths = annotation.map(Annotation::paths).unwrap_or_default();
    object_identifier_from_paths(model, entity, paths.iter().map(String::as_str), warnings)
}

fn object_identifier_from_paths<'a>(
    model: &SchemaModel,
    entity: &EntityDef,
    paths: impl Iterator<Item = &'a str>,
    warnings: &mut Vec<ResolutionWarning>,
) -> ObjectIdentifierSpec {
    let mut fields = Vec::new();
    for path in paths {
        match resolve_path(model, entity, path) {
            Ok(resolved) => fields.push(ObjectIdField {
                path: path.to_string(),
                is_locally_stored: resolved.is_locally_stored(),
            }),
            Err(reason) => warnings.push(ResolutionWarning::new(&entity.name, None, Some(path), reason)),
        }
    }
    ObjectIdentifierSpec { fields }
}

/// Descriptor for an annotated composition of many
///
/// Paths on the composition element are relative to the root (`items.product`);
/// the leading element segment is stripped and the rest resolved on the target.
/// Without such paths the target's own entity-level identifier is used.
fn composition_of_many(
    model: &SchemaModel,
    root: &EntityDef,
    element: &ElementDef,
    annotation: &Annotation,
    warnings: &mut Vec<ResolutionWarning>,
) -> ChangelogResult<CompositionOfMany> {
    let Some(assoc) = &element.association else {
        return Err(crate::internal_error!("composition element '{}' without association", element.name));
    };
    let target = model.database_entity(model.entity(&assoc.target)?)?;

    let prefix = format!("{}.", element.name);
    let mut relative: Vec<&str> = Vec::new();
    for path in annotation.paths() {
        match path.strip_prefix(&prefix) {
            Some(rest) => relative.push(rest),
            None => warnings.push(ResolutionWarning::new(
                &root.name,
                Some(&element.name),
                Some(path),
                "composition path must start with the composition element",
            )),
        }
    }

    let object_id = if relative.is_empty() {
        let target_annotation = merge_annotations(model, target)?.entity;
        object_identifier(model, target, target_annotation.as_ref(), warnings)
    } else {
        object_identifier_from_paths(model, target, relative.into_iter(), warnings)
    };

    let root_link = root_link(target, root);
    if root_link.is_none() {
        warnings.push(ResolutionWarning::new(
            &root.name,
            Some(&element.name),
            None,
            format!("no link from {} back to {}", target.name, root.name),
        ));
    }

    let mut key_warnings = Vec::new();
    let target_keys = primary_key_fields(target, &mut key_warnings);
    warnings.extend(key_warnings);

    Ok(CompositionOfMany {
        element: element.name.clone(),
        target: target.name.clone(),
        target_keys,
        object_id,
        root_link,
    })
}

/// How rows of `child` reach `root`
///
/// A managed association to the root is preferred. Otherwise the conventional
/// back-reference element is used through its ON condition.
fn root_link(child: &EntityDef, root: &EntityDef) -> Option<RootLink> {
    let targets_root = |e: &&ElementDef| {
        e.association
            .as_ref()
            .is_some_and(|a| a.kind == AssociationKind::Reference && !a.many && a.target == root.name)
    };

    if let Some(element) = child
        .elements
        .iter()
        .filter(targets_root)
        .find(|e| !e.foreign_key_columns().is_empty())
    {
        let joins = element
            .association
            .iter()
            .flat_map(|a| a.keys.iter())
            .zip(element.foreign_key_columns())
            .map(|(key, column)| Join::new(key.replace('.', "_"), column))
            .collect();
        return Some(RootLink::ForeignKeys { joins });
    }

    let back_reference = child.element(BACK_REFERENCE_FIELD)?;
    let joins: Vec<Join> = back_reference
        .association
        .iter()
        .flat_map(|a| a.on.iter())
        .map(|c| Join::new(&c.target, &c.source))
        .collect();
    if joins.is_empty() {
        return None;
    }
    Some(RootLink::BackReference {
        field: back_reference.name.clone(),
        joins,
    })
}

fn root_binding(
    model: &SchemaModel,
    db: &EntityDef,
    config: &TrackingConfig,
    warnings: &mut Vec<ResolutionWarning>,
) -> ChangelogResult<Option<RootBinding>> {
    let parents = model.composition_parents(&db.name);
    let Some((root, _)) = parents.first() else {
        return Ok(None);
    };

    let Some(link) = root_link(db, root) else {
        if config.strict_root_binding {
            return Err(ChangelogError::MissingRootBinding {
                entity: db.name.clone(),
                root: root.name.clone(),
            });
        }
        warnings.push(ResolutionWarning::new(
            &db.name,
            None,
            None,
            format!("no root binding to {}; root columns omitted", root.name),
        ));
        return Ok(None);
    };

    let root_annotation = merge_annotations(model, root)?.entity;
    let root_object_id = object_identifier(model, root, root_annotation.as_ref(), warnings);

    Ok(Some(RootBinding {
        root_entity: root.name.clone(),
        link,
        root_object_id,
    }))
}
