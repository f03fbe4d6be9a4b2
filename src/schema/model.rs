//! Host schema model: the annotated entity/relationship graph
//!
//! This is the input contract supplied by the modeling framework. It is
//! deserialized from JSON and only read here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ChangelogError, ChangelogResult};
use crate::validation::{validate_annotation_path, validate_qualified_name, validate_sql_identifier};

/// Tracking annotation: a boolean marker or an ordered list of field paths
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Annotation {
    Flag(bool),
    Paths(Vec<String>),
}

impl Annotation {
    pub fn is_enabled(&self) -> bool {
        match self {
            Annotation::Flag(enabled) => *enabled,
            Annotation::Paths(_) => true,
        }
    }

    pub fn paths(&self) -> &[String] {
        match self {
            Annotation::Flag(_) => &[],
            Annotation::Paths(paths) => paths,
        }
    }

    /// Human-readable form used in conflict messages
    pub fn describe(&self) -> String {
        match self {
            Annotation::Flag(flag) => flag.to_string(),
            Annotation::Paths(paths) => paths.join(", "),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssociationKind {
    Reference,
    Composition,
}

/// One `target.<target> = $self.<source>` term of an unmanaged association's ON condition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OnCondition {
    pub target: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationDef {
    pub kind: AssociationKind,
    pub target: String,
    #[serde(default)]
    pub many: bool,
    /// Target keys of a managed association; local columns are `<element>_<key>`
    #[serde(default)]
    pub keys: Vec<String>,
    /// ON condition terms of an unmanaged association
    #[serde(default)]
    pub on: Vec<OnCondition>,
}

impl AssociationDef {
    pub fn is_managed(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn is_composition_of_many(&self) -> bool {
        self.kind == AssociationKind::Composition && self.many
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDef {
    pub name: String,
    #[serde(rename = "type", default = "default_type")]
    pub data_type: String,
    #[serde(default)]
    pub key: bool,
    #[serde(rename = "virtual", default)]
    pub is_virtual: bool,
    /// Value is computed by the database or the framework, not supplied by the writer
    #[serde(default)]
    pub computed: bool,
    #[serde(default)]
    pub localized: bool,
    /// Externally supplied sensitive-data classification
    #[serde(default)]
    pub personal_data: bool,
    /// Set on derived foreign-key shadow columns: the association they belong to
    #[serde(default)]
    pub foreign_key_of: Option<String>,
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default)]
    pub association: Option<AssociationDef>,
    #[serde(default)]
    pub changelog: Option<Annotation>,
}

fn default_type() -> String {
    "cds.String".to_string()
}

impl ElementDef {
    /// Element with its own storage column
    pub fn is_physical(&self) -> bool {
        !self.is_virtual && self.association.is_none()
    }

    /// Local columns holding this association's foreign key, in target-key order
    pub fn foreign_key_columns(&self) -> Vec<String> {
        match &self.association {
            Some(assoc) if assoc.is_managed() => assoc
                .keys
                .iter()
                .map(|k| format!("{}_{}", self.name, k.replace('.', "_")))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub elements: Vec<ElementDef>,
    #[serde(default)]
    pub changelog: Option<Annotation>,
    /// Set on service entities projecting a database entity
    #[serde(default)]
    pub projection_of: Option<String>,
    /// Localized counterpart holding translated fields (keys + `locale`)
    #[serde(default)]
    pub texts: Option<String>,
}

impl EntityDef {
    pub fn element(&self, name: &str) -> Option<&ElementDef> {
        self.elements.iter().find(|e| e.name == name)
    }

    pub fn key_elements(&self) -> impl Iterator<Item = &ElementDef> {
        self.elements.iter().filter(|e| e.key)
    }

    pub fn is_projection(&self) -> bool {
        self.projection_of.is_some()
    }

    /// True when the entity or any of its elements carries an enabled annotation
    pub fn has_tracking_annotation(&self) -> bool {
        self.changelog.as_ref().is_some_and(Annotation::is_enabled)
            || self
                .elements
                .iter()
                .any(|e| e.changelog.as_ref().is_some_and(Annotation::is_enabled))
    }
}

/// The global schema map
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaModel {
    #[serde(default)]
    pub entities: BTreeMap<String, EntityDef>,
}

impl SchemaModel {
    /// Parse and validate a JSON schema document
    ///
    /// Entity names default to their map key.
    pub fn from_json_str(json: &str) -> ChangelogResult<Self> {
        let mut model: Self = serde_json::from_str(json)?;
        for (name, entity) in &mut model.entities {
            if entity.name.is_empty() {
                entity.name = name.clone();
            }
        }
        model.validate()?;
        Ok(model)
    }

    /// Build a model from entity definitions (mainly for tests and embedding hosts)
    pub fn from_entities(entities: impl IntoIterator<Item = EntityDef>) -> ChangelogResult<Self> {
        let model = Self {
            entities: entities.into_iter().map(|e| (e.name.clone(), e)).collect(),
        };
        model.validate()?;
        Ok(model)
    }

    pub fn get(&self, name: &str) -> Option<&EntityDef> {
        self.entities.get(name)
    }

    pub fn entity(&self, name: &str) -> ChangelogResult<&EntityDef> {
        self.get(name).ok_or_else(|| ChangelogError::EntityNotFound {
            entity: name.to_string(),
        })
    }

    /// Follow `projectionOf` down to the database entity that owns the table
    pub fn database_entity<'a>(&'a self, entity: &'a EntityDef) -> ChangelogResult<&'a EntityDef> {
        let mut current = entity;
        let mut seen = vec![current.name.as_str()];
        while let Some(base) = &current.projection_of {
            current = self.entity(base)?;
            if seen.contains(&current.name.as_str()) {
                return Err(ChangelogError::InvalidModel {
                    location: entity.name.clone(),
                    reason: format!("projection cycle: {} -> {}", seen.join(" -> "), current.name),
                });
            }
            seen.push(current.name.as_str());
        }
        Ok(current)
    }

    /// All service entities projecting (directly or transitively) onto `db_entity`, by name
    pub fn projections_of(&self, db_entity: &str) -> Vec<&EntityDef> {
        self.entities
            .values()
            .filter(|e| e.is_projection())
            .filter(|e| {
                self.database_entity(e)
                    .map(|db| db.name == db_entity)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Entities with a composition element targeting `child`, with that element
    pub fn composition_parents(&self, child: &str) -> Vec<(&EntityDef, &ElementDef)> {
        let mut parents = Vec::new();
        for entity in self.entities.values().filter(|e| !e.is_projection()) {
            for element in &entity.elements {
                let Some(assoc) = &element.association else { continue };
                if assoc.kind != AssociationKind::Composition {
                    continue;
                }
                let targets_child = self
                    .get(&assoc.target)
                    .and_then(|t| self.database_entity(t).ok())
                    .is_some_and(|t| t.name == child);
                if targets_child {
                    parents.push((entity, element));
                }
            }
        }
        parents
    }

    /// Database entities that carry tracking annotations themselves or through a projection
    pub fn tracked_entity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entities
            .values()
            .filter(|e| e.has_tracking_annotation())
            .filter_map(|e| self.database_entity(e).ok())
            .map(|db| db.name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn validate(&self) -> ChangelogResult<()> {
        for (key, entity) in &self.entities {
            if &entity.name != key {
                return Err(ChangelogError::InvalidModel {
                    location: key.clone(),
                    reason: format!("entity is registered under a different name '{}'", entity.name),
                });
            }
            validate_qualified_name(&entity.name, "entity")?;

            if let Some(base) = &entity.projection_of {
                self.entity(base)?;
            }
            if let Some(texts) = &entity.texts {
                validate_qualified_name(texts, "texts entity")?;
            }

            for element in &entity.elements {
                validate_sql_identifier(&element.name, "element")?;
                if let Some(annotation) = &element.changelog {
                    for path in annotation.paths() {
                        validate_annotation_path(path, "@changelog")?;
                    }
                }
                if let Some(assoc) = &element.association {
                    validate_qualified_name(&assoc.target, "association target")?;
                    for key in &assoc.keys {
                        validate_annotation_path(key, "association key")?;
                    }
                    for cond in &assoc.on {
                        validate_sql_identifier(&cond.target, "ON condition target")?;
                        validate_sql_identifier(&cond.source, "ON condition source")?;
                    }
                }
            }

            if let Some(annotation) = &entity.changelog {
                for path in annotation.paths() {
                    validate_annotation_path(path, "@changelog")?;
                }
            }
        }
        Ok(())
    }
}
