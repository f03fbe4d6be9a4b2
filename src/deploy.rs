//! Deployment collaborator interface
//!
//! Generation never touches a database. This module gives a deployment harness
//! what it needs to install the generated text:
//!
//! - [`RegenerationManifest`]: fingerprints of the tracked-entity snapshots a
//!   deployment was generated from, to find entities needing regeneration
//! - [`catalog_query`] / [`drop_statements`]: previous artifacts are found and
//!   dropped by the `_CT_` name infix, never altered in place
//! - [`DeploymentPlan`] + [`Executor`]: drops, then creates, aborting on the
//!   first failing statement

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::TrackingConfig;
use crate::dialect::Dialect;
use crate::error::{ChangelogError, ChangelogResult};
use crate::generator::{Backend, GeneratedTrigger, TriggerGenerator};
use crate::schema::TrackedEntity;

/// Infix shared by every generated artifact name (`ORDER_CT_CREATE`, `order_ct_trigger`)
pub const ARTIFACT_INFIX: &str = "_CT_";

pub const MANIFEST_VERSION: u32 = 1;

/// Hex SHA-256 of the bincode encoding of `value`
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> ChangelogResult<String> {
    let bytes = bincode::serialize(value)?;
    Ok(Sha256::digest(bytes).iter().map(|b| format!("{b:02x}")).collect())
}

/// Snapshot fingerprints of one generation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenerationManifest {
    /// Schema version for forward compatibility
    pub version: u32,
    pub backend: Backend,
    pub generated_at: DateTime<Utc>,
    pub config_fingerprint: String,
    /// Entity name -> fingerprint of its `TrackedEntity`
    pub entities: BTreeMap<String, String>,
}

impl RegenerationManifest {
    pub fn build<'a>(
        backend: Backend,
        entities: impl IntoIterator<Item = &'a TrackedEntity>,
        config: &TrackingConfig,
    ) -> ChangelogResult<Self> {
        let mut fingerprints = BTreeMap::new();
        for entity in entities {
            fingerprints.insert(entity.name.clone(), fingerprint(entity)?);
        }
        Ok(Self {
            version: MANIFEST_VERSION,
            backend,
            generated_at: Utc::now(),
            config_fingerprint: fingerprint(config)?,
            entities: fingerprints,
        })
    }

    /// Whether every entity must be regenerated regardless of its own fingerprint
    fn invalidates_all(&self, previous: &Self) -> bool {
        self.version != previous.version
            || self.backend != previous.backend
            || self.config_fingerprint != previous.config_fingerprint
    }

    /// Entities that are new or whose snapshot changed since `previous`
    ///
    /// Without a previous manifest, or after a backend or configuration change,
    /// every entity is stale.
    pub fn stale_entities(&self, previous: Option<&Self>) -> Vec<&str> {
        let stale: Vec<&str> = match previous {
            Some(previous) if !self.invalidates_all(previous) => self
                .entities
                .iter()
                .filter(|(name, fp)| previous.entities.get(*name) != Some(*fp))
                .map(|(name, _)| name.as_str())
                .collect(),
            _ => self.entities.keys().map(String::as_str).collect(),
        };
        debug!(stale = stale.len(), total = self.entities.len(), "Compared manifests");
        stale
    }

    /// Entities of `previous` that are no longer tracked
    pub fn removed_entities<'a>(&self, previous: &'a Self) -> Vec<&'a str> {
        previous
            .entities
            .keys()
            .filter(|name| !self.entities.contains_key(*name))
            .map(String::as_str)
            .collect()
    }

    /// Gzip-compressed JSON
    pub fn to_compressed_json(&self) -> ChangelogResult<Vec<u8>> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let json = serde_json::to_vec(self)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        Ok(encoder.finish()?)
    }

    pub fn from_compressed_json(data: &[u8]) -> ChangelogResult<Self> {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let mut json = Vec::new();
        GzDecoder::new(data).read_to_end(&mut json)?;
        Ok(serde_json::from_slice(&json)?)
    }

    pub fn to_binary(&self) -> ChangelogResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_binary(data: &[u8]) -> ChangelogResult<Self> {
        Ok(bincode::deserialize(data)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> ChangelogResult<()> {
        fs::write(path.as_ref(), self.to_compressed_json()?)?;
        info!(path = %path.as_ref().display(), entities = self.entities.len(), "Saved regeneration manifest");
        Ok(())
    }

    /// Load a manifest saved with [`save`](Self::save); a missing file yields `None`
    pub fn load(path: impl AsRef<Path>) -> ChangelogResult<Option<Self>> {
        match fs::read(path.as_ref()) {
            Ok(data) => Self::from_compressed_json(&data).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Whether `name` follows the generated artifact naming scheme
pub fn is_generated_artifact(name: &str) -> bool {
    name.to_ascii_uppercase().contains(ARTIFACT_INFIX)
}

/// Table name as stored in the database catalog
fn catalog_table(d: &dyn Dialect, entity: &str) -> String {
    if d.quoted_identifiers() {
        entity.to_string()
    } else {
        d.table_stem(entity)
    }
}

/// Query listing the generated triggers currently attached to `entity`'s table
pub fn catalog_query(generator: &dyn TriggerGenerator, entity: &str) -> String {
    let d = generator.dialect();
    let table = d.string_literal(&catalog_table(d, entity));
    match generator.backend() {
        Backend::Sqlite => format!(
            r"SELECT name FROM sqlite_master WHERE type = 'trigger' AND tbl_name = {table} AND name LIKE '%\_CT\_%' ESCAPE '\'"
        ),
        Backend::Hana => format!(
            r"SELECT TRIGGER_NAME FROM SYS.TRIGGERS WHERE SUBJECT_TABLE_NAME = {table} AND TRIGGER_NAME LIKE '%\_CT\_%' ESCAPE '\'"
        ),
        Backend::H2 => format!(
            r"SELECT TRIGGER_NAME FROM INFORMATION_SCHEMA.TRIGGERS WHERE EVENT_OBJECT_TABLE = {table} AND TRIGGER_NAME LIKE '%\_CT\_%' ESCAPE '\'"
        ),
        Backend::Postgres => format!(
            r"SELECT tgname FROM pg_trigger WHERE tgrelid = {}::regclass AND NOT tgisinternal AND tgname ILIKE '%\_ct\_%'",
            d.string_literal(&d.table_name(entity))
        ),
    }
}

/// Drop statements for the generated triggers in `existing`; other names are left alone
///
/// PostgreSQL also drops each trigger's function.
pub fn drop_statements(generator: &dyn TriggerGenerator, entity: &str, existing: &[String]) -> Vec<String> {
    let d = generator.dialect();
    let mut statements = Vec::new();
    for name in existing {
        if !is_generated_artifact(name) {
            warn!(trigger = %name, entity = %entity, "Leaving trigger without the generated name infix");
            continue;
        }
        match generator.backend() {
            Backend::Postgres => {
                statements.push(format!(
                    "DROP TRIGGER IF EXISTS {} ON {}",
                    d.quote_ident(name),
                    d.table_name(entity)
                ));
                if let Some(stem) = name.strip_suffix("_trigger") {
                    statements.push(format!("DROP FUNCTION IF EXISTS {}()", d.quote_ident(&format!("{stem}_func"))));
                }
            }
            Backend::Hana => statements.push(format!("DROP TRIGGER {}", d.quote_ident(name))),
            Backend::Sqlite | Backend::H2 => statements.push(format!("DROP TRIGGER IF EXISTS {}", d.quote_ident(name))),
        }
    }
    statements
}

/// One statement of a deployment, labeled with the artifact it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub artifact: String,
    pub sql: String,
}

/// Runs deployment statements against a live connection
pub trait Executor {
    fn execute(&mut self, sql: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Drops followed by creates
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub backend: Backend,
    pub drops: Vec<Statement>,
    pub creates: Vec<GeneratedTrigger>,
}

impl DeploymentPlan {
    /// Plan replacing the triggers of every entity `artifacts` attach to
    ///
    /// `existing` maps entity names to the trigger names the catalog currently
    /// lists for their tables (see [`catalog_query`]). Every generated trigger
    /// it lists is dropped, including those of entities that no longer produce
    /// artifacts (untracked or disabled entities).
    pub fn build(
        generator: &dyn TriggerGenerator,
        artifacts: Vec<GeneratedTrigger>,
        existing: &BTreeMap<String, Vec<String>>,
    ) -> Self {
        let entities: BTreeSet<&str> = artifacts
            .iter()
            .filter_map(|a| a.entity.as_deref())
            .chain(existing.keys().map(String::as_str))
            .collect();
        let drops = entities
            .iter()
            .flat_map(|entity| {
                let names = existing.get(*entity).map_or(&[][..], Vec::as_slice);
                drop_statements(generator, entity, names)
                    .into_iter()
                    .map(move |sql| Statement {
                        artifact: (*entity).to_string(),
                        sql,
                    })
            })
            .collect();
        Self {
            backend: generator.backend(),
            drops,
            creates: artifacts,
        }
    }

    /// Statements executed over a connection, in order
    pub fn statements(&self) -> Vec<Statement> {
        let creates = self.creates.iter().filter(|a| a.artifact_kind.is_executable()).map(|a| Statement {
            artifact: a.trigger_name.clone(),
            sql: a.source_text.clone(),
        });
        self.drops.iter().cloned().chain(creates).collect()
    }

    /// Artifacts deployed as design-time files: `(file name, content)`
    pub fn files(&self) -> Vec<(String, &str)> {
        self.creates
            .iter()
            .filter(|a| !a.artifact_kind.is_executable())
            .map(|a| (a.file_name(), a.source_text.as_str()))
            .collect()
    }

    /// Execute every statement in order; the first failure aborts the run
    pub fn execute(&self, executor: &mut dyn Executor) -> ChangelogResult<usize> {
        let statements = self.statements();
        for statement in &statements {
            executor
                .execute(&statement.sql)
                .map_err(|e| ChangelogError::DeploymentFailed {
                    artifact: statement.artifact.clone(),
                    reason: e.to_string(),
                })?;
        }
        info!(
            backend = %self.backend,
            dropped = self.drops.len(),
            executed = statements.len(),
            "Deployed changelog triggers"
        );
        Ok(statements.len())
    }
}
