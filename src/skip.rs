//! Skip-Control Protocol
//!
//! An in-process writer that already logs a change itself suppresses the
//! trigger-side record by setting a skip flag for the affected scope:
//!
//! - **Global**: `changelog.skip`
//! - **Entity**: `changelog.skip_entity_<entity>`
//! - **Attribute**: `changelog.skip_element_<entity>__<attribute>`
//!
//! Scope names are folded with [`fold_scope`], so distinct scopes never share a flag.
//!
//! Trigger bodies read the flags from session context. Session state outlives
//! the transaction on pooled connections, so every applied flag must be reset.
//! [`TransactionContext`] carries the flags explicitly through the caller and
//! only turns them into session statements for the trigger-resident backends.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::dialect::{Dialect, H2Dialect};
use crate::error::{ChangelogError, ChangelogResult};
use crate::generator::Backend;

pub const FLAG_NAMESPACE: &str = "changelog";

/// One skip scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SkipFlag {
    All,
    Entity(String),
    Attribute { entity: String, attribute: String },
}

impl SkipFlag {
    pub fn entity(entity: &str) -> Self {
        SkipFlag::Entity(entity.to_string())
    }

    pub fn attribute(entity: &str, attribute: &str) -> Self {
        SkipFlag::Attribute {
            entity: entity.to_string(),
            attribute: attribute.to_string(),
        }
    }

    /// Flag of the narrowest scope given; an attribute needs its entity
    pub fn scoped(entity: Option<&str>, attribute: Option<&str>) -> ChangelogResult<Self> {
        match (entity, attribute) {
            (None, None) => Ok(SkipFlag::All),
            (Some(entity), None) => Ok(SkipFlag::entity(entity)),
            (Some(entity), Some(attribute)) => Ok(SkipFlag::attribute(entity, attribute)),
            (None, Some(attribute)) => Err(ChangelogError::InvalidInput {
                parameter: "skip scope".to_string(),
                value: attribute.to_string(),
                reason: "attribute flag requires an entity".to_string(),
            }),
        }
    }

    /// Session variable name of this flag
    ///
    /// ```rust
    /// use changelog_triggers::skip::SkipFlag;
    ///
    /// assert_eq!(SkipFlag::All.name(), "changelog.skip");
    /// assert_eq!(SkipFlag::entity("shop.Orders").name(), "changelog.skip_entity_shop_2eorders");
    /// ```
    pub fn name(&self) -> String {
        match self {
            SkipFlag::All => format!("{FLAG_NAMESPACE}.skip"),
            SkipFlag::Entity(entity) => format!("{FLAG_NAMESPACE}.skip_entity_{}", fold_scope(entity)),
            SkipFlag::Attribute { entity, attribute } => format!(
                "{FLAG_NAMESPACE}.skip_element_{}__{}",
                fold_scope(entity),
                fold_scope(attribute)
            ),
        }
    }
}

/// Lower-cased ASCII alphanumerics; every other byte, `_` included, becomes `_xx` (hex)
///
/// The result never contains `__`, which separates entity and attribute in a flag name.
///
/// ```rust
/// use changelog_triggers::skip::fold_scope;
///
/// assert_eq!(fold_scope("shop.Orders"), "shop_2eorders");
/// assert_eq!(fold_scope("shop_Orders"), "shop_5forders");
/// ```
pub fn fold_scope(name: &str) -> String {
    let mut folded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() {
            folded.push(char::from(byte.to_ascii_lowercase()));
        } else {
            folded.push_str(&format!("_{byte:02x}"));
        }
    }
    folded
}

/// A change to session state the caller must carry out on its connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Statement to execute on the connection
    Sql(String),
    /// Value to expose through the host-registered session function (SQLite)
    HostValue { key: String, value: Option<String> },
}

/// Statement setting `flag` to `true` for `backend`
pub fn set_flag(backend: Backend, flag: &str) -> SessionUpdate {
    match backend {
        Backend::Sqlite => SessionUpdate::HostValue {
            key: flag.to_string(),
            value: Some("true".to_string()),
        },
        Backend::Hana => SessionUpdate::Sql(format!("SET '{flag}' = 'true'")),
        Backend::H2 => SessionUpdate::Sql(format!("SET {} = 'true'", H2Dialect::default().user_variable(flag))),
        Backend::Postgres => SessionUpdate::Sql(format!("SELECT set_config('{flag}', 'true', true)")),
    }
}

/// Statement clearing `flag` for `backend`
pub fn reset_flag(backend: Backend, flag: &str) -> SessionUpdate {
    match backend {
        Backend::Sqlite => SessionUpdate::HostValue {
            key: flag.to_string(),
            value: None,
        },
        Backend::Hana => SessionUpdate::Sql(format!("UNSET '{flag}'")),
        Backend::H2 => SessionUpdate::Sql(format!("SET {} = NULL", H2Dialect::default().user_variable(flag))),
        Backend::Postgres => SessionUpdate::Sql(format!("SELECT set_config('{flag}', '', true)")),
    }
}

/// Expression reading `flag` inside a trigger body
pub fn read_flag(dialect: &dyn Dialect, flag: &str) -> String {
    dialect.flag_set(&mut crate::dialect::RenderContext::new(), flag)
}

/// Skip scopes of one transaction, passed explicitly through the caller
#[derive(Debug, Default)]
pub struct TransactionContext {
    flags: BTreeSet<SkipFlag>,
    /// Flag names currently set in the session
    applied: BTreeSet<String>,
}

impl TransactionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_all(&mut self) -> &mut Self {
        self.flags.insert(SkipFlag::All);
        self
    }

    pub fn skip_entity(&mut self, entity: &str) -> &mut Self {
        self.flags.insert(SkipFlag::entity(entity));
        self
    }

    pub fn skip_attribute(&mut self, entity: &str, attribute: &str) -> &mut Self {
        self.flags.insert(SkipFlag::attribute(entity, attribute));
        self
    }

    /// Whether a change of `entity` (optionally one attribute) is suppressed
    pub fn is_skipped(&self, entity: &str, attribute: Option<&str>) -> bool {
        self.flags.contains(&SkipFlag::All)
            || self.flags.contains(&SkipFlag::entity(entity))
            || attribute.is_some_and(|a| self.flags.contains(&SkipFlag::attribute(entity, a)))
    }

    /// Whether the flag with this session name is set
    pub fn is_flag_set(&self, name: &str) -> bool {
        self.flags.iter().any(|f| f.name() == name)
    }

    pub fn flags(&self) -> impl Iterator<Item = &SkipFlag> {
        self.flags.iter()
    }

    /// Session updates publishing the flags to trigger-resident logic
    pub fn apply_statements(&mut self, backend: Backend) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        for flag in &self.flags {
            let name = flag.name();
            if self.applied.insert(name.clone()) {
                updates.push(set_flag(backend, &name));
            }
        }
        debug!(backend = backend.name(), count = updates.len(), "Applying skip flags");
        updates
    }

    /// Session updates clearing every applied flag; the context is empty afterwards
    pub fn reset_statements(&mut self, backend: Backend) -> Vec<SessionUpdate> {
        let updates = std::mem::take(&mut self.applied)
            .into_iter()
            .map(|name| reset_flag(backend, &name))
            .collect();
        self.flags.clear();
        updates
    }

    /// End of transaction: the reset statements to run
    pub fn finish(mut self, backend: Backend) -> Vec<SessionUpdate> {
        self.reset_statements(backend)
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if !self.applied.is_empty() {
            warn!(
                flags = ?self.applied,
                "Transaction context dropped with skip flags still set in the session"
            );
        }
    }
}
