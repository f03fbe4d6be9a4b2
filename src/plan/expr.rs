//! Dialect-neutral expression IR rendered by every [`Dialect`](crate::dialect::Dialect)

use crate::encoding::Encoding;

/// Row visible to a trigger invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowRef {
    Old,
    New,
    /// The operation's own row variable (NEW for create/update, OLD for delete)
    Record,
    /// Placeholder bound to a concrete row when a plan is rendered for one operation
    Subject,
}

/// `column = value` term of a correlated lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: Expr,
}

impl Filter {
    pub fn new(column: impl Into<String>, value: Expr) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Null,
    /// String literal
    Text(String),
    Column { row: RowRef, column: String },
    /// Value precomputed once per invocation (entity key, object identifier, ...)
    Var(String),
    /// Session locale
    Locale,
    /// `(SELECT column FROM entity WHERE filters)`
    Lookup {
        entity: String,
        column: String,
        filters: Vec<Filter>,
    },
    /// Parts joined with the key separator; NULL when any part is NULL
    KeyJoin(Vec<Expr>),
    /// Non-empty parts joined with the object identifier separator; NULL when all are empty
    JoinNonEmpty(Vec<Expr>),
    /// First non-NULL alternative
    FirstOf(Vec<Expr>),
    Encoded { encoding: Encoding, inner: Box<Expr> },
}

impl Expr {
    pub fn column(row: RowRef, column: impl Into<String>) -> Self {
        Expr::Column {
            row,
            column: column.into(),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Expr::Text(value.into())
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn encoded(encoding: Encoding, inner: Expr) -> Self {
        Expr::Encoded {
            encoding,
            inner: Box::new(inner),
        }
    }

    /// Replace the [`RowRef::Subject`] placeholder with `row`
    #[must_use]
    pub fn bind(&self, row: RowRef) -> Expr {
        let bind_all = |exprs: &[Expr]| -> Vec<Expr> { exprs.iter().map(|e| e.bind(row)).collect() };
        match self {
            Expr::Column {
                row: RowRef::Subject,
                column,
            } => Expr::column(row, column.clone()),
            Expr::Lookup {
                entity,
                column,
                filters,
            } => Expr::Lookup {
                entity: entity.clone(),
                column: column.clone(),
                filters: filters
                    .iter()
                    .map(|f| Filter::new(f.column.clone(), f.value.bind(row)))
                    .collect(),
            },
            Expr::KeyJoin(parts) => Expr::KeyJoin(bind_all(parts)),
            Expr::JoinNonEmpty(parts) => Expr::JoinNonEmpty(bind_all(parts)),
            Expr::FirstOf(parts) => Expr::FirstOf(bind_all(parts)),
            Expr::Encoded { encoding, inner } => Expr::encoded(*encoding, inner.bind(row)),
            other => other.clone(),
        }
    }

    /// Whether evaluating this expression reads another record
    pub fn has_lookup(&self) -> bool {
        match self {
            Expr::Lookup { .. } => true,
            Expr::KeyJoin(parts) | Expr::JoinNonEmpty(parts) | Expr::FirstOf(parts) => {
                parts.iter().any(Expr::has_lookup)
            }
            Expr::Encoded { inner, .. } => inner.has_lookup(),
            _ => false,
        }
    }

    /// Row columns this expression is NULL exactly when any of them is NULL
    ///
    /// `None` when nullness depends on anything else (lookups, joins skipping
    /// empties, literals).
    pub fn null_columns(&self) -> Option<Vec<(RowRef, &str)>> {
        match self {
            Expr::Column { row, column } => Some(vec![(*row, column.as_str())]),
            Expr::Encoded { inner, .. } => inner.null_columns(),
            Expr::KeyJoin(parts) => {
                let mut columns = Vec::new();
                for part in parts {
                    columns.extend(part.null_columns()?);
                }
                Some(columns)
            }
            _ => None,
        }
    }
}

/// Boolean condition over expressions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cond {
    IsNotNull(Expr),
    /// Null-safe inequality: two NULLs are equal, NULL and a value differ
    Changed { old: Expr, new: Expr },
    Any(Vec<Cond>),
    All(Vec<Cond>),
    Not(Box<Cond>),
    /// Session skip flag holds the text `true`
    FlagSet(String),
}

impl Cond {
    pub fn changed(old: Expr, new: Expr) -> Self {
        Cond::Changed { old, new }
    }

    pub fn negate(cond: Cond) -> Self {
        Cond::Not(Box::new(cond))
    }

    /// Single-element groups collapse to their element
    pub fn any(mut conds: Vec<Cond>) -> Self {
        if conds.len() == 1 {
            return conds.remove(0);
        }
        Cond::Any(conds)
    }

    pub fn all(mut conds: Vec<Cond>) -> Self {
        if conds.len() == 1 {
            return conds.remove(0);
        }
        Cond::All(conds)
    }

    #[must_use]
    pub fn bind(&self, row: RowRef) -> Cond {
        match self {
            Cond::IsNotNull(e) => Cond::IsNotNull(e.bind(row)),
            Cond::Changed { old, new } => Cond::changed(old.bind(row), new.bind(row)),
            Cond::Any(conds) => Cond::Any(conds.iter().map(|c| c.bind(row)).collect()),
            Cond::All(conds) => Cond::All(conds.iter().map(|c| c.bind(row)).collect()),
            Cond::Not(c) => Cond::negate(c.bind(row)),
            Cond::FlagSet(name) => Cond::FlagSet(name.clone()),
        }
    }

    pub fn has_lookup(&self) -> bool {
        match self {
            Cond::IsNotNull(e) => e.has_lookup(),
            Cond::Changed { old, new } => old.has_lookup() || new.has_lookup(),
            Cond::Any(conds) | Cond::All(conds) => conds.iter().any(Cond::has_lookup),
            Cond::Not(c) => c.has_lookup(),
            Cond::FlagSet(_) => false,
        }
    }
}
