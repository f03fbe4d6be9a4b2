//! Value Encoding Rules
//!
//! One data-type-to-text contract applied by every backend:
//!
//! | Type class | Encoding |
//! |---|---|
//! | Boolean | `'true'` / `'false'`, never `0`/`1` |
//! | Date/Time/Timestamp | dialect-native text cast |
//! | Text | truncated to 4997 characters + `...` when longer than 5000 |
//! | Relationship | raw key, composite keys joined with `||` |
//!
//! The SQL builders here wrap an [`Expr`] for a [`Dialect`]; the plain functions
//! are the same rules over Rust values, used by the in-memory evaluator.

use std::borrow::Cow;

use crate::config::{ELLIPSIS, KEY_SEPARATOR, MAX_VALUE_LENGTH, OBJECT_ID_SEPARATOR, TRUNCATED_LENGTH};
use crate::dialect::{Dialect, RenderContext};
use crate::plan::expr::{Cond, Expr, RowRef};
use crate::schema::ValueType;

/// Text conversion applied to a value expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    BooleanText,
    Truncated,
    Cast(ValueType),
}

/// Wrap `expr` with the encoding for `value_type`
pub fn encode(value_type: ValueType, expr: Expr) -> Expr {
    let encoding = if value_type == ValueType::Boolean {
        Encoding::BooleanText
    } else if value_type.is_text() {
        Encoding::Truncated
    } else {
        Encoding::Cast(value_type)
    };
    Expr::encoded(encoding, expr)
}

/// Raw key value of `columns` on `row`: text-cast, composite parts joined with the key separator
pub fn encode_key(columns: &[String], row: RowRef) -> Expr {
    let mut parts: Vec<Expr> = columns
        .iter()
        .map(|c| Expr::encoded(Encoding::Cast(ValueType::Other), Expr::column(row, c.clone())))
        .collect();
    if parts.len() == 1 {
        return parts.remove(0);
    }
    Expr::KeyJoin(parts)
}

/// Null-safe change predicate over one column pair
pub fn column_changed(column: &str) -> Cond {
    Cond::changed(Expr::column(RowRef::Old, column), Expr::column(RowRef::New, column))
}

// ============ SQL builders ============

/// `CASE WHEN LENGTH(v) > 5000 THEN SUBSTR(v, 1, 4997) || '...' ELSE v END`
pub fn truncated_sql<D: Dialect + ?Sized>(d: &D, ctx: &mut RenderContext, value: &Expr) -> String {
    let measured = d.render(ctx, value);
    let cut = d.render(ctx, value);
    let whole = d.render(ctx, value);
    format!(
        "CASE WHEN {} > {MAX_VALUE_LENGTH} THEN {} ELSE {whole} END",
        d.length(&measured),
        d.concat(&[d.substring(&cut, 1, TRUNCATED_LENGTH), d.string_literal(ELLIPSIS)]),
    )
}

pub fn boolean_sql<D: Dialect + ?Sized>(d: &D, ctx: &mut RenderContext, value: &Expr) -> String {
    let tested_null = d.render(ctx, value);
    let tested_true = d.render(ctx, value);
    format!(
        "CASE WHEN {tested_null} IS NULL THEN NULL WHEN {} THEN 'true' ELSE 'false' END",
        d.is_true(&tested_true)
    )
}

/// `(o <> n OR o IS NULL OR n IS NULL) AND NOT (o IS NULL AND n IS NULL)`
pub fn changed_sql<D: Dialect + ?Sized>(d: &D, ctx: &mut RenderContext, old: &Expr, new: &Expr) -> String {
    let o1 = d.render(ctx, old);
    let n1 = d.render(ctx, new);
    let o2 = d.render(ctx, old);
    let n2 = d.render(ctx, new);
    let o3 = d.render(ctx, old);
    let n3 = d.render(ctx, new);
    format!("(({o1} <> {n1} OR {o2} IS NULL OR {n2} IS NULL) AND NOT ({o3} IS NULL AND {n3} IS NULL))")
}

pub fn key_join_sql<D: Dialect + ?Sized>(d: &D, ctx: &mut RenderContext, parts: &[Expr]) -> String {
    let separator = d.string_literal(KEY_SEPARATOR);
    let mut rendered = Vec::with_capacity(parts.len() * 2);
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            rendered.push(separator.clone());
        }
        rendered.push(d.render(ctx, part));
    }
    d.concat(&rendered)
}

/// Non-empty fragments joined with `", "`, NULL when nothing remains
pub fn join_non_empty_sql<D: Dialect + ?Sized>(d: &D, ctx: &mut RenderContext, parts: &[Expr]) -> String {
    if let [single] = parts {
        return format!("NULLIF({}, '')", d.render(ctx, single));
    }
    let separator = d.string_literal(OBJECT_ID_SEPARATOR);
    let fragments: Vec<String> = parts
        .iter()
        .map(|p| {
            let value = d.render(ctx, p);
            format!("COALESCE({}, '')", d.concat(&[separator.clone(), format!("NULLIF({value}, '')")]))
        })
        .collect();
    format!(
        "NULLIF({}, '')",
        d.substring_from(&d.concat(&fragments), OBJECT_ID_SEPARATOR.len() + 1)
    )
}

// ============ Reference rules over Rust values ============

/// Truncate to the storage limit, counting characters
///
/// ```rust
/// use changelog_triggers::encoding::truncate_value;
///
/// assert_eq!(truncate_value("short"), "short");
/// let long = "x".repeat(5001);
/// let stored = truncate_value(&long);
/// assert_eq!(stored.chars().count(), 5000);
/// assert!(stored.ends_with("..."));
/// ```
pub fn truncate_value(value: &str) -> Cow<'_, str> {
    if value.chars().count() <= MAX_VALUE_LENGTH {
        return Cow::Borrowed(value);
    }
    let mut truncated: String = value.chars().take(TRUNCATED_LENGTH).collect();
    truncated.push_str(ELLIPSIS);
    Cow::Owned(truncated)
}

/// Boolean as its stored text; accepts the spellings engines use for true
pub fn boolean_text(value: Option<&str>) -> Option<&'static str> {
    value.map(|v| if is_true_text(v) { "true" } else { "false" })
}

pub fn is_true_text(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "True")
}

/// Null-safe change predicate
pub fn is_changed<T: PartialEq>(old: Option<T>, new: Option<T>) -> bool {
    match (old, new) {
        (None, None) => false,
        (Some(o), Some(n)) => o != n,
        _ => true,
    }
}

/// Composite key; `None` when any part is missing
pub fn join_key<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    let parts: Option<Vec<&str>> = parts.into_iter().collect();
    parts.map(|p| p.join(KEY_SEPARATOR))
}

/// Object identifier join: empty and missing fragments are skipped
pub fn join_non_empty<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    let joined = parts
        .into_iter()
        .flatten()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(OBJECT_ID_SEPARATOR);
    (!joined.is_empty()).then_some(joined)
}
