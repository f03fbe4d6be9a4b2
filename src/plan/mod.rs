//! Identity & Label Resolution Planner and per-trigger plans
//!
//! - [`expr`]: dialect-neutral expression IR
//! - [`identity`]: annotation paths to expressions, object identifiers
//! - [`label`]: reference labels with localized fallback
//! - [`target`]: [`TriggerPlan`] per trigger set
//! - [`eval`]: in-memory execution of a plan

pub mod eval;
pub mod expr;
pub mod identity;
pub mod label;
pub mod target;

pub use expr::{Cond, Expr, Filter, RowRef};
pub use target::{plan_all, plan_compositions, plan_entity, ColumnPlan, Invocation, Operation, RootPlan, TriggerPlan};
