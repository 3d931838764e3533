//! Routing and dispatch engine for the Courier update router.
//!
//! The [`Router`] owns the registration store (per-kind handler chains, the
//! command table, callback routes, and the predicate matcher tables) and the
//! composed-table cache that wraps every registered chain with the global
//! middleware snapshot. Dispatch classifies an update with a fixed
//! precedence order, looks up the composed chains for its category, and
//! executes them in registration order with abort/continue control.
//!
//! # Fan-out
//!
//! Callback routes and predicate matchers deliberately fan out: **every**
//! matching route or predicate bucket runs for a given update, not just the
//! first. This is an explicit contract — iteration order is registration
//! order — and is covered by tests. First-match semantics apply only to the
//! command regex fallback list.

pub mod error;
pub mod middleware;
pub mod pattern;
pub mod predicate;
pub mod query;
pub mod router;

pub use error::{RouterError, RouterResult};
pub use pattern::Pattern;
pub use predicate::{FileFilter, GeoRange, PollFilter};
pub use router::Router;
