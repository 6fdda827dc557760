//! Entity store: SQLite-backed persistence for targets and their health state.

mod models;
mod store;

pub use models::*;
pub use store::*;
