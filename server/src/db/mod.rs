//! Database module for PostgreSQL persistence.

mod documents;
mod patches;
mod pool;

pub use documents::*;
pub use patches::*;
pub use pool::*;
