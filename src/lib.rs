//! Query abstraction over MongoDB: a typed Query Model, a translator to native
//! query/update/pipeline documents, and a Data Access Engine running them
//! through an injected `NativeStore`.

pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod logger;
pub mod models;
pub mod query;
pub mod store;

pub use config::Config;
pub use context::{CancelHandle, Context};
pub use engine::{Engine, Operation, Page};
pub use errors::DbError;
pub use store::{MemoryStore, NativeStore};

/// Initializes the logging system from `log4rs.yaml`.
///
/// Call once at startup, before any engine operation. A missing file is not
/// an error; a malformed one is `DbError::Config`.
pub fn init() -> Result<(), DbError> {
    logger::init()
}
