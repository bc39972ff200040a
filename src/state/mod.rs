pub mod backend;
pub mod migration;
pub mod models;
pub mod schema;
pub mod sqlite;

pub use backend::MasterStore;
pub use sqlite::SqliteMaster;
