pub mod audit;
pub mod cluster;
pub mod config;
pub mod ddl;
pub mod engine;
pub mod error;
pub mod output;
pub mod schema;
pub mod state;

pub use error::{SyncError, SyncResult};
