pub mod loader;
pub mod types;
pub mod validator;

pub use loader::{load_config, DEFAULT_CONFIG_FILE};
pub use types::SyncConfig;
