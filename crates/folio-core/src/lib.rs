pub mod config;
pub mod error;
pub mod psk;
pub mod traits;
pub mod types;
pub mod value_store;

pub use config::AppConfig;
pub use error::{ErrorKind, FolioError, Result};
pub use psk::PromptSchemaKey;
pub use types::*;
pub use value_store::ValueStore;
