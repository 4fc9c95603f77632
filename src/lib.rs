// Core modules
pub mod analysis;
pub mod api;
pub mod blocks;
pub mod config;
pub mod error;
pub mod execution;
pub mod models;
pub mod progression;
pub mod store;
pub mod stream;

// Re-export commonly used types
pub use config::Settings;
pub use error::{Error, Result};
pub use models::*;
pub use stream::{EngineEvent, EventBus, Session, SessionHandle};
