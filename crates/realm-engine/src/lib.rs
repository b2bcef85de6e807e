//! Realm Engine - Hosting many persistent worlds in one process
//!
//! The [`WorldInstanceManager`] decides which worlds are resident: it loads
//! them on demand, autosaves them, and evicts them once nobody has observed
//! them for a while. [`Engine`] ties the manager to the streaming coordinator
//! and is the entry point for connected sessions.

pub mod config;
pub mod engine;
pub mod error;
pub mod manager;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use manager::{ManagerConfig, TickReport, WorldInstanceManager};
