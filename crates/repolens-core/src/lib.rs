//! Configuration loading and component wiring for repolens.

pub mod bootstrap;
pub mod config;

pub use bootstrap::AppBuilder;
pub use config::Config;
