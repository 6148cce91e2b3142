pub mod gantry_config;
pub mod modules_config;

pub use gantry_config::{ConfigLoadError, GantryConfig};
pub use modules_config::ModulesConfig;
