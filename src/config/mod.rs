//! Configuration
//!
//! This module provides:
//! - Startup `Settings` read once from environment variables
//! - `ConfigVariant` rule sets with weight-sum and threshold validation
//! - The hot-reloadable active-variant pointer (atomic snapshot per request)
//! - A file watcher that validates, backs up, and atomically swaps on change
//! - `switch_variant` for A/B rollouts

mod manager;
mod settings;
mod variant;

pub use manager::{ConfigManager, ConfigWatcher};
pub use settings::Settings;
pub use variant::{ConfigError, ConfigResult, ConfigVariant, RulesFile, RulesSection};
