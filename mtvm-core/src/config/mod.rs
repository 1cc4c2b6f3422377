//! Configuration module for mtvm.
//!
//! Resolves the install, plugin and path directories from `config.json` and
//! platform defaults.

pub mod paths;
mod settings;

pub use settings::{load_configuration, Configuration, Settings};
