// src/config/mod.rs
pub mod ai;
pub mod settings;

pub use ai::{BackendConfig, BackendKind};
pub use settings::Settings;
