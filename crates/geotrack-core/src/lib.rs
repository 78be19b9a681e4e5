//! # geotrack-core
//!
//! Core types, traits, and abstractions for the geotrack detection engine.
//!
//! This crate provides the domain models, error type, configuration, event
//! bus, and repository trait definitions that the other geotrack crates
//! depend on.

pub mod config;
pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod traits;
pub mod validation;

// Re-export commonly used types at crate root
pub use config::{
    CatchUpConfig, DispatcherConfig, GeofenceConfig, IngestionConfig, RetentionConfig,
    RouteDeviationConfig,
};
pub use error::{Error, Result};
pub use events::{EventBus, EventEnvelope, EventPublisher, GeoBusEvent};
pub use models::*;
pub use traits::*;
