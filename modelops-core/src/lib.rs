//! # modelops-core
//!
//! Tracking-server plumbing shared by the modelops workflows: layered
//! configuration, the run logger, model logging and registration, and the
//! registry updater. The tracking server sits behind the [`TrackingStore`]
//! and [`ModelRegistry`] traits, with an MLflow REST client and an
//! in-memory implementation.

pub mod config;
pub mod error;
pub mod model;
pub mod persistence;
pub mod registry;
pub mod tracking;

pub use config::{ConfigOverrides, ModelOpsConfig, TagConfig, load_config, load_config_file};
pub use error::{ConfigError, TrackingError};
pub use model::{ColSpec, LoggedModel, ModelDescriptor, ModelSignature, Registration, log_model};
pub use registry::{RegistryUpdater, latest_version, precision_description};
pub use tracking::{
    ActiveRun, InMemoryTrackingStore, ModelRegistry, ModelVersion, RestTrackingClient, RunStatus,
    TrackingStore,
};

/// Both halves of a tracking server.
pub trait TrackingServer: TrackingStore + ModelRegistry {
    fn as_store(&self) -> &dyn TrackingStore;
    fn as_registry(&self) -> &dyn ModelRegistry;
}

impl<T: TrackingStore + ModelRegistry> TrackingServer for T {
    fn as_store(&self) -> &dyn TrackingStore {
        self
    }

    fn as_registry(&self) -> &dyn ModelRegistry {
        self
    }
}
