//! Capture storage: hosted object/metadata stores, the local fallback list,
//! and the orchestrator that moves captures between them.

pub mod local;
pub mod persist;
pub mod remote;
pub mod types;
pub mod worker;

pub use local::LocalStore;
pub use persist::{Persister, RemoteStores};
pub use remote::{MetadataStore, ObjectStore, RestBackend};
pub use types::*;
pub use worker::PersistQueue;
