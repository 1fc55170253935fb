//! Intel Guard Runtime
//!
//! Wires the guarded fetcher, a classifier, the findings store and the alert
//! dispatcher into one long-lived [`IntelService`].

pub mod alerts;
pub mod ingest;
pub mod service;

pub use alerts::*;
pub use ingest::*;
pub use service::*;
