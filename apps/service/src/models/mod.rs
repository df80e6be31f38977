/// Persisted data model of the monitored services
pub mod service;

pub use service::{
    AuthConfig, AuthKind, FileConfig, ProbeMethod, RawInterval, Service, ServiceId, ServiceStatus,
};
