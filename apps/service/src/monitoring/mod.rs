/// Monitoring engine - turns service records into scheduled probes
///
/// - `interval` / `trigger`: parse cadences and compute firing times
/// - `checker` / `executor`: run one HTTP probe and classify it
/// - `scheduler`: keep one recurring job per service, plus the daily job
pub mod checker;
pub mod executor;
pub mod interval;
pub mod scheduler;
pub mod trigger;
pub mod types;

pub use executor::ProbeExecutor;
pub use interval::IntervalDescriptor;
pub use scheduler::{JobRegistry, SyncReport};
pub use trigger::{TimeOfDay, Trigger};
