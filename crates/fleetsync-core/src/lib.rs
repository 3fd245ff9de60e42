//! Live-data sync core between `fleetsync-api` and its consumers.
//!
//! - **[`FleetSync`]**: Facade for one provider account.
//!   [`connect()`](FleetSync::connect) authenticates and starts the health
//!   monitor; [`start_tracking()`](FleetSync::start_tracking) runs the
//!   polling engine in the background. [`FleetSync::oneshot()`] wraps a
//!   single CLI invocation.
//!
//! - **[`RateLimiter`]**: Spacing, cooldowns and a circuit breaker shared
//!   by every provider call, login included.
//!
//! - **[`PollingEngine`]**: Periodic device/position cycles with a busy
//!   guard, re-authentication on token loss and adaptive intervals derived
//!   from vehicle activity.
//!
//! - **[`DegradationController`]**: Weighted service health, the
//!   resulting [`DegradationLevel`], feature gating and cached fallbacks.
//!
//! - **[`FleetStore`]**: Last-write-wins position storage keyed by device,
//!   observable through [`SnapshotStream`].

pub mod activity;
pub mod config;
pub mod degradation;
pub mod error;
pub mod fetch;
pub mod model;
pub mod polling;
pub mod rate_limit;
pub mod session;
pub mod sink;
pub mod store;
pub mod stream;
pub mod sync;

// ── Primary re-exports ──────────────────────────────────────────────
pub use activity::{ActivityTracker, VehicleActivity, adaptive_interval};
pub use config::{DegradationPolicy, PollingOptions, RateLimitPolicy, SyncConfig, TlsVerification};
pub use degradation::{
    DegradationController, DegradationLevel, DegradationState, ExecOptions, Feature,
    HealthProbe, HealthSample, Probes, Service, ServiceHealth, StaticProbe,
};
pub use error::CoreError;
pub use fetch::{Fetcher, FleetSource, PositionFetch, dedupe_latest};
pub use polling::{CycleReport, PollingEngine, TrackingIndicator, TrackingState};
pub use rate_limit::{Decision, DenyReason, Outcome, RateLimitSnapshot, RateLimiter};
pub use session::{AuthState, SessionManager};
pub use sink::{MemorySink, SinkProbe, SyncJob, SyncSink};
pub use store::{ApplySummary, FleetStore};
pub use stream::SnapshotStream;
pub use sync::FleetSync;

pub use model::{Device, FleetCounts, Position, Telemetry, Vehicle, VehicleStatus};

// Provider types the CLI needs without a direct dependency on the API crate.
pub use fleetsync_api::{AccountType, CommandReceipt, Credentials, Password, PasswordHash};
