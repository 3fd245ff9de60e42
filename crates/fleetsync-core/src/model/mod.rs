// ── Fleet domain model ──
//
// Canonical representations of what the provider reports, decoupled
// from the wire names in `fleetsync_api::models`.

pub mod device;
pub mod position;
pub mod vehicle;

pub use device::Device;
pub use position::{Position, Telemetry};
pub use vehicle::{FleetCounts, Vehicle, VehicleStatus};
