// ── Reactive fleet store ──
//
// Concurrent device and position storage with push-based change
// notification.

mod collection;
mod fleet_store;

pub use fleet_store::{ApplySummary, FleetStore};
