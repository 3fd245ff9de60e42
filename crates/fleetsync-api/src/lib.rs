// fleetsync-api: Async Rust client for the GPS51 tracking API

pub mod auth;
pub mod client;
pub mod commands;
pub mod devices;
pub mod error;
pub mod login;
pub mod models;
pub mod positions;
pub mod transport;

pub use auth::{AccountType, Credentials, Password, PasswordHash, Session};
pub use client::Gps51Client;
pub use error::Error;
pub use models::{CommandReceipt, DeviceRecord, PositionBatch, PositionRecord, ProviderReply};
pub use transport::{TlsMode, TransportConfig};
