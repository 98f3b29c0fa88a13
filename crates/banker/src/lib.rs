//! adbank banker - master/slave services and the budget controller
//!
//! The master hosts the authoritative registry and persists it; slaves
//! check out float, authorize locally and report back; the controller is
//! the operator's thin synchronous surface. All of them talk through the
//! `BankerClient` capability, in-process or over the wire.

pub mod client;
pub mod config;
pub mod controller;
pub mod master;
pub mod slave;

pub use client::{BankerClient, ClientError, LocalBankerClient};
pub use config::{BankerConfig, ConfigError, PersistenceBackend};
pub use controller::BudgetController;
pub use master::{HealthReport, MasterBanker};
pub use slave::SlaveBanker;
