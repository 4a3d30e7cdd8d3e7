pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod service;

pub use connection::{connect, connect_from_config, connect_with_settings, DbPool};
pub use fixtures::{E2ESeedDataset, FlowSeedInfo, SeedResult, VerificationResult};
pub use service::{BalanceSummary, CancelReceipt, LeaveService, ResolveReceipt, SubmitReceipt};
