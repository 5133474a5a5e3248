pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool, WriteTx};
pub use fixtures::{DemoSeedDataset, SeedResult, SeededOrder, VerificationResult};
pub use repositories::RepositoryError;
