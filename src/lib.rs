pub mod config;
pub mod consumer;
pub mod http;
pub mod index;
pub mod intake;
pub mod queue;
pub mod receipt;
pub mod scoring;
pub mod store;

pub use config::{BrokerKind, Config};
pub use consumer::{Consumer, ConsumerOutcome, ConsumerSettings, ConsumerStats};
pub use index::ReceiptIndex;
pub use intake::{IntakeError, IntakeService, Submission};
pub use receipt::{Item, Receipt, ReceiptSubmission, ValidationError};
pub use scoring::{PointsBreakdown, ScoreError, ScoringEngine};
pub use store::{ReceiptStore, SledStore, StoreError};
