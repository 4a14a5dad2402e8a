//! ML feedback loop for prediction markets
//!
//! Learns from resolved markets how wrong the crowd's final probabilities
//! tend to be, and from scored social posts which evidence actually moves
//! markets toward the truth. Serves both models behind a small HTTP API.
//!
//! ## Pipeline
//!
//! ```text
//! Storage (markets, posts, snapshots)
//!     → ETL (label posts against the probability series)
//!     → Training (cross-validated boosted trees)
//!     → Registry (versioned artifacts + metadata)
//!     → Serving (logit-space correction, post usefulness)
//! ```

pub mod boost;
pub mod config;
pub mod error;
pub mod etl;
pub mod features;
pub mod labels;
pub mod registry;
pub mod server;
pub mod serving;
pub mod storage;
pub mod training;
pub mod types;

#[cfg(test)]
mod config_tests;
