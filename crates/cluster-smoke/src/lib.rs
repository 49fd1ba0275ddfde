//! Rancher downstream cluster smoke test.
//!
//! Provisions a cluster through Rancher with terraform, fetches its
//! kubeconfig, deploys a test workload and checks logs and exec against it.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cluster_smoke::{Driver, ProvisionGuard, RunOptions, SystemBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = SystemBackend {
//!         terraform_dir: "./terraform".into(),
//!         terraform_bin: "terraform".into(),
//!         kubectl_bin: "kubectl".into(),
//!     };
//!     let guard = Arc::new(ProvisionGuard::new());
//!     let outcome = Driver::new(backend, RunOptions::default(), guard).run().await;
//!     std::process::exit(i32::from(outcome.exit_code()));
//! }
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

pub mod config;
pub mod driver;
pub mod error;
pub mod interrupt;
pub mod kubectl;
pub mod provider;
pub mod rancher;
pub mod terraform;
pub mod ui;

pub use config::SmokeConfig;
pub use driver::{Driver, Outcome, RunOptions, Stage, Summary, SystemBackend};
pub use error::{Error, Result};
pub use interrupt::ProvisionGuard;
