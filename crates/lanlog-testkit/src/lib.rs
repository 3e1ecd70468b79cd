//! # Lanlog Testkit
//!
//! Testing utilities for lanlog.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: records and pre-seeded stores in a fixed naming scheme
//!   (user `A` writes from device `A-device`)
//! - **Generators**: proptest strategies for logs with holes
//! - **CountingStore**: a store wrapper that counts calls and can fail on demand
//! - **TestMesh**: several engines on one in-memory network, pumped by hand
//!
//! ## Test Mesh
//!
//! ```rust,no_run
//! use lanlog_testkit::{fixtures, TestMesh};
//!
//! # async fn example() {
//! let mut mesh = TestMesh::new();
//! let a = mesh.add_device("A").await;
//! let b = mesh.add_device("B").await;
//! fixtures::seed_log(mesh.store(a), "A", 1..=10).await;
//!
//! mesh.start_all().await;
//! mesh.settle().await;
//! # }
//! ```

pub mod counting;
pub mod fixtures;
pub mod generators;
pub mod mesh;

pub use counting::{CallCounts, CountingStore};
pub use fixtures::{log, record, seed_log};
pub use generators::{log_with_holes, LogShape};
pub use mesh::{MeshEngine, TestMesh};
