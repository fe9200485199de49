//! Test doubles and helpers
//!
//! - [`FlakyStore`]: a [`SharedStore`](crate::store::SharedStore) whose
//!   availability can be switched off to exercise fail-open paths
//! - [`poll_until`]: wait for an async condition in worker tests
//!
//! ```rust
//! use postgate_common::testing::FlakyStore;
//!
//! let store = FlakyStore::new();
//! store.go_down();
//! assert!(!store.is_available());
//! store.recover();
//! ```

pub mod async_utils;
pub mod flaky;

pub use async_utils::poll_until;
pub use flaky::FlakyStore;
