//! Citizen complaint submission service.
//!
//! The workspace root re-exports the member crates so integration tests under
//! `tests/` can reach them through a single dependency.

pub use common;
pub use complaint_service;
