//! Report submission, triage, querying and account management.
//!
//! Workflows take an explicit [`crate::store::Store`] handle; none of them
//! touch process-wide state.

pub mod accounts;
pub mod auth;
pub mod query;
pub mod submit;
pub mod triage;
