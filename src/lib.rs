//! Usage: Silent-refresh-with-redirect-fallback token acquisition wrapped
//! around authenticated multi-endpoint fetches.

pub mod auth;
pub mod domain;
pub mod fetch;
pub mod infra;
pub mod shared;

pub use domain::accounts;
pub use infra::{db, settings};
