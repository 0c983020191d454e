//! HTTP request handlers.

mod health;

pub use health::{livez, readyz, version};
