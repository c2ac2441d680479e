//! Built-in plugins.

pub mod fallback;
pub mod fuzz;
pub mod models;
pub mod parallel;
pub mod posthog;
pub mod zip;
