//! CLI command implementations.

pub mod maintenance;
pub mod notes;
pub mod post;
pub mod status;
pub mod sync;
