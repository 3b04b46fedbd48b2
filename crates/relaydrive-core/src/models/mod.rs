//! Data models for the application
//!
//! Organized by domain: what an upload produces, what the queue tracks, and
//! what a batch tracks.

mod batch;
mod queue;
mod upload;

pub use batch::*;
pub use queue::*;
pub use upload::*;
