//! verify-hands - reviewer tool for machine-predicted hand boxes.
//!
//! Pulls unverified annotations from the store, overlays the predicted hand
//! and object boxes on the frame, and records the reviewer's judgment and
//! corrected hand boxes.

pub mod app;
pub mod boxes;
pub mod config;
pub mod phase;
pub mod record;
pub mod session;
pub mod transport;

pub use app::ReviewApp;
pub use config::Config;
pub use session::ReviewSession;
