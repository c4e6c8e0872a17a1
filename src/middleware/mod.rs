pub mod capture;
pub mod tracker;

pub use capture::capture;
pub use tracker::{Completion, RequestTracker};
