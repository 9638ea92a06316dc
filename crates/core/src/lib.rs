//! Core logic for the syncview migration supervisor.
//!
//! Everything here is pure state-machine / text-processing code with no
//! process handling and no HTTP: line splitting, progress estimation over
//! imapsync output, and the subscriber feed wire types.

pub mod feed;
pub mod progress;
pub mod splitter;

pub use feed::FeedEvent;
pub use progress::{ProgressEstimator, ProgressMode, ProgressSnapshot};
pub use splitter::LineSplitter;
