//! Acquisition sessions.
//!
//! [`Acquisition`] pulls frames on the caller's task.
//! [`BackgroundAcquisition`] moves the same session onto a worker task and
//! queues its frames, optionally interleaved with progress reports.

mod progress;
mod session;
mod worker;


pub use progress::ProgressReport;
pub use session::{Acquisition, AcquisitionRequest, SessionState, StopHandle};
pub use worker::{BackgroundAcquisition, FrameEvent};
