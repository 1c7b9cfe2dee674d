pub mod acquisition;
pub mod config;
pub mod detector;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod transport;

#[cfg(test)]
mod testing;

pub use acquisition::{
    Acquisition, AcquisitionRequest, BackgroundAcquisition, FrameEvent, ProgressReport, SessionState, StopHandle,
};
pub use detector::Detector;
pub use error::{DetectorError, Result};
pub use frame::{DynamicRange, Frame, FrameData};
pub use transport::{Dialer, Port, TcpDialer};
