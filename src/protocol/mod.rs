//! Detector control protocol over TCP.
//!
//! Little-endian binary requests on the control port (default 1952) and
//! the stop port (default 1953). Every reply opens with a result tag.

mod channel;
mod codec;
mod commands;
mod io;
mod types;

#[cfg(test)]
mod tests;

// Re-export public API
pub use channel::{Connection, ControlChannel, Reply, Response, StopChannel, Tagged};
pub use codec::{Arg, FieldKind, Fields, Value, decode, encode, layout_size, pack};
pub use commands::{AcquisitionInfo, UPDATE_CLIENT_LAYOUT};
pub use types::{
    ALL_MODULES, CommandCode, DEFAULT_CTRL_PORT, DEFAULT_STOP_PORT, DetectorSettings, DetectorType, Dimension,
    GET_CODE, INET_ADDRSTRLEN, IdParam, MAX_MESSAGE_LEN, ResultType, RunStatus, TimerType, TimingMode,
};

pub(crate) use commands::{nanos, to_nanos};
