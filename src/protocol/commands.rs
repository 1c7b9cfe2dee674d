//! Typed requests on the control and stop ports.
//!
//! Each request is one `send_request` with a layout fixed here. Getters pass
//! [`GET_CODE`] as the value argument.

use super::channel::{ControlChannel, StopChannel, Tagged};
use super::codec::{Arg, FieldKind, Fields};
use super::types::{
    CommandCode, DetectorSettings, DetectorType, Dimension, GET_CODE, INET_ADDRSTRLEN, IdParam, RunStatus,
    TimerType, TimingMode,
};
use crate::error::Result;
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

const I32_REPLY: &[FieldKind] = &[FieldKind::I32];
const I64_REPLY: &[FieldKind] = &[FieldKind::I64];

/// Reply layout of UPDATE_CLIENT.
pub const UPDATE_CLIENT_LAYOUT: &[FieldKind] = &[
    FieldKind::Str(INET_ADDRSTRLEN),
    FieldKind::I32, // modules
    FieldKind::I32, // max modules (unused)
    FieldKind::I32, // dynamic range
    FieldKind::I32, // data bytes
    FieldKind::I32, // settings
    FieldKind::I32, // energy threshold
    FieldKind::I64, // frames
    FieldKind::I64, // acquisition time
    FieldKind::I64, // frame period
    FieldKind::I64, // delay after trigger
    FieldKind::I64, // gates
    FieldKind::I64, // probes
    FieldKind::I64, // cycles
];

/// Detector state returned by the client-update round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquisitionInfo {
    pub last_client_ip: String,
    pub nb_modules: i32,
    /// Bits per pixel as stored by the device (24 is reported as 32)
    pub dynamic_range: i32,
    /// Payload size of one frame
    pub data_bytes: i32,
    pub settings: i32,
    pub energy_threshold: i32,
    pub nb_frames: i64,
    pub exposure_time: Duration,
    pub frame_period: Duration,
    pub delay_after_trigger: Duration,
    pub nb_gates: i64,
    pub nb_probes: i64,
    pub nb_cycles: i64,
}

impl AcquisitionInfo {
    fn from_fields(fields: &Fields) -> Result<Self> {
        Ok(Self {
            last_client_ip: fields.str(0)?.to_string(),
            nb_modules: fields.i32(1)?,
            dynamic_range: fields.i32(3)?,
            data_bytes: fields.i32(4)?,
            settings: fields.i32(5)?,
            energy_threshold: fields.i32(6)?,
            nb_frames: fields.i64(7)?,
            exposure_time: nanos(fields.i64(8)?),
            frame_period: nanos(fields.i64(9)?),
            delay_after_trigger: nanos(fields.i64(10)?),
            nb_gates: fields.i64(11)?,
            nb_probes: fields.i64(12)?,
            nb_cycles: fields.i64(13)?,
        })
    }

    /// Frames the device will produce; zero frames or cycles count as one.
    ///
    /// Saturates at `u64::MAX` for counts the device cannot really reach.
    pub fn total_frames(&self) -> u64 {
        let frames = self.nb_frames.max(1) as u64;
        let cycles = self.nb_cycles.max(1) as u64;
        frames.saturating_mul(cycles)
    }

    /// Decoded settings code, if the device reported a known one.
    pub fn detector_settings(&self) -> Option<DetectorSettings> {
        DetectorSettings::try_from(self.settings).ok()
    }
}

/// Wire nanoseconds to a duration; negative values clamp to zero.
pub(crate) fn nanos(value: i64) -> Duration {
    Duration::from_nanos(u64::try_from(value).unwrap_or(0))
}

/// Duration to wire nanoseconds, saturating.
pub(crate) fn to_nanos(value: Duration) -> i64 {
    i64::try_from(value.as_nanos()).unwrap_or(i64::MAX)
}

impl<S: AsyncRead + AsyncWrite + Unpin> ControlChannel<S> {
    pub async fn update_client(&mut self) -> Result<Tagged<AcquisitionInfo>> {
        let response = self.0.send_request(CommandCode::UpdateClient, &[], UPDATE_CLIENT_LAYOUT).await?;
        let info = AcquisitionInfo::from_fields(&response.fields)?;
        Ok(Tagged::new(response.result, info))
    }

    pub async fn detector_type(&mut self) -> Result<Tagged<DetectorType>> {
        let response = self.0.send_request(CommandCode::DetectorType, &[], I32_REPLY).await?;
        let kind = DetectorType::try_from(response.fields.i32(0)?)?;
        Ok(Tagged::new(response.result, kind))
    }

    /// Identification value; `module` is required for module serial numbers.
    pub async fn get_id(&mut self, param: IdParam, module: Option<i32>) -> Result<Tagged<i64>> {
        let response = match module {
            Some(module) => {
                let args = [Arg::I32(param.as_i32()), Arg::I32(module)];
                self.0.send_request(CommandCode::GetId, &args, I64_REPLY).await?
            }
            None => {
                let args = [Arg::I32(param.as_i32())];
                self.0.send_request(CommandCode::GetId, &args, I64_REPLY).await?
            }
        };
        Ok(Tagged::new(response.result, response.fields.i64(0)?))
    }

    /// Read (`value == GET_CODE`) or set a timer. Times are nanoseconds.
    pub async fn timer(&mut self, timer: TimerType, value: i64) -> Result<Tagged<i64>> {
        let args = [Arg::I32(timer.as_i32()), Arg::I64(value)];
        let response = self.0.send_request(CommandCode::Timer, &args, I64_REPLY).await?;
        Ok(Tagged::new(response.result, response.fields.i64(0)?))
    }

    pub async fn dynamic_range(&mut self, value: i32) -> Result<Tagged<i32>> {
        self.i32_request(CommandCode::DynamicRange, &[Arg::I32(value)]).await
    }

    pub async fn settings(&mut self, value: i32, module: i32) -> Result<Tagged<DetectorSettings>> {
        let tagged = self.i32_request(CommandCode::Settings, &[Arg::I32(value), Arg::I32(module)]).await?;
        Ok(Tagged::new(tagged.result, DetectorSettings::try_from(tagged.value)?))
    }

    pub async fn energy_threshold(&mut self, module: i32) -> Result<Tagged<i32>> {
        self.i32_request(CommandCode::GetEnergyThreshold, &[Arg::I32(module)]).await
    }

    pub async fn set_energy_threshold(&mut self, module: i32, energy: i32) -> Result<Tagged<i32>> {
        let args = [Arg::I32(energy), Arg::I32(module), Arg::I32(GET_CODE)];
        self.i32_request(CommandCode::SetEnergyThreshold, &args).await
    }

    pub async fn nb_modules(&mut self, dimension: Dimension, value: i32) -> Result<Tagged<i32>> {
        self.i32_request(CommandCode::NbModules, &[Arg::I32(dimension.as_i32()), Arg::I32(value)])
            .await
    }

    pub async fn timing_mode(&mut self, value: i32) -> Result<Tagged<TimingMode>> {
        let tagged = self.i32_request(CommandCode::ExternalCommunicationMode, &[Arg::I32(value)]).await?;
        Ok(Tagged::new(tagged.result, TimingMode::try_from(tagged.value)?))
    }

    pub async fn lock_server(&mut self, value: i32) -> Result<Tagged<i32>> {
        self.i32_request(CommandCode::LockServer, &[Arg::I32(value)]).await
    }

    pub async fn last_client_ip(&mut self) -> Result<Tagged<String>> {
        let layout = [FieldKind::Str(INET_ADDRSTRLEN)];
        let response = self.0.send_request(CommandCode::LastClientIp, &[], &layout).await?;
        Ok(Tagged::new(response.result, response.fields.str(0)?.to_string()))
    }

    /// Start an acquisition whose frames stream back on this connection.
    ///
    /// There is no reply envelope; frames follow as result-tagged payloads.
    pub async fn start_and_read_all(&mut self) -> Result<()> {
        self.0.write_request(CommandCode::StartAndReadAll, &[]).await
    }

    /// Write STOP on the control connection after the frame stream ended.
    /// The reply is not read; the connection is released right after.
    pub(crate) async fn write_stop(&mut self) -> Result<()> {
        self.0.write_request(CommandCode::StopAcquisition, &[]).await
    }

    async fn i32_request(&mut self, code: CommandCode, args: &[Arg<'_>]) -> Result<Tagged<i32>> {
        let response = self.0.send_request(code, args, I32_REPLY).await?;
        Ok(Tagged::new(response.result, response.fields.i32(0)?))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> StopChannel<S> {
    /// Abort the running acquisition. The reply is the tag alone.
    pub async fn stop_acquisition(&mut self) -> Result<Tagged<()>> {
        let response = self.0.send_request(CommandCode::StopAcquisition, &[], &[]).await?;
        Ok(Tagged::new(response.result, ()))
    }

    pub async fn run_status(&mut self) -> Result<Tagged<RunStatus>> {
        let response = self.0.send_request(CommandCode::RunStatus, &[], I32_REPLY).await?;
        Ok(Tagged::new(response.result, RunStatus::try_from(response.fields.i32(0)?)?))
    }

    /// Remaining value of a timer while acquiring.
    pub async fn time_left(&mut self, timer: TimerType) -> Result<Tagged<i64>> {
        let args = [Arg::I32(timer.as_i32())];
        let response = self.0.send_request(CommandCode::TimeLeft, &args, I64_REPLY).await?;
        Ok(Tagged::new(response.result, response.fields.i64(0)?))
    }
}
