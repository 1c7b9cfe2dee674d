//! High-level detector handle.
//!
//! Each call dials a fresh connection, performs one request and drops it,
//! bounded by the request timeout. A FORCE_UPDATE reply tag means another
//! client touched the detector; the cached [`AcquisitionInfo`] is refreshed
//! before the call returns.

use crate::acquisition::{Acquisition, AcquisitionRequest, ProgressReport};
use crate::config::DetectorConfig;
use crate::error::{DetectorError, Result};
use crate::frame::DynamicRange;
use crate::protocol::{
    ALL_MODULES, AcquisitionInfo, ControlChannel, DetectorSettings, DetectorType, Dimension, GET_CODE, IdParam,
    ResultType, RunStatus, StopChannel, Tagged, TimerType, TimingMode, nanos, to_nanos,
};
use crate::transport::{Dialer, TcpDialer};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default bound on one request/reply round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on dialing and sending START.
pub const DEFAULT_LIVE_TIMEOUT: Duration = Duration::from_secs(5);

struct Inner<D> {
    dialer: D,
    request_timeout: Duration,
    live_timeout: Duration,
    info: Mutex<Option<AcquisitionInfo>>,
}

/// Cloneable handle to one detector server.
pub struct Detector<D: Dialer> {
    inner: Arc<Inner<D>>,
}

impl<D: Dialer> Clone for Detector<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Detector<TcpDialer> {
    /// Build a TCP detector handle from configuration.
    pub fn from_config(config: &DetectorConfig) -> Self {
        let dialer = TcpDialer::new(&config.host, config.ctrl_port, config.stop_port, config.request_timeout());
        Self::new(dialer, config.request_timeout(), config.live_timeout())
    }
}

impl<D: Dialer> Detector<D> {
    pub fn new(dialer: D, request_timeout: Duration, live_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                dialer,
                request_timeout,
                live_timeout,
                info: Mutex::new(None),
            }),
        }
    }

    pub fn dialer(&self) -> &D {
        &self.inner.dialer
    }

    pub fn live_timeout(&self) -> Duration {
        self.inner.live_timeout
    }

    /// Last info fetched from the device, if any.
    pub fn cached_info(&self) -> Option<AcquisitionInfo> {
        self.inner.info.lock().ok().and_then(|guard| guard.clone())
    }

    /// Prepare an acquisition on this detector.
    pub fn acquisition(&self, request: AcquisitionRequest) -> Acquisition<D> {
        Acquisition::new(self.clone(), request)
    }

    // Control port -----------------------------------------------------------

    /// Fetch the acquisition-relevant state and cache it.
    pub async fn update_client(&self) -> Result<AcquisitionInfo> {
        let reply = self
            .bounded("update client", async {
                let mut ctrl = ControlChannel::open(self.dialer()).await?;
                ctrl.update_client().await
            })
            .await?;

        let info = reply.value;
        debug!(
            "Detector info: dr={} data_bytes={} frames={} cycles={}",
            info.dynamic_range, info.data_bytes, info.nb_frames, info.nb_cycles
        );
        if let Ok(mut cached) = self.inner.info.lock() {
            *cached = Some(info.clone());
        }
        Ok(info)
    }

    pub async fn detector_type(&self) -> Result<DetectorType> {
        let reply = self
            .bounded("detector type", async {
                let mut ctrl = ControlChannel::open(self.dialer()).await?;
                ctrl.detector_type().await
            })
            .await?;
        self.refresh_if_forced(reply).await
    }

    pub async fn get_id(&self, param: IdParam, module: Option<i32>) -> Result<i64> {
        let reply = self
            .bounded("get id", async {
                let mut ctrl = ControlChannel::open(self.dialer()).await?;
                ctrl.get_id(param, module).await
            })
            .await?;
        self.refresh_if_forced(reply).await
    }

    pub async fn serial_number(&self) -> Result<i64> {
        self.get_id(IdParam::DetectorSerialNumber, None).await
    }

    pub async fn firmware_version(&self) -> Result<i64> {
        self.get_id(IdParam::DetectorFirmwareVersion, None).await
    }

    pub async fn software_version(&self) -> Result<i64> {
        self.get_id(IdParam::DetectorSoftwareVersion, None).await
    }

    pub async fn module_serial_number(&self, module: i32) -> Result<i64> {
        self.get_id(IdParam::ModuleSerialNumber, Some(module)).await
    }

    /// Raw timer access; `value == GET_CODE` reads.
    pub async fn timer(&self, timer: TimerType, value: i64) -> Result<i64> {
        let reply = self
            .bounded("timer", async {
                let mut ctrl = ControlChannel::open(self.dialer()).await?;
                ctrl.timer(timer, value).await
            })
            .await?;
        self.refresh_if_forced(reply).await
    }

    pub async fn nb_frames(&self) -> Result<i64> {
        self.timer(TimerType::NbFrames, i64::from(GET_CODE)).await
    }

    pub async fn set_nb_frames(&self, frames: i64) -> Result<i64> {
        self.timer(TimerType::NbFrames, frames).await
    }

    pub async fn nb_cycles(&self) -> Result<i64> {
        self.timer(TimerType::NbCycles, i64::from(GET_CODE)).await
    }

    pub async fn set_nb_cycles(&self, cycles: i64) -> Result<i64> {
        self.timer(TimerType::NbCycles, cycles).await
    }

    pub async fn nb_gates(&self) -> Result<i64> {
        self.timer(TimerType::NbGates, i64::from(GET_CODE)).await
    }

    pub async fn set_nb_gates(&self, gates: i64) -> Result<i64> {
        self.timer(TimerType::NbGates, gates).await
    }

    pub async fn exposure_time(&self) -> Result<Duration> {
        self.time_timer(TimerType::AcquisitionTime, None).await
    }

    pub async fn set_exposure_time(&self, value: Duration) -> Result<Duration> {
        self.time_timer(TimerType::AcquisitionTime, Some(value)).await
    }

    pub async fn frame_period(&self) -> Result<Duration> {
        self.time_timer(TimerType::FramePeriod, None).await
    }

    pub async fn set_frame_period(&self, value: Duration) -> Result<Duration> {
        self.time_timer(TimerType::FramePeriod, Some(value)).await
    }

    pub async fn delay_after_trigger(&self) -> Result<Duration> {
        self.time_timer(TimerType::DelayAfterTrigger, None).await
    }

    pub async fn set_delay_after_trigger(&self, value: Duration) -> Result<Duration> {
        self.time_timer(TimerType::DelayAfterTrigger, Some(value)).await
    }

    async fn time_timer(&self, timer: TimerType, value: Option<Duration>) -> Result<Duration> {
        let raw = value.map_or(i64::from(GET_CODE), to_nanos);
        Ok(nanos(self.timer(timer, raw).await?))
    }

    /// Current dynamic range; the device's 32 is presented as 24.
    pub async fn dynamic_range(&self) -> Result<DynamicRange> {
        let bits = self.raw_dynamic_range(GET_CODE).await?;
        presented_dynamic_range(bits)
    }

    pub async fn set_dynamic_range(&self, value: DynamicRange) -> Result<DynamicRange> {
        let bits = self.raw_dynamic_range(value.wire_value()).await?;
        presented_dynamic_range(bits)
    }

    async fn raw_dynamic_range(&self, value: i32) -> Result<i32> {
        let reply = self
            .bounded("dynamic range", async {
                let mut ctrl = ControlChannel::open(self.dialer()).await?;
                ctrl.dynamic_range(value).await
            })
            .await?;
        self.refresh_if_forced(reply).await
    }

    pub async fn settings(&self, module: i32) -> Result<DetectorSettings> {
        self.raw_settings(GET_CODE, module).await
    }

    pub async fn set_settings(&self, module: i32, value: DetectorSettings) -> Result<DetectorSettings> {
        self.raw_settings(value.as_i32(), module).await
    }

    async fn raw_settings(&self, value: i32, module: i32) -> Result<DetectorSettings> {
        let reply = self
            .bounded("settings", async {
                let mut ctrl = ControlChannel::open(self.dialer()).await?;
                ctrl.settings(value, module).await
            })
            .await?;
        self.refresh_if_forced(reply).await
    }

    /// Energy threshold common to all modules.
    pub async fn energy_threshold(&self) -> Result<i32> {
        let reply = self
            .bounded("energy threshold", async {
                let mut ctrl = ControlChannel::open(self.dialer()).await?;
                ctrl.energy_threshold(ALL_MODULES).await
            })
            .await?;
        self.refresh_if_forced(reply).await
    }

    pub async fn set_energy_threshold(&self, energy: i32) -> Result<i32> {
        let reply = self
            .bounded("set energy threshold", async {
                let mut ctrl = ControlChannel::open(self.dialer()).await?;
                ctrl.set_energy_threshold(ALL_MODULES, energy).await
            })
            .await?;
        self.refresh_if_forced(reply).await
    }

    pub async fn nb_modules(&self, dimension: Dimension) -> Result<i32> {
        self.raw_nb_modules(dimension, GET_CODE).await
    }

    pub async fn set_nb_modules(&self, dimension: Dimension, count: i32) -> Result<i32> {
        self.raw_nb_modules(dimension, count).await
    }

    async fn raw_nb_modules(&self, dimension: Dimension, value: i32) -> Result<i32> {
        let reply = self
            .bounded("modules", async {
                let mut ctrl = ControlChannel::open(self.dialer()).await?;
                ctrl.nb_modules(dimension, value).await
            })
            .await?;
        self.refresh_if_forced(reply).await
    }

    pub async fn timing_mode(&self) -> Result<TimingMode> {
        self.raw_timing_mode(GET_CODE).await
    }

    pub async fn set_timing_mode(&self, mode: TimingMode) -> Result<TimingMode> {
        self.raw_timing_mode(mode.as_i32()).await
    }

    async fn raw_timing_mode(&self, value: i32) -> Result<TimingMode> {
        let reply = self
            .bounded("timing mode", async {
                let mut ctrl = ControlChannel::open(self.dialer()).await?;
                ctrl.timing_mode(value).await
            })
            .await?;
        self.refresh_if_forced(reply).await
    }

    pub async fn lock_server(&self) -> Result<bool> {
        Ok(self.raw_lock_server(GET_CODE).await? != 0)
    }

    pub async fn set_lock_server(&self, locked: bool) -> Result<bool> {
        Ok(self.raw_lock_server(i32::from(locked)).await? != 0)
    }

    async fn raw_lock_server(&self, value: i32) -> Result<i32> {
        let reply = self
            .bounded("lock server", async {
                let mut ctrl = ControlChannel::open(self.dialer()).await?;
                ctrl.lock_server(value).await
            })
            .await?;
        self.refresh_if_forced(reply).await
    }

    pub async fn last_client_ip(&self) -> Result<String> {
        let reply = self
            .bounded("last client ip", async {
                let mut ctrl = ControlChannel::open(self.dialer()).await?;
                ctrl.last_client_ip().await
            })
            .await?;
        self.refresh_if_forced(reply).await
    }

    // Stop port --------------------------------------------------------------

    pub async fn run_status(&self) -> Result<RunStatus> {
        let reply = self
            .bounded("run status", async {
                let mut stop = StopChannel::open(self.dialer()).await?;
                stop.run_status().await
            })
            .await?;
        Ok(reply.value)
    }

    /// Send STOP on the stop port.
    pub async fn stop_acquisition(&self) -> Result<()> {
        info!("Sending STOP on stop port");
        self.bounded("stop acquisition", async {
            let mut stop = StopChannel::open(self.dialer()).await?;
            stop.stop_acquisition().await
        })
        .await?;
        Ok(())
    }

    pub async fn time_left(&self, timer: TimerType) -> Result<i64> {
        let reply = self
            .bounded("time left", async {
                let mut stop = StopChannel::open(self.dialer()).await?;
                stop.time_left(timer).await
            })
            .await?;
        Ok(reply.value)
    }

    /// Progress of the running acquisition described by `info`.
    pub async fn progress_report(&self, info: &AcquisitionInfo) -> Result<ProgressReport> {
        let cycles_left = self.time_left(TimerType::NbCycles).await?;
        let frames_left = self.time_left(TimerType::NbFrames).await?;
        let exposure_left = nanos(self.time_left(TimerType::AcquisitionTime).await?);
        Ok(ProgressReport::from_counters(info, frames_left, cycles_left, exposure_left))
    }

    // ------------------------------------------------------------------------

    async fn bounded<T>(&self, what: &str, request: impl Future<Output = Result<T>>) -> Result<T> {
        timeout(self.inner.request_timeout, request)
            .await
            .map_err(|_| DetectorError::Timeout(format!("{what}: no reply within {:?}", self.inner.request_timeout)))?
    }

    async fn refresh_if_forced<T>(&self, reply: Tagged<T>) -> Result<T> {
        if reply.result == ResultType::ForceUpdate {
            warn!("Device requested client update");
            self.update_client().await?;
        }
        Ok(reply.value)
    }
}

fn presented_dynamic_range(bits: i32) -> Result<DynamicRange> {
    if bits == 32 {
        return Ok(DynamicRange::Bits24);
    }
    DynamicRange::try_from(bits)
}
