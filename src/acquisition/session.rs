//! Acquisition session state machine.
//!
//! `Idle → Prepared → Acquiring → {Finished | Stopping → Idle | Failed}`.
//! The session owns its control connection from START until the frame
//! stream ends; frames are pulled one at a time with [`Acquisition::next_frame`].

use super::progress::ProgressReport;
use crate::detector::Detector;
use crate::error::{DetectorError, Result};
use crate::frame::{self, DynamicRange, Frame};
use crate::protocol::{AcquisitionInfo, ControlChannel, ResultType, TimingMode};
use crate::transport::Dialer;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Parameters applied to the device before an acquisition.
///
/// Unset options leave the device value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquisitionRequest {
    pub nb_frames: Option<i64>,
    pub nb_cycles: Option<i64>,
    pub exposure_time: Option<Duration>,
    pub frame_period: Option<Duration>,
    pub delay_after_trigger: Option<Duration>,
    pub nb_gates: Option<i64>,
    pub dynamic_range: Option<DynamicRange>,
    pub timing_mode: Option<TimingMode>,
    pub energy_threshold: Option<i32>,
}

impl AcquisitionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nb_frames(mut self, frames: i64) -> Self {
        self.nb_frames = Some(frames);
        self
    }

    pub fn nb_cycles(mut self, cycles: i64) -> Self {
        self.nb_cycles = Some(cycles);
        self
    }

    pub fn exposure_time(mut self, exposure: Duration) -> Self {
        self.exposure_time = Some(exposure);
        self
    }

    pub fn frame_period(mut self, period: Duration) -> Self {
        self.frame_period = Some(period);
        self
    }

    pub fn delay_after_trigger(mut self, delay: Duration) -> Self {
        self.delay_after_trigger = Some(delay);
        self
    }

    pub fn nb_gates(mut self, gates: i64) -> Self {
        self.nb_gates = Some(gates);
        self
    }

    pub fn dynamic_range(mut self, dynamic_range: DynamicRange) -> Self {
        self.dynamic_range = Some(dynamic_range);
        self
    }

    pub fn timing_mode(mut self, mode: TimingMode) -> Self {
        self.timing_mode = Some(mode);
        self
    }

    pub fn energy_threshold(mut self, energy: i32) -> Self {
        self.energy_threshold = Some(energy);
        self
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Prepared = 1,
    Acquiring = 2,
    /// Stop requested while acquiring; the stream has not ended yet
    Stopping = 3,
    Finished = 4,
    Failed = 5,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Prepared,
            2 => SessionState::Acquiring,
            3 => SessionState::Stopping,
            4 => SessionState::Finished,
            5 => SessionState::Failed,
            _ => SessionState::Idle,
        }
    }

    /// Whether the session has reached an end state.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Failed)
    }
}

/// State visible to stop handles on other tasks.
#[derive(Debug)]
struct Shared {
    stopping: AtomicBool,
    phase: AtomicU8,
}

impl Shared {
    fn phase(&self) -> SessionState {
        SessionState::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, state: SessionState) {
        self.phase.store(state as u8, Ordering::Release);
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

/// Requests an external stop of a running session.
///
/// STOP goes out on the stop port, never on the control connection the
/// session may be blocked on.
pub struct StopHandle<D: Dialer> {
    detector: Detector<D>,
    shared: Arc<Shared>,
}

impl<D: Dialer> Clone for StopHandle<D> {
    fn clone(&self) -> Self {
        Self {
            detector: self.detector.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: Dialer> StopHandle<D> {
    /// Stop the acquisition.
    ///
    /// Returns once the stop port acknowledged, without waiting for the
    /// session to observe it. A no-op unless the session is acquiring and
    /// no stop is already in flight.
    pub async fn stop(&self) -> Result<()> {
        let phase = self.shared.phase();
        if phase != SessionState::Acquiring {
            debug!("Stop ignored in state {phase:?}");
            return Ok(());
        }
        // The flag must be visible before STOP can make the control read fail.
        if self.shared.stopping.swap(true, Ordering::AcqRel) {
            debug!("Stop already requested");
            return Ok(());
        }

        if let Err(e) = self.detector.stop_acquisition().await {
            error!("Stop request failed: {e}");
            self.shared.stopping.store(false, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }

    /// Whether a stop has been requested for the current run.
    pub fn is_stopping(&self) -> bool {
        self.shared.is_stopping()
    }
}

/// Values latched at START and used for every frame of the run.
#[derive(Debug, Clone, Copy)]
struct Latched {
    dynamic_range: DynamicRange,
    data_bytes: usize,
    total_frames: u64,
}

enum Step {
    Frame(Frame),
    Finished,
}

/// One acquisition on one detector.
pub struct Acquisition<D: Dialer> {
    detector: Detector<D>,
    request: AcquisitionRequest,
    info: Option<AcquisitionInfo>,
    control: Option<ControlChannel<D::Stream>>,
    latched: Option<Latched>,
    frames_received: u64,
    shared: Arc<Shared>,
}

impl<D: Dialer> Acquisition<D> {
    pub fn new(detector: Detector<D>, request: AcquisitionRequest) -> Self {
        Self {
            detector,
            request,
            info: None,
            control: None,
            latched: None,
            frames_received: 0,
            shared: Arc::new(Shared {
                stopping: AtomicBool::new(false),
                phase: AtomicU8::new(SessionState::Idle as u8),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        let phase = self.shared.phase();
        if phase == SessionState::Acquiring && self.shared.is_stopping() {
            SessionState::Stopping
        } else {
            phase
        }
    }

    /// Device info checked by the last successful `prepare`.
    pub fn info(&self) -> Option<&AcquisitionInfo> {
        self.info.as_ref()
    }

    pub fn request(&self) -> &AcquisitionRequest {
        &self.request
    }

    pub fn detector(&self) -> &Detector<D> {
        &self.detector
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn stop_handle(&self) -> StopHandle<D> {
        StopHandle {
            detector: self.detector.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// See [`StopHandle::stop`].
    pub async fn stop(&self) -> Result<()> {
        self.stop_handle().stop().await
    }

    /// Apply the request to the device and check what it echoes back.
    ///
    /// A frame or cycle count that differs from the request is a
    /// configuration mismatch and the session stays idle.
    pub async fn prepare(&mut self) -> Result<&AcquisitionInfo> {
        self.ensure_not_running()?;
        self.info = None;
        self.shared.set_phase(SessionState::Idle);

        let detector = &self.detector;
        let request = &self.request;
        if let Some(dynamic_range) = request.dynamic_range {
            detector.set_dynamic_range(dynamic_range).await?;
        }
        if let Some(exposure) = request.exposure_time {
            detector.set_exposure_time(exposure).await?;
        }
        if let Some(period) = request.frame_period {
            detector.set_frame_period(period).await?;
        }
        if let Some(delay) = request.delay_after_trigger {
            detector.set_delay_after_trigger(delay).await?;
        }
        if let Some(gates) = request.nb_gates {
            detector.set_nb_gates(gates).await?;
        }
        if let Some(mode) = request.timing_mode {
            detector.set_timing_mode(mode).await?;
        }
        if let Some(energy) = request.energy_threshold {
            detector.set_energy_threshold(energy).await?;
        }
        if let Some(frames) = request.nb_frames {
            detector.set_nb_frames(frames).await?;
        }
        if let Some(cycles) = request.nb_cycles {
            detector.set_nb_cycles(cycles).await?;
        }

        let info = detector.update_client().await?;
        check_echo("nb_frames", request.nb_frames, info.nb_frames)?;
        check_echo("nb_cycles", request.nb_cycles, info.nb_cycles)?;

        info!(
            "Acquisition prepared: {} frame(s) x {} cycle(s), {} bytes/frame at {} bits",
            info.nb_frames, info.nb_cycles, info.data_bytes, info.dynamic_range
        );
        self.shared.set_phase(SessionState::Prepared);
        Ok(self.info.insert(info))
    }

    /// Send START and return once the acquisition is live.
    ///
    /// Prepares first when needed. Dialing and sending START are bounded by
    /// the detector's live timeout; no frame is read here.
    pub async fn start(&mut self) -> Result<()> {
        if self.shared.phase() != SessionState::Prepared {
            self.prepare().await?;
        }
        let info = self
            .info
            .as_ref()
            .ok_or_else(|| DetectorError::InvalidState("acquisition not prepared".to_string()))?;
        let latched = latch(info)?;

        let live_timeout = self.detector.live_timeout();
        let control = timeout(live_timeout, async {
            let mut control = ControlChannel::open(self.detector.dialer()).await?;
            control.start_and_read_all().await?;
            Ok::<_, DetectorError>(control)
        })
        .await
        .map_err(|_| DetectorError::Timeout(format!("acquisition not live within {live_timeout:?}")))??;

        self.control = Some(control);
        self.latched = Some(latched);
        self.frames_received = 0;
        self.shared.stopping.store(false, Ordering::Release);
        self.shared.set_phase(SessionState::Acquiring);
        info!("Acquisition live, expecting {} frame(s)", latched.total_frames);
        Ok(())
    }

    /// Wait for the next frame.
    ///
    /// Returns `Ok(None)` once the run has finished or was stopped. A device
    /// failure is returned once; later calls return `Ok(None)`.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(latched) = self.latched else {
            return Ok(None);
        };
        if self.shared.phase() != SessionState::Acquiring {
            return Ok(None);
        }
        if self.shared.is_stopping() {
            self.end_stopped(None);
            return Ok(None);
        }

        match self.read_step(latched).await {
            Ok(Step::Frame(frame)) => {
                self.frames_received += 1;
                debug!("Frame {} of {}", self.frames_received, latched.total_frames);
                Ok(Some(frame))
            }
            Ok(Step::Finished) => {
                self.end_finished().await;
                Ok(None)
            }
            Err(e) if self.shared.is_stopping() => {
                self.end_stopped(Some(&e));
                Ok(None)
            }
            Err(e) => {
                self.end_failed(&e).await;
                Err(e)
            }
        }
    }

    /// Query the stop port for the progress of the current run.
    pub async fn progress_report(&self) -> Result<ProgressReport> {
        let info = self
            .info
            .as_ref()
            .ok_or_else(|| DetectorError::InvalidState("acquisition not prepared".to_string()))?;
        self.detector.progress_report(info).await
    }

    /// Wait until the next reply tag is readable, without consuming it.
    ///
    /// Cancel safe, so it can be raced against a timer before `next_frame`.
    /// Read errors are left for `next_frame` to report.
    pub(crate) async fn frame_ready(&mut self) {
        if self.shared.is_stopping() || self.shared.phase() != SessionState::Acquiring {
            return;
        }
        if let Some(control) = self.control.as_mut() {
            let _ = control.0.wait_readable().await;
        }
    }

    /// Start, drain every frame and return them in order.
    pub async fn run(mut self) -> Result<Vec<Frame>> {
        self.start().await?;
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame().await? {
            frames.push(frame);
        }
        Ok(frames)
    }

    async fn read_step(&mut self, latched: Latched) -> Result<Step> {
        let control = self
            .control
            .as_mut()
            .ok_or_else(|| DetectorError::InvalidState("no control connection".to_string()))?;

        match control.0.read_result().await? {
            ResultType::Ok => {
                if self.frames_received >= latched.total_frames {
                    return Err(DetectorError::protocol(format!(
                        "device sent more than the {} requested frame(s)",
                        latched.total_frames
                    )));
                }
                let payload = control.0.read_bytes(latched.data_bytes).await?;
                let data = frame::decode(&payload, latched.dynamic_range)?;
                Ok(Step::Frame(Frame::new(self.frames_received, data)))
            }
            ResultType::Finished => Ok(Step::Finished),
            ResultType::Fail => {
                let message = control.0.read_message().await?;
                Err(DetectorError::Protocol(message))
            }
            ResultType::ForceUpdate => Err(DetectorError::protocol("unexpected FORCE_UPDATE in frame stream")),
        }
    }

    async fn end_finished(&mut self) {
        info!("Acquisition finished after {} frame(s)", self.frames_received);
        self.stop_on_control().await;
        self.shared.set_phase(SessionState::Finished);
    }

    fn end_stopped(&mut self, cause: Option<&DetectorError>) {
        match cause {
            Some(e) => debug!("Ignoring {e} after requested stop"),
            None => debug!("Stop observed before next read"),
        }
        info!("Acquisition stopped after {} frame(s)", self.frames_received);
        self.control = None;
        self.shared.set_phase(SessionState::Idle);
    }

    async fn end_failed(&mut self, cause: &DetectorError) {
        error!("Acquisition failed after {} frame(s): {cause}", self.frames_received);
        match cause {
            // The device spoke, so the control connection is still in step.
            DetectorError::Protocol(_) => self.stop_on_control().await,
            _ => {
                self.control = None;
                if let Err(e) = self.detector.stop_acquisition().await {
                    warn!("Stop after failure not acknowledged: {e}");
                }
            }
        }
        self.shared.set_phase(SessionState::Failed);
    }

    /// Write STOP on the control connection and release it.
    async fn stop_on_control(&mut self) {
        if let Some(mut control) = self.control.take() {
            if let Err(e) = control.write_stop().await {
                warn!("STOP on control connection failed: {e}");
            }
        }
    }

    fn ensure_not_running(&self) -> Result<()> {
        match self.shared.phase() {
            SessionState::Acquiring => Err(DetectorError::InvalidState("acquisition already running".to_string())),
            _ => Ok(()),
        }
    }
}

impl<D: Dialer> Drop for Acquisition<D> {
    fn drop(&mut self) {
        if self.shared.phase() != SessionState::Acquiring || self.shared.is_stopping() {
            return;
        }
        // Closing the control socket mid-run leaves the detector hanging.
        warn!("Acquisition dropped while running, sending STOP");
        self.shared.stopping.store(true, Ordering::Release);
        self.control = None;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let detector = self.detector.clone();
            handle.spawn(async move {
                if let Err(e) = detector.stop_acquisition().await {
                    warn!("Stop of dropped acquisition failed: {e}");
                }
            });
        }
    }
}

fn check_echo(field: &'static str, requested: Option<i64>, echoed: i64) -> Result<()> {
    match requested {
        Some(requested) if requested != echoed => {
            error!("Device echoed {field}={echoed}, requested {requested}");
            Err(DetectorError::ConfigurationMismatch {
                field,
                requested,
                echoed,
            })
        }
        _ => Ok(()),
    }
}

fn latch(info: &AcquisitionInfo) -> Result<Latched> {
    let dynamic_range = DynamicRange::try_from(info.dynamic_range)?;
    let data_bytes = usize::try_from(info.data_bytes)
        .map_err(|_| DetectorError::decode(format!("negative frame size {}", info.data_bytes)))?;
    frame::element_layout(dynamic_range.bits(), data_bytes)?;
    Ok(Latched {
        dynamic_range,
        data_bytes,
        total_frames: info.total_frames(),
    })
}
