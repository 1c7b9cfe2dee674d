//! Acquisition driven by a background task.
//!
//! One worker per run pulls frames from the session and queues them; the
//! caller consumes the queue at its own pace and may stop at any time.
//! With a progress interval set, the worker also queues a progress report
//! whenever no frame arrived for that long, and a last one after FINISHED.

use super::progress::ProgressReport;
use super::session::{Acquisition, SessionState, StopHandle};
use crate::detector::Detector;
use crate::error::{DetectorError, Result};
use crate::frame::Frame;
use crate::protocol::AcquisitionInfo;
use crate::transport::Dialer;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

/// Item delivered to the consumer.
#[derive(Debug)]
pub enum FrameEvent {
    Frame(Frame),
    Progress(ProgressReport),
    /// The run ended on an error; always the last event
    Failed(DetectorError),
}

/// Acquisition whose frames are produced on a background task.
pub struct BackgroundAcquisition<D: Dialer> {
    session: Option<Acquisition<D>>,
    stop: StopHandle<D>,
    events: Option<UnboundedReceiver<FrameEvent>>,
    worker: Option<JoinHandle<()>>,
    progress_interval: Option<Duration>,
}

impl<D: Dialer> BackgroundAcquisition<D> {
    pub fn new(session: Acquisition<D>) -> Self {
        Self {
            stop: session.stop_handle(),
            session: Some(session),
            events: None,
            worker: None,
            progress_interval: None,
        }
    }

    /// Queue a progress report every `interval` without frames. A zero
    /// interval disables reports.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// See [`Acquisition::prepare`].
    pub async fn prepare(&mut self) -> Result<&AcquisitionInfo> {
        self.session_mut()?.prepare().await
    }

    /// Send START, then hand the session to a worker task.
    ///
    /// START is acknowledged on the caller's task; a failure here leaves no
    /// worker behind.
    pub async fn start(&mut self) -> Result<()> {
        self.session_mut()?.start().await?;
        let session = self
            .session
            .take()
            .ok_or_else(|| DetectorError::InvalidState("acquisition already started".to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(rx);
        self.worker = Some(tokio::spawn(produce_frames(session, tx, self.progress_interval)));
        debug!("Acquisition worker started");
        Ok(())
    }

    /// Next queued event; `None` once the worker has ended and the queue is drained.
    pub async fn next_event(&mut self) -> Option<FrameEvent> {
        self.events.as_mut()?.recv().await
    }

    /// Next queued event without waiting.
    pub fn try_next_event(&mut self) -> Option<FrameEvent> {
        let events = self.events.as_mut()?;
        match events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Request a stop from the caller's task. The worker is not awaited.
    pub async fn stop(&self) -> Result<()> {
        self.stop.stop().await
    }

    pub fn stop_handle(&self) -> StopHandle<D> {
        self.stop.clone()
    }

    /// Whether the worker task is still producing.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|worker| !worker.is_finished())
    }

    /// Wait for the worker to end.
    pub async fn join(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        worker.await.map_err(|e| {
            error!("Acquisition worker failed: {e}");
            DetectorError::Worker(e.to_string())
        })
    }

    fn session_mut(&mut self) -> Result<&mut Acquisition<D>> {
        self.session
            .as_mut()
            .ok_or_else(|| DetectorError::InvalidState("acquisition already started".to_string()))
    }
}

/// Progress timer of one run, with what a report needs.
struct ProgressTimer<D: Dialer> {
    ticker: Interval,
    detector: Detector<D>,
    info: AcquisitionInfo,
}

async fn produce_frames<D: Dialer>(
    mut session: Acquisition<D>,
    events: UnboundedSender<FrameEvent>,
    progress_interval: Option<Duration>,
) {
    let mut progress = match (progress_interval, session.info()) {
        (Some(period), Some(info)) => {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(ProgressTimer {
                ticker,
                detector: session.detector().clone(),
                info: info.clone(),
            })
        }
        _ => None,
    };

    loop {
        if let Some(progress) = progress.as_mut() {
            tokio::select! {
                biased;
                _ = session.frame_ready() => {}
                _ = progress.ticker.tick() => {
                    if !queue_progress(&progress.detector, &progress.info, &events).await {
                        return;
                    }
                    continue;
                }
            }
        }

        match session.next_frame().await {
            Ok(Some(frame)) => {
                if events.send(FrameEvent::Frame(frame)).is_err() {
                    // Consumer gone; dropping the session stops the device.
                    debug!("Frame consumer dropped");
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = events.send(FrameEvent::Failed(e));
                break;
            }
        }
    }

    match session.state() {
        SessionState::Failed => info!("Acquisition worker ended on failure"),
        state => {
            if let (SessionState::Finished, Some(progress)) = (state, &progress) {
                queue_progress(&progress.detector, &progress.info, &events).await;
            }
            info!("Acquisition worker done ({state:?}), {} frame(s)", session.frames_received());
        }
    }
}

/// Queue one progress report. Returns false once the consumer is gone.
///
/// A failed stop-port query skips the report; the frame stream decides
/// how the run ends.
async fn queue_progress<D: Dialer>(
    detector: &Detector<D>,
    info: &AcquisitionInfo,
    events: &UnboundedSender<FrameEvent>,
) -> bool {
    match detector.progress_report(info).await {
        Ok(report) => events.send(FrameEvent::Progress(report)).is_ok(),
        Err(e) => {
            warn!("Progress query failed: {e}");
            !events.is_closed()
        }
    }
}
