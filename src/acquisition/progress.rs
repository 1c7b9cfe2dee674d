//! Progress of a running acquisition.

use crate::protocol::AcquisitionInfo;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// The server reports frame and cycle counters two below the remaining count.
const COUNTER_OFFSET: i64 = 2;

/// Snapshot built from the stop-port TIME_LEFT counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressReport {
    pub timestamp: DateTime<Utc>,
    pub nb_frames: i64,
    pub nb_cycles: i64,
    pub nb_frames_left: i64,
    pub nb_cycles_left: i64,
    pub nb_frames_finished: i64,
    pub nb_cycles_finished: i64,
    /// 1-based frame within the current cycle
    pub current_frame: i64,
    /// 1-based cycle
    pub current_cycle: i64,
    pub total_frames_finished: i64,
    pub exposure_time_left: Duration,
    /// Exposure elapsed in the current frame
    pub exposure_time: Duration,
}

impl ProgressReport {
    /// Build a report from raw TIME_LEFT values.
    pub fn from_counters(info: &AcquisitionInfo, frames_left: i64, cycles_left: i64, exposure_left: Duration) -> Self {
        let nb_frames = info.nb_frames.max(1);
        let nb_cycles = info.nb_cycles.max(1);
        let nb_frames_left = frames_left.saturating_add(COUNTER_OFFSET);
        let nb_cycles_left = cycles_left.saturating_add(COUNTER_OFFSET);
        let nb_frames_finished = nb_frames.saturating_sub(nb_frames_left);
        let nb_cycles_finished = nb_cycles.saturating_sub(nb_cycles_left);

        Self {
            timestamp: Utc::now(),
            nb_frames,
            nb_cycles,
            nb_frames_left,
            nb_cycles_left,
            nb_frames_finished,
            nb_cycles_finished,
            current_frame: nb_frames_finished.saturating_add(1),
            current_cycle: nb_cycles_finished.saturating_add(1),
            total_frames_finished: nb_cycles_finished
                .saturating_mul(nb_frames)
                .saturating_add(nb_frames_finished),
            exposure_time_left: exposure_left,
            exposure_time: info.exposure_time.saturating_sub(exposure_left),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(nb_frames: i64, nb_cycles: i64) -> AcquisitionInfo {
        AcquisitionInfo {
            last_client_ip: "127.0.0.1".to_string(),
            nb_modules: 1,
            dynamic_range: 16,
            data_bytes: 8,
            settings: 0,
            energy_threshold: 5000,
            nb_frames,
            exposure_time: Duration::from_millis(100),
            frame_period: Duration::ZERO,
            delay_after_trigger: Duration::ZERO,
            nb_gates: 0,
            nb_probes: 0,
            nb_cycles,
        }
    }

    #[test]
    fn test_counters_mid_run() {
        // Second cycle of 2, third frame of 5.
        let report = ProgressReport::from_counters(&info(5, 2), 1, -1, Duration::from_millis(40));
        assert_eq!(report.nb_frames_left, 3);
        assert_eq!(report.nb_cycles_left, 1);
        assert_eq!(report.nb_frames_finished, 2);
        assert_eq!(report.nb_cycles_finished, 1);
        assert_eq!(report.current_frame, 3);
        assert_eq!(report.current_cycle, 2);
        assert_eq!(report.total_frames_finished, 7);
        assert_eq!(report.exposure_time, Duration::from_millis(60));
    }

    #[test]
    fn test_zero_counts_treated_as_one() {
        let report = ProgressReport::from_counters(&info(0, 0), -2, -2, Duration::ZERO);
        assert_eq!(report.nb_frames, 1);
        assert_eq!(report.current_frame, 1);
        assert_eq!(report.total_frames_finished, 0);
        assert_eq!(report.exposure_time, Duration::from_millis(100));
    }

    #[test]
    fn test_extreme_counters_do_not_overflow() {
        let report = ProgressReport::from_counters(&info(i64::MAX, i64::MAX), i64::MIN, i64::MIN, Duration::MAX);
        assert_eq!(report.total_frames_finished, i64::MAX);
        assert_eq!(report.exposure_time, Duration::ZERO);
    }
}
