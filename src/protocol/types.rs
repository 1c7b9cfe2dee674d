//! Detector protocol types and constants.

use crate::error::{DetectorError, Result};
use serde::Serialize;

// Default server ports
pub const DEFAULT_CTRL_PORT: u16 = 1952;
pub const DEFAULT_STOP_PORT: u16 = 1953;

/// Width of the NUL-padded client address field.
pub const INET_ADDRSTRLEN: usize = 16;

/// Argument value meaning "read the current value, don't set it".
pub const GET_CODE: i32 = -1;

/// Upper bound for a FAIL reply message.
pub const MAX_MESSAGE_LEN: usize = 1024;

/// Energy threshold module selector addressing every module.
pub const ALL_MODULES: i32 = -1;

/// Declares a closed `i32` wire enum with checked conversion from the raw value.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[repr(i32)]
        $vis enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl $name {
            /// Raw wire value.
            pub const fn as_i32(self) -> i32 {
                self as i32
            }
        }

        impl TryFrom<i32> for $name {
            type Error = DetectorError;

            fn try_from(value: i32) -> Result<Self> {
                match value {
                    $(v if v == $value => Ok(Self::$variant),)+
                    other => Err(DetectorError::protocol(format!(
                        concat!("unknown ", stringify!($name), " value {}"),
                        other
                    ))),
                }
            }
        }
    };
}

wire_enum! {
    /// Request opcodes, grouped by purpose.
    pub enum CommandCode {
        ExecCommand = 0,
        GetError = 1,

        // Configuration
        DetectorType = 2,
        NbModules = 3,
        GetMaxNumberOfModules = 4,
        ExternalSignal = 5,
        ExternalCommunicationMode = 6,

        // Tests and identification
        GetId = 7,
        DigitalTest = 8,
        AnalogTest = 9,
        EnableAnalogOut = 10,
        CalibrationPulse = 11,

        // Initialization
        SetDac = 12,
        GetAdc = 13,
        WriteRegister = 14,
        ReadRegister = 15,
        WriteMemory = 16,
        ReadMemory = 17,
        SetChannel = 18,
        GetChannel = 19,
        SetAllChannels = 20,
        SetChip = 21,
        GetChip = 22,
        SetAllChips = 23,
        SetModule = 24,
        GetModule = 25,
        SetAllModules = 26,
        Settings = 27,
        GetEnergyThreshold = 28,
        SetEnergyThreshold = 29,

        // Acquisition
        StartAcquisition = 30,
        StopAcquisition = 31,
        StartReadout = 32,
        RunStatus = 33,
        StartAndReadAll = 34,
        ReadFrame = 35,
        ReadAll = 36,

        // Acquisition setup
        Timer = 37,
        TimeLeft = 38,
        DynamicRange = 39,
        ReadoutFlags = 40,
        SetRoi = 41,
        Speed = 42,

        // Trimming
        ExecuteTrimming = 43,

        // Server administration
        ExitServer = 44,
        LockServer = 45,
        LastClientIp = 46,
        SetPort = 47,
        UpdateClient = 48,
        ConfigureMac = 49,
        LoadImage = 50,

        // Multi detector topology
        MasterMode = 51,
        SynchronizationMode = 52,
        ReadCounterBlock = 53,
        ResetCounterBlock = 54,
    }
}

wire_enum! {
    /// First field of every reply.
    pub enum ResultType {
        Ok = 0,
        Fail = 1,
        Finished = 2,
        ForceUpdate = 3,
    }
}

wire_enum! {
    /// Detector state reported on the stop port.
    pub enum RunStatus {
        /// Ready to start, no data in memory
        Idle = 0,
        /// Error, normally fifo full
        Error = 1,
        /// Waiting for trigger or gate signal
        Waiting = 2,
        /// Not running but data in memory
        Finished = 3,
        /// Running with data in memory
        Transmitting = 4,
        /// Running, no data in memory
        Running = 5,
    }
}

wire_enum! {
    pub enum TimerType {
        /// Frames per cycle; total acquisitions is frames * cycles
        NbFrames = 0,
        /// Exposure time
        AcquisitionTime = 1,
        /// Period between exposures
        FramePeriod = 2,
        /// Delay between trigger and start of exposure
        DelayAfterTrigger = 3,
        /// Gates per frame in gated mode
        NbGates = 4,
        /// Probe types in pump-probe mode
        NbProbes = 5,
        NbCycles = 6,
        ActualTime = 7,
        MeasurementTime = 8,
        /// Fraction of measurement elapsed, read only
        Progress = 9,
    }
}

impl TimerType {
    /// Whether the wire value of this timer is in nanoseconds.
    pub fn is_time(self) -> bool {
        matches!(
            self,
            Self::AcquisitionTime
                | Self::FramePeriod
                | Self::DelayAfterTrigger
                | Self::ActualTime
                | Self::MeasurementTime
        )
    }
}

wire_enum! {
    pub enum DetectorSettings {
        Standard = 0,
        Fast = 1,
        HighGain = 2,
        DynamicGain = 3,
        LowGain = 4,
        MediumGain = 5,
        VeryHighGain = 6,
        Undefined = 7,
        Uninitialized = 8,
    }
}

wire_enum! {
    pub enum DetectorType {
        Generic = 0,
        Mythen = 1,
        Pilatus = 2,
        Eiger = 3,
        Gotthard = 4,
        Picasso = 5,
        Agipd = 6,
        Moench = 7,
    }
}

wire_enum! {
    pub enum IdParam {
        ModuleSerialNumber = 0,
        ModuleFirmwareVersion = 1,
        DetectorSerialNumber = 2,
        DetectorFirmwareVersion = 3,
        DetectorSoftwareVersion = 4,
        ReceiverVersion = 5,
    }
}

wire_enum! {
    pub enum Dimension {
        X = 0,
        Y = 1,
    }
}

wire_enum! {
    /// External communication (timing) mode.
    pub enum TimingMode {
        AutoTiming = 0,
        TriggerExposure = 1,
        TriggerFrame = 2,
        TriggerReadout = 3,
        GateFixNumber = 4,
        GateWithStartTrigger = 5,
        TriggerWindow = 6,
    }
}

impl TimingMode {
    /// Short name used in configuration files and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::AutoTiming => "auto",
            Self::TriggerExposure => "trigger",
            Self::TriggerFrame => "trigger_frame",
            Self::TriggerReadout => "ro_trigger",
            Self::GateFixNumber => "gating",
            Self::GateWithStartTrigger => "triggered_gating",
            Self::TriggerWindow => "trigger_window",
        }
    }

    /// Parse a short name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        [
            Self::AutoTiming,
            Self::TriggerExposure,
            Self::TriggerFrame,
            Self::TriggerReadout,
            Self::GateFixNumber,
            Self::GateWithStartTrigger,
            Self::TriggerWindow,
        ]
        .into_iter()
        .find(|mode| mode.name() == name)
    }
}
