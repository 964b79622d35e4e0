use nix::errno::Errno;
use std::fmt::Display;
use std::io;
use std::path::PathBuf;
use strum::Display as StrumDisplay;
use thiserror::Error;

/// Which step of opening or configuring a device failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
#[strum(serialize_all = "snake_case")]
pub enum ConfigStep {
    BindAddress,
    BaudRate,
    ClearNonBlocking,
    GetAttributes,
    SetSpeed,
    ApplyAttributes,
    ModemLines,
    ChannelIndex,
    ChannelSpeed,
    SpiMode,
    SpiBitsPerWord,
    SpiMaxSpeed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Read,
    Write,
    Transfer,
    Query,
    Flush,
    Close,
}

/// What an operation was addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Device,
    Register(u8),
    Channel(u8),
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Device => write!(f, "device"),
            Target::Register(reg) => write!(f, "register 0x{:02X}", reg),
            Target::Channel(channel) => write!(f, "channel {}", channel),
        }
    }
}

/// The underlying reason for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The kernel rejected the call.
    Os(Errno),
    /// Fewer bytes moved than were requested.
    ShortCount { done: usize, expected: usize },
    /// A caller-supplied value is outside what the bus accepts.
    OutOfRange(u32),
    /// A required setting was never provided.
    Unset,
}

impl Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::Os(errno) => write!(f, "{}", errno),
            Fault::ShortCount { done, expected } => {
                write!(f, "short count: {} of {} bytes", done, expected)
            }
            Fault::OutOfRange(value) => write!(f, "value {} is out of range", value),
            Fault::Unset => write!(f, "setting was never provided"),
        }
    }
}

impl From<Errno> for Fault {
    fn from(value: Errno) -> Self {
        Fault::Os(value)
    }
}

impl From<&io::Error> for Fault {
    fn from(value: &io::Error) -> Self {
        Fault::Os(Errno::from_raw(value.raw_os_error().unwrap_or(0)))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusError {
    /// The device node is missing or cannot be accessed.
    #[error("failed to open {}: {fault}", .path.display())]
    OpenFailure { path: PathBuf, fault: Fault },

    /// Opening succeeded but setup did not. No usable handle survives this error.
    #[error("failed to configure {}: {step}: {fault}", .path.display())]
    ConfigurationFailure {
        path: PathBuf,
        step: ConfigStep,
        fault: Fault,
    },

    #[error("{op} on {target} failed: {fault}")]
    TransferFailure {
        op: Operation,
        target: Target,
        fault: Fault,
    },
}

impl BusError {
    pub fn configuration(path: impl Into<PathBuf>, step: ConfigStep, fault: impl Into<Fault>) -> Self {
        BusError::ConfigurationFailure {
            path: path.into(),
            step,
            fault: fault.into(),
        }
    }

    pub fn transfer(op: Operation, target: Target, fault: impl Into<Fault>) -> Self {
        BusError::TransferFailure {
            op,
            target,
            fault: fault.into(),
        }
    }

    /// The kernel error code behind this failure, if there is one.
    pub fn errno(&self) -> Option<Errno> {
        let fault = match self {
            BusError::OpenFailure { fault, .. } => fault,
            BusError::ConfigurationFailure { fault, .. } => fault,
            BusError::TransferFailure { fault, .. } => fault,
        };

        match fault {
            Fault::Os(errno) => Some(*errno),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
