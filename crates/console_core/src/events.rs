use serde_json::Value;
use shared::{
    domain::{DeviceKind, JobId},
    protocol::JobStatus,
};

use crate::session::ChannelState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Lora,
    Iridium,
}

/// Everything the operator-facing layer can observe. The console binary
/// renders these; nothing in the core ever touches presentation state.
#[derive(Debug, Clone)]
pub enum ConsoleEvent {
    /// Styled line for the operator log.
    Log { level: LogLevel, message: String },
    /// Structured radio packet, rendered as a block.
    Packet { kind: PacketKind, body: String },
    /// A display field was updated from an inbound frame. `field` is the
    /// path with separators folded to `_` (`wifi/ssid` -> `wifi_ssid`).
    FieldChanged { field: String, value: Value },
    DeviceKindChanged(DeviceKind),
    ChannelStateChanged(ChannelState),
    UpgradeStatusChanged {
        job_id: Option<JobId>,
        status: JobStatus,
        state_name: &'static str,
        progress: &'static str,
        availability: &'static str,
        can_perform: bool,
    },
}

impl ConsoleEvent {
    pub fn info(message: impl Into<String>) -> Self {
        ConsoleEvent::Log {
            level: LogLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ConsoleEvent::Log {
            level: LogLevel::Error,
            message: message.into(),
        }
    }
}
