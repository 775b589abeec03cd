pub mod events;
pub mod poll;
pub mod router;
pub mod session;
pub mod upgrade;

pub use events::{ConsoleEvent, LogLevel, PacketKind};
pub use session::{ChannelState, CommandLink, DeviceSession};
pub use upgrade::{
    ConfirmGate, HttpUpgradeService, UpgradeOrchestrator, UpgradeService, UpgradeSnapshot,
};

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod session_tests;

#[cfg(test)]
#[path = "tests/upgrade_tests.rs"]
mod upgrade_tests;
