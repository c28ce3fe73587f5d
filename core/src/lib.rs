pub mod bridge;
pub mod command;
pub mod definitions;
pub mod errors;
pub mod ipc;
pub mod service;
pub mod signal_bus;

mod scan_watch;

pub use bridge::{ScanListener, ScannerBridge, ScannerControl};
pub use command::{dispatch_command, CommandReply};
pub use definitions::{ConfigOptions, ScanCode};
pub use errors::BridgeError;
pub use scan_watch::ScanWatchHandle;
pub use service::{spawn_service, ServiceHandle};
pub use signal_bus::{LoopbackSignalBus, Signal, SignalBus, SignalBusError};
