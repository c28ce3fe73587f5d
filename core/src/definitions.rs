use std::collections::HashMap;

/// Broadcast the scanner firmware emits for every decoded code.
pub const SCAN_DATA_ACTION: &str = "com.sunmi.scanner.ACTION_DATA_CODE_RECEIVED";
/// Broadcast that triggers the scan head.
pub const START_SCAN_ACTION: &str = "com.sunmi.scanner.ACTION_START_SCAN";
/// Broadcast that releases the scan head.
pub const STOP_SCAN_ACTION: &str = "com.sunmi.scanner.ACTION_STOP_SCAN";

/// Signal extra carrying the decoded code text. A scan signal without this
/// extra is dropped.
pub const SCAN_DATA_EXTRA: &str = "data";
/// Signal extra carrying the vendor symbology identifier.
pub const SCAN_TYPE_EXTRA: &str = "type";

/// Application-facing identifier of the command surface.
pub const COMMAND_CHANNEL: &str = "com.selk.warehouse/sunmi_scanner";
/// Application-facing identifier of the event surface.
pub const EVENT_CHANNEL: &str = "com.selk.warehouse/sunmi_scanner_events";

/// One decoded scan, pushed to the active subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCode {
    pub data: String,
    /// Vendor symbology identifier from the `type` extra. Carried for
    /// consumers that expect the shape; the bridge never interprets it.
    pub symbology: Option<String>,
}

/// String-keyed options accepted by the `configure` command.
pub type ConfigOptions = HashMap<String, String>;
