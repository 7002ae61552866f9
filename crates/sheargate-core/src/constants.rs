// Card identifier bounds
pub const MIN_CARD_ID_LENGTH: usize = 1;
pub const MAX_CARD_ID_LENGTH: usize = 64;

// Access cycle timing (milliseconds)
pub const DEFAULT_UNLOCK_WINDOW_MS: u64 = 5_000;
pub const DEFAULT_DENY_PULSE_MS: u64 = 1_000;
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 500;
pub const DEFAULT_RECENT_CAPACITY: usize = 100;

// Watchdog timing (milliseconds)
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1_000;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
pub const DEFAULT_STABLE_AFTER_MS: u64 = 5_000;

// Card reader
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 250;
pub const HID_REPORT_SIZE: usize = 64;
pub const DEFAULT_NAME_KEYWORDS: &[&str] = &["card", "reader", "rfid", "proximity"];
/// HID Global RDR-6081AKU vendor ids.
pub const DEFAULT_KNOWN_VENDOR_IDS: &[u16] = &[0x076b, 0x0c27, 0x08f2];
pub const DEFAULT_KNOWN_VENDOR_NAME_HINTS: &[&str] = &["rdr", "6081"];

// I/O module
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_IO_QUEUE_CAPACITY: usize = 64;
pub const DEBOUNCE_SAMPLES: usize = 3;
pub const DEBOUNCE_SAMPLE_SPACING_MS: u64 = 1;
pub const ANALOG_OUTPUT_MIN_VOLTS: f64 = 0.0;
pub const ANALOG_OUTPUT_MAX_VOLTS: f64 = 5.0;

// Decision reasons
pub const REASON_GRANTED: &str = "access granted";
pub const REASON_NOT_FOUND: &str = "card not in allow-list";
pub const REASON_DEACTIVATED: &str = "card deactivated";
pub const REASON_OUTSIDE_HOURS: &str = "outside allowed hours";
pub const REASON_SESSION_ACTIVE: &str = "session active";
pub const REASON_SYSTEM_FAULT: &str = "system fault";

// Component names used in structured logs
pub const COMPONENT_CARD_READER: &str = "card_reader";
pub const COMPONENT_IO_MODULE: &str = "io_module";
pub const COMPONENT_ACCESS_MANAGER: &str = "access_manager";
