//! Engine configuration tree.
//!
//! Every section has sensible defaults so a configuration file only needs to
//! list what differs, plus the allow-list. Durations are written in
//! milliseconds.
//!
//! # Examples
//!
//! ```
//! use sheargate_core::EngineConfig;
//!
//! let config: EngineConfig = toml::from_str(r#"
//!     [access]
//!     unlock_window = 8000
//!
//!     [[access.cards]]
//!     id = "A1B2C3"
//!     name = "Shift lead"
//! "#).unwrap();
//!
//! assert_eq!(config.access.unlock_window.as_secs(), 8);
//! config.validate().unwrap();
//! ```

use crate::{CardId, Error, PinMap, Result, WeeklySchedule, constants::*};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub reader: ReaderConfig,
    pub io_module: IoModuleConfig,
    pub watchdog: WatchdogConfig,
    pub access: AccessConfig,
}

impl EngineConfig {
    /// Validate the whole tree.
    ///
    /// # Errors
    /// Returns `Error::Config` (or `Error::MissingConfig`) describing the
    /// first problem found.
    pub fn validate(&self) -> Result<()> {
        self.reader.validate()?;
        self.io_module.validate()?;
        self.watchdog.validate()?;
        self.access.validate()
    }
}

/// How HID report bytes are turned into a card identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportLayout {
    /// Try ascii, wiegand26, numeric32 then hex.
    #[default]
    Auto,
    Ascii,
    Wiegand26,
    Numeric32,
    /// Boot keyboard reports terminated by Enter.
    Keyboard,
}

/// Card reader discovery and decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Explicit vendor id. When set, name heuristics are not used.
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    /// Case-insensitive substrings searched in product and manufacturer names.
    pub name_keywords: Vec<String>,
    /// Vendors accepted when the product name carries one of the hints.
    pub known_vendor_ids: Vec<u16>,
    pub known_vendor_name_hints: Vec<String>,
    pub layout: ReportLayout,
    #[serde(with = "duration_ms")]
    pub read_timeout: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            vendor_id: None,
            product_id: None,
            name_keywords: DEFAULT_NAME_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            known_vendor_ids: DEFAULT_KNOWN_VENDOR_IDS.to_vec(),
            known_vendor_name_hints: DEFAULT_KNOWN_VENDOR_NAME_HINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            layout: ReportLayout::Auto,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        }
    }
}

impl ReaderConfig {
    fn validate(&self) -> Result<()> {
        if self.product_id.is_some() && self.vendor_id.is_none() {
            return Err(Error::MissingConfig("reader.vendor_id".to_string()));
        }
        if self.vendor_id.is_none()
            && self.name_keywords.is_empty()
            && self.known_vendor_ids.is_empty()
        {
            return Err(Error::Config(
                "reader needs a vendor_id, name_keywords or known_vendor_ids".to_string(),
            ));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::Config("reader.read_timeout must be > 0".to_string()));
        }
        Ok(())
    }
}

/// I/O module adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoModuleConfig {
    pub pins: PinMap,
    #[serde(with = "duration_ms")]
    pub command_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub heartbeat_interval: Duration,
    /// Resolution of a floating digital input: `true` reads LOW.
    pub floating_inputs_low: bool,
    /// Level the door sensor reports when the shear is closed and locked.
    pub door_closed_level: bool,
    pub queue_capacity: usize,
}

impl Default for IoModuleConfig {
    fn default() -> Self {
        Self {
            pins: PinMap::default(),
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            floating_inputs_low: true,
            door_closed_level: true,
            queue_capacity: DEFAULT_IO_QUEUE_CAPACITY,
        }
    }
}

impl IoModuleConfig {
    fn validate(&self) -> Result<()> {
        self.pins.validate()?;
        if self.command_timeout.is_zero() {
            return Err(Error::Config("io_module.command_timeout must be > 0".to_string()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::Config(
                "io_module.heartbeat_interval must be > 0".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("io_module.queue_capacity must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Reconnection timing shared by both device adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    #[serde(with = "duration_ms")]
    pub probe_interval: Duration,
    #[serde(with = "duration_ms")]
    pub initial_backoff: Duration,
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,
    /// A connection that lasts at least this long resets the backoff; one
    /// lost sooner waits for the next backoff delay before reconnecting.
    #[serde(with = "duration_ms")]
    pub stable_after: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_millis(DEFAULT_PROBE_INTERVAL_MS),
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            stable_after: Duration::from_millis(DEFAULT_STABLE_AFTER_MS),
        }
    }
}

impl WatchdogConfig {
    fn validate(&self) -> Result<()> {
        if self.probe_interval.is_zero() || self.initial_backoff.is_zero() {
            return Err(Error::Config(
                "watchdog intervals must be greater than zero".to_string(),
            ));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(Error::Config(format!(
                "watchdog.max_backoff ({:?}) is lower than initial_backoff ({:?})",
                self.max_backoff, self.initial_backoff
            )));
        }
        Ok(())
    }
}

/// When an unlocked session counts as confirmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmPolicy {
    /// Wait for the door sensor to report open.
    #[default]
    Sensor,
    /// Confirm as soon as the relay is energized.
    Timer,
}

/// One allow-list entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardEntryConfig {
    pub id: CardId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    /// No schedule means access at any time.
    #[serde(default)]
    pub schedule: Option<WeeklySchedule>,
}

impl CardEntryConfig {
    pub fn new(id: CardId) -> Self {
        Self {
            id,
            name: None,
            active: true,
            schedule: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Access manager behaviour and the allow-list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    #[serde(with = "duration_ms")]
    pub unlock_window: Duration,
    pub confirm_policy: ConfirmPolicy,
    #[serde(with = "duration_ms")]
    pub deny_pulse: Duration,
    #[serde(with = "duration_ms")]
    pub sample_interval: Duration,
    pub recent_capacity: usize,
    pub cards: Vec<CardEntryConfig>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            unlock_window: Duration::from_millis(DEFAULT_UNLOCK_WINDOW_MS),
            confirm_policy: ConfirmPolicy::Sensor,
            deny_pulse: Duration::from_millis(DEFAULT_DENY_PULSE_MS),
            sample_interval: Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS),
            recent_capacity: DEFAULT_RECENT_CAPACITY,
            cards: Vec::new(),
        }
    }
}

impl AccessConfig {
    fn validate(&self) -> Result<()> {
        if self.cards.is_empty() {
            return Err(Error::MissingConfig("access.cards".to_string()));
        }
        if self.unlock_window.is_zero() {
            return Err(Error::Config("access.unlock_window must be > 0".to_string()));
        }
        if self.sample_interval.is_zero() {
            return Err(Error::Config("access.sample_interval must be > 0".to_string()));
        }
        if self.recent_capacity == 0 {
            return Err(Error::Config("access.recent_capacity must be > 0".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for card in &self.cards {
            if !seen.insert(&card.id) {
                return Err(Error::Config(format!("duplicate card id {}", card.id)));
            }
        }
        Ok(())
    }
}

/// Serde helper: `Duration` as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Pin, channel::Channel};

    fn card(id: &str) -> CardEntryConfig {
        CardEntryConfig::new(CardId::new(id).unwrap())
    }

    fn minimal() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.access.cards.push(card("A1B2C3"));
        config
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.access.unlock_window, Duration::from_secs(5));
        assert_eq!(config.access.deny_pulse, Duration::from_secs(1));
        assert_eq!(config.access.sample_interval, Duration::from_millis(500));
        assert_eq!(config.access.recent_capacity, 100);
        assert_eq!(config.watchdog.initial_backoff, Duration::from_secs(1));
        assert_eq!(config.watchdog.max_backoff, Duration::from_secs(30));
        assert_eq!(config.reader.layout, ReportLayout::Auto);
        assert_eq!(config.reader.known_vendor_ids, vec![0x076b, 0x0c27, 0x08f2]);
        assert_eq!(config.io_module.pins.pin(Channel::UnlockRelay), Pin::Eio(0));
    }

    #[test]
    fn test_minimal_is_valid() {
        minimal().validate().unwrap();
    }

    #[test]
    fn test_empty_allow_list_rejected() {
        let err = EngineConfig::default().validate().unwrap_err();
        assert!(matches!(err, Error::MissingConfig(_)));
    }

    #[test]
    fn test_zero_unlock_window_rejected() {
        let mut config = minimal();
        config.access.unlock_window = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_order_rejected() {
        let mut config = minimal();
        config.watchdog.max_backoff = Duration::from_millis(500);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_product_without_vendor_rejected() {
        let mut config = minimal();
        config.reader.product_id = Some(0x1234);
        assert!(matches!(config.validate(), Err(Error::MissingConfig(_))));
    }

    #[test]
    fn test_duplicate_cards_rejected() {
        let mut config = minimal();
        config.access.cards.push(card("a1b2c3"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_full_toml() {
        let config: EngineConfig = toml::from_str(
            r#"
            [reader]
            vendor_id = 0x076b
            product_id = 0x6081
            layout = "wiegand26"
            read_timeout = 100

            [io_module]
            command_timeout = 750
            floating_inputs_low = false

            [io_module.pins]
            door_sensor = "FIO6"
            digital_in2 = "FIO4"

            [watchdog]
            max_backoff = 10000

            [access]
            confirm_policy = "timer"
            recent_capacity = 20

            [[access.cards]]
            id = "00112345"
            name = "Operator"

            [[access.cards]]
            id = "ZZ99"
            active = false

            [access.cards.schedule]
            monday = "08:00-17:00"
            "#,
        )
        .unwrap();

        assert_eq!(config.reader.vendor_id, Some(0x076b));
        assert_eq!(config.reader.layout, ReportLayout::Wiegand26);
        assert_eq!(config.reader.read_timeout, Duration::from_millis(100));
        assert_eq!(config.io_module.command_timeout, Duration::from_millis(750));
        assert!(!config.io_module.floating_inputs_low);
        assert_eq!(config.io_module.pins.door_sensor, Pin::Fio(6));
        assert_eq!(config.watchdog.max_backoff, Duration::from_secs(10));
        assert_eq!(config.access.confirm_policy, ConfirmPolicy::Timer);
        assert_eq!(config.access.cards.len(), 2);
        assert!(config.access.cards[0].active);
        assert!(!config.access.cards[1].active);
        assert!(config.access.cards[1].schedule.is_some());
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_card_id_in_file() {
        let result: std::result::Result<EngineConfig, _> = toml::from_str(
            r#"
            [[access.cards]]
            id = "has space"
            "#,
        );
        assert!(result.is_err());
    }
}
