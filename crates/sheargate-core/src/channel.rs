//! Logical I/O channel model.
//!
//! The access engine talks about named channels (`door_sensor`,
//! `unlock_relay`, ...) and never about physical terminals. A [`PinMap`]
//! binds each channel to a pin on the acquisition module; a
//! [`ChannelState`] holds the last known value of every channel.
//!
//! # Examples
//!
//! ```
//! use sheargate_core::{Channel, ChannelKind, ChannelValue, PinMap};
//!
//! let channel: Channel = "unlock_relay".parse().unwrap();
//! assert_eq!(channel.kind(), ChannelKind::DigitalOutput);
//! assert!(channel.validate_value(ChannelValue::Digital(true)).is_ok());
//!
//! let pins = PinMap::default();
//! assert_eq!(pins.pin(Channel::DoorSensor).to_string(), "FIO4");
//! ```

use crate::{
    Error, Result,
    constants::{ANALOG_OUTPUT_MAX_VOLTS, ANALOG_OUTPUT_MIN_VOLTS},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Direction and signal type of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    DigitalInput,
    DigitalOutput,
    AnalogInput,
    AnalogOutput,
}

impl ChannelKind {
    #[inline]
    pub fn is_input(self) -> bool {
        matches!(self, ChannelKind::DigitalInput | ChannelKind::AnalogInput)
    }

    #[inline]
    pub fn is_output(self) -> bool {
        !self.is_input()
    }

    #[inline]
    pub fn is_digital(self) -> bool {
        matches!(self, ChannelKind::DigitalInput | ChannelKind::DigitalOutput)
    }
}

/// Fixed set of logical channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    DoorSensor,
    MotionSensor,
    DigitalIn2,
    DigitalIn3,
    UnlockRelay,
    LedGreen,
    LedRed,
    LedBlue,
    TempAin,
    SpareAin,
    AnalogOut0,
    AnalogOut1,
}

impl Channel {
    pub const ALL: [Channel; 12] = [
        Channel::DoorSensor,
        Channel::MotionSensor,
        Channel::DigitalIn2,
        Channel::DigitalIn3,
        Channel::UnlockRelay,
        Channel::LedGreen,
        Channel::LedRed,
        Channel::LedBlue,
        Channel::TempAin,
        Channel::SpareAin,
        Channel::AnalogOut0,
        Channel::AnalogOut1,
    ];

    /// Stable external name of the channel.
    pub fn name(self) -> &'static str {
        match self {
            Channel::DoorSensor => "door_sensor",
            Channel::MotionSensor => "motion_sensor",
            Channel::DigitalIn2 => "digital_in2",
            Channel::DigitalIn3 => "digital_in3",
            Channel::UnlockRelay => "unlock_relay",
            Channel::LedGreen => "led_green",
            Channel::LedRed => "led_red",
            Channel::LedBlue => "led_blue",
            Channel::TempAin => "temp_ain",
            Channel::SpareAin => "spare_ain",
            Channel::AnalogOut0 => "analog_out0",
            Channel::AnalogOut1 => "analog_out1",
        }
    }

    pub fn kind(self) -> ChannelKind {
        match self {
            Channel::DoorSensor
            | Channel::MotionSensor
            | Channel::DigitalIn2
            | Channel::DigitalIn3 => ChannelKind::DigitalInput,
            Channel::UnlockRelay | Channel::LedGreen | Channel::LedRed | Channel::LedBlue => {
                ChannelKind::DigitalOutput
            }
            Channel::TempAin | Channel::SpareAin => ChannelKind::AnalogInput,
            Channel::AnalogOut0 | Channel::AnalogOut1 => ChannelKind::AnalogOutput,
        }
    }

    /// Iterator over input channels.
    pub fn inputs() -> impl Iterator<Item = Channel> {
        Self::ALL.into_iter().filter(|c| c.kind().is_input())
    }

    /// Iterator over output channels.
    pub fn outputs() -> impl Iterator<Item = Channel> {
        Self::ALL.into_iter().filter(|c| c.kind().is_output())
    }

    /// Value an output is driven to when the module connects and on
    /// fail-safe: relay off, LEDs off, analog outputs at 0V.
    ///
    /// Returns `None` for inputs.
    pub fn safe_value(self) -> Option<ChannelValue> {
        match self.kind() {
            ChannelKind::DigitalOutput => Some(ChannelValue::Digital(false)),
            ChannelKind::AnalogOutput => Some(ChannelValue::Analog(ANALOG_OUTPUT_MIN_VOLTS)),
            _ => None,
        }
    }

    /// Check that `value` may be written to this channel.
    ///
    /// # Errors
    /// Returns `Error::InvalidChannelValue` if the channel is an input, the
    /// value kind does not match, or an analog value is outside 0-5V.
    pub fn validate_value(self, value: ChannelValue) -> Result<()> {
        let invalid = |message: String| Error::InvalidChannelValue {
            channel: self.name().to_string(),
            message,
        };

        match (self.kind(), value) {
            (kind, _) if kind.is_input() => Err(invalid("channel is read-only".to_string())),
            (ChannelKind::DigitalOutput, ChannelValue::Digital(_)) => Ok(()),
            (ChannelKind::AnalogOutput, ChannelValue::Analog(volts)) => {
                if volts.is_finite()
                    && (ANALOG_OUTPUT_MIN_VOLTS..=ANALOG_OUTPUT_MAX_VOLTS).contains(&volts)
                {
                    Ok(())
                } else {
                    Err(invalid(format!(
                        "{volts} V outside {ANALOG_OUTPUT_MIN_VOLTS}-{ANALOG_OUTPUT_MAX_VOLTS} V"
                    )))
                }
            }
            (kind, value) => Err(invalid(format!("{value} does not fit a {kind:?} channel"))),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Channel::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::UnknownChannel(s.to_string()))
    }
}

/// Value carried by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelValue {
    Digital(bool),
    Analog(f64),
}

impl ChannelValue {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            ChannelValue::Digital(v) => Some(v),
            ChannelValue::Analog(_) => None,
        }
    }

    pub fn as_f64(self) -> Option<f64> {
        match self {
            ChannelValue::Analog(v) => Some(v),
            ChannelValue::Digital(_) => None,
        }
    }
}

impl fmt::Display for ChannelValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChannelValue::Digital(true) => write!(f, "HIGH"),
            ChannelValue::Digital(false) => write!(f, "LOW"),
            ChannelValue::Analog(v) => write!(f, "{v:.3} V"),
        }
    }
}

/// Last known value of a channel and when it was read or written.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelReading {
    pub value: ChannelValue,
    pub read_at: DateTime<Utc>,
}

/// Snapshot of every known channel value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelState {
    readings: BTreeMap<Channel, ChannelReading>,
}

impl ChannelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel: Channel) -> Option<&ChannelReading> {
        self.readings.get(&channel)
    }

    pub fn value(&self, channel: Channel) -> Option<ChannelValue> {
        self.get(channel).map(|r| r.value)
    }

    pub fn digital(&self, channel: Channel) -> Option<bool> {
        self.value(channel).and_then(ChannelValue::as_bool)
    }

    pub fn analog(&self, channel: Channel) -> Option<f64> {
        self.value(channel).and_then(ChannelValue::as_f64)
    }

    /// Record a value for a channel.
    pub fn update(&mut self, channel: Channel, value: ChannelValue, at: DateTime<Utc>) {
        self.readings.insert(channel, ChannelReading { value, read_at: at });
    }

    /// Copy of the state restricted to input channels.
    pub fn inputs_only(&self) -> ChannelState {
        ChannelState {
            readings: self
                .readings
                .iter()
                .filter(|(c, _)| c.kind().is_input())
                .map(|(c, r)| (*c, *r))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, &ChannelReading)> {
        self.readings.iter().map(|(c, r)| (*c, r))
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Physical terminal on the acquisition module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Pin {
    /// Flexible digital I/O, `FIO0`-`FIO7`.
    Fio(u8),
    /// Extended digital I/O, `EIO0`-`EIO7`.
    Eio(u8),
    /// Single-ended analog input, `AIN0`-`AIN3` (shares the `FIOn` terminal).
    Ain(u8),
    /// Analog output, `DAC0`-`DAC1`.
    Dac(u8),
}

impl Pin {
    /// Whether this pin can serve a channel of the given kind.
    pub fn supports(self, kind: ChannelKind) -> bool {
        match self {
            Pin::Fio(_) | Pin::Eio(_) => kind.is_digital(),
            Pin::Ain(_) => kind == ChannelKind::AnalogInput,
            Pin::Dac(_) => kind == ChannelKind::AnalogOutput,
        }
    }

    /// Digital I/O number used on the wire (`FIOn` = n, `EIOn` = n + 8).
    pub fn digital_io_number(self) -> Option<u8> {
        match self {
            Pin::Fio(n) => Some(n),
            Pin::Eio(n) => Some(n + 8),
            Pin::Ain(_) | Pin::Dac(_) => None,
        }
    }

    /// Physical terminal number, used to detect two pins sharing a terminal.
    fn terminal(self) -> (u8, u8) {
        match self {
            Pin::Fio(n) | Pin::Ain(n) => (0, n),
            Pin::Eio(n) => (1, n),
            Pin::Dac(n) => (2, n),
        }
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Pin::Fio(n) => write!(f, "FIO{n}"),
            Pin::Eio(n) => write!(f, "EIO{n}"),
            Pin::Ain(n) => write!(f, "AIN{n}"),
            Pin::Dac(n) => write!(f, "DAC{n}"),
        }
    }
}

impl std::str::FromStr for Pin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let invalid = || Error::InvalidPin(s.to_string());

        if upper.len() < 4 || !upper.is_char_boundary(3) {
            return Err(invalid());
        }
        let (prefix, number) = upper.split_at(3);
        let n: u8 = number.parse().map_err(|_| invalid())?;

        let (pin, max) = match prefix {
            "FIO" => (Pin::Fio(n), 7),
            "EIO" => (Pin::Eio(n), 7),
            "AIN" => (Pin::Ain(n), 3),
            "DAC" => (Pin::Dac(n), 1),
            _ => return Err(invalid()),
        };

        if n > max {
            return Err(invalid());
        }
        Ok(pin)
    }
}

impl TryFrom<String> for Pin {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Pin> for String {
    fn from(pin: Pin) -> Self {
        pin.to_string()
    }
}

/// Channel to pin assignment.
///
/// Every channel always has a pin; the defaults follow the shear station
/// wiring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PinMap {
    pub door_sensor: Pin,
    pub motion_sensor: Pin,
    pub digital_in2: Pin,
    pub digital_in3: Pin,
    pub unlock_relay: Pin,
    pub led_green: Pin,
    pub led_red: Pin,
    pub led_blue: Pin,
    pub temp_ain: Pin,
    pub spare_ain: Pin,
    pub analog_out0: Pin,
    pub analog_out1: Pin,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            door_sensor: Pin::Fio(4),
            motion_sensor: Pin::Fio(5),
            digital_in2: Pin::Fio(6),
            digital_in3: Pin::Fio(7),
            unlock_relay: Pin::Eio(0),
            led_green: Pin::Eio(1),
            led_red: Pin::Eio(2),
            led_blue: Pin::Eio(3),
            temp_ain: Pin::Ain(0),
            spare_ain: Pin::Ain(1),
            analog_out0: Pin::Dac(0),
            analog_out1: Pin::Dac(1),
        }
    }
}

impl PinMap {
    pub fn pin(&self, channel: Channel) -> Pin {
        match channel {
            Channel::DoorSensor => self.door_sensor,
            Channel::MotionSensor => self.motion_sensor,
            Channel::DigitalIn2 => self.digital_in2,
            Channel::DigitalIn3 => self.digital_in3,
            Channel::UnlockRelay => self.unlock_relay,
            Channel::LedGreen => self.led_green,
            Channel::LedRed => self.led_red,
            Channel::LedBlue => self.led_blue,
            Channel::TempAin => self.temp_ain,
            Channel::SpareAin => self.spare_ain,
            Channel::AnalogOut0 => self.analog_out0,
            Channel::AnalogOut1 => self.analog_out1,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, Pin)> + '_ {
        Channel::ALL.into_iter().map(|c| (c, self.pin(c)))
    }

    /// Validate the assignment.
    ///
    /// # Errors
    /// Returns `Error::Config` if a pin cannot serve its channel kind or two
    /// channels share a physical terminal.
    pub fn validate(&self) -> Result<()> {
        let mut used: HashMap<(u8, u8), Channel> = HashMap::new();

        for (channel, pin) in self.iter() {
            if !pin.supports(channel.kind()) {
                return Err(Error::Config(format!(
                    "pin {pin} cannot serve {channel} ({:?})",
                    channel.kind()
                )));
            }

            if let Some(other) = used.insert(pin.terminal(), channel) {
                return Err(Error::Config(format!(
                    "pin {pin} assigned to both {other} and {channel}"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_channel_names_roundtrip() {
        for channel in Channel::ALL {
            let parsed: Channel = channel.name().parse().unwrap();
            assert_eq!(parsed, channel);
        }
    }

    #[test]
    fn test_unknown_channel() {
        let err = "flux_capacitor".parse::<Channel>().unwrap_err();
        assert!(matches!(err, Error::UnknownChannel(_)));
    }

    #[test]
    fn test_channel_set_shape() {
        assert_eq!(Channel::inputs().count(), 6);
        assert_eq!(Channel::outputs().count(), 6);
        assert_eq!(
            Channel::inputs()
                .filter(|c| c.kind() == ChannelKind::DigitalInput)
                .count(),
            4
        );
    }

    #[test]
    fn test_serde_name_matches_display() {
        let json = serde_json::to_string(&Channel::DigitalIn2).unwrap();
        assert_eq!(json, "\"digital_in2\"");
        assert_eq!(Channel::DigitalIn2.to_string(), "digital_in2");
    }

    #[rstest]
    #[case(Channel::UnlockRelay, ChannelValue::Digital(true), true)]
    #[case(Channel::UnlockRelay, ChannelValue::Analog(1.0), false)]
    #[case(Channel::AnalogOut0, ChannelValue::Analog(0.0), true)]
    #[case(Channel::AnalogOut0, ChannelValue::Analog(5.0), true)]
    #[case(Channel::AnalogOut0, ChannelValue::Analog(5.01), false)]
    #[case(Channel::AnalogOut1, ChannelValue::Analog(-0.1), false)]
    #[case(Channel::AnalogOut1, ChannelValue::Analog(f64::NAN), false)]
    #[case(Channel::DoorSensor, ChannelValue::Digital(true), false)]
    #[case(Channel::TempAin, ChannelValue::Analog(1.0), false)]
    fn test_validate_value(#[case] channel: Channel, #[case] value: ChannelValue, #[case] ok: bool) {
        assert_eq!(channel.validate_value(value).is_ok(), ok);
    }

    #[test]
    fn test_safe_values() {
        assert_eq!(
            Channel::UnlockRelay.safe_value(),
            Some(ChannelValue::Digital(false))
        );
        assert_eq!(
            Channel::AnalogOut1.safe_value(),
            Some(ChannelValue::Analog(0.0))
        );
        assert_eq!(Channel::DoorSensor.safe_value(), None);
    }

    #[rstest]
    #[case("FIO4", Pin::Fio(4))]
    #[case("eio0", Pin::Eio(0))]
    #[case("AIN1", Pin::Ain(1))]
    #[case("DAC1", Pin::Dac(1))]
    fn test_pin_parse(#[case] input: &str, #[case] expected: Pin) {
        assert_eq!(input.parse::<Pin>().unwrap(), expected);
    }

    #[rstest]
    #[case("FIO8")]
    #[case("DAC2")]
    #[case("AIN4")]
    #[case("CIO0")]
    #[case("FIO")]
    #[case("")]
    fn test_pin_parse_invalid(#[case] input: &str) {
        assert!(input.parse::<Pin>().is_err());
    }

    #[test]
    fn test_digital_io_numbers() {
        assert_eq!(Pin::Fio(4).digital_io_number(), Some(4));
        assert_eq!(Pin::Eio(2).digital_io_number(), Some(10));
        assert_eq!(Pin::Ain(0).digital_io_number(), None);
    }

    #[test]
    fn test_default_pin_map_is_valid() {
        PinMap::default().validate().unwrap();
    }

    #[test]
    fn test_pin_map_rejects_wrong_capability() {
        let pins = PinMap {
            unlock_relay: Pin::Ain(2),
            ..Default::default()
        };
        assert!(matches!(pins.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_pin_map_rejects_duplicates() {
        let pins = PinMap {
            led_blue: Pin::Eio(0),
            ..Default::default()
        };
        assert!(pins.validate().is_err());
    }

    #[test]
    fn test_pin_map_rejects_ain_sharing_fio() {
        let pins = PinMap {
            door_sensor: Pin::Fio(0),
            ..Default::default()
        };
        // temp_ain is AIN0, the same terminal as FIO0
        assert!(pins.validate().is_err());
    }

    #[test]
    fn test_pin_map_from_toml() {
        let pins: PinMap = toml::from_str(r#"door_sensor = "FIO6"
digital_in2 = "FIO4""#)
        .unwrap();
        assert_eq!(pins.door_sensor, Pin::Fio(6));
        assert_eq!(pins.led_green, Pin::Eio(1));
        pins.validate().unwrap();
    }

    #[test]
    fn test_channel_state_inputs_only() {
        let now = Utc::now();
        let mut state = ChannelState::new();
        state.update(Channel::DoorSensor, ChannelValue::Digital(true), now);
        state.update(Channel::UnlockRelay, ChannelValue::Digital(false), now);
        state.update(Channel::TempAin, ChannelValue::Analog(0.72), now);

        let inputs = state.inputs_only();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs.digital(Channel::DoorSensor), Some(true));
        assert_eq!(inputs.analog(Channel::TempAin), Some(0.72));
        assert!(inputs.get(Channel::UnlockRelay).is_none());
    }

    #[test]
    fn test_channel_state_json_keys() {
        let mut state = ChannelState::new();
        state.update(Channel::LedRed, ChannelValue::Digital(true), Utc::now());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["led_red"]["value"], true);
    }
}
