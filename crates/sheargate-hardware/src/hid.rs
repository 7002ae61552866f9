//! HID card reader discovery and report decoding.
//!
//! Proximity readers such as the HID RDR-6081AKU enumerate as plain HID
//! devices and emit the card number inside 64-byte input reports. The
//! [`ReaderFilter`] picks the reader among the attached HID devices and the
//! [`ReportDecoder`] turns report bytes into a [`CardId`].
//!
//! # Examples
//!
//! ```
//! use sheargate_core::ReportLayout;
//! use sheargate_hardware::hid::{Decoded, ReportDecoder};
//!
//! let mut decoder = ReportDecoder::new(ReportLayout::Auto);
//!
//! // 3 significant bytes: facility 1, card 12345
//! let mut report = [0u8; 64];
//! report[..3].copy_from_slice(&[0x01, 0x30, 0x39]);
//!
//! match decoder.decode(&report).unwrap() {
//!     Decoded::Card(id) => assert_eq!(id.as_str(), "00112345"),
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

use crate::{HardwareError, Result, types::DeviceInfo};
use serde::{Deserialize, Serialize};
use sheargate_core::{CardId, ReaderConfig, ReportLayout};
use std::fmt;

/// Attached HID device as seen during enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HidDeviceDescriptor {
    /// Platform path used to open the device.
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product: Option<String>,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
}

impl HidDeviceDescriptor {
    pub fn new(path: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            path: path.into(),
            vendor_id,
            product_id,
            product: None,
            manufacturer: None,
            serial_number: None,
        }
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    pub fn device_info(&self) -> DeviceInfo {
        let name = self
            .product
            .clone()
            .unwrap_or_else(|| "HID card reader".to_string());
        let info = DeviceInfo::new(name, format!("{:04X}:{:04X}", self.vendor_id, self.product_id));

        match &self.serial_number {
            Some(serial) => info.with_serial_number(serial.clone()),
            None => info,
        }
    }
}

impl fmt::Display for HidDeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} {} ({})",
            self.vendor_id,
            self.product_id,
            self.product.as_deref().unwrap_or("?"),
            self.manufacturer.as_deref().unwrap_or("?")
        )
    }
}

/// Chooses the card reader among attached HID devices.
///
/// An explicit vendor id (and optional product id) wins. Without one, a
/// device matches when its product or manufacturer name contains one of the
/// keywords, or when it comes from a known reader vendor and its product
/// name carries one of the vendor hints.
#[derive(Debug, Clone)]
pub struct ReaderFilter {
    vendor_id: Option<u16>,
    product_id: Option<u16>,
    keywords: Vec<String>,
    known_vendor_ids: Vec<u16>,
    vendor_hints: Vec<String>,
}

impl ReaderFilter {
    pub fn from_config(config: &ReaderConfig) -> Self {
        let lower = |items: &[String]| -> Vec<String> {
            items
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };

        Self {
            vendor_id: config.vendor_id,
            product_id: config.product_id,
            keywords: lower(&config.name_keywords),
            known_vendor_ids: config.known_vendor_ids.clone(),
            vendor_hints: lower(&config.known_vendor_name_hints),
        }
    }

    pub fn matches(&self, device: &HidDeviceDescriptor) -> bool {
        if let Some(vendor_id) = self.vendor_id {
            return device.vendor_id == vendor_id
                && self.product_id.is_none_or(|pid| pid == device.product_id);
        }

        let product = device.product.as_deref().unwrap_or_default().to_lowercase();
        let manufacturer = device
            .manufacturer
            .as_deref()
            .unwrap_or_default()
            .to_lowercase();

        let keyword_hit = self
            .keywords
            .iter()
            .any(|k| product.contains(k.as_str()) || manufacturer.contains(k.as_str()));
        if keyword_hit {
            return true;
        }

        self.known_vendor_ids.contains(&device.vendor_id)
            && self.vendor_hints.iter().any(|h| product.contains(h.as_str()))
    }

    /// First matching device in enumeration order.
    pub fn select<'a>(&self, devices: &'a [HidDeviceDescriptor]) -> Option<&'a HidDeviceDescriptor> {
        devices.iter().find(|d| self.matches(d))
    }
}

/// Outcome of feeding one report to the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Report carried no data.
    Idle,
    /// Keystrokes buffered, waiting for Enter.
    Pending,
    Card(CardId),
}

const KEY_ENTER: u8 = 0x28;

/// Stateful report decoder.
///
/// Stateless for every layout except `keyboard`, which buffers keystrokes
/// across reports. Call [`reset`](Self::reset) after reconnecting.
#[derive(Debug, Clone)]
pub struct ReportDecoder {
    layout: ReportLayout,
    keys: String,
}

impl ReportDecoder {
    pub fn new(layout: ReportLayout) -> Self {
        Self {
            layout,
            keys: String::new(),
        }
    }

    pub fn reset(&mut self) {
        self.keys.clear();
    }

    /// Decode one input report.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError::Decode` when the bytes do not fit the
    /// configured layout.
    pub fn decode(&mut self, report: &[u8]) -> Result<Decoded> {
        if report.iter().all(|&b| b == 0) {
            return Ok(Decoded::Idle);
        }

        let id = match self.layout {
            ReportLayout::Keyboard => return self.decode_keyboard(report),
            ReportLayout::Ascii => decode_ascii(significant(report))
                .ok_or_else(|| HardwareError::decode("report is not an ASCII card number"))?,
            ReportLayout::Wiegand26 => decode_wiegand26(prefix(report, 3)?),
            ReportLayout::Numeric32 => decode_numeric32(prefix(report, 4)?),
            ReportLayout::Auto => decode_auto(report)?,
        };

        CardId::new(&id)
            .map(Decoded::Card)
            .map_err(|e| HardwareError::decode(e.to_string()))
    }

    fn decode_keyboard(&mut self, report: &[u8]) -> Result<Decoded> {
        // Boot keyboard report: modifiers, reserved, six key slots
        for &usage in report.iter().skip(2).take(6) {
            match usage {
                0x04..=0x1D => self.keys.push(char::from(b'A' + (usage - 0x04))),
                0x1E..=0x26 => self.keys.push(char::from(b'1' + (usage - 0x1E))),
                0x27 => self.keys.push('0'),
                KEY_ENTER => {
                    let typed = std::mem::take(&mut self.keys);
                    if typed.is_empty() {
                        return Ok(Decoded::Idle);
                    }
                    return CardId::new(&typed)
                        .map(Decoded::Card)
                        .map_err(|e| HardwareError::decode(e.to_string()));
                }
                _ => {}
            }
        }

        Ok(if self.keys.is_empty() {
            Decoded::Idle
        } else {
            Decoded::Pending
        })
    }
}

/// A report without its zero padding. Interior zero bytes are part of the
/// card number and stay.
fn significant(report: &[u8]) -> &[u8] {
    let Some(start) = report.iter().position(|&b| b != 0) else {
        return &[];
    };
    let end = report.iter().rposition(|&b| b != 0).map_or(start, |i| i + 1);
    &report[start..end]
}

fn prefix(report: &[u8], len: usize) -> Result<&[u8]> {
    report
        .get(..len)
        .ok_or_else(|| HardwareError::decode(format!("report shorter than {len} bytes")))
}

fn decode_ascii(bytes: &[u8]) -> Option<String> {
    (bytes.len() >= 3 && bytes.iter().all(u8::is_ascii_alphanumeric))
        .then(|| bytes.iter().map(|&b| char::from(b)).collect())
}

fn decode_wiegand26(bytes: &[u8]) -> String {
    let facility = bytes[0];
    let card = u16::from_be_bytes([bytes[1], bytes[2]]);
    format!("{facility:03}{card:05}")
}

fn decode_numeric32(bytes: &[u8]) -> String {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).to_string()
}

fn decode_auto(report: &[u8]) -> Result<String> {
    let bytes = significant(report);

    if let Some(id) = decode_ascii(bytes) {
        return Ok(id);
    }

    match bytes.len() {
        3 => Ok(decode_wiegand26(bytes)),
        4 => Ok(decode_numeric32(bytes)),
        n if n > 4 => Ok(bytes.iter().map(|b| format!("{b:02X}")).collect()),
        n => Err(HardwareError::decode(format!(
            "{n} significant byte(s) do not form a card number"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn report(bytes: &[u8]) -> Vec<u8> {
        let mut r = vec![0u8; 64];
        r[..bytes.len()].copy_from_slice(bytes);
        r
    }

    fn card(decoded: Decoded) -> String {
        match decoded {
            Decoded::Card(id) => id.to_string(),
            other => panic!("expected a card, got {other:?}"),
        }
    }

    fn rdr() -> HidDeviceDescriptor {
        HidDeviceDescriptor::new("/dev/hidraw0", 0x0c27, 0x3bfa)
            .with_product("RDR-6081AKU")
            .with_manufacturer("pcProx")
    }

    #[rstest]
    #[case(b"0012345".as_slice(), "0012345")]
    #[case(b"a1b2c3".as_slice(), "A1B2C3")]
    #[case(&[0x01, 0x30, 0x39], "00112345")]
    #[case(&[0x00, 0x00, 0x01, 0x30, 0x39], "00112345")]
    #[case(&[0x05, 0x00, 0x2A], "00500042")]
    #[case(&[0x12, 0x34, 0x56, 0x78], "305419896")]
    #[case(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01], "DEADBEEF01")]
    fn test_auto_cascade(#[case] bytes: &[u8], #[case] expected: &str) {
        let mut decoder = ReportDecoder::new(ReportLayout::Auto);
        assert_eq!(card(decoder.decode(&report(bytes)).unwrap()), expected);
    }

    #[test]
    fn test_interior_zero_bytes_keep_cards_distinct() {
        let mut decoder = ReportDecoder::new(ReportLayout::Auto);
        let first = card(decoder.decode(&report(&[0xDE, 0x00, 0xAD, 0xBE, 0xEF, 0x01])).unwrap());
        let second = card(decoder.decode(&report(&[0xDE, 0xAD, 0xBE, 0x00, 0xEF, 0x01])).unwrap());
        let packed = card(decoder.decode(&report(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01])).unwrap());

        assert_eq!(first, "DE00ADBEEF01");
        assert_eq!(second, "DEADBE00EF01");
        assert_eq!(packed, "DEADBEEF01");
    }

    #[test]
    fn test_ascii_with_embedded_nul_is_not_text() {
        let mut decoder = ReportDecoder::new(ReportLayout::Ascii);
        assert!(decoder.decode(&report(b"12\x0034")).is_err());
        assert_eq!(card(decoder.decode(&report(b"\x00\x001234")).unwrap()), "1234");
    }

    #[test]
    fn test_all_zero_report_is_idle() {
        let mut decoder = ReportDecoder::new(ReportLayout::Auto);
        assert_eq!(decoder.decode(&[0u8; 64]).unwrap(), Decoded::Idle);
        assert_eq!(decoder.decode(&[]).unwrap(), Decoded::Idle);
    }

    #[rstest]
    #[case(&[0x07])]
    #[case(&[0x07, 0xFF])]
    fn test_auto_rejects_short_payloads(#[case] bytes: &[u8]) {
        let mut decoder = ReportDecoder::new(ReportLayout::Auto);
        let err = decoder.decode(&report(bytes)).unwrap_err();
        assert!(matches!(err, HardwareError::Decode { .. }));
    }

    #[test]
    fn test_explicit_wiegand_keeps_zero_bytes() {
        let mut decoder = ReportDecoder::new(ReportLayout::Wiegand26);
        assert_eq!(card(decoder.decode(&report(&[0x05, 0x00, 0x2A])).unwrap()), "00500042");
    }

    #[test]
    fn test_explicit_numeric32() {
        let mut decoder = ReportDecoder::new(ReportLayout::Numeric32);
        assert_eq!(card(decoder.decode(&report(&[0, 0, 0x01, 0x00])).unwrap()), "256");
    }

    #[test]
    fn test_explicit_ascii_rejects_binary() {
        let mut decoder = ReportDecoder::new(ReportLayout::Ascii);
        assert!(decoder.decode(&report(&[0x01, 0x02, 0x03])).is_err());
    }

    #[test]
    fn test_keyboard_accumulates_until_enter() {
        let mut decoder = ReportDecoder::new(ReportLayout::Keyboard);
        let key = |usage: u8| report(&[0, 0, usage]);

        // "1", release, "0", release, "A", Enter
        assert_eq!(decoder.decode(&key(0x1E)).unwrap(), Decoded::Pending);
        assert_eq!(decoder.decode(&[0u8; 8]).unwrap(), Decoded::Idle);
        assert_eq!(decoder.decode(&key(0x27)).unwrap(), Decoded::Pending);
        assert_eq!(decoder.decode(&key(0x04)).unwrap(), Decoded::Pending);
        assert_eq!(card(decoder.decode(&key(KEY_ENTER)).unwrap()), "10A");

        // buffer cleared after Enter
        assert_eq!(decoder.decode(&key(KEY_ENTER)).unwrap(), Decoded::Idle);
    }

    #[test]
    fn test_keyboard_reset_drops_partial_input() {
        let mut decoder = ReportDecoder::new(ReportLayout::Keyboard);
        decoder.decode(&report(&[0, 0, 0x1F])).unwrap();
        decoder.reset();
        assert_eq!(decoder.decode(&report(&[0, 0, KEY_ENTER])).unwrap(), Decoded::Idle);
    }

    #[test]
    fn test_filter_default_keywords() {
        let filter = ReaderFilter::from_config(&ReaderConfig::default());
        let keyboard = HidDeviceDescriptor::new("/dev/hidraw1", 0x046d, 0xc31c)
            .with_product("USB Keyboard")
            .with_manufacturer("Logitech");
        let prox = HidDeviceDescriptor::new("/dev/hidraw2", 0x1234, 0x0001)
            .with_product("Proximity Reader");

        assert!(!filter.matches(&keyboard));
        assert!(filter.matches(&prox));
        assert!(filter.matches(&rdr()));
    }

    #[test]
    fn test_filter_known_vendor_requires_hint() {
        let filter = ReaderFilter::from_config(&ReaderConfig {
            name_keywords: vec![],
            ..ReaderConfig::default()
        });

        assert!(filter.matches(&rdr()));

        let same_vendor_other_product =
            HidDeviceDescriptor::new("/dev/hidraw3", 0x0c27, 0x0001).with_product("Keypad");
        assert!(!filter.matches(&same_vendor_other_product));
    }

    #[test]
    fn test_filter_manufacturer_keyword() {
        let filter = ReaderFilter::from_config(&ReaderConfig::default());
        let device = HidDeviceDescriptor::new("p", 0x2222, 0x0002)
            .with_product("Model 7")
            .with_manufacturer("Acme RFID Systems");
        assert!(filter.matches(&device));
    }

    #[test]
    fn test_filter_explicit_ids() {
        let filter = ReaderFilter::from_config(&ReaderConfig {
            vendor_id: Some(0x046d),
            product_id: Some(0xc31c),
            ..ReaderConfig::default()
        });

        let keyboard = HidDeviceDescriptor::new("k", 0x046d, 0xc31c).with_product("USB Keyboard");
        assert!(filter.matches(&keyboard));
        // explicit ids disable name heuristics
        assert!(!filter.matches(&rdr()));
    }

    #[test]
    fn test_select_first_match() {
        let filter = ReaderFilter::from_config(&ReaderConfig::default());
        let devices = vec![
            HidDeviceDescriptor::new("a", 1, 1).with_product("Mouse"),
            rdr(),
        ];
        assert_eq!(filter.select(&devices).map(|d| d.path.as_str()), Some("/dev/hidraw0"));
        assert!(filter.select(&devices[..1]).is_none());
    }

    #[test]
    fn test_descriptor_device_info() {
        let info = rdr().with_serial_number("77").device_info();
        assert_eq!(info.name, "RDR-6081AKU");
        assert_eq!(info.model, "0C27:3BFA");
        assert_eq!(info.serial_number.as_deref(), Some("77"));
    }

    proptest! {
        #[test]
        fn prop_auto_decoder_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut decoder = ReportDecoder::new(ReportLayout::Auto);
            let _ = decoder.decode(&bytes);
        }

        #[test]
        fn prop_wiegand_ids_are_eight_digits(facility in 1u8..=255, number in 1u16..=u16::MAX) {
            let mut decoder = ReportDecoder::new(ReportLayout::Wiegand26);
            let [hi, lo] = number.to_be_bytes();
            let decoded = decoder.decode(&report(&[facility, hi, lo])).unwrap();
            let id = card(decoded);
            prop_assert_eq!(id.len(), 8);
            prop_assert!(id.bytes().all(|b| b.is_ascii_digit()));
        }
    }
}
