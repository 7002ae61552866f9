//! LabJack U3 backend over raw USB (`rusb`).
//!
//! The U3 speaks a small framed protocol on two bulk endpoints. Every pin
//! operation here is one `Feedback` round trip:
//!
//! ```text
//!  byte  0        1     2       3     4..6        6     7..
//!       ┌────────┬─────┬───────┬─────┬───────────┬─────┬──────────┐
//!  req  │ cksum8 │ F8  │ words │ 00  │ cksum16   │echo │ IOTypes  │
//!       └────────┴─────┴───────┴─────┴───────────┴─────┴──────────┘
//!       ┌────────┬─────┬───────┬─────┬───────────┬─────┬─────┬─────┬──────┐
//!  resp │ cksum8 │ F8  │ words │ 00  │ cksum16   │ err │errfr│echo │ data │
//!       └────────┴─────┴───────┴─────┴───────────┴─────┴─────┴─────┴──────┘
//! ```
//!
//! `cksum8` covers bytes 1 to 5, `cksum16` covers everything from byte 6.

use crate::{
    DeviceInfo, HardwareError, Result,
    traits::{IoPort, IoTransport},
};
use rusb::{DeviceHandle, GlobalContext};
use sheargate_core::{
    Pin, PinMap,
    constants::{ANALOG_OUTPUT_MAX_VOLTS, ANALOG_OUTPUT_MIN_VOLTS},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

pub const U3_VENDOR_ID: u16 = 0x0CD5;
pub const U3_PRODUCT_ID: u16 = 0x0003;

const ENDPOINT_OUT: u8 = 0x01;
const ENDPOINT_IN: u8 = 0x82;
const USB_TIMEOUT: Duration = Duration::from_millis(500);
const PACKET_SIZE: usize = 64;

const EXTENDED_COMMAND: u8 = 0xF8;
const CMD_FEEDBACK: u8 = 0x00;
const CMD_CONFIG_IO: u8 = 0x0B;

const IOTYPE_AIN: u8 = 1;
const IOTYPE_BIT_STATE_READ: u8 = 10;
const IOTYPE_BIT_STATE_WRITE: u8 = 11;
const IOTYPE_BIT_DIR_WRITE: u8 = 13;
const IOTYPE_DAC0_8BIT: u8 = 34;

/// Negative channel number selecting single-ended mode.
const SINGLE_ENDED: u8 = 31;
/// Full scale of a single-ended U3-LV analog input.
const AIN_FULL_SCALE_VOLTS: f64 = 2.44;

fn checksum8(bytes: &[u8]) -> u8 {
    let mut sum: u32 = bytes.iter().map(|&b| u32::from(b)).sum();
    for _ in 0..2 {
        sum = (sum & 0xFF) + (sum >> 8);
    }
    (sum & 0xFF) as u8
}

fn checksum16(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)))
}

fn seal(frame: &mut [u8]) {
    let [lsb, msb] = checksum16(&frame[6..]).to_le_bytes();
    frame[4] = lsb;
    frame[5] = msb;
    frame[0] = checksum8(&frame[1..6]);
}

/// Build a `Feedback` request carrying `iotypes`.
fn feedback_frame(echo: u8, iotypes: &[u8]) -> Vec<u8> {
    let mut frame = vec![0, EXTENDED_COMMAND, 0, CMD_FEEDBACK, 0, 0, echo];
    frame.extend_from_slice(iotypes);
    if frame.len() % 2 != 0 {
        frame.push(0);
    }
    frame[2] = ((frame.len() - 6) / 2) as u8;
    seal(&mut frame);
    frame
}

/// Build a `ConfigIO` request setting analog FIO lines and DAC1.
fn config_io_frame(fio_analog: u8, dac1_enable: bool) -> Vec<u8> {
    // write mask: DAC1Enable | FIOAnalog
    let write_mask = 0b0000_0110;
    let mut frame = vec![
        0,
        EXTENDED_COMMAND,
        0x03,
        CMD_CONFIG_IO,
        0,
        0,
        write_mask,
        0,
        0,
        u8::from(dac1_enable),
        fio_analog,
        0,
    ];
    seal(&mut frame);
    frame
}

/// Check a response header, checksum and error code.
fn check_response(response: &[u8], min_len: usize) -> Result<()> {
    if response.len() < min_len {
        return Err(HardwareError::invalid_data(format!(
            "short U3 response: {} bytes",
            response.len()
        )));
    }
    if response[1] != EXTENDED_COMMAND || response[0] != checksum8(&response[1..6]) {
        return Err(HardwareError::invalid_data("bad U3 response header"));
    }
    if response[6] != 0 {
        return Err(HardwareError::invalid_data(format!(
            "U3 error code {}",
            response[6]
        )));
    }
    Ok(())
}

/// Validate a `Feedback` response and return its data bytes.
fn parse_feedback(response: &[u8], echo: u8) -> Result<&[u8]> {
    check_response(response, 9)?;
    if response[8] != echo {
        return Err(HardwareError::invalid_data(format!(
            "U3 echo mismatch: sent {echo}, got {}",
            response[8]
        )));
    }
    Ok(&response[9..])
}

fn ain_volts(raw: u16) -> f64 {
    f64::from(raw) / 65536.0 * AIN_FULL_SCALE_VOLTS
}

fn dac_value(volts: f64) -> u8 {
    let clamped = volts.clamp(ANALOG_OUTPUT_MIN_VOLTS, ANALOG_OUTPUT_MAX_VOLTS);
    (clamped / ANALOG_OUTPUT_MAX_VOLTS * 255.0).round() as u8
}

fn usb_error(e: rusb::Error) -> HardwareError {
    match e {
        rusb::Error::NoDevice => HardwareError::disconnected("LabJack U3"),
        rusb::Error::NotFound => HardwareError::not_found("LabJack U3"),
        rusb::Error::Timeout => HardwareError::command_timeout(
            "usb transfer",
            u64::try_from(USB_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
        ),
        other => HardwareError::communication(format!("USB: {other}")),
    }
}

async fn blocking<T: Send + 'static>(f: impl FnOnce() -> Result<T> + Send + 'static) -> Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| HardwareError::other(format!("blocking USB task failed: {e}")))?
}

/// USB discovery of a LabJack U3.
#[derive(Debug, Default)]
pub struct U3Transport;

impl U3Transport {
    pub fn new() -> Self {
        Self
    }
}

impl IoTransport for U3Transport {
    type Port = U3Port;

    async fn probe(&mut self) -> Result<bool> {
        blocking(|| {
            let devices = rusb::devices().map_err(usb_error)?;
            Ok(devices.iter().any(|device| {
                device
                    .device_descriptor()
                    .map(|d| d.vendor_id() == U3_VENDOR_ID && d.product_id() == U3_PRODUCT_ID)
                    .unwrap_or(false)
            }))
        })
        .await
    }

    async fn open(&mut self) -> Result<(U3Port, DeviceInfo)> {
        let (handle, serial) = blocking(|| {
            let mut handle = rusb::open_device_with_vid_pid(U3_VENDOR_ID, U3_PRODUCT_ID)
                .ok_or_else(|| HardwareError::not_found("LabJack U3"))?;
            // Not supported on every platform
            let _ = handle.set_auto_detach_kernel_driver(true);
            handle.claim_interface(0).map_err(usb_error)?;

            let serial = handle
                .device()
                .device_descriptor()
                .ok()
                .and_then(|desc| handle.read_serial_number_string_ascii(&desc).ok());
            Ok((handle, serial))
        })
        .await?;

        let mut info = DeviceInfo::new("LabJack U3", format!("{U3_VENDOR_ID:04X}:{U3_PRODUCT_ID:04X}"));
        if let Some(serial) = serial {
            info = info.with_serial_number(serial);
        }
        debug!(serial = ?info.serial_number, "LabJack U3 opened");

        Ok((
            U3Port {
                handle: Arc::new(handle),
                echo: 0,
            },
            info,
        ))
    }
}

/// Open LabJack U3.
#[derive(Debug)]
pub struct U3Port {
    handle: Arc<DeviceHandle<GlobalContext>>,
    echo: u8,
}

impl U3Port {
    async fn transact(&self, frame: Vec<u8>) -> Result<Vec<u8>> {
        let handle = self.handle.clone();
        blocking(move || {
            trace!(request = ?frame, "U3 request");
            handle
                .write_bulk(ENDPOINT_OUT, &frame, USB_TIMEOUT)
                .map_err(usb_error)?;

            let mut buf = [0u8; PACKET_SIZE];
            let len = handle
                .read_bulk(ENDPOINT_IN, &mut buf, USB_TIMEOUT)
                .map_err(usb_error)?;
            Ok(buf[..len].to_vec())
        })
        .await
    }

    async fn feedback(&mut self, iotypes: &[u8]) -> Result<Vec<u8>> {
        self.echo = self.echo.wrapping_add(1);
        let echo = self.echo;
        let response = self.transact(feedback_frame(echo, iotypes)).await?;
        parse_feedback(&response, echo).map(<[u8]>::to_vec)
    }

    fn digital_io(pin: Pin) -> Result<u8> {
        pin.digital_io_number()
            .ok_or_else(|| HardwareError::unsupported(format!("digital access to {pin}")))
    }
}

impl IoPort for U3Port {
    async fn configure(&mut self, pins: &PinMap) -> Result<()> {
        let mut fio_analog = 0u8;
        let mut dac1_enable = false;
        let mut directions = Vec::new();

        for (channel, pin) in pins.iter() {
            match pin {
                Pin::Ain(n) => fio_analog |= 1 << n,
                Pin::Dac(n) => dac1_enable |= n == 1,
                Pin::Fio(_) | Pin::Eio(_) => {
                    let io = Self::digital_io(pin)?;
                    let output = u8::from(channel.kind().is_output());
                    directions.extend_from_slice(&[IOTYPE_BIT_DIR_WRITE, io | (output << 7)]);
                }
            }
        }

        let response = self.transact(config_io_frame(fio_analog, dac1_enable)).await?;
        check_response(&response, 12)?;
        self.feedback(&directions).await?;

        debug!(fio_analog, dac1_enable, "U3 configured");
        Ok(())
    }

    async fn read_digital(&mut self, pin: Pin) -> Result<bool> {
        let io = Self::digital_io(pin)?;
        let data = self.feedback(&[IOTYPE_BIT_STATE_READ, io]).await?;
        let state = data
            .first()
            .ok_or_else(|| HardwareError::invalid_data("missing bit state"))?;
        Ok(state & 0x01 != 0)
    }

    async fn write_digital(&mut self, pin: Pin, high: bool) -> Result<()> {
        let io = Self::digital_io(pin)?;
        self.feedback(&[IOTYPE_BIT_STATE_WRITE, io | (u8::from(high) << 7)])
            .await
            .map(drop)
    }

    async fn read_analog(&mut self, pin: Pin) -> Result<f64> {
        let Pin::Ain(n) = pin else {
            return Err(HardwareError::unsupported(format!("analog read of {pin}")));
        };
        let data = self.feedback(&[IOTYPE_AIN, n, SINGLE_ENDED]).await?;
        match data.as_slice() {
            [lsb, msb, ..] => Ok(ain_volts(u16::from_le_bytes([*lsb, *msb]))),
            _ => Err(HardwareError::invalid_data("missing AIN sample")),
        }
    }

    async fn write_analog(&mut self, pin: Pin, volts: f64) -> Result<()> {
        let Pin::Dac(n) = pin else {
            return Err(HardwareError::unsupported(format!("analog write of {pin}")));
        };
        self.feedback(&[IOTYPE_DAC0_8BIT + n, dac_value(volts)])
            .await
            .map(drop)
    }
}
