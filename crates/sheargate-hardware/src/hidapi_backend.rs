//! USB HID backend built on `hidapi`.
//!
//! `hidapi` calls block, so every call runs on the blocking thread pool.

use crate::{
    HardwareError, Result,
    hid::HidDeviceDescriptor,
    traits::{HidPort, HidTransport},
};
use bytes::Bytes;
use hidapi::{HidApi, HidDevice};
use sheargate_core::constants::HID_REPORT_SIZE;
use std::ffi::CString;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::trace;

fn hid_error(e: hidapi::HidError) -> HardwareError {
    HardwareError::communication(e.to_string())
}

async fn blocking<T: Send + 'static>(f: impl FnOnce() -> Result<T> + Send + 'static) -> Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| HardwareError::other(format!("blocking HID task failed: {e}")))?
}

/// Host HID stack.
#[derive(Clone)]
pub struct HidApiTransport {
    api: Arc<Mutex<HidApi>>,
}

impl std::fmt::Debug for HidApiTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HidApiTransport").finish_non_exhaustive()
    }
}

impl HidApiTransport {
    pub fn new() -> Result<Self> {
        let api = HidApi::new().map_err(hid_error)?;
        Ok(Self {
            api: Arc::new(Mutex::new(api)),
        })
    }
}

impl HidTransport for HidApiTransport {
    type Port = HidApiPort;

    async fn enumerate(&mut self) -> Result<Vec<HidDeviceDescriptor>> {
        let api = self.api.clone();
        blocking(move || {
            let mut api = api.lock().unwrap_or_else(PoisonError::into_inner);
            api.refresh_devices().map_err(hid_error)?;

            let devices = api
                .device_list()
                .map(|info| {
                    let mut desc = HidDeviceDescriptor::new(
                        info.path().to_string_lossy().into_owned(),
                        info.vendor_id(),
                        info.product_id(),
                    );
                    if let Some(product) = info.product_string() {
                        desc = desc.with_product(product);
                    }
                    if let Some(manufacturer) = info.manufacturer_string() {
                        desc = desc.with_manufacturer(manufacturer);
                    }
                    if let Some(serial) = info.serial_number() {
                        desc = desc.with_serial_number(serial);
                    }
                    desc
                })
                .collect();
            Ok(devices)
        })
        .await
    }

    async fn open(&mut self, device: &HidDeviceDescriptor) -> Result<HidApiPort> {
        let api = self.api.clone();
        let path = CString::new(device.path.clone())
            .map_err(|_| HardwareError::configuration(format!("invalid HID path {}", device.path)))?;

        let handle = blocking(move || {
            let api = api.lock().unwrap_or_else(PoisonError::into_inner);
            api.open_path(&path).map_err(hid_error)
        })
        .await?;

        Ok(HidApiPort {
            device: Arc::new(Mutex::new(handle)),
        })
    }
}

/// Open card reader.
pub struct HidApiPort {
    device: Arc<Mutex<HidDevice>>,
}

impl std::fmt::Debug for HidApiPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HidApiPort").finish_non_exhaustive()
    }
}

impl HidPort for HidApiPort {
    async fn read_report(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        let device = self.device.clone();
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

        blocking(move || {
            let device = device.lock().unwrap_or_else(PoisonError::into_inner);
            let mut buf = [0u8; HID_REPORT_SIZE];
            let len = device
                .read_timeout(&mut buf, timeout_ms)
                .map_err(|e| HardwareError::disconnected(format!("card reader: {e}")))?;

            if len == 0 {
                return Ok(None);
            }
            trace!(len, "HID report");
            Ok(Some(Bytes::copy_from_slice(&buf[..len])))
        })
        .await
    }
}
