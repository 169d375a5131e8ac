//! USB HID transport strategy, for monitors that expose VCP control over a
//! USB monitor-control HID report rather than I²C/DDC-CI (spec.md §4.5,
//! §4.6). No Rust repo in the reference pack speaks raw `/dev/usb/hiddev*`;
//! this is built directly on `hidapi`, the crate the broader ecosystem uses
//! for exactly this kind of vendor-defined HID exchange.

use hidapi::{HidApi, HidDevice};

use crate::error::CoreError;
use crate::path::IoPath;

use super::{NonTableReply, Transport};

/// USB Monitor Control Class report IDs (USB HID Monitor usage page,
/// as used by ddc/ci-over-USB monitors).
const REPORT_ID_VCP: u8 = 0x02;
const REPORT_ID_VCP_FRAGMENT: u8 = 0x03;

pub struct UsbTransport {
    io_path: IoPath,
    device: HidDevice,
    bus: u16,
    usb_device: u16,
    hiddev_number: u16,
}

impl UsbTransport {
    pub fn open(api: &HidApi, bus: u16, usb_device: u16, hiddev_number: u16, vendor_id: u16, product_id: u16) -> Result<Self, CoreError> {
        let io_path = IoPath::Usb { bus, device: usb_device, hiddev_number };
        let device = api
            .open(vendor_id, product_id)
            .map_err(|e| CoreError::IoError(io_path, std::io::Error::other(e.to_string())))?;
        Ok(UsbTransport { io_path, device, bus, usb_device, hiddev_number })
    }

    pub fn bus(&self) -> u16 {
        self.bus
    }

    pub fn usb_device(&self) -> u16 {
        self.usb_device
    }

    pub fn hiddev_number(&self) -> u16 {
        self.hiddev_number
    }
}

impl Transport for UsbTransport {
    fn io_path(&self) -> IoPath {
        self.io_path
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), CoreError> {
        self.device
            .write(bytes)
            .map(|_| ())
            .map_err(|e| CoreError::IoError(self.io_path, std::io::Error::other(e.to_string())))
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, CoreError> {
        let mut buf = vec![0u8; max_len];
        let n = self
            .device
            .read(&mut buf)
            .map_err(|e| CoreError::IoError(self.io_path, std::io::Error::other(e.to_string())))?;
        buf.truncate(n);
        Ok(buf)
    }

    fn get_vcp_nontable(&mut self, code: u8) -> Result<NonTableReply, CoreError> {
        let request = [REPORT_ID_VCP, code, 0x00, 0x00, 0x00];
        self.write(&request)?;
        let reply = self.read(8)?;
        if reply.len() < 7 {
            return Err(CoreError::InvalidProtocol(
                self.io_path,
                "short USB VCP reply".into(),
            ));
        }
        if reply[1] != 0 {
            return Err(CoreError::ReportedUnsupported(self.io_path));
        }
        Ok(NonTableReply {
            type_code: reply[2],
            max: u16::from_be_bytes([reply[3], reply[4]]),
            current: u16::from_be_bytes([reply[5], reply[6]]),
        })
    }

    fn set_vcp_nontable(&mut self, code: u8, value: u16) -> Result<(), CoreError> {
        let bytes = value.to_be_bytes();
        let request = [REPORT_ID_VCP, code, bytes[0], bytes[1]];
        self.write(&request)
    }

    fn get_capabilities_fragment(&mut self, offset: u16) -> Result<Vec<u8>, CoreError> {
        let offset_bytes = offset.to_be_bytes();
        let request = [REPORT_ID_VCP_FRAGMENT, offset_bytes[0], offset_bytes[1]];
        self.write(&request)?;
        let reply = self.read(64)?;
        if reply.is_empty() {
            return Err(CoreError::NullResponse(self.io_path));
        }
        Ok(reply[1..].to_vec())
    }

    fn save_current_settings(&mut self) -> Result<(), CoreError> {
        // USB monitor-control devices commit each `set_vcp_nontable` call
        // immediately; there is no separate commit report.
        Ok(())
    }
}
