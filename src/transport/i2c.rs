//! I²C transport strategy: frames requests per VESA DDC/CI using the
//! wire codec in [`crate::ddc::ci`], over a raw `/dev/i2c-N` file
//! descriptor addressed at slave `0x37` — the literal kernel surface
//! spec.md §6 describes, rather than the teacher's higher-level
//! `i2cdev::LinuxI2CBus` message batching, so that `EBUSY` and
//! `force_slave_address` are observable at this layer.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use crate::ddc::ci::{parse_feature_reply, DdcCiMessage, DdcOpcode, ResultCode};
use crate::error::CoreError;
use crate::path::IoPath;

use super::{NonTableReply, Transport};

const I2C_SLAVE: u64 = 0x0703;
const I2C_SLAVE_FORCE: u64 = 0x0706;
const DDC_SLAVE_ADDR: u16 = 0x37;

/// Generous upper bound on a single DDC/CI reply: 1 length byte + up to 36
/// data bytes (opcode + vcp feature + offset + 32-byte fragment) + checksum.
const DDC_REPLY_BUFFER_SIZE: usize = 40;

pub struct I2cTransport {
    io_path: IoPath,
    file: File,
    busno: u16,
}

impl I2cTransport {
    /// Open `/dev/i2c-<busno>` and bind it to the DDC/CI slave address.
    /// `force` selects `I2C_SLAVE_FORCE` (spec.md's
    /// `force_slave_address` option), used to reclaim a bus another
    /// driver (e.g. `ddcci`) is holding.
    pub fn open(busno: u16, force: bool) -> Result<Self, CoreError> {
        let io_path = IoPath::I2c { bus_number: busno };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(format!("/dev/i2c-{busno}"))
            .map_err(|e| CoreError::IoError(io_path, e))?;

        let req = if force { I2C_SLAVE_FORCE } else { I2C_SLAVE };
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), req, DDC_SLAVE_ADDR as libc::c_ulong) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EBUSY) {
                return Err(CoreError::Busy(io_path, "ioctl(I2C_SLAVE) returned EBUSY".into()));
            }
            return Err(CoreError::IoError(io_path, err));
        }

        Ok(I2cTransport {
            io_path,
            file,
            busno,
        })
    }

    pub fn busno(&self) -> u16 {
        self.busno
    }

    fn raw_write(&mut self, bytes: &[u8]) -> Result<(), CoreError> {
        self.file
            .write_all(bytes)
            .map_err(|e| CoreError::IoError(self.io_path, e))
    }

    fn raw_read(&mut self, max_len: usize) -> Result<Vec<u8>, CoreError> {
        let mut buf = vec![0u8; max_len];
        let n = self
            .file
            .read(&mut buf)
            .map_err(|e| CoreError::IoError(self.io_path, e))?;
        buf.truncate(n);
        Ok(buf)
    }

    fn exchange(&mut self, message: DdcCiMessage, reply_len: usize) -> Result<DdcCiMessage, CoreError> {
        self.raw_write(&message.transmit_buffer())?;
        std::thread::sleep(Duration::from_millis(40));
        let reply = self.raw_read(reply_len)?;
        DdcCiMessage::parse_buffer(&reply)
            .map_err(|e| CoreError::InvalidProtocol(self.io_path, e.to_string()))
    }
}

impl Transport for I2cTransport {
    fn io_path(&self) -> IoPath {
        self.io_path
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), CoreError> {
        self.raw_write(bytes)
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, CoreError> {
        self.raw_read(max_len)
    }

    fn get_vcp_nontable(&mut self, code: u8) -> Result<NonTableReply, CoreError> {
        let request = DdcCiMessage::from_opcode(DdcOpcode::VcpRequest).set_vcp_feature(code.into());
        let reply = self.exchange(request, DDC_REPLY_BUFFER_SIZE)?;

        if reply == DdcCiMessage::NullResponse() {
            return Err(CoreError::NullResponse(self.io_path));
        }
        if reply.get_opcode() != Some(&DdcOpcode::VcpReply) {
            return Err(CoreError::InvalidProtocol(
                self.io_path,
                "expected VcpReply opcode".into(),
            ));
        }
        let (_, parsed) = parse_feature_reply(reply.get_data())
            .map_err(|e| CoreError::InvalidProtocol(self.io_path, format!("{e:?}")))?;
        if *parsed.result_code() == ResultCode::UnsupportedCode {
            return Err(CoreError::ReportedUnsupported(self.io_path));
        }
        let data = parsed.vcp_data();
        Ok(NonTableReply {
            type_code: match parsed.type_code() {
                crate::ddc::ci::VcpType::SetParameter => 0,
                crate::ddc::ci::VcpType::Momentary => 1,
            },
            max: ((data >> 16) & 0xffff) as u16,
            current: (data & 0xffff) as u16,
        })
    }

    fn set_vcp_nontable(&mut self, code: u8, value: u16) -> Result<(), CoreError> {
        let bytes = value.to_be_bytes();
        let request = DdcCiMessage::from_opcode(DdcOpcode::SetVcp)
            .set_vcp_feature(code.into())
            .set_data(&bytes)
            .map_err(|e| CoreError::InvalidProtocol(self.io_path, e.to_string()))?;
        self.raw_write(&request.transmit_buffer())?;
        std::thread::sleep(Duration::from_millis(50));
        Ok(())
    }

    fn get_capabilities_fragment(&mut self, offset: u16) -> Result<Vec<u8>, CoreError> {
        let request = DdcCiMessage::from_opcode(DdcOpcode::CapabilitiesRequest).set_offset(offset);
        let reply = self.exchange(request, DDC_REPLY_BUFFER_SIZE)?;
        if reply.get_opcode() != Some(&DdcOpcode::CapabilitiesReply) {
            return Err(CoreError::InvalidProtocol(
                self.io_path,
                "expected CapabilitiesReply opcode".into(),
            ));
        }
        Ok(reply.get_data().to_vec())
    }

    fn save_current_settings(&mut self) -> Result<(), CoreError> {
        let request = DdcCiMessage::from_opcode(DdcOpcode::SaveCurrentSettings);
        self.raw_write(&request.transmit_buffer())
    }
}
