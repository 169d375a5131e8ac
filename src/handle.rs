//! Display-Handle: an open transport bound to one [`DisplayRef`], scoped
//! by a held [`LockToken`] (spec.md §4.4). Short-lived by design — callers
//! open, operate, and let the handle drop rather than holding it across
//! unrelated work.

use std::sync::Arc;

use log::debug;

use crate::error::OpenError;
use crate::flags::DisplayFlags;
use crate::lock::{LockTable, LockToken};
use crate::path::IoPath;
use crate::registry::{DisplayRef, TransportDetail};
use crate::transport::i2c::I2cTransport;
use crate::transport::retry::RetryingTransport;
use crate::transport::Transport;

/// Options controlling how a handle is opened (a narrow slice of
/// [`crate::detect::DetectionConfig`] relevant at open time).
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    pub wait_for_lock: bool,
    pub force_slave_address: bool,
    pub max_retry_attempts: u32,
    pub never_use_null_as_unsupported: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            wait_for_lock: true,
            force_slave_address: false,
            max_retry_attempts: 4,
            never_use_null_as_unsupported: false,
        }
    }
}

/// An open, locked transport to one display. Dropping it releases the lock
/// and closes the underlying file descriptor; there is no separate `close`
/// call for callers to forget.
pub struct DisplayHandle<'a> {
    display_ref: Arc<DisplayRef>,
    transport: Box<dyn Transport + 'a>,
    _lock: LockToken<'a>,
}

impl<'a> DisplayHandle<'a> {
    pub fn open(
        display_ref: Arc<DisplayRef>,
        lock_table: &'a LockTable,
        options: OpenOptions,
    ) -> Result<Self, OpenError> {
        let io_path = display_ref.io_path;

        if display_ref.flags().contains(DisplayFlags::REMOVED) {
            return Err(OpenError::Io(
                io_path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "display has been removed"),
            ));
        }

        let lock = lock_table.lock(io_path, options.wait_for_lock)?;

        let transport: Box<dyn Transport> = match &display_ref.detail {
            TransportDetail::I2c(detail) => {
                let raw = I2cTransport::open(detail.busno, options.force_slave_address).map_err(|e| {
                    let classified = classify_open_error(io_path, e);
                    if let OpenError::Busy(_) = classified {
                        display_ref.insert_flags(DisplayFlags::DDC_BUSY);
                    }
                    classified
                })?;
                Box::new(
                    RetryingTransport::new(raw)
                        .with_max_attempts(options.max_retry_attempts)
                        .never_use_null_as_unsupported(options.never_use_null_as_unsupported),
                )
            }
            TransportDetail::Usb(_detail) => {
                return Err(OpenError::Io(
                    io_path,
                    std::io::Error::new(
                        std::io::ErrorKind::Unsupported,
                        "USB HID transport requires a shared HidApi instance; use open_usb",
                    ),
                ));
            }
        };

        display_ref.insert_flags(DisplayFlags::OPEN);
        debug!("opened handle for {io_path}");

        Ok(DisplayHandle {
            display_ref,
            transport,
            _lock: lock,
        })
    }

    /// Open a USB HID-backed display; requires a caller-owned [`hidapi::HidApi`]
    /// instance since `hidapi` enumerates and opens devices through it.
    pub fn open_usb(
        display_ref: Arc<DisplayRef>,
        lock_table: &'a LockTable,
        options: OpenOptions,
        api: &hidapi::HidApi,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<Self, OpenError> {
        let io_path = display_ref.io_path;
        let lock = lock_table.lock(io_path, options.wait_for_lock)?;

        let TransportDetail::Usb(detail) = &display_ref.detail else {
            return Err(OpenError::Io(
                io_path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a USB display"),
            ));
        };

        let raw = crate::transport::usb::UsbTransport::open(
            api,
            detail.bus,
            detail.device,
            detail.hiddev_number,
            vendor_id,
            product_id,
        )
        .map_err(|e| classify_open_error(io_path, e))?;

        let transport: Box<dyn Transport> = Box::new(
            RetryingTransport::new(raw)
                .with_max_attempts(options.max_retry_attempts)
                .never_use_null_as_unsupported(options.never_use_null_as_unsupported),
        );

        display_ref.insert_flags(DisplayFlags::OPEN);

        Ok(DisplayHandle {
            display_ref,
            transport,
            _lock: lock,
        })
    }

    pub fn io_path(&self) -> IoPath {
        self.display_ref.io_path
    }

    pub fn display_ref(&self) -> &Arc<DisplayRef> {
        &self.display_ref
    }

    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }
}

impl Drop for DisplayHandle<'_> {
    fn drop(&mut self) {
        self.display_ref
            .flags
            .lock()
            .unwrap()
            .remove(DisplayFlags::OPEN);
        debug!("closed handle for {}", self.display_ref.io_path);
    }
}

fn classify_open_error(io_path: IoPath, err: crate::error::CoreError) -> OpenError {
    match err {
        crate::error::CoreError::Busy(p, _) => OpenError::Busy(p),
        crate::error::CoreError::IoError(p, io_err) => OpenError::Io(p, io_err),
        other => OpenError::Io(io_path, std::io::Error::other(other.to_string())),
    }
}
