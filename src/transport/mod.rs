//! Dispatch by [`IoPath`] tag to an I²C or USB HID transport strategy, both
//! conforming to the same small capability set. Retries are applied
//! uniformly by [`retry::RetryingTransport`], invisible to callers above
//! this layer.

pub mod i2c;
pub mod retry;
pub mod usb;

use crate::error::CoreError;
use crate::path::IoPath;

/// A nontable VCP reply: `(type, max, current)` (spec.md glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonTableReply {
    pub type_code: u8,
    pub max: u16,
    pub current: u16,
}

/// Distinguishable transport-operation outcomes (spec.md §4.5). `Transport`
/// implementations surface these as `CoreError` variants; the retry
/// decorator is what actually classifies raw failures into them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOutcome {
    Success,
    NullResponse,
    AllResponsesNull,
    Retries,
    ReportedUnsupported,
    DeterminedUnsupported,
}

/// Capability set both transport strategies implement.
pub trait Transport {
    fn io_path(&self) -> IoPath;
    fn write(&mut self, bytes: &[u8]) -> Result<(), CoreError>;
    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, CoreError>;
    fn get_vcp_nontable(&mut self, code: u8) -> Result<NonTableReply, CoreError>;
    fn set_vcp_nontable(&mut self, code: u8, value: u16) -> Result<(), CoreError>;
    fn get_capabilities_fragment(&mut self, offset: u16) -> Result<Vec<u8>, CoreError>;
    fn save_current_settings(&mut self) -> Result<(), CoreError>;
}
