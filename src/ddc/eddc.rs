//! E-DDC
//!
//! This module adds the definitions from the Extended-DDC Standard

pub const EDDC_SEGMENT_POINTER_ADDR: u8 = 0x30;

pub const EDID_ADDRESS: u8 = 0x50;
pub const DISPLAY_ID_ADDRESS: u8 = 0x52;
