//! The closed set of per-display state flags, as a typed bitset.

use bitflags::bitflags;

bitflags! {
    /// Mirrors the flag set carried on every catalog entry. Manual
    /// bitwise-or over a raw integer is replaced by a named, closed set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DisplayFlags: u32 {
        const DDC_COMMS_CHECKED                       = 1 << 0;
        const DDC_COMMS_WORKING                        = 1 << 1;
        const IS_MONITOR_CHECKED                       = 1 << 2;
        const IS_MONITOR                               = 1 << 3;
        const UNSUPPORTED_CHECKED                      = 1 << 4;
        const USES_NULL_RESPONSE_FOR_UNSUPPORTED       = 1 << 5;
        const USES_MH_ML_SH_SL_ZERO_FOR_UNSUPPORTED    = 1 << 6;
        const USES_DDC_FLAG_FOR_UNSUPPORTED            = 1 << 7;
        const DOES_NOT_INDICATE_UNSUPPORTED            = 1 << 8;
        const TRANSIENT                                = 1 << 9;
        const OPEN                                     = 1 << 10;
        const DDC_BUSY                                 = 1 << 11;
        const REMOVED                                  = 1 << 12;
        const DPMS_ASLEEP                              = 1 << 13;
    }
}

/// Reserved `display_number` sentinels (spec.md §3).
pub mod display_number {
    pub const UNASSIGNED: i32 = 0;
    pub const INVALID: i32 = -1;
    pub const PHANTOM: i32 = -2;
    pub const REMOVED: i32 = -3;
    pub const BUSY: i32 = -4;
    pub const DDC_DISABLED: i32 = -5;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unsupported_indication_flags_are_mutually_distinguishable() {
        let a = DisplayFlags::USES_NULL_RESPONSE_FOR_UNSUPPORTED;
        let b = DisplayFlags::USES_DDC_FLAG_FOR_UNSUPPORTED;
        assert_ne!(a.bits(), b.bits());
        assert!(!a.contains(b));
    }
}
