//! Initial-checks: the battery of probes run once per newly discovered
//! display, establishing whether DDC/CI communication works at all, how
//! this monitor signals "unsupported feature", and which MCCS version it
//! claims (spec.md §4.8).

use log::{debug, error, info};

use crate::error::CoreError;
use crate::flags::DisplayFlags;
use crate::mccs::Version;
use crate::path::IoPath;
use crate::registry::DisplayRef;
use crate::transport::Transport;

/// Feature codes used purely as probes, not reported to callers.
const PROBE_FEATURE_LUMINANCE: u8 = 0x10;
const PROBE_FEATURE_KNOWN_UNSUPPORTED: u8 = 0x41;
const PROBE_FEATURE_RESERVED: u8 = 0xdd;
const PROBE_FEATURE_DEGAUSS: u8 = 0x00;
const FEATURE_VCP_VERSION: u8 = 0xdf;

/// Outcome of running the full check sequence against one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialCheckOutcome {
    Working,
    NotADisplay,
    DpmsAsleep,
}

/// Step 1: does the monitor answer *any* VCP request. A bare `0x10`
/// (luminance) probe succeeding, or failing with `ReportedUnsupported`/
/// `DeterminedUnsupported` (the monitor answered, it just doesn't support
/// this code), both count as "DDC/CI comms work".
pub(crate) fn probe_connectivity(transport: &mut dyn Transport, io_path: IoPath) -> Result<bool, CoreError> {
    match transport.get_vcp_nontable(PROBE_FEATURE_LUMINANCE) {
        Ok(_) => Ok(true),
        Err(CoreError::ReportedUnsupported(_)) | Err(CoreError::DeterminedUnsupported(_)) => Ok(true),
        Err(CoreError::DpmsAsleep(_)) => Err(CoreError::DpmsAsleep(io_path)),
        Err(CoreError::AllResponsesNull(_)) | Err(CoreError::Retries(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Step 2: probe three feature codes the monitor is vanishingly unlikely
/// to genuinely support (`0x41`, `0xdd`, `0x00`) to learn which of the
/// three conventions it uses to say "no": a hard protocol-level null, a
/// `VcpReply` whose mh/ml/sh/sl fields are all zero, or an honest
/// `UnsupportedCode` result byte. USB HID transports skip this step —
/// their report format has no equivalent ambiguity to resolve.
fn classify_unsupported_indication(transport: &mut dyn Transport, is_usb: bool) -> DisplayFlags {
    if is_usb {
        return DisplayFlags::USES_DDC_FLAG_FOR_UNSUPPORTED;
    }

    let probes = [
        PROBE_FEATURE_KNOWN_UNSUPPORTED,
        PROBE_FEATURE_RESERVED,
        PROBE_FEATURE_DEGAUSS,
    ];

    for code in probes {
        match transport.get_vcp_nontable(code) {
            Err(CoreError::NullResponse(_)) | Err(CoreError::AllResponsesNull(_)) => {
                return DisplayFlags::USES_NULL_RESPONSE_FOR_UNSUPPORTED;
            }
            Err(CoreError::ReportedUnsupported(_)) => {
                return DisplayFlags::USES_DDC_FLAG_FOR_UNSUPPORTED;
            }
            Ok(reply) if reply.max == 0 && reply.current == 0 => {
                return DisplayFlags::USES_MH_ML_SH_SL_ZERO_FOR_UNSUPPORTED;
            }
            // A genuine, non-zero reply to a code no monitor should
            // support means this monitor simply doesn't signal
            // "unsupported" at all; no point probing the remaining codes.
            Ok(_) => return DisplayFlags::DOES_NOT_INDICATE_UNSUPPORTED,
            Err(CoreError::Retries(_)) => continue,
            Err(_) => continue,
        }
    }
    error!("unsupported-feature probes exhausted with no conclusive signal, guessing USES_DDC_FLAG_FOR_UNSUPPORTED");
    DisplayFlags::USES_DDC_FLAG_FOR_UNSUPPORTED
}

/// Step 3: probe VCP feature `0xdf` (VCP Version) to learn the MCCS
/// revision this monitor claims to speak; absent or malformed replies
/// leave the probed version unset rather than failing the whole check.
fn probe_vcp_version(transport: &mut dyn Transport) -> Option<Version> {
    let reply = transport.get_vcp_nontable(FEATURE_VCP_VERSION).ok()?;
    let major = (reply.current >> 8) as u8;
    let minor = (reply.current & 0xff) as u8;
    if major == 0 {
        return None;
    }
    Some(Version { major, minor })
}

/// Run the full sequence against an already-open transport and record the
/// results on `display_ref`. `force_bus` (spec.md's test-mode short
/// circuit) skips the probes and marks the display as working
/// unconditionally, for exercising the rest of detection without real
/// hardware.
pub fn run_initial_checks(
    display_ref: &DisplayRef,
    transport: &mut dyn Transport,
    is_usb: bool,
    force_bus: bool,
) -> InitialCheckOutcome {
    let io_path = display_ref.io_path;

    if force_bus {
        display_ref.insert_flags(
            DisplayFlags::DDC_COMMS_CHECKED
                | DisplayFlags::DDC_COMMS_WORKING
                | DisplayFlags::IS_MONITOR_CHECKED
                | DisplayFlags::IS_MONITOR
                | DisplayFlags::UNSUPPORTED_CHECKED
                | DisplayFlags::USES_DDC_FLAG_FOR_UNSUPPORTED,
        );
        return InitialCheckOutcome::Working;
    }

    display_ref.insert_flags(DisplayFlags::DDC_COMMS_CHECKED);
    match probe_connectivity(transport, io_path) {
        Ok(true) => {
            display_ref.insert_flags(DisplayFlags::DDC_COMMS_WORKING | DisplayFlags::IS_MONITOR_CHECKED | DisplayFlags::IS_MONITOR);
        }
        Ok(false) => {
            display_ref.insert_flags(DisplayFlags::IS_MONITOR_CHECKED);
            info!("{io_path}: no DDC/CI response during initial checks, treating as not a display");
            return InitialCheckOutcome::NotADisplay;
        }
        Err(CoreError::DpmsAsleep(_)) => {
            display_ref.insert_flags(DisplayFlags::DPMS_ASLEEP);
            return InitialCheckOutcome::DpmsAsleep;
        }
        Err(e) => {
            debug!("{io_path}: initial connectivity probe errored: {e}");
            display_ref.insert_flags(DisplayFlags::IS_MONITOR_CHECKED);
            return InitialCheckOutcome::NotADisplay;
        }
    }

    let unsupported_flag = classify_unsupported_indication(transport, is_usb);
    display_ref.insert_flags(DisplayFlags::UNSUPPORTED_CHECKED | unsupported_flag);

    if let Some(version) = probe_vcp_version(transport) {
        *display_ref.vcp_version_probed.write().unwrap() = Some(version);
    }

    InitialCheckOutcome::Working
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::TransportDetail;
    use crate::transport::NonTableReply;

    struct ScriptedTransport {
        io_path: IoPath,
        replies: std::collections::VecDeque<Result<NonTableReply, CoreError>>,
    }

    impl Transport for ScriptedTransport {
        fn io_path(&self) -> IoPath {
            self.io_path
        }
        fn write(&mut self, _bytes: &[u8]) -> Result<(), CoreError> {
            Ok(())
        }
        fn read(&mut self, _max_len: usize) -> Result<Vec<u8>, CoreError> {
            Ok(Vec::new())
        }
        fn get_vcp_nontable(&mut self, _code: u8) -> Result<NonTableReply, CoreError> {
            self.replies
                .pop_front()
                .unwrap_or(Err(CoreError::AllResponsesNull(self.io_path)))
        }
        fn set_vcp_nontable(&mut self, _code: u8, _value: u16) -> Result<(), CoreError> {
            Ok(())
        }
        fn get_capabilities_fragment(&mut self, _offset: u16) -> Result<Vec<u8>, CoreError> {
            Ok(Vec::new())
        }
        fn save_current_settings(&mut self) -> Result<(), CoreError> {
            Ok(())
        }
    }

    fn make_ref(io_path: IoPath) -> DisplayRef {
        DisplayRef::new(
            io_path,
            TransportDetail::I2c(crate::bus::I2cBusDetail {
                busno: 1,
                flags: crate::bus::BusFlags::EXISTS,
                functionality: 0,
                driver: None,
                drm_connector_name: None,
                drm_connector_found_by: crate::bus::DrmConnectorFoundBy::NotChecked,
                open_errno: None,
            }),
        )
    }

    #[test]
    fn working_monitor_sets_comms_and_unsupported_flags() {
        let io_path = IoPath::I2c { bus_number: 1 };
        let mut transport = ScriptedTransport {
            io_path,
            replies: vec![
                Ok(NonTableReply { type_code: 0, max: 100, current: 50 }),
                Err(CoreError::ReportedUnsupported(io_path)),
                Ok(NonTableReply { type_code: 0, max: 0, current: 0x0203 }),
            ]
            .into(),
        };
        let display_ref = make_ref(io_path);
        let outcome = run_initial_checks(&display_ref, &mut transport, false, false);
        assert_eq!(outcome, InitialCheckOutcome::Working);
        assert!(display_ref.flags().contains(DisplayFlags::DDC_COMMS_WORKING));
        assert!(display_ref.flags().contains(DisplayFlags::USES_DDC_FLAG_FOR_UNSUPPORTED));
        assert_eq!(
            display_ref.vcp_version_probed.read().unwrap().as_ref(),
            Some(&Version { major: 2, minor: 3 })
        );
    }

    #[test]
    fn retries_on_every_probe_falls_back_to_ddc_flag_guess() {
        let io_path = IoPath::I2c { bus_number: 3 };
        let mut transport = ScriptedTransport {
            io_path,
            replies: vec![
                Ok(NonTableReply { type_code: 0, max: 100, current: 50 }),
                Err(CoreError::Retries(io_path)),
                Err(CoreError::Retries(io_path)),
                Err(CoreError::Retries(io_path)),
            ]
            .into(),
        };
        let display_ref = make_ref(io_path);
        let outcome = run_initial_checks(&display_ref, &mut transport, false, false);
        assert_eq!(outcome, InitialCheckOutcome::Working);
        assert!(display_ref.flags().contains(DisplayFlags::USES_DDC_FLAG_FOR_UNSUPPORTED));
    }

    #[test]
    fn silent_bus_is_not_a_display() {
        let io_path = IoPath::I2c { bus_number: 2 };
        let mut transport = ScriptedTransport {
            io_path,
            replies: vec![Err(CoreError::AllResponsesNull(io_path))].into(),
        };
        let display_ref = make_ref(io_path);
        let outcome = run_initial_checks(&display_ref, &mut transport, false, false);
        assert_eq!(outcome, InitialCheckOutcome::NotADisplay);
        assert!(!display_ref.flags().contains(DisplayFlags::IS_MONITOR));
    }
}
