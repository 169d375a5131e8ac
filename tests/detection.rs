//! End-to-end catalog scenarios driven by a mock transport, composing the
//! initial-checks engine, the phantom filter, and the registry the way
//! `detect::run_detection` does internally. Bus-level behavior that needs a
//! real file descriptor (EBUSY reclassification, cross-thread lock
//! contention) is covered by `lock.rs`'s own unit tests instead, since a
//! mock transport never touches `/dev/i2c-N`.

use std::collections::HashMap;
use std::sync::Arc;

use ddc_core::checks::{run_initial_checks, InitialCheckOutcome};
use ddc_core::error::CoreError;
use ddc_core::flags::{display_number, DisplayFlags};
use ddc_core::mccs::Version;
use ddc_core::path::IoPath;
use ddc_core::phantom::{filter_phantoms, filter_phantoms_with, PhantomMatchMode};
use ddc_core::registry::{DisplayRef, Mmid, Registry, TransportDetail};
use ddc_core::transport::{NonTableReply, Transport};
use ddc_core::bus::{BusFlags, DrmConnectorFoundBy, I2cBusDetail};

/// One scripted outcome for a feature-code probe. Kept as a fresh
/// description rather than a prebuilt `Result<_, CoreError>` so the mock can
/// derive a new `CoreError` per call without needing `CoreError: Clone`.
#[derive(Clone, Copy)]
enum MockReply {
    Ok { type_code: u8, max: u16, current: u16 },
    AllResponsesNull,
    ReportedUnsupported,
}

fn ok(type_code: u8, max: u16, current: u16) -> MockReply {
    MockReply::Ok { type_code, max, current }
}

/// A transport whose replies are scripted per feature code, looping the
/// last scripted reply once its queue is drained.
struct MockTransport {
    io_path: IoPath,
    scripts: HashMap<u8, Vec<MockReply>>,
}

impl MockTransport {
    fn new(io_path: IoPath) -> Self {
        MockTransport { io_path, scripts: HashMap::new() }
    }

    fn script(mut self, code: u8, replies: Vec<MockReply>) -> Self {
        self.scripts.insert(code, replies);
        self
    }
}

impl Transport for MockTransport {
    fn io_path(&self) -> IoPath {
        self.io_path
    }
    fn write(&mut self, _bytes: &[u8]) -> Result<(), CoreError> {
        Ok(())
    }
    fn read(&mut self, _max_len: usize) -> Result<Vec<u8>, CoreError> {
        Ok(Vec::new())
    }
    fn get_vcp_nontable(&mut self, code: u8) -> Result<NonTableReply, CoreError> {
        let reply = match self.scripts.get_mut(&code) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) => queue[0],
            None => MockReply::AllResponsesNull,
        };
        match reply {
            MockReply::Ok { type_code, max, current } => Ok(NonTableReply { type_code, max, current }),
            MockReply::AllResponsesNull => Err(CoreError::AllResponsesNull(self.io_path)),
            MockReply::ReportedUnsupported => Err(CoreError::ReportedUnsupported(self.io_path)),
        }
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

fn i2c_ref(busno: u16) -> Arc<DisplayRef> {
    Arc::new(DisplayRef::new(
        IoPath::I2c { bus_number: busno },
        TransportDetail::I2c(I2cBusDetail {
            busno,
            flags: BusFlags::EXISTS,
            functionality: 0,
            driver: None,
            drm_connector_name: None,
            drm_connector_found_by: DrmConnectorFoundBy::NotChecked,
            open_errno: None,
        }),
    ))
}

fn assign_identity(display_ref: &DisplayRef, serial: &str) {
    *display_ref.mmid.write().unwrap() = Some(Mmid { mfg_id: ['A', 'C', 'E'], model_name: Some("E1".into()), product_code: 1 });
    *display_ref.serial_ascii.write().unwrap() = Some(serial.to_string());
}

/// Scenario 1 (spec.md §8): two well-behaved monitors. Both answer 0x10,
/// report ReportedUnsupported on 0x41, and claim MCCS 2.2 via 0xdf.
#[test]
fn two_well_behaved_monitors_are_both_numbered() {
    let refs: Vec<Arc<DisplayRef>> = vec![i2c_ref(5), i2c_ref(7)];
    for (idx, r) in refs.iter().enumerate() {
        let io_path = r.io_path;
        let mut transport = MockTransport::new(io_path)
            .script(0x10, vec![ok(0, 100, 75)])
            .script(0x41, vec![MockReply::ReportedUnsupported])
            .script(0xdf, vec![ok(0, 0, 0x0202)]);
        let outcome = run_initial_checks(r, &mut transport, false, false);
        assert_eq!(outcome, InitialCheckOutcome::Working);
        assign_identity(r, &format!("SN{idx}"));
    }

    let survivors = filter_phantoms(refs, PhantomMatchMode::IdentityTriple);
    assert_eq!(survivors.len(), 2);

    let registry = Registry::new();
    let mut next_number = 1;
    for r in &survivors {
        if !r.flags().contains(DisplayFlags::REMOVED) {
            r.set_display_number(next_number);
            next_number += 1;
        }
    }
    registry.publish(survivors);

    let numbered = registry.iter_filtered(false, false);
    assert_eq!(numbered.len(), 2);
    let mut numbers: Vec<i32> = numbered.iter().map(|r| r.display_number()).collect();
    numbers.sort();
    assert_eq!(numbers, vec![1, 2]);
    for r in &numbered {
        assert!(r.flags().contains(DisplayFlags::USES_DDC_FLAG_FOR_UNSUPPORTED));
        assert_eq!(*r.vcp_version_probed.read().unwrap(), Some(Version { major: 2, minor: 2 }));
    }
}

/// Scenario 2 (spec.md §8): two buses report identical EDID identity; one
/// is reachable, the other should be marked a phantom pointing at it, but
/// both stay present in the catalog. Bus 4 is silent on DDC/CI and its
/// sysfs node reads disconnected, exactly the precondition spec.md §4.9
/// requires before a duplicate is merged.
#[test]
fn phantom_pair_keeps_both_refs_one_marked_phantom() {
    let reachable = i2c_ref(3);
    let phantom = i2c_ref(4);
    for r in [&reachable, &phantom] {
        assign_identity(r, "SHARED-SERIAL");
        r.insert_flags(DisplayFlags::IS_MONITOR);
    }

    let phantom_path = phantom.io_path;
    let survivors = filter_phantoms_with(
        vec![reachable.clone(), phantom.clone()],
        PhantomMatchMode::IdentityTriple,
        move |r| r.io_path == phantom_path,
    );
    assert_eq!(survivors.len(), 2, "both refs remain visible in the catalog");

    let removed: Vec<&Arc<DisplayRef>> = survivors.iter().filter(|r| r.flags().contains(DisplayFlags::REMOVED)).collect();
    let kept: Vec<&Arc<DisplayRef>> = survivors.iter().filter(|r| !r.flags().contains(DisplayFlags::REMOVED)).collect();
    assert_eq!(removed.len(), 1);
    assert_eq!(kept.len(), 1);
    assert_eq!(removed[0].display_number(), display_number::PHANTOM);
    assert_eq!(removed[0].actual_display.read().unwrap().unwrap(), kept[0].io_path);
}

/// Scenario 3 (spec.md §8): a monitor that answers luminance but returns a
/// protocol-level null for every unsupported-feature probe.
#[test]
fn null_response_monitor_is_classified_and_numbered() {
    let r = i2c_ref(9);
    let io_path = r.io_path;
    let mut transport = MockTransport::new(io_path)
        .script(0x10, vec![ok(0, 100, 50)])
        .script(0x41, vec![MockReply::AllResponsesNull])
        .script(0xdd, vec![MockReply::AllResponsesNull])
        .script(0x00, vec![MockReply::AllResponsesNull]);

    let outcome = run_initial_checks(&r, &mut transport, false, false);
    assert_eq!(outcome, InitialCheckOutcome::Working);
    assert!(r.flags().contains(DisplayFlags::DDC_COMMS_WORKING));
    assert!(r.flags().contains(DisplayFlags::USES_NULL_RESPONSE_FOR_UNSUPPORTED));

    r.set_display_number(1);
    assert_eq!(r.display_number(), 1);
}
