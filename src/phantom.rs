//! Phantom-display filter (spec.md §4.9): docking stations and some MST
//! hubs expose the same physical monitor through more than one bus,
//! producing duplicate [`DisplayRef`]s that answer identically to EDID
//! reads but only one of which is actually reachable. Filtering compares
//! identity (manufacturer/model/serial), not full EDID bytes, per the
//! phantom-match-mode decision recorded for this catalog.

use std::sync::Arc;

use log::info;

use crate::bus::sysfs_looks_disconnected;
use crate::flags::{display_number, DisplayFlags};
use crate::registry::{DisplayRef, TransportDetail};

/// How two refs' identities are compared when deciding they're the same
/// physical monitor (spec.md §9 Open Question 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhantomMatchMode {
    #[default]
    IdentityTriple,
    FullEdid,
}

fn same_identity(a: &DisplayRef, b: &DisplayRef, mode: PhantomMatchMode) -> bool {
    match mode {
        PhantomMatchMode::IdentityTriple => a.identity_matches(b),
        PhantomMatchMode::FullEdid => {
            let a_edid = a.parsed_edid.read().unwrap();
            let b_edid = b.parsed_edid.read().unwrap();
            matches!((&*a_edid, &*b_edid), (Some(x), Some(y)) if x == y)
        }
    }
}

fn sysfs_disconnected(display_ref: &DisplayRef) -> bool {
    match &display_ref.detail {
        TransportDetail::I2c(detail) => sysfs_looks_disconnected(detail.busno),
        TransportDetail::Usb(_) => false,
    }
}

/// Marks duplicate refs `PHANTOM`/`REMOVED` in place and returns every ref
/// that was passed in — the loser of an identity match stays in the
/// returned set, flagged `REMOVED` with `actual_display` pointing at the
/// winner, rather than being dropped outright, so the catalog can still
/// report "this bus is a phantom for that one" (spec.md §4.9). Real sysfs
/// state backs the disconnect check; see [`filter_phantoms_with`] for the
/// injectable form used by tests.
pub fn filter_phantoms(refs: Vec<Arc<DisplayRef>>, mode: PhantomMatchMode) -> Vec<Arc<DisplayRef>> {
    filter_phantoms_with(refs, mode, sysfs_disconnected)
}

/// Same algorithm as [`filter_phantoms`] with the sysfs disconnect check
/// passed in, so tests can simulate specific connection states without a
/// real `/sys/bus/i2c/devices` tree to probe.
///
/// A pair sharing identity is only merged when it satisfies one of two
/// narrow rules (spec.md §4.9): the invalid side's sysfs node reads
/// `status=disconnected`, `enabled=disabled`, with no `edid` attribute and
/// the other side doesn't — the precondition, not a tie-break — or,
/// separately, one side is an MST (`DPMST`) connector path carrying the
/// exact same EDID bytes as a non-MST sibling that isn't already a marked
/// duplicate. Two refs that share identity but satisfy neither rule are
/// left alone: both stay live, unflagged entries in the catalog, since
/// nothing here bounds the risk of merging two physically distinct
/// monitors that happen to share manufacturer/model/serial.
pub fn filter_phantoms_with(
    refs: Vec<Arc<DisplayRef>>,
    mode: PhantomMatchMode,
    is_disconnected: impl Fn(&DisplayRef) -> bool,
) -> Vec<Arc<DisplayRef>> {
    let mut output: Vec<Arc<DisplayRef>> = Vec::with_capacity(refs.len());

    'outer: for candidate in refs {
        if candidate.mmid.read().unwrap().is_none() {
            output.push(candidate);
            continue;
        }

        for existing in &output {
            if existing.flags().contains(DisplayFlags::REMOVED) || existing.mmid.read().unwrap().is_none() {
                continue;
            }
            if !same_identity(&candidate, existing, mode) {
                continue;
            }

            let candidate_disconnected = is_disconnected(&candidate);
            let existing_disconnected = is_disconnected(existing);

            let pair = match (candidate_disconnected, existing_disconnected) {
                (true, false) => Some((existing.clone(), candidate.clone())),
                (false, true) => Some((candidate.clone(), existing.clone())),
                _ => mst_duplicate_pair(existing.clone(), candidate.clone()),
            };

            let Some((keep, drop)) = pair else {
                continue;
            };

            info!(
                "{} and {} share identity; treating {} as phantom for {}",
                existing.io_path, candidate.io_path, drop.io_path, keep.io_path
            );

            drop.insert_flags(DisplayFlags::REMOVED);
            drop.set_display_number(display_number::PHANTOM);
            *drop.actual_display.write().unwrap() = Some(keep.io_path);

            output.push(candidate);
            continue 'outer;
        }

        output.push(candidate);
    }

    output
}

/// The separate MST rule spec.md §4.9 allows even when both sides read as
/// connected: one side's connector path names an MST hub (`DPMST`), the
/// two carry byte-identical EDIDs. Returns `(keep, drop)` with the MST
/// side kept, since MST hubs route the live signal there. `None` unless
/// exactly one side is an MST connector and the EDIDs match byte-for-byte.
fn mst_duplicate_pair(a: Arc<DisplayRef>, b: Arc<DisplayRef>) -> Option<(Arc<DisplayRef>, Arc<DisplayRef>)> {
    if !full_edid_matches(&a, &b) {
        return None;
    }
    match (is_mst_connector(&a), is_mst_connector(&b)) {
        (true, false) => Some((a, b)),
        (false, true) => Some((b, a)),
        _ => None,
    }
}

fn is_mst_connector(display_ref: &DisplayRef) -> bool {
    display_ref.drm_connector.read().unwrap().as_deref().is_some_and(|c| c.contains("DPMST"))
}

fn full_edid_matches(a: &DisplayRef, b: &DisplayRef) -> bool {
    let a_edid = a.parsed_edid.read().unwrap();
    let b_edid = b.parsed_edid.read().unwrap();
    matches!((&*a_edid, &*b_edid), (Some(x), Some(y)) if x == y)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bus::{BusFlags, DrmConnectorFoundBy, I2cBusDetail};
    use crate::path::IoPath;
    use crate::registry::Mmid;

    /// Sets the identity fields `set_edid` would have populated, without
    /// needing a real 128-byte EDID blob on hand.
    fn make_ref_with_identity(busno: u16, serial: &str) -> Arc<DisplayRef> {
        let r = DisplayRef::new(
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
        );
        *r.mmid.write().unwrap() = Some(Mmid {
            mfg_id: ['A', 'C', 'E'],
            model_name: Some("Test Monitor".into()),
            product_code: 1,
        });
        *r.serial_ascii.write().unwrap() = Some(serial.to_string());
        r.insert_flags(DisplayFlags::IS_MONITOR);
        Arc::new(r)
    }

    #[test]
    fn identical_identity_marks_one_phantom_when_one_side_disconnected() {
        let a = make_ref_with_identity(1, "SN123");
        let b = make_ref_with_identity(2, "SN123");
        let b_path = b.io_path;
        let result = filter_phantoms_with(
            vec![a.clone(), b.clone()],
            PhantomMatchMode::IdentityTriple,
            move |r| r.io_path == b_path,
        );
        assert_eq!(result.len(), 2, "both refs stay in the catalog, one flagged as phantom");
        let removed_count = result.iter().filter(|r| r.flags().contains(DisplayFlags::REMOVED)).count();
        assert_eq!(removed_count, 1);
        let removed = result.iter().find(|r| r.flags().contains(DisplayFlags::REMOVED)).unwrap();
        let kept = result.iter().find(|r| !r.flags().contains(DisplayFlags::REMOVED)).unwrap();
        assert_eq!(removed.display_number(), display_number::PHANTOM);
        assert_eq!(removed.actual_display.read().unwrap().unwrap(), kept.io_path);
    }

    #[test]
    fn identical_identity_both_survive_when_neither_side_disconnected() {
        let a = make_ref_with_identity(1, "SN123");
        let b = make_ref_with_identity(2, "SN123");
        let result = filter_phantoms_with(vec![a, b], PhantomMatchMode::IdentityTriple, |_| false);
        assert_eq!(result.len(), 2);
        assert!(
            result.iter().all(|r| !r.flags().contains(DisplayFlags::REMOVED)),
            "neither the sysfs gate nor the MST rule applies, so both stay live"
        );
    }

    #[test]
    fn distinct_identity_both_survive() {
        let a = make_ref_with_identity(1, "SN123");
        let b = make_ref_with_identity(2, "SN456");
        let survivors = filter_phantoms_with(vec![a, b], PhantomMatchMode::IdentityTriple, |_| false);
        assert_eq!(survivors.len(), 2);
    }
}
