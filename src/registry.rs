//! The catalog of known monitors: one [`DisplayRef`] per logical display,
//! owned exclusively by the [`Registry`].

use std::sync::{Arc, Mutex, RwLock};

use crate::bus::{I2cBusDetail, UsbDetail};
use crate::ddc::edid::Edid;
use crate::flags::{display_number, DisplayFlags};
use crate::mccs::capabilities::Capabilities;
use crate::mccs::Version;
use crate::path::IoPath;

/// Identity triple used for phantom-pairing and cache seeding: manufacturer
/// id, model name and product code extracted from a parsed EDID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mmid {
    pub mfg_id: [char; 3],
    pub model_name: Option<String>,
    pub product_code: u16,
}

impl Mmid {
    pub fn from_edid(edid: &Edid) -> Self {
        let model_name = edid.descriptors.iter().find_map(|d| match d {
            crate::ddc::edid::Descriptor::ProductName(name) => Some(name.clone()),
            _ => None,
        });
        Mmid {
            mfg_id: edid.header.vendor,
            model_name,
            product_code: edid.header.product,
        }
    }
}

/// The transport-specific descriptor a [`DisplayRef`] was materialized
/// from, owned by the bus enumerator / EDID collector.
#[derive(Debug, Clone)]
pub enum TransportDetail {
    I2c(I2cBusDetail),
    Usb(UsbDetail),
}

/// Logical identity of one monitor. Persists across opens; an open
/// transport is a separate, short-lived [`crate::handle::DisplayHandle`].
pub struct DisplayRef {
    pub io_path: IoPath,
    pub parsed_edid: RwLock<Option<Edid>>,
    /// Raw 128-byte EDID block `parsed_edid` was parsed from, kept
    /// alongside it since several EDID sections (chromaticity, the timing
    /// tables) are discarded during parsing and can't be reconstructed
    /// from the parsed structure alone.
    pub raw_edid: RwLock<Option<[u8; 128]>>,
    pub edid_source: RwLock<Option<String>>,
    pub mmid: RwLock<Option<Mmid>>,
    pub serial_ascii: RwLock<Option<String>>,

    pub vcp_version_probed: RwLock<Option<Version>>,
    pub vcp_version_cmdline_override: RwLock<Option<Version>>,

    pub flags: Mutex<DisplayFlags>,
    pub display_number: Mutex<i32>,

    pub capabilities_string: RwLock<Option<String>>,
    pub communication_error_summary: RwLock<Option<String>>,

    pub driver_name: RwLock<Option<String>>,
    pub drm_connector: RwLock<Option<String>>,

    /// Weak back-pointer: set on a phantom ref, points at its real partner
    /// by key rather than by owning reference — resolved through the
    /// registry on use.
    pub actual_display: RwLock<Option<IoPath>>,

    pub detail: TransportDetail,
}

impl DisplayRef {
    pub fn new(io_path: IoPath, detail: TransportDetail) -> Self {
        DisplayRef {
            io_path,
            parsed_edid: RwLock::new(None),
            raw_edid: RwLock::new(None),
            edid_source: RwLock::new(None),
            mmid: RwLock::new(None),
            serial_ascii: RwLock::new(None),
            vcp_version_probed: RwLock::new(None),
            vcp_version_cmdline_override: RwLock::new(None),
            flags: Mutex::new(DisplayFlags::empty()),
            display_number: Mutex::new(display_number::UNASSIGNED),
            capabilities_string: RwLock::new(None),
            communication_error_summary: RwLock::new(None),
            driver_name: RwLock::new(None),
            drm_connector: RwLock::new(None),
            actual_display: RwLock::new(None),
            detail,
        }
    }

    /// Populate identity (`mmid`/`serial_ascii`) from an EDID without
    /// claiming `IS_MONITOR` — used for buses that answer an EDID read but
    /// never respond on DDC/CI, so they can still be phantom-matched
    /// against a sibling bus that does (spec.md §8).
    pub fn set_identity_from_edid(&self, edid: &Edid) {
        let mmid = Mmid::from_edid(edid);
        let serial_ascii = edid
            .descriptors
            .iter()
            .find_map(|d| match d {
                crate::ddc::edid::Descriptor::SerialNumber(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap_or_else(|| edid.header.serial.to_string());
        *self.mmid.write().unwrap() = Some(mmid);
        *self.serial_ascii.write().unwrap() = Some(serial_ascii);
    }

    /// Record a confirmed monitor's EDID: identity plus the parsed and raw
    /// bytes, and set `IS_MONITOR`. Invariant: whenever `IS_MONITOR` is
    /// set, `parsed_edid` is non-null — this is the only place that sets
    /// either, so the two always change together.
    pub fn set_edid(&self, edid: Edid, raw: [u8; 128], source: &str) {
        self.set_identity_from_edid(&edid);
        *self.parsed_edid.write().unwrap() = Some(edid);
        *self.raw_edid.write().unwrap() = Some(raw);
        *self.edid_source.write().unwrap() = Some(source.to_string());
        self.flags.lock().unwrap().insert(DisplayFlags::IS_MONITOR);
    }

    pub fn flags(&self) -> DisplayFlags {
        *self.flags.lock().unwrap()
    }

    pub fn insert_flags(&self, flags: DisplayFlags) {
        self.flags.lock().unwrap().insert(flags);
    }

    pub fn set_removed(&self) {
        self.flags.lock().unwrap().insert(DisplayFlags::REMOVED);
        *self.display_number.lock().unwrap() = display_number::REMOVED;
    }

    pub fn set_display_number(&self, n: i32) {
        *self.display_number.lock().unwrap() = n;
    }

    pub fn display_number(&self) -> i32 {
        *self.display_number.lock().unwrap()
    }

    pub fn identity_matches(&self, other: &DisplayRef) -> bool {
        let a_mmid = self.mmid.read().unwrap();
        let b_mmid = other.mmid.read().unwrap();
        let a_serial = self.serial_ascii.read().unwrap();
        let b_serial = other.serial_ascii.read().unwrap();
        matches!((&*a_mmid, &*b_mmid), (Some(a), Some(b)) if a == b) && *a_serial == *b_serial
    }
}

/// Structured dumps keyed by indentation depth (spec.md §4.12).
pub trait DebugReport {
    fn debug_report(&self, depth: usize) -> String;
}

impl DebugReport for DisplayRef {
    fn debug_report(&self, depth: usize) -> String {
        let pad = "  ".repeat(depth);
        let mmid = self.mmid.read().unwrap();
        let mmid_str = mmid
            .as_ref()
            .map(|m| {
                format!(
                    "{}{}{} {}",
                    m.mfg_id[0],
                    m.mfg_id[1],
                    m.mfg_id[2],
                    m.model_name.clone().unwrap_or_default()
                )
            })
            .unwrap_or_else(|| "<no edid>".into());
        format!(
            "{pad}DisplayRef({}) number={} flags={:?} identity={mmid_str}",
            self.io_path,
            self.display_number(),
            self.flags()
        )
    }
}

/// Catalog of all known monitors, guarded by one mutex. Single-writer at
/// detection time, read-mostly afterwards.
#[derive(Default)]
pub struct Registry {
    refs: Mutex<Vec<Arc<DisplayRef>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn add(&self, display_ref: Arc<DisplayRef>) {
        self.refs.lock().unwrap().push(display_ref);
    }

    pub fn remove(&self, io_path: IoPath) -> Option<Arc<DisplayRef>> {
        let mut refs = self.refs.lock().unwrap();
        let idx = refs.iter().position(|r| r.io_path == io_path)?;
        Some(refs.remove(idx))
    }

    pub fn find_by_path(&self, io_path: IoPath) -> Option<Arc<DisplayRef>> {
        self.refs
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.io_path == io_path)
            .cloned()
    }

    pub fn find_by_busno(&self, busno: u16) -> Option<Arc<DisplayRef>> {
        self.find_by_path(IoPath::I2c { bus_number: busno })
    }

    pub fn find_by_drm_connector(&self, name: &str) -> Option<Arc<DisplayRef>> {
        self.refs
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.drm_connector.read().unwrap().as_deref() == Some(name))
            .cloned()
    }

    pub fn iter_filtered(&self, include_invalid: bool, include_removed: bool) -> Vec<Arc<DisplayRef>> {
        self.refs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| include_removed || !r.flags().contains(DisplayFlags::REMOVED))
            .filter(|r| include_invalid || r.display_number() > 0)
            .cloned()
            .collect()
    }

    pub fn set_removed(&self, io_path: IoPath) {
        if let Some(r) = self.find_by_path(io_path) {
            r.set_removed();
        }
    }

    pub fn len(&self) -> usize {
        self.refs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<Arc<DisplayRef>> {
        self.refs.lock().unwrap().clone()
    }

    /// Swap the entire catalog atomically, as the detection orchestrator
    /// does when publishing a freshly detected set of refs.
    pub fn publish(&self, new_refs: Vec<Arc<DisplayRef>>) {
        *self.refs.lock().unwrap() = new_refs;
    }
}

impl DebugReport for Registry {
    fn debug_report(&self, depth: usize) -> String {
        let pad = "  ".repeat(depth);
        let refs = self.refs.lock().unwrap();
        let mut out = format!("{pad}Registry({} refs)", refs.len());
        for r in refs.iter() {
            out.push('\n');
            out.push_str(&r.debug_report(depth + 1));
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bus::{BusFlags, DrmConnectorFoundBy, I2cBusDetail};

    fn make_ref(busno: u16) -> Arc<DisplayRef> {
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

    #[test]
    fn no_two_refs_share_an_io_path() {
        let registry = Registry::new();
        registry.add(make_ref(5));
        assert!(registry.find_by_busno(5).is_some());
        assert!(registry.find_by_busno(6).is_none());
    }

    #[test]
    fn removal_sets_sentinel_and_flag() {
        let registry = Registry::new();
        let r = make_ref(9);
        registry.add(r.clone());
        registry.set_removed(IoPath::I2c { bus_number: 9 });
        assert_eq!(r.display_number(), display_number::REMOVED);
        assert!(r.flags().contains(DisplayFlags::REMOVED));
    }
}
