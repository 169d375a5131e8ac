//! Detection-state cache (spec.md §4.11): persist the bus-to-monitor
//! mapping detection already paid for, so the next process can skip
//! straight to validating it instead of re-probing every bus from
//! scratch. A version mismatch or any deserialization failure falls back
//! to full detection rather than trusting stale data.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bus::{decode_hex_edid, encode_hex_upper, BusFlags, DrmConnectorFoundBy, I2cBusDetail};
use crate::flags::DisplayFlags;
use crate::mccs::Version;
use crate::path::IoPath;
use crate::registry::{DisplayRef, Mmid, TransportDetail};

const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct CachedMmid {
    pub mfg_id: [char; 3],
    pub model_name: Option<String>,
    pub product_code: u16,
}

impl From<&Mmid> for CachedMmid {
    fn from(m: &Mmid) -> Self {
        CachedMmid {
            mfg_id: m.mfg_id,
            model_name: m.model_name.clone(),
            product_code: m.product_code,
        }
    }
}

impl From<CachedMmid> for Mmid {
    fn from(m: CachedMmid) -> Self {
        Mmid {
            mfg_id: m.mfg_id,
            model_name: m.model_name,
            product_code: m.product_code,
        }
    }
}

/// One `/dev/i2c-N` bus as it looked at cache-write time. Kept alongside
/// the per-display entries so a restore can skip the udev walk for buses
/// that were already established as non-candidates (no responding EDID),
/// not just revalidate the ones that turned into monitors.
#[derive(Debug, Serialize, Deserialize)]
pub struct CachedBus {
    pub busno: u16,
    pub functionality: u32,
    /// Whether an EDID was read from this bus, not the EDID bytes
    /// themselves — the parsed [`crate::ddc::edid::Edid`] doesn't retain
    /// the raw 128-byte block it was parsed from, so a cache restore
    /// re-reads EDID bytes from the bus rather than trusting a cached
    /// copy of them.
    pub had_edid: bool,
    pub flags: BusFlags,
    pub driver: Option<String>,
    pub drm_connector_name: Option<String>,
    pub drm_connector_found_by: DrmConnectorFoundBy,
}

impl From<&I2cBusDetail> for CachedBus {
    fn from(detail: &I2cBusDetail) -> Self {
        CachedBus {
            busno: detail.busno,
            functionality: detail.functionality,
            had_edid: detail.flags.contains(BusFlags::X50_EDID_READ),
            flags: detail.flags,
            driver: detail.driver.clone(),
            drm_connector_name: detail.drm_connector_name.clone(),
            drm_connector_found_by: detail.drm_connector_found_by,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CachedDisplay {
    pub io_path: IoPath,
    pub mmid: Option<CachedMmid>,
    pub serial_ascii: Option<String>,
    /// Raw EDID bytes as 256-char uppercase hex, plus where they were read
    /// from (`"sysfs"` or `"i2c"`), per spec.md §4.11. `None` for a display
    /// that was only ever identified by an earlier EDID read whose bytes
    /// weren't retained, or wasn't a confirmed monitor at all.
    pub parsed_edid: Option<String>,
    pub edid_source: Option<String>,
    pub vcp_version_probed: Option<Version>,
    pub vcp_version_cmdline_override: Option<Version>,
    pub flags_bits: u32,
    pub display_number: i32,
    pub drm_connector: Option<String>,
    pub driver_name: Option<String>,
    pub capabilities_string: Option<String>,
    pub actual_display_path: Option<IoPath>,
}

impl CachedDisplay {
    fn from_ref(display_ref: &DisplayRef) -> Self {
        CachedDisplay {
            io_path: display_ref.io_path,
            mmid: display_ref.mmid.read().unwrap().as_ref().map(CachedMmid::from),
            serial_ascii: display_ref.serial_ascii.read().unwrap().clone(),
            parsed_edid: display_ref.raw_edid.read().unwrap().as_ref().map(|raw| encode_hex_upper(raw)),
            edid_source: display_ref.edid_source.read().unwrap().clone(),
            vcp_version_probed: *display_ref.vcp_version_probed.read().unwrap(),
            vcp_version_cmdline_override: *display_ref.vcp_version_cmdline_override.read().unwrap(),
            flags_bits: display_ref.flags().bits(),
            display_number: display_ref.display_number(),
            drm_connector: display_ref.drm_connector.read().unwrap().clone(),
            driver_name: display_ref.driver_name.read().unwrap().clone(),
            capabilities_string: display_ref.capabilities_string.read().unwrap().clone(),
            actual_display_path: *display_ref.actual_display.read().unwrap(),
        }
    }

    /// Rehydrate a ref from a cache entry. The caller still runs a cheap
    /// connectivity recheck before trusting `DDC_COMMS_WORKING`; the cache
    /// only seeds identity and numbering to skip the expensive parts.
    /// `IS_MONITOR` is only restored alongside a successfully decoded
    /// `parsed_edid` — the registry invariant is that the two always hold
    /// together, and a cache entry that lost its EDID bytes (or never had
    /// them) can't honor that on restore.
    fn to_ref(&self) -> DisplayRef {
        let detail = match self.io_path {
            IoPath::I2c { bus_number } => TransportDetail::I2c(crate::bus::I2cBusDetail {
                busno: bus_number,
                flags: crate::bus::BusFlags::empty(),
                functionality: 0,
                driver: self.driver_name.clone(),
                drm_connector_name: self.drm_connector.clone(),
                drm_connector_found_by: crate::bus::DrmConnectorFoundBy::NotChecked,
                open_errno: None,
            }),
            IoPath::Usb { bus, device, hiddev_number } => TransportDetail::Usb(crate::bus::UsbDetail {
                bus,
                device,
                hiddev_number,
                hiddev_name: None,
            }),
        };
        let display_ref = DisplayRef::new(self.io_path, detail);
        *display_ref.mmid.write().unwrap() = self.mmid.as_ref().map(|m| Mmid {
            mfg_id: m.mfg_id,
            model_name: m.model_name.clone(),
            product_code: m.product_code,
        });
        *display_ref.serial_ascii.write().unwrap() = self.serial_ascii.clone();
        *display_ref.vcp_version_probed.write().unwrap() = self.vcp_version_probed;
        *display_ref.vcp_version_cmdline_override.write().unwrap() = self.vcp_version_cmdline_override;
        *display_ref.drm_connector.write().unwrap() = self.drm_connector.clone();
        *display_ref.driver_name.write().unwrap() = self.driver_name.clone();
        *display_ref.capabilities_string.write().unwrap() = self.capabilities_string.clone();
        *display_ref.actual_display.write().unwrap() = self.actual_display_path;

        let raw_edid = self.parsed_edid.as_deref().and_then(decode_hex_edid);
        let parsed_edid = raw_edid.and_then(|raw| crate::ddc::edid::parse_edid(&raw).ok());
        let mut flags = DisplayFlags::from_bits_truncate(self.flags_bits);
        match (raw_edid, parsed_edid) {
            (Some(raw), Some(edid)) => {
                *display_ref.raw_edid.write().unwrap() = Some(raw);
                *display_ref.parsed_edid.write().unwrap() = Some(edid);
                *display_ref.edid_source.write().unwrap() = self.edid_source.clone();
            }
            _ => flags.remove(DisplayFlags::IS_MONITOR),
        }
        display_ref.insert_flags(flags);
        display_ref.set_display_number(self.display_number);
        display_ref
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheDocument {
    pub version: u32,
    pub all_displays: Vec<CachedDisplay>,
    pub all_buses: Vec<CachedBus>,
}

impl CacheDocument {
    pub fn from_displays(displays: &[Arc<DisplayRef>]) -> Self {
        let all_buses = displays
            .iter()
            .filter_map(|d| match &d.detail {
                TransportDetail::I2c(detail) => Some(CachedBus::from(detail)),
                TransportDetail::Usb(_) => None,
            })
            .collect();
        CacheDocument {
            version: CACHE_FORMAT_VERSION,
            all_displays: displays.iter().map(|d| CachedDisplay::from_ref(d)).collect(),
            all_buses,
        }
    }

    pub fn to_display_refs(&self) -> Option<Vec<DisplayRef>> {
        if self.version != CACHE_FORMAT_VERSION {
            return None;
        }
        Some(self.all_displays.iter().map(CachedDisplay::to_ref).collect())
    }

    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn deserialize(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    pub fn store(&self, path: &Path) -> io::Result<()> {
        let json = self
            .serialize()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)
    }

    /// Load and validate a cache file. Any failure — missing file,
    /// malformed JSON, version mismatch — is treated identically by the
    /// caller: fall back to full detection.
    pub fn restore(path: &Path) -> Option<Self> {
        let data = fs::read_to_string(path).ok()?;
        let doc: Self = Self::deserialize(&data).ok()?;
        if doc.version != CACHE_FORMAT_VERSION {
            return None;
        }
        Some(doc)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_display() -> CachedDisplay {
        CachedDisplay {
            io_path: IoPath::I2c { bus_number: 3 },
            mmid: Some(CachedMmid { mfg_id: ['A', 'C', 'E'], model_name: Some("X1".into()), product_code: 7 }),
            serial_ascii: Some("SN1".into()),
            parsed_edid: None,
            edid_source: None,
            vcp_version_probed: Some(Version { major: 2, minor: 1 }),
            vcp_version_cmdline_override: None,
            flags_bits: DisplayFlags::IS_MONITOR.bits(),
            display_number: 1,
            drm_connector: Some("card0-DP-1".into()),
            driver_name: Some("i915".into()),
            capabilities_string: Some("(prot(monitor)type(lcd))".into()),
            actual_display_path: None,
        }
    }

    fn sample_bus() -> CachedBus {
        CachedBus {
            busno: 3,
            functionality: 0xeff,
            had_edid: true,
            flags: BusFlags::EXISTS | BusFlags::X50_EDID_READ,
            driver: Some("i915".into()),
            drm_connector_name: Some("card0-DP-1".into()),
            drm_connector_found_by: DrmConnectorFoundBy::ByBusno,
        }
    }

    #[test]
    fn round_trips_through_json() {
        let doc = CacheDocument {
            version: CACHE_FORMAT_VERSION,
            all_displays: vec![sample_display()],
            all_buses: vec![sample_bus()],
        };
        let json = doc.serialize().unwrap();
        let restored = CacheDocument::deserialize(&json).unwrap();
        assert_eq!(restored.all_displays.len(), 1);
        assert_eq!(restored.all_displays[0].display_number, 1);
        assert_eq!(restored.all_buses.len(), 1);
        assert_eq!(restored.all_buses[0].busno, 3);
        assert!(restored.all_buses[0].had_edid);
    }

    #[test]
    fn restore_strips_is_monitor_without_a_decodable_edid() {
        let display = sample_display();
        assert!(display.parsed_edid.is_none());
        assert!(DisplayFlags::from_bits_truncate(display.flags_bits).contains(DisplayFlags::IS_MONITOR));

        let restored = display.to_ref();
        assert!(
            !restored.flags().contains(DisplayFlags::IS_MONITOR),
            "a cache entry that lost its EDID bytes can't honor IS_MONITOR => parsed_edid is non-null"
        );
        assert!(restored.parsed_edid.read().unwrap().is_none());
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let doc = CacheDocument { version: CACHE_FORMAT_VERSION + 1, all_displays: vec![], all_buses: vec![] };
        let json = doc.serialize().unwrap();
        assert!(CacheDocument::deserialize(&json).unwrap().to_display_refs().is_none());
    }
}
