//! Detection orchestrator (spec.md §4.10): discover buses, probe each one,
//! filter phantoms, number the survivors, and publish the result as the
//! process-wide catalog. `ensure_detected` is idempotent — a second call
//! while a catalog is already published is a no-op.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use log::{info, warn};

use crate::bus::{BusCandidate, BusEnumerator};
use crate::cache::CacheDocument;
use crate::checks::run_initial_checks;
use crate::flags::{display_number, DisplayFlags};
use crate::handle::OpenOptions;
use crate::lock::LockTable;
use crate::path::IoPath;
use crate::phantom::{filter_phantoms, PhantomMatchMode};
use crate::registry::{DebugReport, DisplayRef, Registry, TransportDetail};
use crate::transport::i2c::I2cTransport;
use crate::transport::retry::RetryingTransport;
use crate::transport::Transport;

/// Every tunable exposed to a caller of detection (spec.md §6). Plain data,
/// not global state: construct one per call, or keep one around and pass
/// it explicitly to every `ensure_detected`/`refresh` call.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Bus count above which detection dispatches one thread per candidate
    /// instead of probing sequentially.
    pub async_threshold: usize,
    pub max_lock_wait_ms: u64,
    pub lock_poll_interval_ms: u64,
    pub detect_usb: bool,
    pub enable_cache: bool,
    /// Where to read/write the detection-state cache. No effect unless
    /// `enable_cache` is set; `None` disables caching even if `enable_cache`
    /// is true, since there is nowhere to read from or write to.
    pub cache_path: Option<PathBuf>,
    pub force_slave_address: bool,
    pub mccs_version_override: Option<crate::mccs::Version>,
    pub never_use_null_as_unsupported: bool,
    pub phantom_match_mode: PhantomMatchMode,
    /// Test-mode short circuit: skip real probing, mark every discovered
    /// bus as a working display. Never set this outside test harnesses.
    pub force_bus: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            async_threshold: 4,
            max_lock_wait_ms: 4000,
            lock_poll_interval_ms: 100,
            detect_usb: true,
            enable_cache: true,
            cache_path: None,
            force_slave_address: false,
            mccs_version_override: None,
            never_use_null_as_unsupported: false,
            phantom_match_mode: PhantomMatchMode::default(),
            force_bus: false,
        }
    }
}

/// The published set of known displays plus the lock table guarding their
/// transports. Returned behind an `Arc` so callers can hold a snapshot
/// across a detection refresh without racing the registry swap.
pub struct Catalog {
    pub registry: Registry,
    pub lock_table: LockTable,
}

impl Catalog {
    pub fn open_options(&self, config: &DetectionConfig) -> OpenOptions {
        OpenOptions {
            wait_for_lock: true,
            force_slave_address: config.force_slave_address,
            max_retry_attempts: 4,
            never_use_null_as_unsupported: config.never_use_null_as_unsupported,
        }
    }
}

impl DebugReport for Catalog {
    fn debug_report(&self, depth: usize) -> String {
        self.registry.debug_report(depth)
    }
}

static CATALOG: OnceLock<Mutex<Option<Arc<Catalog>>>> = OnceLock::new();

fn catalog_cell() -> &'static Mutex<Option<Arc<Catalog>>> {
    CATALOG.get_or_init(|| Mutex::new(None))
}

/// Probe one bus candidate end to end: build its `DisplayRef`, open a
/// transport, run initial checks, and read its EDID if it answered.
fn probe_candidate(candidate: BusCandidate, config: &DetectionConfig) -> Option<Arc<DisplayRef>> {
    let busno = candidate.busno;
    let io_path = IoPath::I2c { bus_number: busno };

    let is_internal_panel = candidate
        .drm_connector_name
        .as_deref()
        .is_some_and(crate::bus::connector_is_internal_panel);
    let mut bus_flags = crate::bus::BusFlags::EXISTS;
    if is_internal_panel {
        bus_flags |= crate::bus::BusFlags::LVDS_OR_EDP | crate::bus::BusFlags::DDC_DISABLED;
    }

    let detail = crate::bus::I2cBusDetail {
        busno,
        flags: bus_flags,
        functionality: 0,
        driver: candidate.driver.clone(),
        drm_connector_name: candidate.drm_connector_name.clone(),
        drm_connector_found_by: candidate.drm_connector_found_by,
        open_errno: None,
    };
    let display_ref = Arc::new(DisplayRef::new(io_path, TransportDetail::I2c(detail)));
    *display_ref.drm_connector.write().unwrap() = candidate.drm_connector_name.clone();

    if config.force_bus {
        run_initial_checks(&display_ref, &mut NullTransport(io_path), false, true);
        return Some(display_ref);
    }

    // Internal panels (eDP/LVDS/DSI) are driven directly, not through a
    // VESA DDC channel — never open the bus, just surface the flag.
    if is_internal_panel {
        display_ref.set_display_number(display_number::DDC_DISABLED);
        return Some(display_ref);
    }

    let raw = match I2cTransport::open(busno, config.force_slave_address) {
        Ok(t) => t,
        Err(crate::error::CoreError::Busy(_, _)) => {
            display_ref.set_display_number(display_number::BUSY);
            display_ref.insert_flags(DisplayFlags::DDC_BUSY);
            return Some(display_ref);
        }
        Err(e) => {
            warn!("{io_path}: could not open transport during detection: {e}");
            return None;
        }
    };
    let mut transport = RetryingTransport::new(raw).never_use_null_as_unsupported(config.never_use_null_as_unsupported);

    let outcome = run_initial_checks(&display_ref, &mut transport, false, false);
    if outcome != crate::checks::InitialCheckOutcome::Working {
        // Not a live DDC/CI responder, but EDID reads (0x50) are a
        // separate operation from DDC/CI (0x37) — a silent bus can still
        // carry an identifiable EDID, which phantom filtering needs to
        // pair it against a reachable sibling (spec.md §8).
        if let Ok(read) = crate::bus::read_edid_for(candidate.drm_edid_path.as_deref(), busno) {
            display_ref.set_identity_from_edid(&read.edid);
            *display_ref.parsed_edid.write().unwrap() = Some(read.edid);
            *display_ref.raw_edid.write().unwrap() = Some(read.raw);
            *display_ref.edid_source.write().unwrap() = Some(read.source.to_string());
            return Some(display_ref);
        }
        return None;
    }

    match crate::bus::read_edid_for(candidate.drm_edid_path.as_deref(), busno) {
        Ok(read) => display_ref.set_edid(read.edid, read.raw, read.source),
        Err(e) => {
            warn!("{io_path}: initial checks passed but EDID read failed: {e}");
            return None;
        }
    }

    if let Some(version) = config.mccs_version_override {
        *display_ref.vcp_version_cmdline_override.write().unwrap() = Some(version);
    }

    Some(display_ref)
}

/// A no-op transport used only under `force_bus`, where no real hardware
/// is consulted.
struct NullTransport(IoPath);

impl Transport for NullTransport {
    fn io_path(&self) -> IoPath {
        self.0
    }
    fn write(&mut self, _bytes: &[u8]) -> Result<(), crate::error::CoreError> {
        Ok(())
    }
    fn read(&mut self, _max_len: usize) -> Result<Vec<u8>, crate::error::CoreError> {
        Ok(Vec::new())
    }
    fn get_vcp_nontable(&mut self, _code: u8) -> Result<crate::transport::NonTableReply, crate::error::CoreError> {
        Ok(crate::transport::NonTableReply { type_code: 0, max: 100, current: 50 })
    }
    fn set_vcp_nontable(&mut self, _code: u8, _value: u16) -> Result<(), crate::error::CoreError> {
        Ok(())
    }
    fn get_capabilities_fragment(&mut self, _offset: u16) -> Result<Vec<u8>, crate::error::CoreError> {
        Ok(Vec::new())
    }
    fn save_current_settings(&mut self) -> Result<(), crate::error::CoreError> {
        Ok(())
    }
}

/// Try to skip a full detection pass by trusting a cached snapshot. Every
/// cached I2C display is revalidated with a cheap connectivity probe before
/// it's trusted; entries that no longer answer are dropped. Cached USB
/// entries are trusted without recheck, since the cache doesn't retain the
/// vendor/product IDs a HID reopen would need. Returns `None` on any cache
/// miss, version mismatch, or empty result, so the caller falls back to a
/// full scan.
fn try_restore_from_cache(config: &DetectionConfig) -> Option<Arc<Catalog>> {
    if !config.enable_cache {
        return None;
    }
    let path = config.cache_path.as_ref()?;
    let doc = CacheDocument::restore(path)?;
    let cached_refs = doc.to_display_refs()?;
    info!("detection: cache hit at {}, revalidating {} cached display(s)", path.display(), cached_refs.len());

    let validated: Vec<Arc<DisplayRef>> = cached_refs
        .into_iter()
        .filter_map(|display_ref| match display_ref.io_path {
            IoPath::I2c { bus_number } => {
                let mut raw = I2cTransport::open(bus_number, config.force_slave_address).ok()?;
                match crate::checks::probe_connectivity(&mut raw, display_ref.io_path) {
                    Ok(true) => Some(Arc::new(display_ref)),
                    _ => {
                        info!("{}: cached display no longer answers, dropping from cache restore", display_ref.io_path);
                        None
                    }
                }
            }
            IoPath::Usb { .. } => Some(Arc::new(display_ref)),
        })
        .collect();

    if validated.is_empty() {
        return None;
    }

    let registry = Registry::new();
    registry.publish(validated);
    Some(Arc::new(Catalog {
        registry,
        lock_table: LockTable::new(config.max_lock_wait_ms, config.lock_poll_interval_ms),
    }))
}

fn run_detection(config: &DetectionConfig) -> Arc<Catalog> {
    let candidates = BusEnumerator::scan();
    info!("detection: {} candidate bus(es) found", candidates.len());

    let probed: Vec<Arc<DisplayRef>> = if candidates.len() >= config.async_threshold {
        std::thread::scope(|scope| {
            let handles: Vec<_> = candidates
                .into_iter()
                .map(|candidate| scope.spawn(|| probe_candidate(candidate, config)))
                .collect();
            handles.into_iter().filter_map(|h| h.join().ok().flatten()).collect()
        })
    } else {
        candidates
            .into_iter()
            .filter_map(|candidate| probe_candidate(candidate, config))
            .collect()
    };

    let survivors = filter_phantoms(probed, config.phantom_match_mode);

    // spec.md §4.10 step 6: a survivor is numbered only if DDC/CI comms
    // were confirmed working and it's neither busy, removed, nor on a
    // connector DDC is known to be disabled on (e.g. an internal panel).
    // A bus that only answered an EDID read (never DDC/CI) stays
    // unnumbered unless phantom-filtering already claimed it.
    let mut next_number = 1;
    for display_ref in &survivors {
        let flags = display_ref.flags();
        if !flags.contains(DisplayFlags::DDC_COMMS_WORKING) || flags.contains(DisplayFlags::DDC_BUSY) || flags.contains(DisplayFlags::REMOVED) {
            continue;
        }
        let ddc_disabled = matches!(&display_ref.detail, TransportDetail::I2c(detail) if detail.flags.contains(crate::bus::BusFlags::DDC_DISABLED));
        if ddc_disabled {
            continue;
        }
        display_ref.set_display_number(next_number);
        next_number += 1;
    }

    let registry = Registry::new();
    registry.publish(survivors);

    Arc::new(Catalog {
        registry,
        lock_table: LockTable::new(config.max_lock_wait_ms, config.lock_poll_interval_ms),
    })
}

/// Return the current catalog, running detection first if none has been
/// published yet. Safe to call from multiple threads; only the first
/// caller pays the detection cost.
pub fn ensure_detected(config: &DetectionConfig) -> Arc<Catalog> {
    let mut guard = catalog_cell().lock().unwrap();
    if let Some(existing) = &*guard {
        return existing.clone();
    }
    let catalog = try_restore_from_cache(config).unwrap_or_else(|| run_detection(config));
    *guard = Some(catalog.clone());
    catalog
}

/// Force a fresh detection pass and publish it, regardless of whether a
/// catalog already exists (spec.md §4.10 re-detection).
pub fn refresh(config: &DetectionConfig) -> Arc<Catalog> {
    let mut guard = catalog_cell().lock().unwrap();
    let catalog = run_detection(config);
    *guard = Some(catalog.clone());
    catalog
}
