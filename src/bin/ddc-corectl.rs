//! Command-line front end for the DDC/CI core: detect displays, read and
//! write VCP features, and manage the on-disk detection cache.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ddc_core::cache::CacheDocument;
use ddc_core::detect::{self, DetectionConfig};
use ddc_core::handle::{DisplayHandle, OpenOptions};
use ddc_core::registry::DebugReport;
use ddc_core::transport::Transport;
use log::error;

#[derive(Parser)]
#[command(name = "ddc-corectl", version, about = "Detect and control DDC/CI monitors")]
struct Cli {
    /// Bypass the detection cache and re-probe every bus.
    #[arg(long, global = true)]
    no_cache: bool,

    /// Bus count above which detection dispatches one thread per display.
    #[arg(long, global = true, default_value_t = 4)]
    async_threshold: usize,

    /// Reclaim a bus another driver is holding via I2C_SLAVE_FORCE.
    #[arg(long, global = true)]
    force_slave_address: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect attached displays and print a report.
    Detect,
    /// Read the current value of a VCP feature.
    Getvcp {
        display_number: i32,
        /// VCP feature code, e.g. 0x10 for luminance.
        #[arg(value_parser = parse_hex_or_dec)]
        feature_code: u8,
    },
    /// Set a VCP feature to a new value.
    Setvcp {
        display_number: i32,
        #[arg(value_parser = parse_hex_or_dec)]
        feature_code: u8,
        value: u16,
    },
    /// Delete the on-disk detection cache.
    CacheClear,
}

fn parse_hex_or_dec(s: &str) -> Result<u8, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse().map_err(|e: std::num::ParseIntError| e.to_string())
    }
}

fn cache_path() -> PathBuf {
    std::env::var_os("DDC_CORE_CACHE")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("ddc-core-detect-cache.json"))
}

fn build_config(cli: &Cli) -> DetectionConfig {
    DetectionConfig {
        async_threshold: cli.async_threshold,
        force_slave_address: cli.force_slave_address,
        enable_cache: !cli.no_cache,
        cache_path: Some(cache_path()),
        ..DetectionConfig::default()
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let config = build_config(&cli);

    match cli.command {
        Command::Detect => run_detect(&config),
        Command::Getvcp { display_number, feature_code } => run_getvcp(&config, display_number, feature_code),
        Command::Setvcp { display_number, feature_code, value } => {
            run_setvcp(&config, display_number, feature_code, value)
        }
        Command::CacheClear => run_cache_clear(),
    }
}

fn run_detect(config: &DetectionConfig) {
    let catalog = detect::ensure_detected(config);
    let displays = catalog.registry.iter_filtered(false, false);
    println!("{} display(s) detected", displays.len());
    for display_ref in &displays {
        println!("{}", display_ref.debug_report(0));
    }

    if let Some(path) = &config.cache_path {
        if config.enable_cache {
            let doc = CacheDocument::from_displays(&displays);
            if let Err(e) = doc.store(path) {
                error!("failed to write detection cache: {e}");
            }
        }
    }
}

fn find_display(config: &DetectionConfig, display_number: i32) -> Option<std::sync::Arc<ddc_core::registry::DisplayRef>> {
    let catalog = detect::ensure_detected(config);
    catalog
        .registry
        .iter_filtered(false, false)
        .into_iter()
        .find(|d| d.display_number() == display_number)
}

fn run_getvcp(config: &DetectionConfig, display_number: i32, feature_code: u8) {
    let Some(display_ref) = find_display(config, display_number) else {
        eprintln!("no display numbered {display_number}");
        std::process::exit(1);
    };
    let catalog = detect::ensure_detected(config);
    let options = OpenOptions { force_slave_address: config.force_slave_address, ..OpenOptions::default() };
    let open_result = DisplayHandle::open(display_ref, &catalog.lock_table, options);
    match open_result {
        Ok(mut handle) => match handle.transport_mut().get_vcp_nontable(feature_code) {
            Ok(reply) => println!("VCP {feature_code:#04x}: current={} max={}", reply.current, reply.max),
            Err(e) => {
                eprintln!("getvcp failed: {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("could not open display {display_number}: {e}");
            std::process::exit(1);
        }
    }
}

fn run_setvcp(config: &DetectionConfig, display_number: i32, feature_code: u8, value: u16) {
    let Some(display_ref) = find_display(config, display_number) else {
        eprintln!("no display numbered {display_number}");
        std::process::exit(1);
    };
    let catalog = detect::ensure_detected(config);
    let options = OpenOptions { force_slave_address: config.force_slave_address, ..OpenOptions::default() };
    let open_result = DisplayHandle::open(display_ref, &catalog.lock_table, options);
    match open_result {
        Ok(mut handle) => {
            if let Err(e) = handle.transport_mut().set_vcp_nontable(feature_code, value) {
                eprintln!("setvcp failed: {e}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("could not open display {display_number}: {e}");
            std::process::exit(1);
        }
    }
}

fn run_cache_clear() {
    let path = cache_path();
    match std::fs::remove_file(&path) {
        Ok(()) => println!("removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => println!("no cache present at {}", path.display()),
        Err(e) => {
            eprintln!("failed to remove cache: {e}");
            std::process::exit(1);
        }
    }
}
