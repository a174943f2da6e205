//! Improv BLE firmware: main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Adapters (outer ring)                    │
//! │                                                          │
//! │  NimbleHost (HostStack)      StationProvisioner (Wi-Fi)  │
//! │                                                          │
//! │  ─────────────── Port Trait Boundary ──────────────────  │
//! │                                                          │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │ ImprovServer                                       │  │
//! │  │ events · dispatch · provisioning · advertising     │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │                                                          │
//! │  improv-adv task (App core) · improv-prov worker         │
//! └──────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::Result;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};
use log::info;

use improv_ble::adapters::device_id;
use improv_ble::adapters::nimble::NimbleHost;
use improv_ble::adapters::wifi::StationProvisioner;
use improv_ble::{DeviceIdentity, ImprovServer, ServerConfig};

/// Interval between status log lines from the idle main task.
const STATUS_LOG_INTERVAL_MS: u32 = 30_000;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Improv BLE v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Wi-Fi station driver ───────────────────────────────
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;
    let wifi = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sysloop.clone(), Some(nvs))?,
        sysloop,
    )?;
    let provisioner = StationProvisioner::new(wifi);

    // ── 3. Identity ───────────────────────────────────────────
    let mac = device_id::read_mac();
    let name = device_id::device_name(&mac);
    let identity = DeviceIdentity::new(&name, "Improv", env!("CARGO_PKG_NAME"))?;

    // ── 4. Controller ─────────────────────────────────────────
    let server = ImprovServer::initialize(
        identity,
        ServerConfig::default(),
        NimbleHost::new(),
        provisioner,
    )?;
    let _tasks = server.spawn()?;
    server.start_advertising();
    info!("Improv provisioning ready as '{}'", name);

    // ── 5. Idle ───────────────────────────────────────────────
    loop {
        FreeRtos::delay_ms(STATUS_LOG_INTERVAL_MS);
        info!(
            "Status: state={} error={} conn={} mode={:?}",
            server.state(),
            server.error(),
            server.connection_handle(),
            server.advertising_mode()
        );
    }
}
