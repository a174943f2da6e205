//! Wi-Fi station-mode provisioner.
//!
//! Implements [`WifiProvisioner`]: validates the credentials received over
//! BLE and associates with the access point.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::wifi::BlockingWifi` station
//!   connect, waiting for the network interface to come up.
//! - **all other targets**: simulation that validates and succeeds after a
//!   short latency.

use log::{info, warn};

use crate::error::WifiError;
use crate::ports::WifiProvisioner;

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

/// 1-32 bytes, space through tilde.
fn validate_ssid(ssid: &str) -> Result<(), WifiError> {
    let printable = ssid.bytes().all(|b| (0x20..=0x7E).contains(&b));
    if ssid.is_empty() || ssid.len() > 32 || !printable {
        return Err(WifiError::InvalidCredentials);
    }
    Ok(())
}

/// Empty for open networks, otherwise a WPA2 passphrase of 8-64 bytes.
fn validate_password(password: &str) -> Result<(), WifiError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 64 {
        return Err(WifiError::InvalidCredentials);
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Provisioner
// ───────────────────────────────────────────────────────────────

pub struct StationProvisioner {
    #[cfg(target_os = "espidf")]
    wifi: std::sync::Mutex<
        esp_idf_svc::wifi::BlockingWifi<esp_idf_svc::wifi::EspWifi<'static>>,
    >,
    #[cfg(not(target_os = "espidf"))]
    latency_ms: u64,
}

#[cfg(target_os = "espidf")]
impl StationProvisioner {
    pub fn new(
        wifi: esp_idf_svc::wifi::BlockingWifi<esp_idf_svc::wifi::EspWifi<'static>>,
    ) -> Self {
        Self {
            wifi: std::sync::Mutex::new(wifi),
        }
    }

    fn platform_connect(&self, ssid: &str, password: &str) -> Result<(), WifiError> {
        use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};

        let driver = |e: esp_idf_svc::sys::EspError| WifiError::Driver(e.code());
        let mut wifi = self
            .wifi
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let config = Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().map_err(|()| WifiError::InvalidCredentials)?,
            password: password
                .try_into()
                .map_err(|()| WifiError::InvalidCredentials)?,
            auth_method: if password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        });
        wifi.set_configuration(&config).map_err(driver)?;
        if !wifi.is_started().map_err(driver)? {
            wifi.start().map_err(driver)?;
        }
        if wifi.is_connected().map_err(driver)? {
            wifi.disconnect().map_err(driver)?;
        }
        wifi.connect().map_err(|e| {
            warn!("WiFi: association failed: {}", e);
            WifiError::ConnectFailed
        })?;
        wifi.wait_netif_up().map_err(driver)?;
        Ok(())
    }
}

#[cfg(not(target_os = "espidf"))]
impl StationProvisioner {
    pub fn new() -> Self {
        Self { latency_ms: 100 }
    }

    /// Simulation with a custom association latency.
    pub fn with_latency_ms(latency_ms: u64) -> Self {
        Self { latency_ms }
    }

    fn platform_connect(&self, ssid: &str, _password: &str) -> Result<(), WifiError> {
        std::thread::sleep(std::time::Duration::from_millis(self.latency_ms));
        info!("WiFi(sim): connected to '{}'", ssid);
        Ok(())
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for StationProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl WifiProvisioner for StationProvisioner {
    fn provision(&self, ssid: &str, password: &str) -> Result<(), WifiError> {
        validate_ssid(ssid)?;
        validate_password(password)?;
        info!("WiFi: connecting to '{}'", ssid);
        match self.platform_connect(ssid, password) {
            Ok(()) => {
                info!("WiFi: connected");
                Ok(())
            }
            Err(e) => {
                warn!("WiFi: connection failed: {}", e);
                Err(e)
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
