//! Device identity derived from the ESP32 factory MAC address.
//!
//! Produces the default advertised name `improv-xxyyzz` from the last
//! three bytes of the factory-burned eFuse MAC, stable across reboots.

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    // SAFETY: the buffer is exactly the 6 bytes the call writes.
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// Default BLE device name: `improv-xxyyzz` (lowercase).
pub fn device_name(mac: &MacAddress) -> heapless::String<16> {
    let mut name = heapless::String::<16>::new();
    use core::fmt::Write;
    // 13 characters always fit.
    let _ = write!(name, "improv-{:02x}{:02x}{:02x}", mac[3], mac[4], mac[5]);
    name
}
