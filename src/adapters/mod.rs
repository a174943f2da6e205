//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter     | Implements        | Connects to                 |
//! |-------------|-------------------|-----------------------------|
//! | `nimble`    | HostStack         | NimBLE GATT server / GAP    |
//! | `wifi`      | WifiProvisioner   | ESP-IDF Wi-Fi STA           |
//! | `device_id` |                   | eFuse MAC → default name    |

pub mod device_id;
pub mod nimble;
pub mod wifi;
