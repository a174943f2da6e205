//! Device identity served over GAP and the Device Information service.
//!
//! Immutable after construction. The name is the GAP device name and the
//! NameOnly advertisement payload; manufacturer and model back the two
//! Device Information characteristics.

use crate::error::{Error, Result};

/// Maximum byte length of any identity string.
pub const MAX_IDENTITY_LEN: usize = 32;

pub type IdentityString = heapless::String<MAX_IDENTITY_LEN>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    name: IdentityString,
    manufacturer: IdentityString,
    model: IdentityString,
}

impl DeviceIdentity {
    pub fn new(name: &str, manufacturer: &str, model: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::Config("device name must not be empty"));
        }
        Ok(Self {
            name: to_fixed(name, "device name too long")?,
            manufacturer: to_fixed(manufacturer, "manufacturer too long")?,
            model: to_fixed(model, "model too long")?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn to_fixed(s: &str, overflow: &'static str) -> Result<IdentityString> {
    let mut out = IdentityString::new();
    out.push_str(s).map_err(|()| Error::Config(overflow))?;
    Ok(out)
}
