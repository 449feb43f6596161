//! Device identity derived from a stable hardware identifier.
//!
//! Every MQTT name the device uses is built from a 24-bit chip id rendered
//! as six uppercase hex digits:
//!
//! | Name | Format |
//! |------|--------|
//! | client id | `pd-logger-<CHIP>` |
//! | discovery device id | `pd_logger_<CHIP>` |
//! | display name | `PD-Logger <CHIP>` |
//! | topic segment | `<CHIP>` |

use core::fmt;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Identity of this device as seen by the broker and the automation consumer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    chip_id: u32,
}

impl DeviceIdentity {
    /// Build an identity from a raw 24-bit chip id.
    ///
    /// Bits above the lowest 24 are discarded.
    #[must_use]
    pub fn from_chip_id(chip_id: u32) -> Self {
        Self {
            chip_id: chip_id & 0x00FF_FFFF,
        }
    }

    /// Derive an identity from an arbitrary stable hardware identifier
    /// (machine id, MAC address, serial number).
    ///
    /// The identifier is trimmed and hashed with 32-bit FNV-1a, so the same
    /// input always yields the same chip id.
    #[must_use]
    pub fn from_hardware_id(hardware_id: &str) -> Self {
        let hash = hardware_id
            .trim()
            .bytes()
            .fold(FNV_OFFSET, |acc, b| (acc ^ u32::from(b)).wrapping_mul(FNV_PRIME));
        Self::from_chip_id(hash)
    }

    /// Six-digit uppercase hex chip id.
    #[must_use]
    pub fn chip_hex(&self) -> String {
        format!("{:06X}", self.chip_id)
    }

    /// MQTT client identifier.
    #[must_use]
    pub fn client_id(&self) -> String {
        format!("pd-logger-{}", self.chip_hex())
    }

    /// Device id used for discovery unique ids and device grouping.
    #[must_use]
    pub fn device_id(&self) -> String {
        format!("pd_logger_{}", self.chip_hex())
    }

    /// Human readable device name.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("PD-Logger {}", self.chip_hex())
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}", self.chip_id)
    }
}
