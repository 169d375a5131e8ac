//! Transport addresses and the tagged union callers use to name a display.

use std::fmt;

/// Physical transport address of a monitor's control channel.
///
/// Structural equality and hashing are derived rather than hand-rolled: the
/// lock table and the registry key off this directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum IoPath {
    I2c {
        bus_number: u16,
    },
    Usb {
        bus: u16,
        device: u16,
        hiddev_number: u16,
    },
}

impl fmt::Display for IoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoPath::I2c { bus_number } => write!(f, "i2c-{bus_number}"),
            IoPath::Usb {
                bus,
                device,
                hiddev_number,
            } => write!(f, "usb-{bus}:{device}/hiddev{hiddev_number}"),
        }
    }
}

/// The way a caller names a display, before it has been resolved against
/// the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayIdentifier {
    DisplayNumber(i32),
    I2cBusNumber(u16),
    UsbBusDevice { bus: u16, device: u16 },
    HiddevNumber(u16),
    Edid([u8; 128]),
    MfgModelSerial {
        mfg_id: [u8; 3],
        model_name: String,
        serial_ascii: String,
    },
}

impl fmt::Display for DisplayIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayIdentifier::DisplayNumber(n) => write!(f, "display {n}"),
            DisplayIdentifier::I2cBusNumber(b) => write!(f, "i2c bus {b}"),
            DisplayIdentifier::UsbBusDevice { bus, device } => {
                write!(f, "usb {bus}:{device}")
            }
            DisplayIdentifier::HiddevNumber(n) => write!(f, "hiddev{n}"),
            DisplayIdentifier::Edid(_) => write!(f, "edid(...)"),
            DisplayIdentifier::MfgModelSerial {
                mfg_id,
                model_name,
                serial_ascii,
            } => {
                let mfg = std::str::from_utf8(mfg_id).unwrap_or("???");
                write!(f, "{mfg} {model_name} #{serial_ascii}")
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn io_path_equality_and_hash() {
        let a = IoPath::I2c { bus_number: 5 };
        let b = IoPath::I2c { bus_number: 5 };
        let c = IoPath::I2c { bus_number: 6 };
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }

    #[test]
    fn display_form_is_stable() {
        assert_eq!(IoPath::I2c { bus_number: 7 }.to_string(), "i2c-7");
        assert_eq!(
            IoPath::Usb {
                bus: 1,
                device: 2,
                hiddev_number: 0
            }
            .to_string(),
            "usb-1:2/hiddev0"
        );
    }
}
