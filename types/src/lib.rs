#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt::Formatter;
use strum::{Display, EnumCount, EnumIter};

/// The line speeds offered to frontends. The driver itself accepts any u32 and
/// validates it against the chip's supported table, these are just the values
/// worth putting in a picker.
#[derive(Copy, Clone, Debug, Display, EnumIter, EnumCount, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BaudRate {
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
}

impl BaudRate {
    pub fn value(&self) -> u32 {
        match self {
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115_200,
        }
    }
}

#[derive(Copy, Clone, Debug, Display, EnumIter, EnumCount, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// The PL2303 hardware generation, detected from the device descriptor. Legacy
/// parts top out at 230400 baud, HX and HXN go higher.
#[derive(Copy, Clone, Debug, Display, EnumIter, EnumCount, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ChipVariant {
    Legacy,
    Hx,
    Hxn,
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VersionNumber(pub u8, pub u8, pub u8);

impl std::fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

impl std::fmt::Debug for VersionNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn baud_rates_map_to_their_line_speeds() {
        assert_eq!(BaudRate::B9600.value(), 9600);
        assert_eq!(BaudRate::B115200.value(), 115_200);

        for rate in BaudRate::iter() {
            assert_eq!(format!("B{}", rate.value()), rate.to_string());
        }
    }

    #[test]
    fn version_number_formats_dotted() {
        assert_eq!(VersionNumber(1, 2, 3).to_string(), "1.2.3");
    }
}
