//! Status marker byte.
//!
//! The first byte of every transmission encodes whether the payload is
//! compressed and whether it is a batch:
//!
//! | value | meaning |
//! |---|---|
//! | 0 | single, uncompressed |
//! | 1 | single, compressed |
//! | 2 | batch, uncompressed |
//! | 3 | batch, compressed |

use crate::error::TransportError;

/// Leading byte of a transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Marker {
    Single = 0,
    SingleCompressed = 1,
    Batch = 2,
    BatchCompressed = 3,
}

impl Marker {
    pub fn new(compressed: bool, batch: bool) -> Self {
        match (compressed, batch) {
            (false, false) => Marker::Single,
            (true, false) => Marker::SingleCompressed,
            (false, true) => Marker::Batch,
            (true, true) => Marker::BatchCompressed,
        }
    }

    pub fn is_compressed(self) -> bool {
        matches!(self, Marker::SingleCompressed | Marker::BatchCompressed)
    }

    pub fn is_batch(self) -> bool {
        matches!(self, Marker::Batch | Marker::BatchCompressed)
    }

    pub fn byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Marker {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Marker::Single),
            1 => Ok(Marker::SingleCompressed),
            2 => Ok(Marker::Batch),
            3 => Ok(Marker::BatchCompressed),
            other => Err(TransportError::UnknownMarker(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_flags() {
        for compressed in [false, true] {
            for batch in [false, true] {
                let marker = Marker::new(compressed, batch);
                assert_eq!(marker.is_compressed(), compressed);
                assert_eq!(marker.is_batch(), batch);
                assert_eq!(Marker::try_from(marker.byte()).unwrap(), marker);
            }
        }
    }

    #[test]
    fn test_wire_values() {
        assert_eq!(Marker::new(false, false).byte(), 0);
        assert_eq!(Marker::new(true, false).byte(), 1);
        assert_eq!(Marker::new(false, true).byte(), 2);
        assert_eq!(Marker::new(true, true).byte(), 3);
    }

    #[test]
    fn test_unknown_marker() {
        for byte in 4u8..=255 {
            assert!(matches!(
                Marker::try_from(byte),
                Err(TransportError::UnknownMarker(b)) if b == byte
            ));
        }
    }
}
