//! Profile-side models consumed by the pipeline.
//!
//! Profile CRUD belongs to the profile service; the pipeline only needs
//! the brand a user belongs to, stamped onto events at ingest time.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Product line a user (and their interactions) belongs to.
///
/// The numeric encoding is shared with the relational store and the wire
/// format and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum Brand {
    Unknown = 0,
    Ember = 1,
    Solstice = 2,
    Meridian = 3,
}

impl Brand {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    /// Decode a stored brand id. Ids from newer deployments map to
    /// `Unknown` instead of failing, so old workers can still process
    /// events from brands they predate.
    pub fn from_i16(value: i16) -> Self {
        match value {
            1 => Brand::Ember,
            2 => Brand::Solstice,
            3 => Brand::Meridian,
            _ => Brand::Unknown,
        }
    }
}

impl Serialize for Brand {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i16(self.as_i16())
    }
}

impl<'de> Deserialize<'de> for Brand {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i16::deserialize(deserializer)?;
        Ok(Brand::from_i16(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brand_encoding_is_fixed() {
        assert_eq!(Brand::Ember.as_i16(), 1);
        assert_eq!(Brand::Solstice.as_i16(), 2);
        assert_eq!(Brand::Meridian.as_i16(), 3);
    }

    #[test]
    fn test_unknown_brand_ids_decode_to_unknown() {
        assert_eq!(Brand::from_i16(99), Brand::Unknown);
        assert_eq!(Brand::from_i16(-1), Brand::Unknown);
    }

    #[test]
    fn test_brand_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Brand::Solstice).unwrap(), "2");
        let parsed: Brand = serde_json::from_str("3").unwrap();
        assert_eq!(parsed, Brand::Meridian);
    }
}
