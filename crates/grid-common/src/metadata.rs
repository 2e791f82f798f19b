//! Fixed provenance record written on every persisted dataset.
//!
//! These values are constants kept for compatibility with downstream climate
//! tooling that expects CDI/CDO style global attributes. They are not
//! computed from the data.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ATTR_CDI: &str = "CDI";
pub const ATTR_CONVENTIONS: &str = "Conventions";
pub const ATTR_INSTITUTION: &str = "institution";
pub const ATTR_HISTORY: &str = "history";
pub const ATTR_CDO: &str = "CDO";

const CDI: &str = "Climate Data Interface version 2.0.1 (https://mpimet.mpg.de/cdi)";
const CONVENTIONS: &str = "CF-1.6";
const INSTITUTION: &str = "European Centre for Medium-Range Weather Forecasts";
const HISTORY: &str = "Tue Jun 21 21:31:10 2022: cdo -f nc copy /Users/Minoru/Downloads/2008_temp2.grib /Users/Minoru/Downloads/2008_temp.nc";
const CDO: &str = "Climate Data Operators version 2.0.0 (https://mpimet.mpg.de/cdo)";

/// Provenance attributes (format family, convention, institution, history).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub cdi: String,
    pub conventions: String,
    pub institution: String,
    pub history: String,
    pub cdo: String,
}

impl Default for Provenance {
    fn default() -> Self {
        Self {
            cdi: CDI.to_string(),
            conventions: CONVENTIONS.to_string(),
            institution: INSTITUTION.to_string(),
            history: HISTORY.to_string(),
            cdo: CDO.to_string(),
        }
    }
}

impl Provenance {
    /// Attribute map as written to dataset metadata.
    pub fn to_attributes(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (ATTR_CDI.to_string(), self.cdi.clone()),
            (ATTR_CONVENTIONS.to_string(), self.conventions.clone()),
            (ATTR_INSTITUTION.to_string(), self.institution.clone()),
            (ATTR_HISTORY.to_string(), self.history.clone()),
            (ATTR_CDO.to_string(), self.cdo.clone()),
        ])
    }

    /// Read the record back; `None` unless every key is present.
    pub fn from_attributes(attrs: &BTreeMap<String, String>) -> Option<Self> {
        Some(Self {
            cdi: attrs.get(ATTR_CDI)?.clone(),
            conventions: attrs.get(ATTR_CONVENTIONS)?.clone(),
            institution: attrs.get(ATTR_INSTITUTION)?.clone(),
            history: attrs.get(ATTR_HISTORY)?.clone(),
            cdo: attrs.get(ATTR_CDO)?.clone(),
        })
    }

    /// Whether `key` is one of the provenance attribute names.
    pub fn is_provenance_key(key: &str) -> bool {
        matches!(
            key,
            ATTR_CDI | ATTR_CONVENTIONS | ATTR_INSTITUTION | ATTR_HISTORY | ATTR_CDO
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_round_trip() {
        let prov = Provenance::default();
        let attrs = prov.to_attributes();
        assert_eq!(attrs.len(), 5);
        assert_eq!(attrs[ATTR_CONVENTIONS], "CF-1.6");
        assert_eq!(Provenance::from_attributes(&attrs), Some(prov));
    }

    #[test]
    fn test_partial_attributes_rejected() {
        let mut attrs = Provenance::default().to_attributes();
        attrs.remove(ATTR_HISTORY);
        assert!(Provenance::from_attributes(&attrs).is_none());
        assert!(Provenance::is_provenance_key("CDO"));
        assert!(!Provenance::is_provenance_key("units"));
    }
}
