use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Isone,
    Nyiso,
    Ercot,
    Pjm,
    Aps,
    Mdu,
    Miso,
}

impl Region {
    pub const ALL: [Region; 7] =
        [Self::Isone, Self::Nyiso, Self::Ercot, Self::Pjm, Self::Aps, Self::Mdu, Self::Miso];

    /// Accepts the lower-case identifiers plus the hyphenated market names (`ISO-NE`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "isone" | "iso-ne" => Some(Self::Isone),
            "nyiso" => Some(Self::Nyiso),
            "ercot" => Some(Self::Ercot),
            "pjm" => Some(Self::Pjm),
            "aps" => Some(Self::Aps),
            "mdu" => Some(Self::Mdu),
            "miso" => Some(Self::Miso),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Isone => "isone",
            Self::Nyiso => "nyiso",
            Self::Ercot => "ercot",
            Self::Pjm => "pjm",
            Self::Aps => "aps",
            Self::Mdu => "mdu",
            Self::Miso => "miso",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static zone lists used to classify a zone or utility code into a market.
///
/// Loaded once with the rate store and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegionMembership {
    pub nyiso_zones: Vec<String>,
    pub pjm_zones: Vec<String>,
    /// PJM locational deliverability areas and the EC zones inside each.
    pub pjm_lda_zones: BTreeMap<String, Vec<String>>,
}

const NYISO_ZONES: &[&str] = &["NYC", "LI", "LHV", "ROS"];

const PJM_ZONES: &[&str] = &[
    "BGE", "DOM", "EMAAC", "MAAC", "DEOK", "RTO", "AEP", "APS", "ATSI", "COMED", "DAY", "DPL",
    "DUQ", "EKPC", "JCPL", "METED", "PECO", "PENELEC", "PEPCO", "PPL", "PSEG", "RECO", "ComEd",
    "Met-Ed", "Pepco",
];

const PJM_LDA_ZONES: &[(&str, &[&str])] = &[
    ("EMAAC", &["AECO", "DPL", "JCPL", "PECO", "PSEG", "RECO"]),
    ("SWMAAC", &["BGE", "PEPCO"]),
    ("MAAC", &["METED", "PENELEC", "PPL"]),
    ("DOM", &["DOM"]),
    ("RTO", &["AEP", "APS", "ATSI", "COMED", "DAY", "DEOK", "DUQ", "EKPC", "EXPC"]),
];

impl Default for RegionMembership {
    fn default() -> Self {
        Self {
            nyiso_zones: NYISO_ZONES.iter().map(|zone| zone.to_string()).collect(),
            pjm_zones: PJM_ZONES.iter().map(|zone| zone.to_string()).collect(),
            pjm_lda_zones: PJM_LDA_ZONES
                .iter()
                .map(|(lda, zones)| {
                    (lda.to_string(), zones.iter().map(|zone| zone.to_string()).collect())
                })
                .collect(),
        }
    }
}

impl RegionMembership {
    /// Classifies a code: NYISO zones, then PJM zones, then the explicit market
    /// sentinels, and ISO-NE for everything else.
    ///
    /// Unknown codes land on ISO-NE. A mistyped PJM zone therefore resolves against ISO-NE
    /// tables; callers that know their market should pass it explicitly.
    pub fn resolve_region(&self, code: &str) -> Region {
        if self.is_nyiso_zone(code) {
            return Region::Nyiso;
        }
        if self.pjm_zones.iter().any(|zone| zone == code) {
            return Region::Pjm;
        }

        match code {
            "ERCOT" | "ercot" => Region::Ercot,
            "APS" | "aps" => Region::Aps,
            "MDU" | "mdu" => Region::Mdu,
            "MISO" | "miso" => Region::Miso,
            "PJM" | "pjm" => Region::Pjm,
            _ => Region::Isone,
        }
    }

    pub fn is_nyiso_zone(&self, code: &str) -> bool {
        self.nyiso_zones.iter().any(|zone| zone == code)
    }

    pub fn lda_for_zone(&self, zone: &str) -> Option<&str> {
        self.pjm_lda_zones
            .iter()
            .find(|(_, zones)| zones.iter().any(|candidate| candidate == zone))
            .map(|(lda, _)| lda.as_str())
    }
}
