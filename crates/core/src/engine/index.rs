use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::rates::schema::NyisoRates;
use crate::rates::{OphrRecord, TieredTable, YearTable};

/// NYISO programs whose rates are keyed location -> utility -> tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TieredProgram {
    Csrp,
    Dlrp,
    Tdm,
}

impl TieredProgram {
    pub const ALL: [TieredProgram; 3] = [Self::Csrp, Self::Dlrp, Self::Tdm];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "CSRP" => Some(Self::Csrp),
            "DLRP" => Some(Self::Dlrp),
            "TDM" => Some(Self::Tdm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csrp => "CSRP",
            Self::Dlrp => "DLRP",
            Self::Tdm => "TDM",
        }
    }

    pub fn table<'a>(&self, rates: &'a NyisoRates) -> &'a TieredTable {
        match self {
            Self::Csrp => &rates.csrp,
            Self::Dlrp => &rates.dlrp,
            Self::Tdm => &rates.tdm,
        }
    }

    /// Store key of the table, used in diagnostic paths.
    pub fn store_key(&self) -> &'static str {
        match self {
            Self::Csrp => "csrp",
            Self::Dlrp => "dlrp",
            Self::Tdm => "tdm",
        }
    }
}

/// OPHR rows keyed by `(zone, product)`. When the store repeats a pair, the first row wins.
#[derive(Clone, Debug, Default)]
pub(crate) struct OphrIndex {
    rows: HashMap<(String, String), YearTable>,
}

impl OphrIndex {
    pub(crate) fn build(records: &[OphrRecord]) -> Self {
        let mut rows = HashMap::with_capacity(records.len());
        for record in records {
            let key = (record.zone.clone(), record.product.clone());
            if rows.contains_key(&key) {
                warn!(
                    event_name = "rates.index.duplicate_ophr_row",
                    zone = %record.zone,
                    product = %record.product,
                    "duplicate OPHR row ignored"
                );
                continue;
            }
            rows.insert(key, record.years.clone());
        }
        Self { rows }
    }

    pub(crate) fn get(&self, zone: &str, product: &str) -> Option<&YearTable> {
        self.rows.get(&(zone.to_string(), product.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Case-insensitive utility lookup for the tiered NYISO tables.
///
/// Maps program -> location -> lower-cased utility -> the key as stored.
#[derive(Clone, Debug, Default)]
pub struct UtilityIndex {
    programs: BTreeMap<TieredProgram, BTreeMap<String, BTreeMap<String, String>>>,
}

impl UtilityIndex {
    pub fn build(rates: &NyisoRates) -> Self {
        let programs = TieredProgram::ALL
            .into_iter()
            .map(|program| {
                let locations = program
                    .table(rates)
                    .iter()
                    .map(|(location, utilities)| {
                        let keys = utilities
                            .keys()
                            .map(|utility| (utility.to_lowercase(), utility.clone()))
                            .collect();
                        (location.clone(), keys)
                    })
                    .collect();
                (program, locations)
            })
            .collect();
        Self { programs }
    }

    pub fn lookup(&self, program: TieredProgram, location: &str, utility: &str) -> Option<&str> {
        self.programs
            .get(&program)?
            .get(location)?
            .get(&utility.trim().to_lowercase())
            .map(String::as_str)
    }
}
