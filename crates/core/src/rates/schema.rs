//! Typed shape of the rate store document.
//!
//! Every table is optional in the source document and decodes as empty when absent, so a store
//! that only carries one market still loads. Missing combinations stay missing: nothing here
//! invents zero placeholders.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::region::RegionMembership;

/// Program year label (`"25-26"`) to rate.
pub type YearTable = BTreeMap<String, f64>;

/// location -> utility -> tier -> rate.
pub type TieredTable = BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateBook {
    pub isone_rates: IsoNeRates,
    pub nyiso_rates: NyisoRates,
    pub energy_rates: EnergyRates,
    pub ercot_rates: ErcotRates,
    pub aps_rates: ApsRates,
    pub mdu_rates: MduRates,
    pub miso_rates: MisoRates,
    pub pjm_rates: PjmRates,
    /// Overrides the built-in utility alias map when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aliases: Option<BTreeMap<String, String>>,
    /// Overrides the built-in region membership lists when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_membership: Option<RegionMembership>,
}

impl RateBook {
    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        serde_json::from_str(raw).map_err(StoreError::Decode)
    }

    /// Row counts per top-level table, for operator diagnostics.
    pub fn table_counts(&self) -> BTreeMap<&'static str, usize> {
        let tiered =
            |table: &TieredTable| table.values().map(|utilities| utilities.len()).sum::<usize>();

        BTreeMap::from([
            ("isone.adcr", self.isone_rates.adcr.len()),
            ("isone.ophr", self.isone_rates.ophr.len()),
            ("isone.connectedSolutions", self.isone_rates.connected_solutions.len()),
            ("isone.cleanPeak", self.isone_rates.clean_peak.len()),
            ("nyiso.scr", self.nyiso_rates.scr.len()),
            ("nyiso.csrp", tiered(&self.nyiso_rates.csrp)),
            ("nyiso.dlrp", tiered(&self.nyiso_rates.dlrp)),
            ("nyiso.tdm", tiered(&self.nyiso_rates.tdm)),
            ("ercot.captag4cp", self.ercot_rates.captag4cp.len()),
            ("ercot.ers", self.ercot_rates.ers.seasons.len()),
            ("pjm.ec", self.pjm_rates.ec.zones.len()),
            ("pjm.elcc", self.pjm_rates.elcc.len()),
        ])
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IsoNeRates {
    /// zone -> year -> rate
    pub adcr: BTreeMap<String, YearTable>,
    pub ophr: Vec<OphrRecord>,
    /// utility -> dispatch type -> year -> rate
    pub connected_solutions: BTreeMap<String, BTreeMap<String, YearTable>>,
    pub clean_peak: YearTable,
}

/// One OPHR row, tagged with its zone and product label; remaining keys are program years.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OphrRecord {
    pub zone: String,
    pub product: String,
    #[serde(flatten)]
    pub years: YearTable,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NyisoRates {
    /// zone -> season -> rate
    pub scr: BTreeMap<String, BTreeMap<String, f64>>,
    pub csrp: TieredTable,
    pub dlrp: TieredTable,
    pub tdm: TieredTable,
    pub cap_adj_factors: BTreeMap<String, f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyRates {
    #[serde(rename = "SCR")]
    pub scr: BTreeMap<String, EnergyRate>,
    #[serde(rename = "CSRP")]
    pub csrp: BTreeMap<String, EnergyRate>,
    #[serde(rename = "DLRP")]
    pub dlrp: BTreeMap<String, EnergyRate>,
    /// utility -> tier -> rate
    #[serde(rename = "TDM")]
    pub tdm: BTreeMap<String, BTreeMap<String, EnergyRate>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyRate {
    pub hours: f64,
    pub energy_rate: f64,
    pub multiplier: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ErcotRates {
    /// utility -> service class -> charge
    pub captag4cp: BTreeMap<String, BTreeMap<String, CapTagCharge>>,
    pub ers: ErsSchedule,
    pub lr_rrs: MonthlySchedule,
    pub ecrs: MonthlySchedule,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapTagCharge {
    pub monthly_charge: f64,
    pub annual_multiplier: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErsSchedule {
    /// season -> time period -> period pricing
    pub seasons: BTreeMap<String, BTreeMap<String, ErsPeriod>>,
}

/// Hours and price are optional so one incomplete period does not reject the whole store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErsPeriod {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_price: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonthlySchedule {
    pub monthly_pricing: BTreeMap<String, MonthlyReserve>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyReserve {
    pub avg_price: f64,
    pub hours: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proration: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApsRates {
    pub peak_solutions: PeakSolutions,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PeakSolutions {
    pub day_ahead_capacity: YearTable,
    pub day_of_capacity: YearTable,
    pub energy: YearTable,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MduRates {
    pub drr: DrrRates,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DrrRates {
    pub peak_capacity: YearTable,
    pub off_peak_capacity: YearTable,
    pub energy: YearTable,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MisoRates {
    pub lmr: LmrRates,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmrRates {
    pub capacity: YearTable,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PjmRates {
    pub ec: EmergencyCapacity,
    /// delivery year (`"2027"`) -> factor
    pub elcc: BTreeMap<String, f64>,
    /// time window -> rate
    pub sync_reserve: BTreeMap<String, f64>,
}

pub const DEFAULT_PJM_EXCESS_PRICE: f64 = 12.5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmergencyCapacity {
    pub zones: BTreeMap<String, PjmZoneCharge>,
    /// Excess price quoted for zones that have no row of their own.
    pub default_excess: f64,
}

impl Default for EmergencyCapacity {
    fn default() -> Self {
        Self { zones: BTreeMap::new(), default_excess: DEFAULT_PJM_EXCESS_PRICE }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PjmZoneCharge {
    pub capacity: f64,
    pub excess: f64,
}

#[cfg(test)]
mod tests {
    use super::{RateBook, DEFAULT_PJM_EXCESS_PRICE};

    #[test]
    fn empty_document_decodes_to_empty_tables() {
        let book = RateBook::from_json("{}").expect("empty object is a valid store");

        assert!(book.isone_rates.adcr.is_empty());
        assert!(book.ercot_rates.ers.seasons.is_empty());
        assert_eq!(book.pjm_rates.ec.default_excess, DEFAULT_PJM_EXCESS_PRICE);
        assert!(book.aliases.is_none());
    }

    #[test]
    fn ophr_rows_keep_zone_product_and_years_apart() {
        let book = RateBook::from_json(
            r#"{"isoneRates":{"ophr":[{"zone":"CT","product":"OPHR All Year","25-26":2.64,"26-27":2.59}]}}"#,
        )
        .expect("valid store");

        let row = &book.isone_rates.ophr[0];
        assert_eq!(row.zone, "CT");
        assert_eq!(row.product, "OPHR All Year");
        assert_eq!(row.years.len(), 2);
        assert_eq!(row.years.get("26-27"), Some(&2.59));
    }

    #[test]
    fn energy_rate_keys_stay_upper_case() {
        let book = RateBook::from_json(
            r#"{"energyRates":{"CSRP":{"ConEd":{"hours":4,"energyRate":0.5,"multiplier":18}},
                "TDM":{"CHGE":{"Select":{"hours":5,"energyRate":1.366,"multiplier":6.83}}}}}"#,
        )
        .expect("valid store");

        assert_eq!(book.energy_rates.csrp["ConEd"].multiplier, 18.0);
        assert_eq!(book.energy_rates.tdm["CHGE"]["Select"].energy_rate, 1.366);
    }

    #[test]
    fn wrong_leaf_types_are_rejected() {
        let result = RateBook::from_json(r#"{"isoneRates":{"cleanPeak":{"25-26":"45"}}}"#);

        assert!(result.is_err());
    }

    #[test]
    fn counts_cover_tiered_rows() {
        let book = RateBook::from_json(
            r#"{"nyisoRates":{"csrp":{"NYC":{"ConEd":{"Select":18},"ConEd (Staten Island)":{"Select":18}}}}}"#,
        )
        .expect("valid store");

        assert_eq!(book.table_counts()["nyiso.csrp"], 2);
    }
}
