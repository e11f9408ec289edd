//! Convenience entry points over [`RateEngine::resolve`] and the direct price lookup.

use serde::{Deserialize, Serialize};

use crate::errors::ResolutionFailure;
use crate::region::Region;

use super::delegates::{
    ConnectedSolutionsRequest, ConnectedSolutionsResolver, TieredResolver, SELECT_TIER,
};
use super::index::TieredProgram;
use super::markets::{cell, unsupported};
use super::query::{RateQuery, RateResult};
use super::{report_miss, RateEngine};

/// Utility used for energy rows when the caller's utility has none of its own.
pub const FALLBACK_ENERGY_UTILITY: &str = "ConEd";

/// Energy-side parameters of a NYISO program, joined with its capacity multiplier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtilityProgramData {
    pub hours: f64,
    pub energy_rate: f64,
    pub multiplier: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summer_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winter_price: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PjmZoneInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub lda: String,
    pub capacity_price: f64,
    pub excess_price: f64,
}

impl<T: TieredResolver, C: ConnectedSolutionsResolver> RateEngine<T, C> {
    pub fn rate_by_zone(&self, zone: &str, product: &str, year: Option<&str>) -> RateResult {
        let mut query = RateQuery::new(product).with_zone(zone);
        query.year = year.map(str::to_string);
        self.resolve(&query)
    }

    /// ConnectedSolutions rate for a utility. Always resolved against ISO-NE, even when the
    /// utility label doubles as a zone code elsewhere.
    pub fn rate_by_utility(&self, utility: &str, product: &str, year: Option<&str>) -> RateResult {
        let mut query =
            RateQuery::new(product).with_region(Region::Isone.as_str()).with_utility(utility);
        query.year = year.map(str::to_string);
        self.resolve(&query)
    }

    pub fn tdm_rate(&self, zone: &str, utility: &str, tier: Option<&str>) -> RateResult {
        let mut query = RateQuery::new("TDM")
            .with_region(Region::Nyiso.as_str())
            .with_zone(zone)
            .with_utility(utility);
        query.tier = tier.map(str::to_string);
        self.resolve(&query)
    }

    /// Direct price lookup by `(zone, product, year)`.
    ///
    /// Without an explicit region, NYISO zones resolve against NYISO and everything else
    /// against ISO-NE. Product labels follow the price-sheet vocabulary (`SCR_SUMMER`,
    /// `EC_EXCESS`), which differs from [`RateEngine::resolve`].
    pub fn price(&self, zone: &str, product: &str, year: &str, region: Option<Region>) -> RateResult {
        let zone = zone.trim();
        let product = product.trim();
        let year = year.trim();
        let region = region.unwrap_or_else(|| {
            if self.membership.is_nyiso_zone(zone) {
                Region::Nyiso
            } else {
                Region::Isone
            }
        });

        let result = match region {
            Region::Isone => self.isone_price(zone, product, year),
            Region::Nyiso => match product {
                "SCR_SUMMER" => self.scr_rate(zone, "summer"),
                "SCR_WINTER" => self.scr_rate(zone, "winter"),
                _ => unsupported(region, product),
            },
            Region::Ercot => match product {
                "ERS" => self.weighted_ers_average(),
                "4CP" => RateResult::missing(ResolutionFailure::invalid(
                    "4CP charges depend on a service class; resolve a query with serviceClass",
                )),
                _ => unsupported(region, product),
            },
            Region::Pjm => match product {
                "EC" | "Emergency Capacity" => cell(
                    self.book.pjm_rates.ec.zones.get(zone).map(|charge| &charge.capacity),
                    format!("pjmRates.ec.zones.{zone}.capacity"),
                ),
                "EC_EXCESS" | "Excess" => RateResult::found(self.book.pjm_rates.ec.default_excess),
                _ => unsupported(region, product),
            },
            Region::Aps | Region::Mdu | Region::Miso => self.flat_rate(region, product, year),
        };

        self.report("price", product, Some(zone), result)
    }

    fn isone_price(&self, zone: &str, product: &str, year: &str) -> RateResult {
        let rates = &self.book.isone_rates;

        if product.contains("ADCR") {
            cell(
                rates.adcr.get(zone).and_then(|years| years.get(year)),
                format!("isoneRates.adcr.{zone}.{year}"),
            )
        } else if product.contains("OPHR") || product.contains("Solar") {
            self.ophr_rate(zone, product, year)
        } else if product.contains("Dispatch") {
            // Price sheets key Connected Solutions by utility in the zone column.
            let request =
                ConnectedSolutionsRequest { utility: Some(zone), dispatch: product, year };
            self.connected.resolve(&request, rates)
        } else if product == "Clean Peak" {
            cell(rates.clean_peak.get(year), format!("isoneRates.cleanPeak.{year}"))
        } else {
            unsupported(Region::Isone, product)
        }
    }

    /// Energy rate, hours and multiplier for a NYISO program at one zone and utility.
    ///
    /// Fails with the missing path when the capacity side has no row for the utility. A
    /// utility without its own energy row borrows the ConEd row.
    pub fn utility_program_data(
        &self,
        zone: &str,
        program: &str,
        utility: Option<&str>,
        tier: Option<&str>,
    ) -> Result<UtilityProgramData, ResolutionFailure> {
        let zone = zone.trim();
        let program = program.trim();
        let data = self.program_data(zone, program, utility, tier);
        if let Err(failure) = &data {
            report_miss("utility_program_data", program, Some(zone), failure);
        }
        data
    }

    fn program_data(
        &self,
        zone: &str,
        program: &str,
        utility: Option<&str>,
        tier: Option<&str>,
    ) -> Result<UtilityProgramData, ResolutionFailure> {
        let tier = tier.map(str::trim).filter(|tier| !tier.is_empty()).unwrap_or(SELECT_TIER);
        let energy = &self.book.energy_rates;

        if matches!(program, "SCR" | "ICAP/SCR") {
            let base = energy
                .scr
                .get(zone)
                .ok_or_else(|| ResolutionFailure::not_found(format!("energyRates.SCR.{zone}")))?;
            let prices = self.book.nyiso_rates.scr.get(zone);
            return Ok(UtilityProgramData {
                hours: base.hours,
                energy_rate: base.energy_rate,
                multiplier: base.multiplier,
                summer_price: prices.and_then(|seasons| seasons.get("summer")).copied(),
                winter_price: prices.and_then(|seasons| seasons.get("winter")).copied(),
            });
        }

        let parsed = TieredProgram::parse(program).ok_or_else(|| {
            ResolutionFailure::invalid(format!(
                "program `{program}` has no utility program data; expected SCR, CSRP, DLRP or TDM"
            ))
        })?;
        let utility = utility.map(str::trim).filter(|utility| !utility.is_empty()).ok_or_else(
            || ResolutionFailure::invalid(format!("{} program data needs a utility", parsed.as_str())),
        )?;

        let table_path = format!("nyisoRates.{}.{zone}", parsed.store_key());
        let key = self
            .utility_index()
            .lookup(parsed, zone, utility)
            .ok_or_else(|| ResolutionFailure::not_found(format!("{table_path}.{utility}")))?;
        let tiers = parsed
            .table(&self.book.nyiso_rates)
            .get(zone)
            .and_then(|utilities| utilities.get(key))
            .ok_or_else(|| ResolutionFailure::not_found(format!("{table_path}.{key}")))?;
        let multiplier = *tiers
            .get(tier)
            .or_else(|| tiers.get(SELECT_TIER))
            .ok_or_else(|| ResolutionFailure::not_found(format!("{table_path}.{key}.{tier}")))?;

        let canonical = self.aliases.normalize(utility);
        let base = match parsed {
            TieredProgram::Csrp => {
                energy.csrp.get(&canonical).or_else(|| energy.csrp.get(FALLBACK_ENERGY_UTILITY))
            }
            TieredProgram::Dlrp => {
                energy.dlrp.get(&canonical).or_else(|| energy.dlrp.get(FALLBACK_ENERGY_UTILITY))
            }
            TieredProgram::Tdm => energy
                .tdm
                .get(&canonical)
                .or_else(|| energy.tdm.get(FALLBACK_ENERGY_UTILITY))
                .and_then(|tiers| tiers.get(tier).or_else(|| tiers.get(SELECT_TIER))),
        }
        .ok_or_else(|| {
            ResolutionFailure::not_found(format!(
                "energyRates.{}.{canonical}.{tier}",
                parsed.as_str()
            ))
        })?;

        Ok(UtilityProgramData {
            hours: base.hours,
            energy_rate: base.energy_rate,
            multiplier,
            summer_price: None,
            winter_price: None,
        })
    }

    pub fn pjm_zone_info(&self, zone: &str) -> Result<PjmZoneInfo, ResolutionFailure> {
        let zone = zone.trim();
        let Some(charge) = self.book.pjm_rates.ec.zones.get(zone) else {
            let failure = ResolutionFailure::not_found(format!("pjmRates.ec.zones.{zone}"));
            report_miss("pjm_zone_info", "EC", Some(zone), &failure);
            return Err(failure);
        };
        Ok(PjmZoneInfo {
            kind: "Zone".to_string(),
            name: zone.to_string(),
            lda: self.membership.lda_for_zone(zone).unwrap_or("Unknown").to_string(),
            capacity_price: charge.capacity,
            excess_price: charge.excess,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::RateEngine;
    use crate::errors::ResolutionFailure;
    use crate::rates::RateBook;
    use crate::region::Region;

    const STORE: &str = r#"{
        "isoneRates": {
            "adcr": {"CT": {"25-26": 3.34, "27-28": 3.58}},
            "connectedSolutions": {
                "RI Energy": {"Targeted Dispatch": {"25-26": 35}},
                "NYC": {"Daily Dispatch": {"25-26": 12}}
            }
        },
        "nyisoRates": {
            "scr": {"NYC": {"summer": 14.5, "winter": 9.25}},
            "csrp": {"NYC": {"ConEd": {"1": 18, "2": 25, "Select": 18}}},
            "tdm": {"LHV": {"CHGE": {"1": 5.2, "Select": 6.83}}}
        },
        "energyRates": {
            "SCR": {"NYC": {"hours": 4, "energyRate": 0.5, "multiplier": 1}},
            "CSRP": {"ConEd": {"hours": 4, "energyRate": 0.5, "multiplier": 18}},
            "TDM": {"CHGE": {"Select": {"hours": 5, "energyRate": 1.366, "multiplier": 6.83}}}
        },
        "ercotRates": {"ers": {"seasons": {"Jun-Sep": {
            "A": {"hours": 10, "defaultPrice": 2},
            "B": {"hours": 30, "defaultPrice": 6}
        }}}},
        "pjmRates": {"ec": {"zones": {"BGE": {"capacity": 0.46635, "excess": 0.0125}}, "defaultExcess": 12.5}}
    }"#;

    fn engine() -> RateEngine {
        RateEngine::from_book(RateBook::from_json(STORE).expect("valid store")).expect("aliases")
    }

    #[test]
    fn price_infers_nyiso_only_from_nyiso_zones() {
        let engine = engine();

        assert_eq!(engine.price("NYC", "SCR_WINTER", "25-26", None).value, Some(9.25));
        assert_eq!(engine.price("CT", "ADCR", "27-28", None).value, Some(3.58));
        // A PJM zone without an explicit region resolves against ISO-NE tables.
        assert_eq!(engine.price("BGE", "EC", "25-26", None).value, None);
        assert_eq!(engine.price("BGE", "EC", "25-26", Some(Region::Pjm)).value, Some(0.46635));
    }

    #[test]
    fn price_treats_zone_as_utility_for_dispatch_products() {
        let engine = engine();

        let result = engine.price("RI Energy", "Targeted Dispatch", "25-26", None);

        assert_eq!(result.value, Some(35.0));
    }

    #[test]
    fn rate_by_utility_stays_in_isone_when_the_label_is_a_nyiso_zone() {
        let engine = engine();

        let result = engine.rate_by_utility("NYC", "Daily Dispatch", Some("25-26"));

        assert_eq!(result.value, Some(12.0));
        assert_eq!(result.diagnostic, None);
        assert_eq!(engine.rate_by_utility("RI Energy", "Targeted Dispatch", None).value, Some(35.0));
    }

    #[test]
    fn price_ers_is_the_weighted_average() {
        let engine = engine();

        assert_eq!(engine.price("ERCOT", "ERS", "25-26", Some(Region::Ercot)).value, Some(5.0));
    }

    #[test]
    fn price_4cp_asks_for_a_service_class() {
        let engine = engine();

        let result = engine.price("AEP Texas", "4CP", "25-26", Some(Region::Ercot));

        assert!(matches!(result.diagnostic, Some(ResolutionFailure::InvalidQuery { .. })));
    }

    #[test]
    fn pjm_excess_without_zone_row_uses_default() {
        let engine = engine();

        assert_eq!(engine.price("ZZZ", "EC_EXCESS", "25-26", Some(Region::Pjm)).value, Some(12.5));
    }

    #[test]
    fn tdm_rate_falls_back_to_select_tier() {
        let engine = engine();

        assert_eq!(engine.tdm_rate("LHV", "chge", Some("1")).value, Some(5.2));
        assert_eq!(engine.tdm_rate("LHV", "chge", Some("9")).value, Some(6.83));
        assert_eq!(engine.tdm_rate("LHV", "chge", None).value, Some(6.83));
    }

    #[test]
    fn utility_program_data_joins_energy_and_multiplier() {
        let engine = engine();

        let csrp = engine
            .utility_program_data("NYC", "CSRP", Some("coned"), Some("2"))
            .expect("csrp data");
        assert_eq!(csrp.multiplier, 25.0);
        assert_eq!(csrp.energy_rate, 0.5);

        let tdm = engine.utility_program_data("LHV", "TDM", Some("CHGE"), None).expect("tdm data");
        assert_eq!(tdm.energy_rate, 1.366);
        assert_eq!(tdm.multiplier, 6.83);

        let scr = engine.utility_program_data("NYC", "SCR", None, None).expect("scr data");
        assert_eq!(scr.summer_price, Some(14.5));
        assert_eq!(scr.winter_price, Some(9.25));
    }

    #[test]
    fn utility_program_data_misses_name_what_was_missing() {
        let engine = engine();

        assert_eq!(
            engine.utility_program_data("NYC", "CSRP", Some("NYSEG"), None),
            Err(ResolutionFailure::not_found("nyisoRates.csrp.NYC.NYSEG"))
        );
        assert_eq!(
            engine.utility_program_data("BKN", "SCR", None, None),
            Err(ResolutionFailure::not_found("energyRates.SCR.BKN"))
        );
        assert!(matches!(
            engine.utility_program_data("NYC", "CSRP", None, None),
            Err(ResolutionFailure::InvalidQuery { .. })
        ));
        assert!(matches!(
            engine.utility_program_data("NYC", "Clean Peak", Some("ConEd"), None),
            Err(ResolutionFailure::InvalidQuery { .. })
        ));
    }

    #[test]
    fn pjm_zone_info_reports_lda() {
        let engine = engine();

        let info = engine.pjm_zone_info("BGE").expect("zone info");
        assert_eq!(info.lda, "SWMAAC");
        assert_eq!(info.capacity_price, 0.46635);

        let json = serde_json::to_value(&info).expect("serialize");
        assert_eq!(json["type"], "Zone");
        assert_eq!(json["excessPrice"], 0.0125);
        assert_eq!(
            engine.pjm_zone_info("NOWHERE"),
            Err(ResolutionFailure::not_found("pjmRates.ec.zones.NOWHERE"))
        );
    }
}
