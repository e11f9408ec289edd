use tracing::warn;

use crate::errors::ResolutionFailure;
use crate::rates::schema::MonthlySchedule;
use crate::rates::YearTable;
use crate::region::Region;

use super::delegates::{
    ConnectedSolutionsRequest, ConnectedSolutionsResolver, TieredRequest, TieredResolver,
};
use super::index::TieredProgram;
use super::query::{DescribeCell, RateResult};
use super::{Prepared, RateEngine};

pub const DEFAULT_SCR_SEASON: &str = "summer";
pub const DEFAULT_SERVICE_CLASS: &str = "Secondary";
pub const DEFAULT_ERS_SEASON: &str = "Jun-Sep";
pub const DEFAULT_ERS_TIME_PERIOD: &str = "Time Period 4 (4pm-7pm)";
pub const DEFAULT_MONTH: &str = "Jul";
pub const DEFAULT_PRICE_TYPE: &str = "capacity";
pub const DEFAULT_TIME_WINDOW: &str = "24-7";
pub const WEIGHTED_AVERAGE: &str = "weighted-average";

impl<T: TieredResolver, C: ConnectedSolutionsResolver> RateEngine<T, C> {
    pub(super) fn resolve_isone(&self, query: &Prepared<'_>) -> RateResult {
        let rates = &self.book.isone_rates;
        let product = query.product;

        if product == "ADCR" {
            let Some(zone) = query.zone else {
                return needs(product, "zone");
            };
            let year = query.year();
            return cell(
                rates.adcr.get(zone).and_then(|years| years.get(year)),
                format!("isoneRates.adcr.{zone}.{year}"),
            );
        }
        if product.contains("OPHR") || product.contains("Solar") {
            let Some(zone) = query.zone else {
                return needs(product, "zone");
            };
            return self.ophr_rate(zone, product, query.year());
        }
        if product.contains("Dispatch") {
            let request = ConnectedSolutionsRequest {
                utility: query.utility(),
                dispatch: product,
                year: query.year(),
            };
            return self.connected.resolve(&request, rates);
        }
        if product == "Clean Peak" {
            if query.utility().is_none() {
                return needs(product, "utility");
            }
            let year = query.year();
            return cell(rates.clean_peak.get(year), format!("isoneRates.cleanPeak.{year}"));
        }

        unsupported(Region::Isone, product)
    }

    pub(super) fn resolve_nyiso(&self, query: &Prepared<'_>) -> RateResult {
        let rates = &self.book.nyiso_rates;
        let product = query.product;

        match product {
            "SCR" | "ICAP/SCR" => {
                let Some(zone) = query.zone else {
                    return needs(product, "zone");
                };
                let season = query.field(&query.query.season).unwrap_or(DEFAULT_SCR_SEASON);
                self.scr_rate(zone, season)
            }
            "CSRP" => self.tiered_rate(TieredProgram::Csrp, query),
            "DLRP" => self.tiered_rate(TieredProgram::Dlrp, query),
            "TDM" => self.tiered_rate(TieredProgram::Tdm, query),
            "Capacity Adjustment" => {
                let Some(zone) = query.zone else {
                    return needs(product, "zone");
                };
                cell(rates.cap_adj_factors.get(zone), format!("nyisoRates.capAdjFactors.{zone}"))
            }
            _ => unsupported(Region::Nyiso, product),
        }
    }

    pub(super) fn resolve_ercot(&self, query: &Prepared<'_>) -> RateResult {
        let rates = &self.book.ercot_rates;
        let product = query.product;

        match product {
            "4CP" | "CapTag4CP" => {
                let Some(utility) = query.utility() else {
                    return needs(product, "utility");
                };
                let class =
                    query.field(&query.query.service_class).unwrap_or(DEFAULT_SERVICE_CLASS);
                described(
                    rates.captag4cp.get(utility).and_then(|classes| classes.get(class)),
                    format!("ercotRates.captag4cp.{utility}.{class}"),
                )
            }
            "ERS" => {
                if query.field(&query.query.price_type) == Some(WEIGHTED_AVERAGE) {
                    return self.weighted_ers_average();
                }
                let season = query.field(&query.query.season).unwrap_or(DEFAULT_ERS_SEASON);
                let period =
                    query.field(&query.query.time_period).unwrap_or(DEFAULT_ERS_TIME_PERIOD);
                described(
                    rates.ers.seasons.get(season).and_then(|periods| periods.get(period)),
                    format!("ercotRates.ers.seasons.{season}.{period}.defaultPrice"),
                )
            }
            "LR-RRS" => monthly(&rates.lr_rrs, "lrRrs", query),
            "ECRS" => monthly(&rates.ecrs, "ecrs", query),
            _ => unsupported(Region::Ercot, product),
        }
    }

    pub(super) fn resolve_pjm(&self, query: &Prepared<'_>) -> RateResult {
        let rates = &self.book.pjm_rates;
        let product = query.product;

        match product {
            "EC" | "Emergency Capacity" => {
                let price_type = query.field(&query.query.price_type).unwrap_or(DEFAULT_PRICE_TYPE);
                let charge = query.zone.and_then(|zone| rates.ec.zones.get(zone));
                match (charge, price_type) {
                    (Some(charge), "capacity") => RateResult::found(charge.capacity),
                    (Some(charge), "excess") => RateResult::found(charge.excess),
                    (None, "excess") => RateResult::found(rates.ec.default_excess),
                    (_, "capacity") => RateResult::missing(ResolutionFailure::not_found(format!(
                        "pjmRates.ec.zones.{}.capacity",
                        query.zone.unwrap_or_default()
                    ))),
                    (_, other) => RateResult::missing(ResolutionFailure::invalid(format!(
                        "priceType `{other}` is not one of capacity, excess"
                    ))),
                }
            }
            "syncReserve" | "Sync Reserve" => {
                let window = query.field(&query.query.time_window).unwrap_or(DEFAULT_TIME_WINDOW);
                cell(rates.sync_reserve.get(window), format!("pjmRates.syncReserve.{window}"))
            }
            "ELCC" => {
                let Some(year) = query.field(&query.query.year) else {
                    return needs(product, "year");
                };
                cell(rates.elcc.get(year), format!("pjmRates.elcc.{year}"))
            }
            _ => unsupported(Region::Pjm, product),
        }
    }

    /// Program-year tables of the smaller markets, keyed by exact product label.
    pub(super) fn flat_rate(&self, region: Region, product: &str, year: &str) -> RateResult {
        let table: Option<(&YearTable, &str)> = match (region, product) {
            (Region::Aps, "Peak Solutions Day Ahead") => Some((
                &self.book.aps_rates.peak_solutions.day_ahead_capacity,
                "apsRates.peakSolutions.dayAheadCapacity",
            )),
            (Region::Aps, "Peak Solutions Day Of") => Some((
                &self.book.aps_rates.peak_solutions.day_of_capacity,
                "apsRates.peakSolutions.dayOfCapacity",
            )),
            (Region::Aps, "Peak Solutions Energy") => Some((
                &self.book.aps_rates.peak_solutions.energy,
                "apsRates.peakSolutions.energy",
            )),
            (Region::Mdu, "DRR Peak Capacity") => {
                Some((&self.book.mdu_rates.drr.peak_capacity, "mduRates.drr.peakCapacity"))
            }
            (Region::Mdu, "DRR Off-Peak Capacity") => {
                Some((&self.book.mdu_rates.drr.off_peak_capacity, "mduRates.drr.offPeakCapacity"))
            }
            (Region::Mdu, "DRR Energy") => {
                Some((&self.book.mdu_rates.drr.energy, "mduRates.drr.energy"))
            }
            (Region::Miso, "LMR Capacity") => {
                Some((&self.book.miso_rates.lmr.capacity, "misoRates.lmr.capacity"))
            }
            _ => None,
        };

        match table {
            Some((years, prefix)) => cell(years.get(year), format!("{prefix}.{year}")),
            None => unsupported(region, product),
        }
    }

    pub(super) fn ophr_rate(&self, zone: &str, product: &str, year: &str) -> RateResult {
        cell(
            self.ophr.get(zone, product).and_then(|years| years.get(year)),
            format!("isoneRates.ophr[{zone}, {product}].{year}"),
        )
    }

    pub(super) fn scr_rate(&self, zone: &str, season: &str) -> RateResult {
        cell(
            self.book.nyiso_rates.scr.get(zone).and_then(|seasons| seasons.get(season)),
            format!("nyisoRates.scr.{zone}.{season}"),
        )
    }

    fn tiered_rate(&self, program: TieredProgram, query: &Prepared<'_>) -> RateResult {
        let request = TieredRequest {
            program,
            zone: query.zone,
            utility: query.utility(),
            tier: query.field(&query.query.tier),
        };
        self.tiered.resolve(&request, &self.book.nyiso_rates, self.utility_index())
    }

    /// Hours-weighted mean of every ERS period's default price.
    ///
    /// Periods missing either field are skipped. Zero total hours is a degenerate schedule,
    /// not a zero rate.
    pub fn weighted_ers_average(&self) -> RateResult {
        let seasons = &self.book.ercot_rates.ers.seasons;
        if seasons.is_empty() {
            return RateResult::missing(ResolutionFailure::not_found("ercotRates.ers.seasons"));
        }

        let mut revenue = 0.0;
        let mut hours = 0.0;
        for (season, periods) in seasons {
            for (period, pricing) in periods {
                match (pricing.hours, pricing.default_price) {
                    (Some(period_hours), Some(price)) => {
                        revenue += period_hours * price;
                        hours += period_hours;
                    }
                    _ => warn!(
                        event_name = "rates.ers.period_skipped",
                        season = %season,
                        period = %period,
                        "ERS period lacks hours or price; left out of the average"
                    ),
                }
            }
        }

        if hours > 0.0 {
            RateResult::found(revenue / hours)
        } else {
            RateResult::missing(ResolutionFailure::degenerate("ERS schedule has zero total hours"))
        }
    }
}

fn monthly(schedule: &MonthlySchedule, key: &str, query: &Prepared<'_>) -> RateResult {
    let month = query.field(&query.query.month).unwrap_or(DEFAULT_MONTH);
    described(
        schedule.monthly_pricing.get(month),
        format!("ercotRates.{key}.monthlyPricing.{month}"),
    )
}

pub(super) fn cell(rate: Option<&f64>, path: String) -> RateResult {
    match rate {
        Some(rate) => RateResult::found(*rate),
        None => RateResult::missing(ResolutionFailure::not_found(path)),
    }
}

fn described<D: DescribeCell>(entry: Option<&D>, path: String) -> RateResult {
    match entry.and_then(|entry| entry.primary().map(|value| (value, entry.descriptor()))) {
        Some((value, descriptor)) => RateResult::described(value, descriptor),
        None => RateResult::missing(ResolutionFailure::not_found(path)),
    }
}

fn needs(product: &str, field: &str) -> RateResult {
    RateResult::missing(ResolutionFailure::invalid(format!("{product} lookups need a {field}")))
}

pub(super) fn unsupported(region: Region, product: &str) -> RateResult {
    RateResult::missing(ResolutionFailure::invalid(format!(
        "unsupported product `{product}` for region {region}"
    )))
}
