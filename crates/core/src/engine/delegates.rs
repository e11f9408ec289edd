//! Injected lookups for the tiered NYISO programs and ISO-NE Connected Solutions.
//!
//! The engine hands these delegates the table and the request. The table-backed defaults do a
//! plain lookup; callers can swap in another implementation without touching dispatch.

use crate::errors::ResolutionFailure;
use crate::rates::schema::{IsoNeRates, NyisoRates};

use super::index::{TieredProgram, UtilityIndex};
use super::query::RateResult;

pub const SELECT_TIER: &str = "Select";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TieredRequest<'a> {
    pub program: TieredProgram,
    pub zone: Option<&'a str>,
    /// Already normalized.
    pub utility: Option<&'a str>,
    pub tier: Option<&'a str>,
}

pub trait TieredResolver: Send + Sync {
    fn resolve(
        &self,
        request: &TieredRequest<'_>,
        rates: &NyisoRates,
        index: &UtilityIndex,
    ) -> RateResult;
}

/// Looks up `table[zone][utility][tier]`, matching the utility without regard to case.
///
/// An absent or unknown tier falls back to the `Select` tier.
#[derive(Clone, Copy, Debug, Default)]
pub struct TableTieredResolver;

impl TieredResolver for TableTieredResolver {
    fn resolve(
        &self,
        request: &TieredRequest<'_>,
        rates: &NyisoRates,
        index: &UtilityIndex,
    ) -> RateResult {
        let program = request.program;
        let Some(zone) = request.zone else {
            return RateResult::missing(ResolutionFailure::invalid(format!(
                "{} lookups need a zone",
                program.as_str()
            )));
        };
        let Some(utility) = request.utility else {
            return RateResult::missing(ResolutionFailure::invalid(format!(
                "{} lookups need a utility",
                program.as_str()
            )));
        };

        let prefix = format!("nyisoRates.{}.{zone}", program.store_key());
        let tiers = index
            .lookup(program, zone, utility)
            .and_then(|key| program.table(rates).get(zone)?.get(key));
        let Some(tiers) = tiers else {
            return RateResult::missing(ResolutionFailure::not_found(format!("{prefix}.{utility}")));
        };

        let tier = request.tier.unwrap_or(SELECT_TIER);
        match tiers.get(tier).or_else(|| tiers.get(SELECT_TIER)) {
            Some(rate) => RateResult::found(*rate),
            None => RateResult::missing(ResolutionFailure::not_found(format!(
                "{prefix}.{utility}.{SELECT_TIER}"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectedSolutionsRequest<'a> {
    pub utility: Option<&'a str>,
    pub dispatch: &'a str,
    pub year: &'a str,
}

pub trait ConnectedSolutionsResolver: Send + Sync {
    fn resolve(&self, request: &ConnectedSolutionsRequest<'_>, rates: &IsoNeRates) -> RateResult;
}

/// Looks up `connectedSolutions[utility][dispatch][year]`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TableConnectedSolutionsResolver;

impl ConnectedSolutionsResolver for TableConnectedSolutionsResolver {
    fn resolve(&self, request: &ConnectedSolutionsRequest<'_>, rates: &IsoNeRates) -> RateResult {
        let Some(utility) = request.utility else {
            return RateResult::missing(ResolutionFailure::invalid(
                "Connected Solutions lookups need a utility",
            ));
        };

        let rate = rates
            .connected_solutions
            .get(utility)
            .and_then(|dispatches| dispatches.get(request.dispatch))
            .and_then(|years| years.get(request.year));
        match rate {
            Some(rate) => RateResult::found(*rate),
            None => RateResult::missing(ResolutionFailure::not_found(format!(
                "isoneRates.connectedSolutions.{utility}.{}.{}",
                request.dispatch, request.year
            ))),
        }
    }
}
