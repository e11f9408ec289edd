pub mod api;
pub mod delegates;
pub mod index;
mod markets;
pub mod query;

use std::sync::OnceLock;

use tracing::{debug, warn};

use crate::errors::ResolutionFailure;
use crate::normalize::{AliasError, AliasMap};
use crate::rates::RateBook;
use crate::region::{Region, RegionMembership};

use self::{
    delegates::{
        ConnectedSolutionsResolver, TableConnectedSolutionsResolver, TableTieredResolver,
        TieredResolver,
    },
    index::{OphrIndex, UtilityIndex},
    query::{RateQuery, RateResult},
};

pub const DEFAULT_YEAR: &str = "25-26";

/// Resolves rate queries against one immutable [`RateBook`].
///
/// The engine never mutates its book. Reloading means building a new engine and swapping it
/// in, so lookups can run from many threads at once.
pub struct RateEngine<T = TableTieredResolver, C = TableConnectedSolutionsResolver> {
    book: RateBook,
    aliases: AliasMap,
    membership: RegionMembership,
    ophr: OphrIndex,
    utility_index: OnceLock<UtilityIndex>,
    tiered: T,
    connected: C,
}

impl<T, C> RateEngine<T, C> {
    pub fn new(
        book: RateBook,
        aliases: AliasMap,
        membership: RegionMembership,
        tiered: T,
        connected: C,
    ) -> Self {
        let ophr = OphrIndex::build(&book.isone_rates.ophr);
        Self {
            book,
            aliases,
            membership,
            ophr,
            utility_index: OnceLock::new(),
            tiered,
            connected,
        }
    }

    pub fn book(&self) -> &RateBook {
        &self.book
    }

    pub fn aliases(&self) -> &AliasMap {
        &self.aliases
    }

    pub fn membership(&self) -> &RegionMembership {
        &self.membership
    }

    /// Built on first use; concurrent first callers race safely and all observe one index.
    pub(crate) fn utility_index(&self) -> &UtilityIndex {
        self.utility_index.get_or_init(|| UtilityIndex::build(&self.book.nyiso_rates))
    }
}

impl RateEngine {
    /// Uses the book's own alias and membership tables when it carries them, the built-in
    /// ones otherwise.
    pub fn from_book(book: RateBook) -> Result<Self, AliasError> {
        let aliases = match &book.aliases {
            Some(map) => AliasMap::new(map.iter().map(|(alias, canonical)| (alias, canonical.clone())))?,
            None => AliasMap::default(),
        };
        let membership = book.region_membership.clone().unwrap_or_default();

        Ok(Self::new(book, aliases, membership, TableTieredResolver, TableConnectedSolutionsResolver))
    }
}

/// A query with its discriminants trimmed and its utility normalized.
pub(crate) struct Prepared<'q> {
    pub query: &'q RateQuery,
    pub product: &'q str,
    pub zone: Option<&'q str>,
    pub utility: Option<String>,
}

impl<'q> Prepared<'q> {
    pub fn year(&self) -> &'q str {
        self.field(&self.query.year).unwrap_or(DEFAULT_YEAR)
    }

    pub fn field(&self, value: &'q Option<String>) -> Option<&'q str> {
        present(value)
    }

    pub fn utility(&self) -> Option<&str> {
        self.utility.as_deref()
    }
}

pub(crate) fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

impl<T: TieredResolver, C: ConnectedSolutionsResolver> RateEngine<T, C> {
    /// Resolves one query to a rate.
    ///
    /// Region comes from the query when given, otherwise from the zone (or the utility when
    /// there is no zone). Misses never surface as zero; they carry a diagnostic instead.
    pub fn resolve(&self, query: &RateQuery) -> RateResult {
        let product = query.product.trim();
        let zone = present(&query.zone);
        let utility = present(&query.utility).map(|utility| self.aliases.normalize(utility));

        let result = if product.is_empty() {
            RateResult::missing(ResolutionFailure::invalid("product is required"))
        } else {
            match self.region_for(query, zone, utility.as_deref()) {
                Ok(region) => {
                    let prepared = Prepared { query, product, zone, utility: utility.clone() };
                    self.resolve_in(region, &prepared)
                }
                Err(failure) => RateResult::missing(failure),
            }
        };

        self.report("resolve", product, zone, result)
    }

    fn region_for(
        &self,
        query: &RateQuery,
        zone: Option<&str>,
        utility: Option<&str>,
    ) -> Result<Region, ResolutionFailure> {
        match present(&query.region) {
            Some(raw) => Region::parse(raw)
                .ok_or_else(|| ResolutionFailure::invalid(format!("unknown region `{raw}`"))),
            None => Ok(self.membership.resolve_region(zone.or(utility).unwrap_or_default())),
        }
    }

    fn resolve_in(&self, region: Region, query: &Prepared<'_>) -> RateResult {
        match region {
            Region::Isone => self.resolve_isone(query),
            Region::Nyiso => self.resolve_nyiso(query),
            Region::Ercot => self.resolve_ercot(query),
            Region::Pjm => self.resolve_pjm(query),
            Region::Aps | Region::Mdu | Region::Miso => {
                self.flat_rate(region, query.product, query.year())
            }
        }
    }

    pub(crate) fn report(
        &self,
        entry_point: &'static str,
        product: &str,
        zone: Option<&str>,
        result: RateResult,
    ) -> RateResult {
        match &result.diagnostic {
            Some(failure) => report_miss(entry_point, product, zone, failure),
            None => debug!(
                event_name = "rates.resolve.found",
                entry_point,
                product,
                zone = zone.unwrap_or_default(),
                value = result.value.unwrap_or_default(),
                "rate resolved"
            ),
        }
        result
    }
}

pub(crate) fn report_miss(
    entry_point: &'static str,
    product: &str,
    zone: Option<&str>,
    failure: &ResolutionFailure,
) {
    warn!(
        event_name = "rates.resolve.not_found",
        entry_point,
        product,
        zone = zone.unwrap_or_default(),
        failure_kind = failure.kind(),
        reason = %failure,
        "rate lookup did not resolve"
    );
}
