use ratebook_core::{RateBook, RateEngine, RateQuery, Region, ResolutionFailure};
use serde_json::Value;

const STORE: &str = include_str!("../../../data/rate-store.json");

fn engine() -> RateEngine {
    let book = RateBook::from_json(STORE).expect("bundled rate store decodes");
    RateEngine::from_book(book).expect("bundled store has no alias overrides")
}

#[test]
fn isone_adcr_for_explicit_year() {
    let result = engine().resolve(&RateQuery::new("ADCR").with_zone("CT").with_year("27-28"));

    assert_eq!(result.value, Some(3.58));
}

#[test]
fn isone_year_defaults_to_current_program_year() {
    let engine = engine();

    let defaulted = engine.resolve(&RateQuery::new("OPHR All Year").with_zone("CT"));
    let explicit =
        engine.resolve(&RateQuery::new("OPHR All Year").with_zone("CT").with_year("25-26"));

    assert_eq!(defaulted.value, Some(2.64));
    assert_eq!(defaulted, explicit);
}

#[test]
fn every_bundled_isone_cell_resolves_to_its_stored_value() {
    let engine = engine();
    let document: Value = serde_json::from_str(STORE).expect("bundled store is JSON");
    let isone = &document["isoneRates"];
    let mut checked = 0;

    let mut expect = |query: RateQuery, stored: &Value| {
        let stored = stored.as_f64().expect("stored cell is numeric");
        let query = query.with_region("isone");
        let result = engine.resolve(&query);
        assert_eq!(result.value, Some(stored), "{query:?} -> {:?}", result.diagnostic);
        checked += 1;
    };

    for (zone, years) in isone["adcr"].as_object().expect("adcr table") {
        for (year, stored) in years.as_object().expect("adcr years") {
            expect(RateQuery::new("ADCR").with_zone(zone.as_str()).with_year(year.as_str()), stored);
        }
    }

    for row in isone["ophr"].as_array().expect("ophr rows") {
        let row = row.as_object().expect("ophr row");
        let zone = row["zone"].as_str().expect("ophr zone");
        let product = row["product"].as_str().expect("ophr product");
        for (year, stored) in row.iter().filter(|(key, _)| *key != "zone" && *key != "product") {
            expect(RateQuery::new(product).with_zone(zone).with_year(year.as_str()), stored);
        }
    }

    for (utility, dispatches) in isone["connectedSolutions"].as_object().expect("cs table") {
        for (dispatch, years) in dispatches.as_object().expect("cs dispatches") {
            for (year, stored) in years.as_object().expect("cs years") {
                let query = RateQuery::new(dispatch.as_str())
                    .with_utility(utility.as_str())
                    .with_year(year.as_str());
                expect(query, stored);
            }
        }
    }

    assert!(checked > 300, "only {checked} cells walked");
}

#[test]
fn nyiso_scr_uses_requested_season() {
    let engine = engine();

    let winter = engine.resolve(&RateQuery::new("SCR").with_zone("NYC").with_season("winter"));
    let summer = engine.resolve(&RateQuery::new("ICAP/SCR").with_zone("NYC"));

    assert_eq!(winter.value, Some(9.25));
    assert_eq!(summer.value, Some(15.0));
}

#[test]
fn ercot_4cp_returns_charge_descriptor() {
    let result = engine().resolve(
        &RateQuery::new("4CP")
            .with_region("ercot")
            .with_utility("AEP Texas")
            .with_service_class("Primary"),
    );

    assert_eq!(result.value, Some(5.76729));
    assert_eq!(result.descriptor_number("monthlyCharge"), Some(5.76729));
    assert_eq!(result.descriptor_number("annualMultiplier"), Some(69207.5));
}

#[test]
fn ercot_4cp_defaults_to_secondary_service() {
    let result =
        engine().resolve(&RateQuery::new("CapTag4CP").with_region("ERCOT").with_utility("AEP Texas"));

    assert_eq!(result.value, Some(5.884572));
}

#[test]
fn ercot_reserves_default_to_july() {
    let engine = engine();

    let ers = engine.resolve(&RateQuery::new("ERS").with_region("ercot"));
    let lr_rrs = engine.resolve(&RateQuery::new("LR-RRS").with_region("ercot"));
    let ecrs = engine.resolve(&RateQuery::new("ECRS").with_region("ercot").with_month("Jan"));

    assert_eq!(ers.value, Some(25.47));
    assert_eq!(ers.descriptor_number("hours"), Some(252.0));
    assert_eq!(lr_rrs.value, Some(35.0));
    assert_eq!(lr_rrs.descriptor_number("proration"), Some(0.5));
    assert_eq!(ecrs.value, Some(20.0));
}

#[test]
fn connected_solutions_dispatch_rate() {
    let result = engine().resolve(
        &RateQuery::new("Targeted Dispatch")
            .with_zone("RI")
            .with_utility("RI Energy")
            .with_year("25-26"),
    );

    assert_eq!(result.value, Some(35.0));
}

#[test]
fn stored_zero_is_found_not_missing() {
    let result = engine().resolve(
        &RateQuery::new("Daily Dispatch").with_zone("NH").with_utility("Unitil - NH"),
    );

    assert_eq!(result.value, Some(0.0));
    assert!(result.diagnostic.is_none());
}

#[test]
fn absent_combination_is_missing_not_zero() {
    let result = engine().resolve(&RateQuery::new("ADCR").with_zone("CT").with_year("99-00"));

    assert_eq!(result.value, None);
    assert_eq!(result.diagnostic, Some(ResolutionFailure::not_found("isoneRates.adcr.CT.99-00")));
}

#[test]
fn tiered_lookup_matches_utility_case_insensitively() {
    let engine = engine();

    let upper = engine.resolve(
        &RateQuery::new("DLRP").with_zone("NYC").with_utility("CONED").with_tier("2"),
    );
    let padded = engine.resolve(
        &RateQuery::new("DLRP").with_zone("NYC").with_utility("  coned ").with_tier("2"),
    );

    assert_eq!(upper.value, Some(25.0));
    assert_eq!(padded, upper);
}

#[test]
fn unknown_tier_equals_select_tier() {
    let engine = engine();

    let select =
        engine.resolve(&RateQuery::new("DLRP").with_zone("NYC").with_utility("ConEd").with_tier("Select"));
    let unknown =
        engine.resolve(&RateQuery::new("DLRP").with_zone("NYC").with_utility("ConEd").with_tier("Gold"));
    let omitted = engine.resolve(&RateQuery::new("DLRP").with_zone("NYC").with_utility("ConEd"));

    assert_eq!(select.value, Some(18.0));
    assert_eq!(unknown, select);
    assert_eq!(omitted, select);
}

#[test]
fn tdm_rate_shortcut_matches_resolve() {
    let engine = engine();

    let shortcut = engine.tdm_rate("ROS", "chge", None);
    let full = engine.resolve(&RateQuery::new("TDM").with_zone("ROS").with_utility("CHGE"));

    assert_eq!(shortcut.value, Some(6.83));
    assert_eq!(shortcut, full);
}

#[test]
fn unknown_codes_resolve_against_isone() {
    let engine = engine();

    assert_eq!(engine.membership().resolve_region("XYZ"), Region::Isone);
    let result = engine.resolve(&RateQuery::new("SCR").with_zone("XYZ"));
    assert!(matches!(result.diagnostic, Some(ResolutionFailure::InvalidQuery { .. })));
}

#[test]
fn pjm_products_by_zone() {
    let engine = engine();

    let capacity = engine.resolve(&RateQuery::new("EC").with_zone("BGE"));
    let excess = engine.resolve(&RateQuery::new("EC").with_zone("BGE").with_price_type("excess"));
    let fallback =
        engine.resolve(&RateQuery::new("EC").with_region("pjm").with_price_type("excess"));
    let elcc = engine.resolve(&RateQuery::new("ELCC").with_region("pjm").with_year("2027"));
    let elcc_without_year = engine.resolve(&RateQuery::new("ELCC").with_region("pjm"));
    let sync = engine.resolve(&RateQuery::new("Sync Reserve").with_region("pjm"));

    assert_eq!(capacity.value, Some(0.46635));
    assert_eq!(excess.value, Some(0.0125));
    assert_eq!(fallback.value, Some(12.5));
    assert_eq!(elcc.value, Some(0.85));
    assert!(matches!(elcc_without_year.diagnostic, Some(ResolutionFailure::InvalidQuery { .. })));
    assert_eq!(sync.value, Some(0.0028));
}

#[test]
fn smaller_markets_use_lower_case_sentinels() {
    let engine = engine();

    assert_eq!(engine.rate_by_zone("aps", "Peak Solutions Day Of", None).value, Some(10.0));
    assert_eq!(engine.rate_by_zone("mdu", "DRR Off-Peak Capacity", None).value, Some(2.19));
    assert_eq!(engine.rate_by_zone("MISO", "LMR Capacity", Some("30-31")).value, Some(25.0));
}

#[test]
fn weighted_ers_average_over_bundled_schedule() {
    let engine = engine();

    let average = engine.weighted_ers_average().value.expect("average");
    let via_query = engine.resolve(
        &RateQuery::new("ERS").with_region("ercot").with_price_type("weighted-average"),
    );

    assert!(average > 0.0);
    assert_eq!(via_query.value, Some(average));
}

#[test]
fn weighted_ers_average_of_synthetic_schedule() {
    let book = RateBook::from_json(
        r#"{"ercotRates":{"ers":{"seasons":{"S":{
            "A":{"hours":10,"defaultPrice":2},
            "B":{"hours":30,"defaultPrice":6},
            "C":{"defaultPrice":100}
        }}}}}"#,
    )
    .expect("valid store");
    let engine = RateEngine::from_book(book).expect("engine");

    assert_eq!(engine.weighted_ers_average().value, Some(5.0));
}

#[test]
fn weighted_ers_average_with_zero_hours_is_degenerate() {
    let book = RateBook::from_json(
        r#"{"ercotRates":{"ers":{"seasons":{"S":{"A":{"hours":0,"defaultPrice":2}}}}}}"#,
    )
    .expect("valid store");
    let engine = RateEngine::from_book(book).expect("engine");

    let result = engine.weighted_ers_average();

    assert_eq!(result.value, None);
    assert!(matches!(result.diagnostic, Some(ResolutionFailure::ComputationDegenerate { .. })));
}

#[test]
fn concurrent_lookups_agree() {
    let engine = engine();
    let expected = engine.tdm_rate("LHV", "CHGE", Some("1"));

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    (0..100).map(|_| engine.tdm_rate("LHV", "chge", Some("1"))).collect::<Vec<_>>()
                })
            })
            .collect();

        for handle in handles {
            let results = handle.join().expect("lookup thread");
            assert!(results.iter().all(|result| *result == expected));
        }
    });
}
