use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::ResolutionFailure;
use crate::rates::{CapTagCharge, EnergyRate, ErsPeriod, MonthlyReserve};

/// A structured rate lookup.
///
/// Only `product` is always needed; which other fields matter depends on the market and
/// product. Blank strings count as omitted, so defaults apply to them too.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    pub product: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<String>,
    #[serde(alias = "udc", skip_serializing_if = "Option::is_none")]
    pub utility: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_period: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_window: Option<String>,
}

impl RateQuery {
    pub fn new(product: impl Into<String>) -> Self {
        Self { product: product.into(), ..Self::default() }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    pub fn with_utility(mut self, utility: impl Into<String>) -> Self {
        self.utility = Some(utility.into());
        self
    }

    pub fn with_year(mut self, year: impl Into<String>) -> Self {
        self.year = Some(year.into());
        self
    }

    pub fn with_season(mut self, season: impl Into<String>) -> Self {
        self.season = Some(season.into());
        self
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    pub fn with_month(mut self, month: impl Into<String>) -> Self {
        self.month = Some(month.into());
        self
    }

    pub fn with_service_class(mut self, service_class: impl Into<String>) -> Self {
        self.service_class = Some(service_class.into());
        self
    }

    pub fn with_time_period(mut self, time_period: impl Into<String>) -> Self {
        self.time_period = Some(time_period.into());
        self
    }

    pub fn with_price_type(mut self, price_type: impl Into<String>) -> Self {
        self.price_type = Some(price_type.into());
        self
    }

    pub fn with_time_window(mut self, time_window: impl Into<String>) -> Self {
        self.time_window = Some(time_window.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DescriptorField {
    Number(f64),
    Text(String),
}

impl From<f64> for DescriptorField {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for DescriptorField {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// The fields of a multi-valued rate cell, keyed by their store names.
pub type Descriptor = BTreeMap<String, DescriptorField>;

/// Outcome of a lookup. `value: None` is the not-found signal; a stored zero comes back as
/// `Some(0.0)`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RateResult {
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<ResolutionFailure>,
}

impl RateResult {
    pub fn found(value: f64) -> Self {
        Self { value: Some(value), descriptor: None, diagnostic: None }
    }

    pub fn described(value: f64, descriptor: Descriptor) -> Self {
        Self { value: Some(value), descriptor: Some(descriptor), diagnostic: None }
    }

    pub fn missing(failure: ResolutionFailure) -> Self {
        Self { value: None, descriptor: None, diagnostic: Some(failure) }
    }

    pub fn is_found(&self) -> bool {
        self.value.is_some()
    }

    /// Looks up a single descriptor field, if this result carries a number there.
    pub fn descriptor_number(&self, field: &str) -> Option<f64> {
        match self.descriptor.as_ref()?.get(field)? {
            DescriptorField::Number(value) => Some(*value),
            DescriptorField::Text(_) => None,
        }
    }
}

/// A rate cell holding more than one field. `primary` is what a lookup reports as its value.
pub trait DescribeCell {
    fn primary(&self) -> Option<f64>;

    fn descriptor(&self) -> Descriptor;
}

impl DescribeCell for CapTagCharge {
    fn primary(&self) -> Option<f64> {
        Some(self.monthly_charge)
    }

    fn descriptor(&self) -> Descriptor {
        let mut fields = Descriptor::from([
            ("monthlyCharge".to_string(), self.monthly_charge.into()),
            ("annualMultiplier".to_string(), self.annual_multiplier.into()),
            ("unit".to_string(), self.unit.as_str().into()),
        ]);
        if let Some(note) = &self.note {
            fields.insert("note".to_string(), note.as_str().into());
        }
        fields
    }
}

impl DescribeCell for ErsPeriod {
    fn primary(&self) -> Option<f64> {
        self.default_price
    }

    fn descriptor(&self) -> Descriptor {
        let mut fields = Descriptor::new();
        if let Some(hours) = self.hours {
            fields.insert("hours".to_string(), hours.into());
        }
        if let Some(price) = self.default_price {
            fields.insert("defaultPrice".to_string(), price.into());
        }
        fields
    }
}

impl DescribeCell for MonthlyReserve {
    fn primary(&self) -> Option<f64> {
        Some(self.avg_price)
    }

    fn descriptor(&self) -> Descriptor {
        let mut fields = Descriptor::from([
            ("avgPrice".to_string(), self.avg_price.into()),
            ("hours".to_string(), self.hours.into()),
        ]);
        if let Some(proration) = self.proration {
            fields.insert("proration".to_string(), proration.into());
        }
        fields
    }
}

impl DescribeCell for EnergyRate {
    fn primary(&self) -> Option<f64> {
        Some(self.energy_rate)
    }

    fn descriptor(&self) -> Descriptor {
        Descriptor::from([
            ("hours".to_string(), self.hours.into()),
            ("energyRate".to_string(), self.energy_rate.into()),
            ("multiplier".to_string(), self.multiplier.into()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::{DescribeCell, RateQuery, RateResult};
    use crate::errors::ResolutionFailure;
    use crate::rates::CapTagCharge;

    #[test]
    fn query_accepts_udc_as_utility_alias() {
        let query: RateQuery =
            serde_json::from_str(r#"{"zone":"NYC","product":"CSRP","udc":"coned"}"#)
                .expect("valid query");

        assert_eq!(query.utility.as_deref(), Some("coned"));
        assert_eq!(query.region, None);
    }

    #[test]
    fn query_fields_use_camel_case() {
        let query = RateQuery::new("4CP").with_service_class("Primary").with_time_window("24-7");
        let json = serde_json::to_value(&query).expect("serialize");

        assert_eq!(json["serviceClass"], "Primary");
        assert_eq!(json["timeWindow"], "24-7");
        assert!(json.get("season").is_none());
    }

    #[test]
    fn not_found_serializes_value_as_null() {
        let result = RateResult::missing(ResolutionFailure::not_found("isoneRates.cleanPeak.99-00"));
        let json = serde_json::to_value(&result).expect("serialize");

        assert!(json["value"].is_null());
        assert_eq!(json["diagnostic"]["kind"], "not_found");
        assert!(json.get("descriptor").is_none());
    }

    #[test]
    fn zero_is_a_found_value() {
        let result = RateResult::found(0.0);

        assert!(result.is_found());
        assert_eq!(serde_json::to_value(&result).expect("serialize")["value"], 0.0);
    }

    #[test]
    fn cap_tag_descriptor_carries_note_only_when_present() {
        let charge = CapTagCharge {
            monthly_charge: 6.54591,
            annual_multiplier: 78550.93,
            unit: "$/kVA-month".to_string(),
            note: Some("billed in kVA".to_string()),
        };
        let result = RateResult::described(6.54591, charge.descriptor());

        assert_eq!(result.descriptor_number("annualMultiplier"), Some(78550.93));
        assert_eq!(result.descriptor_number("unit"), None);
        assert_eq!(charge.descriptor().len(), 4);
    }
}
