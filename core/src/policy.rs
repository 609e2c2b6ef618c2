use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Carrier value written while a document is still being extracted.
pub const PENDING_EXTRACTION: &str = "Pending extraction...";

/// Sentinel strings meaning "not populated yet". Never diffed against.
pub const PLACEHOLDER_VALUES: [&str; 2] = [PENDING_EXTRACTION, "TBD"];

pub fn is_placeholder(value: &str) -> bool {
    PLACEHOLDER_VALUES.contains(&value)
}

/// Raw extraction output keyed by field name. Keys may be missing.
pub type Extraction = BTreeMap<String, Value>;

/// Policy fields compared on every new extraction, in detection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrackedField {
    Carrier,
    PolicyNumber,
    PolicyType,
    Scope,
    CoverageAmount,
    Deductible,
    PremiumAmount,
    RenewalDate,
}

impl TrackedField {
    pub const ALL: [TrackedField; 8] = [
        TrackedField::Carrier,
        TrackedField::PolicyNumber,
        TrackedField::PolicyType,
        TrackedField::Scope,
        TrackedField::CoverageAmount,
        TrackedField::Deductible,
        TrackedField::PremiumAmount,
        TrackedField::RenewalDate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TrackedField::Carrier => "carrier",
            TrackedField::PolicyNumber => "policy_number",
            TrackedField::PolicyType => "policy_type",
            TrackedField::Scope => "scope",
            TrackedField::CoverageAmount => "coverage_amount",
            TrackedField::Deductible => "deductible",
            TrackedField::PremiumAmount => "premium_amount",
            TrackedField::RenewalDate => "renewal_date",
        }
    }

    /// Wording used when talking to the policyholder about this field.
    pub fn label(self) -> &'static str {
        match self {
            TrackedField::PremiumAmount => "premium",
            TrackedField::CoverageAmount => "coverage limit",
            TrackedField::Deductible => "deductible",
            TrackedField::Carrier => "insurance carrier",
            TrackedField::RenewalDate => "renewal date",
            TrackedField::PolicyType => "policy type",
            TrackedField::PolicyNumber => "policy number",
            TrackedField::Scope => "scope",
        }
    }

    fn is_amount(self) -> bool {
        matches!(
            self,
            TrackedField::CoverageAmount | TrackedField::Deductible | TrackedField::PremiumAmount
        )
    }
}

impl fmt::Display for TrackedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored string did not match any known variant.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for TrackedField {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrackedField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| UnknownValue {
                kind: "field",
                value: s.to_string(),
            })
    }
}

/// Read-only view of a policy row as the engine sees it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PolicySnapshot {
    pub id: Uuid,
    pub policy_type: Option<String>,
    pub carrier: Option<String>,
    pub policy_number: Option<String>,
    pub scope: Option<String>,
    pub coverage_amount: Option<Decimal>,
    pub deductible: Option<Decimal>,
    pub premium_amount: Option<Decimal>,
    pub renewal_date: Option<NaiveDate>,
    pub created_at: Option<DateTime<Utc>>,
}

impl PolicySnapshot {
    /// Current value of a tracked field, in the same JSON shape an extraction uses.
    pub fn tracked_value(&self, field: TrackedField) -> Value {
        match field {
            TrackedField::Carrier => text_value(&self.carrier),
            TrackedField::PolicyNumber => text_value(&self.policy_number),
            TrackedField::PolicyType => text_value(&self.policy_type),
            TrackedField::Scope => text_value(&self.scope),
            TrackedField::CoverageAmount => amount_value(self.coverage_amount),
            TrackedField::Deductible => amount_value(self.deductible),
            TrackedField::PremiumAmount => amount_value(self.premium_amount),
            TrackedField::RenewalDate => self
                .renewal_date
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null),
        }
    }

    /// Lower-cased policy type, empty when unknown.
    pub fn normalized_type(&self) -> String {
        self.policy_type
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_lowercase()
    }

    pub fn is_pending(&self) -> bool {
        self.carrier.as_deref() == Some(PENDING_EXTRACTION)
    }
}

fn text_value(value: &Option<String>) -> Value {
    value.clone().map(Value::String).unwrap_or(Value::Null)
}

/// Amounts compare as JSON numbers without trailing zeros, so a stored `1000.00`
/// and an extracted `1000` stringify the same.
fn amount_value(value: Option<Decimal>) -> Value {
    let Some(amount) = value else {
        return Value::Null;
    };
    let text = amount.normalize().to_string();
    match text.parse::<serde_json::Number>() {
        Ok(number) => Value::Number(number),
        Err(_) => Value::String(text),
    }
}

/// An extraction value that could not be normalised into its column type.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{field}: {message}")]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub received: Value,
}

/// Typed tracked-field values from one extraction. `None` means the key was absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyRevision {
    pub carrier: Option<String>,
    pub policy_number: Option<String>,
    pub policy_type: Option<String>,
    pub scope: Option<String>,
    pub coverage_amount: Option<Decimal>,
    pub deductible: Option<Decimal>,
    pub premium_amount: Option<Decimal>,
    pub renewal_date: Option<NaiveDate>,
}

impl PolicyRevision {
    /// Normalise raw extraction output. Unknown keys are ignored; null and blank
    /// values count as absent.
    pub fn from_extraction(raw: &Extraction) -> Result<Self, FieldError> {
        let mut revision = PolicyRevision::default();
        for field in TrackedField::ALL {
            let Some(value) = raw.get(field.as_str()) else {
                continue;
            };
            match field {
                TrackedField::Carrier => revision.carrier = parse_text(field, value)?,
                TrackedField::PolicyNumber => revision.policy_number = parse_text(field, value)?,
                TrackedField::PolicyType => {
                    revision.policy_type = parse_text(field, value)?.map(|t| t.to_lowercase())
                }
                TrackedField::Scope => revision.scope = parse_text(field, value)?,
                TrackedField::CoverageAmount => {
                    revision.coverage_amount = parse_amount(field, value)?
                }
                TrackedField::Deductible => revision.deductible = parse_amount(field, value)?,
                TrackedField::PremiumAmount => {
                    revision.premium_amount = parse_amount(field, value)?
                }
                TrackedField::RenewalDate => revision.renewal_date = parse_date(field, value)?,
            }
        }
        Ok(revision)
    }

    /// Canonical extraction mapping fed to the delta detector.
    pub fn to_extraction(&self) -> Extraction {
        let as_snapshot = PolicySnapshot {
            carrier: self.carrier.clone(),
            policy_number: self.policy_number.clone(),
            policy_type: self.policy_type.clone(),
            scope: self.scope.clone(),
            coverage_amount: self.coverage_amount,
            deductible: self.deductible,
            premium_amount: self.premium_amount,
            renewal_date: self.renewal_date,
            ..PolicySnapshot::default()
        };
        TrackedField::ALL
            .into_iter()
            .filter_map(|field| {
                let value = as_snapshot.tracked_value(field);
                (!value.is_null()).then(|| (field.as_str().to_string(), value))
            })
            .collect()
    }

    /// Stored policy after this revision. Provided values win; a field the extraction
    /// left out keeps its stored value even though a `removed` delta is recorded for it.
    pub fn apply_to(&self, snapshot: &PolicySnapshot) -> PolicySnapshot {
        fn pick<T: Clone>(new: &Option<T>, old: &Option<T>) -> Option<T> {
            new.as_ref().or(old.as_ref()).cloned()
        }

        PolicySnapshot {
            carrier: pick(&self.carrier, &snapshot.carrier),
            policy_number: pick(&self.policy_number, &snapshot.policy_number),
            policy_type: pick(&self.policy_type, &snapshot.policy_type),
            scope: pick(&self.scope, &snapshot.scope),
            coverage_amount: pick(&self.coverage_amount, &snapshot.coverage_amount),
            deductible: pick(&self.deductible, &snapshot.deductible),
            premium_amount: pick(&self.premium_amount, &snapshot.premium_amount),
            renewal_date: pick(&self.renewal_date, &snapshot.renewal_date),
            id: snapshot.id,
            created_at: snapshot.created_at,
        }
    }
}

fn field_error(field: TrackedField, message: impl Into<String>, received: &Value) -> FieldError {
    FieldError {
        field: field.as_str().to_string(),
        message: message.into(),
        received: received.clone(),
    }
}

fn parse_text(field: TrackedField, value: &Value) -> Result<Option<String>, FieldError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => {
            let trimmed = s.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Value::Number(n) => Ok(Some(n.to_string())),
        _ => Err(field_error(field, "expected a string", value)),
    }
}

/// Largest amount the `NUMERIC(14, 2)` columns hold.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0x107A_3FFF, 0x5AF3, 0, false, 2);

/// Dollars and cents from a JSON number or a string like "$1,250.40".
///
/// Sub-cent digits are rounded half away from zero, the way the column stores them.
fn parse_amount(field: TrackedField, value: &Value) -> Result<Option<Decimal>, FieldError> {
    debug_assert!(field.is_amount());
    let text = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !matches!(c, '$' | ',') && !c.is_whitespace())
                .collect();
            if cleaned.is_empty() {
                return Ok(None);
            }
            cleaned
        }
        _ => return Err(field_error(field, "expected a dollar amount", value)),
    };

    let amount = text
        .parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| field_error(field, "expected a dollar amount", value))?;

    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(field_error(field, "amount must be a non-negative number", value));
    }
    let amount = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    if amount > MAX_AMOUNT {
        return Err(field_error(field, "amount is too large", value));
    }
    Ok(Some(amount.abs()))
}

fn parse_date(field: TrackedField, value: &Value) -> Result<Option<NaiveDate>, FieldError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => {
            let head: String = s.trim().chars().take(10).collect();
            NaiveDate::parse_from_str(&head, "%Y-%m-%d")
                .map(Some)
                .map_err(|_| field_error(field, "expected a YYYY-MM-DD date", value))
        }
        _ => Err(field_error(field, "expected a YYYY-MM-DD date", value)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::deltas::{DeltaType, Severity, detect};

    fn extraction(value: Value) -> Extraction {
        serde_json::from_value(value).unwrap()
    }

    fn dollars(text: &str) -> Decimal {
        text.parse().unwrap()
    }

    #[test]
    fn tracked_fields_round_trip_through_their_names() {
        for field in TrackedField::ALL {
            assert_eq!(field.as_str().parse::<TrackedField>(), Ok(field));
        }
        assert!("nickname".parse::<TrackedField>().is_err());
    }

    #[test]
    fn placeholders_are_recognised() {
        assert!(is_placeholder("Pending extraction..."));
        assert!(is_placeholder("TBD"));
        assert!(!is_placeholder("tbd"));
    }

    #[test]
    fn revision_normalises_amount_strings_and_dates() {
        let raw = extraction(json!({
            "carrier": "  Acme Mutual ",
            "premium_amount": "$1,250.40",
            "coverage_amount": 300000,
            "deductible": 500.6,
            "renewal_date": "2027-03-01T00:00:00",
            "policy_type": "AUTO",
            "unrelated": "ignored"
        }));

        let revision = PolicyRevision::from_extraction(&raw).unwrap();
        assert_eq!(revision.carrier.as_deref(), Some("Acme Mutual"));
        assert_eq!(revision.premium_amount, Some(dollars("1250.40")));
        assert_eq!(revision.coverage_amount, Some(dollars("300000")));
        assert_eq!(revision.deductible, Some(dollars("500.6")));
        assert_eq!(revision.policy_type.as_deref(), Some("auto"));
        assert_eq!(
            revision.renewal_date,
            NaiveDate::from_ymd_opt(2027, 3, 1)
        );
    }

    #[test]
    fn revision_treats_blank_values_as_absent() {
        let raw = extraction(json!({"carrier": "  ", "deductible": "", "renewal_date": null}));
        let revision = PolicyRevision::from_extraction(&raw).unwrap();
        assert_eq!(revision, PolicyRevision::default());
        assert!(revision.to_extraction().is_empty());
    }

    #[test]
    fn revision_rejects_unparsable_amounts_with_field_name() {
        let raw = extraction(json!({"premium_amount": "call agent"}));
        let err = PolicyRevision::from_extraction(&raw).unwrap_err();
        assert_eq!(err.field, "premium_amount");
        assert_eq!(err.received, json!("call agent"));

        let raw = extraction(json!({"deductible": -5}));
        assert_eq!(
            PolicyRevision::from_extraction(&raw).unwrap_err().field,
            "deductible"
        );
    }

    #[test]
    fn revision_rounds_sub_cent_digits_and_caps_size() {
        let raw = extraction(json!({"premium_amount": "1,100.495", "deductible": "-0"}));
        let revision = PolicyRevision::from_extraction(&raw).unwrap();
        assert_eq!(revision.premium_amount, Some(dollars("1100.50")));
        assert_eq!(revision.deductible, Some(Decimal::ZERO));

        let raw = extraction(json!({"coverage_amount": "1000000000000"}));
        let err = PolicyRevision::from_extraction(&raw).unwrap_err();
        assert_eq!(err.field, "coverage_amount");
        assert_eq!(MAX_AMOUNT, dollars("999999999999.99"));
    }

    #[test]
    fn cents_reach_the_severity_ranker() {
        let stored = PolicySnapshot {
            premium_amount: Some(dollars("1000.00")),
            ..PolicySnapshot::default()
        };
        let ranked = |raw: &str| {
            let revision =
                PolicyRevision::from_extraction(&extraction(json!({"premium_amount": raw})))
                    .unwrap();
            let deltas = detect(&stored, &revision.to_extraction(), None);
            assert_eq!(deltas.len(), 1);
            (deltas[0].new_value.clone(), deltas[0].severity)
        };

        assert_eq!(ranked("1200.40"), (Some("1200.4".to_string()), Severity::Critical));
        assert_eq!(ranked("$1,100.49"), (Some("1100.49".to_string()), Severity::Warning));
        assert_eq!(ranked("1100"), (Some("1100".to_string()), Severity::Info));
        // trailing zeros on either side are not a change
        assert!(
            detect(
                &stored,
                &PolicyRevision::from_extraction(&extraction(json!({"premium_amount": "1000"})))
                    .unwrap()
                    .to_extraction(),
                None
            )
            .is_empty()
        );
    }

    #[test]
    fn revision_rejects_malformed_dates() {
        let raw = extraction(json!({"renewal_date": "03/01/2027"}));
        assert_eq!(
            PolicyRevision::from_extraction(&raw).unwrap_err().field,
            "renewal_date"
        );
    }

    #[test]
    fn canonical_extraction_uses_plain_numbers_and_iso_dates() {
        let revision = PolicyRevision {
            premium_amount: Some(dollars("1200.00")),
            deductible: Some(dollars("499.50")),
            renewal_date: NaiveDate::from_ymd_opt(2026, 12, 31),
            ..PolicyRevision::default()
        };
        let canonical = revision.to_extraction();
        assert_eq!(canonical.get("premium_amount"), Some(&json!(1200)));
        assert_eq!(canonical.get("deductible"), Some(&json!(499.5)));
        assert_eq!(canonical.get("renewal_date"), Some(&json!("2026-12-31")));
        assert_eq!(canonical.len(), 3);
    }

    #[test]
    fn apply_replaces_placeholder_and_keeps_omitted_fields() {
        let snapshot = PolicySnapshot {
            carrier: Some(PENDING_EXTRACTION.to_string()),
            policy_number: Some("TBD".to_string()),
            scope: Some("household".to_string()),
            deductible: Some(dollars("500")),
            premium_amount: Some(dollars("1000")),
            ..PolicySnapshot::default()
        };
        let revision = PolicyRevision {
            carrier: Some("Acme".to_string()),
            premium_amount: Some(dollars("1100")),
            ..PolicyRevision::default()
        };

        let revised = revision.apply_to(&snapshot);

        assert_eq!(revised.carrier.as_deref(), Some("Acme"));
        assert_eq!(revised.premium_amount, Some(dollars("1100")));
        assert_eq!(revised.scope.as_deref(), Some("household"));
        assert_eq!(revised.deductible, Some(dollars("500")));
        assert_eq!(revised.policy_number.as_deref(), Some("TBD"));
    }

    #[test]
    fn partial_extraction_reports_removals_without_wiping_the_policy() {
        let snapshot = PolicySnapshot {
            carrier: Some("Acme".to_string()),
            policy_number: Some("P-1".to_string()),
            coverage_amount: Some(dollars("300000")),
            premium_amount: Some(dollars("1000")),
            ..PolicySnapshot::default()
        };
        let revision =
            PolicyRevision::from_extraction(&extraction(json!({"premium_amount": 1050}))).unwrap();

        let deltas = detect(&snapshot, &revision.to_extraction(), None);
        let kinds: Vec<(TrackedField, DeltaType)> =
            deltas.iter().map(|d| (d.field_key, d.delta_type)).collect();
        assert_eq!(
            kinds,
            vec![
                (TrackedField::Carrier, DeltaType::Removed),
                (TrackedField::PolicyNumber, DeltaType::Removed),
                (TrackedField::CoverageAmount, DeltaType::Removed),
                (TrackedField::PremiumAmount, DeltaType::Increased),
            ]
        );

        let revised = revision.apply_to(&snapshot);
        assert_eq!(revised.carrier.as_deref(), Some("Acme"));
        assert_eq!(revised.policy_number.as_deref(), Some("P-1"));
        assert_eq!(revised.coverage_amount, Some(dollars("300000")));
        assert_eq!(revised.premium_amount, Some(dollars("1050")));

        // the next full extraction of the same document finds nothing new
        let full = extraction(json!({
            "carrier": "Acme", "policy_number": "P-1",
            "coverage_amount": 300000, "premium_amount": 1050
        }));
        let again = PolicyRevision::from_extraction(&full).unwrap().to_extraction();
        assert!(detect(&revised, &again, None).is_empty());
    }

    #[test]
    fn snapshot_reports_pending_and_normalized_type() {
        let snapshot = PolicySnapshot {
            carrier: Some(PENDING_EXTRACTION.to_string()),
            policy_type: Some(" Home ".to_string()),
            ..PolicySnapshot::default()
        };
        assert!(snapshot.is_pending());
        assert_eq!(snapshot.normalized_type(), "home");
    }
}
