//! Field-level change detection between a stored policy and a new extraction.
//!
//! [`classify`] and [`severity`] are pure and total: they never fail, whatever the
//! input strings look like. [`detect`] runs both over every [`TrackedField`] and
//! returns the records to persist; it never writes anything itself.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::policy::{Extraction, PolicySnapshot, TrackedField, UnknownValue, is_placeholder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeltaType {
    Added,
    Removed,
    Increased,
    Decreased,
    Changed,
}

impl DeltaType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeltaType::Added => "added",
            DeltaType::Removed => "removed",
            DeltaType::Increased => "increased",
            DeltaType::Decreased => "decreased",
            DeltaType::Changed => "changed",
        }
    }
}

impl fmt::Display for DeltaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeltaType {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(DeltaType::Added),
            "removed" => Ok(DeltaType::Removed),
            "increased" => Ok(DeltaType::Increased),
            "decreased" => Ok(DeltaType::Decreased),
            "changed" => Ok(DeltaType::Changed),
            other => Err(UnknownValue {
                kind: "delta type",
                value: other.to_string(),
            }),
        }
    }
}

/// How much a change matters to the policyholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Severity::Critical),
            "warning" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            other => Err(UnknownValue {
                kind: "severity",
                value: other.to_string(),
            }),
        }
    }
}

/// Premium increase above this percentage is critical.
pub const PREMIUM_CRITICAL_PCT: f64 = 20.0;
/// Premium increase above this percentage is a warning.
pub const PREMIUM_WARNING_PCT: f64 = 10.0;

/// A change staged for persistence. The caller owns the transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPolicyDelta {
    pub policy_id: Uuid,
    pub document_id: Option<Uuid>,
    pub field_key: TrackedField,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub delta_type: DeltaType,
    pub severity: Severity,
}

/// A persisted change record. Only `is_acknowledged` ever changes after insert.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PolicyDelta {
    pub id: Uuid,
    pub policy_id: Uuid,
    pub document_id: Option<Uuid>,
    pub field_key: TrackedField,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub delta_type: DeltaType,
    pub severity: Severity,
    pub is_acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

/// Lenient numeric reading: missing or empty is 0, anything unparsable is `None`.
fn parse_number(value: Option<&str>) -> Option<f64> {
    match value.map(str::trim) {
        None | Some("") => Some(0.0),
        Some(s) => s.parse::<f64>().ok(),
    }
}

/// Both values as numbers. If either side does not parse, both read as 0.
///
/// Known approximation kept for compatibility with stored history: a value moving
/// from non-numeric to numeric is compared as 0 → 0 here, while `severity` on amount
/// fields may still see `new > old` through the change type.
fn numeric_pair(old: Option<&str>, new: Option<&str>) -> (f64, f64) {
    match (parse_number(old), parse_number(new)) {
        (Some(o), Some(n)) => (o, n),
        _ => (0.0, 0.0),
    }
}

/// Decide what kind of change happened to one field.
pub fn classify(_field: TrackedField, old: Option<&str>, new: Option<&str>) -> DeltaType {
    match (old, new) {
        (None, Some(_)) => DeltaType::Added,
        (Some(_), None) => DeltaType::Removed,
        _ => {
            let (old_num, new_num) = numeric_pair(old, new);
            if new_num > old_num {
                DeltaType::Increased
            } else if new_num < old_num {
                DeltaType::Decreased
            } else {
                DeltaType::Changed
            }
        }
    }
}

/// Rank a change using per-field numeric thresholds.
pub fn severity(
    field: TrackedField,
    old: Option<&str>,
    new: Option<&str>,
    change_type: DeltaType,
) -> Severity {
    let (old_num, new_num) = numeric_pair(old, new);

    match field {
        TrackedField::PremiumAmount => {
            if old_num > 0.0 && new_num > old_num {
                let pct_change = (new_num - old_num) * 100.0 / old_num;
                if pct_change > PREMIUM_CRITICAL_PCT {
                    return Severity::Critical;
                }
                if pct_change > PREMIUM_WARNING_PCT {
                    return Severity::Warning;
                }
            }
            Severity::Info
        }
        TrackedField::CoverageAmount => {
            if change_type == DeltaType::Decreased || (old_num > 0.0 && new_num < old_num) {
                Severity::Critical
            } else {
                Severity::Info
            }
        }
        TrackedField::Deductible => {
            if change_type == DeltaType::Increased || new_num > old_num {
                Severity::Warning
            } else {
                Severity::Info
            }
        }
        TrackedField::Carrier => Severity::Warning,
        TrackedField::RenewalDate
        | TrackedField::PolicyNumber
        | TrackedField::PolicyType
        | TrackedField::Scope => Severity::Info,
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Compare a policy against a new extraction and stage one record per changed field.
///
/// Output order follows [`TrackedField::ALL`]. A field is skipped when both sides are
/// empty, when the stored value is a placeholder, or when both stringify identically.
pub fn detect(
    policy: &PolicySnapshot,
    extraction: &Extraction,
    document_id: Option<Uuid>,
) -> Vec<NewPolicyDelta> {
    let mut deltas = Vec::new();

    for field in TrackedField::ALL {
        let old_value = policy.tracked_value(field);
        let new_value = extraction.get(field.as_str()).cloned().unwrap_or(Value::Null);

        if is_falsy(&old_value) && is_falsy(&new_value) {
            continue;
        }

        let old_str = stringify(&old_value);
        let new_str = stringify(&new_value);

        if old_str.as_deref().is_some_and(is_placeholder) {
            continue;
        }
        if old_str == new_str {
            continue;
        }

        let delta_type = classify(field, old_str.as_deref(), new_str.as_deref());
        let severity = severity(field, old_str.as_deref(), new_str.as_deref(), delta_type);

        deltas.push(NewPolicyDelta {
            policy_id: policy.id,
            document_id,
            field_key: field,
            old_value: old_str,
            new_value: new_str,
            delta_type,
            severity,
        });
    }

    deltas
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;

    fn premium(old: &str, new: &str) -> (DeltaType, Severity) {
        let field = TrackedField::PremiumAmount;
        let delta_type = classify(field, Some(old), Some(new));
        (delta_type, severity(field, Some(old), Some(new), delta_type))
    }

    fn extraction(value: Value) -> Extraction {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn classify_added_and_removed() {
        for field in TrackedField::ALL {
            assert_eq!(classify(field, None, Some("x")), DeltaType::Added);
            assert_eq!(classify(field, Some("x"), None), DeltaType::Removed);
        }
    }

    #[test]
    fn classify_numeric_direction() {
        let field = TrackedField::Deductible;
        assert_eq!(classify(field, Some("500"), Some("1000")), DeltaType::Increased);
        assert_eq!(classify(field, Some("1000"), Some("500")), DeltaType::Decreased);
        assert_eq!(classify(field, Some("1000"), Some("1000.0")), DeltaType::Changed);
    }

    #[test]
    fn classify_unparsable_side_compares_as_zero() {
        let field = TrackedField::Carrier;
        assert_eq!(classify(field, Some("Acme"), Some("Globex")), DeltaType::Changed);
        // one side parses, the other does not: both collapse to 0
        assert_eq!(classify(field, Some("Acme"), Some("42")), DeltaType::Changed);
        // empty string reads as 0 and is not a parse failure
        assert_eq!(classify(field, Some(""), Some("42")), DeltaType::Increased);
    }

    #[test]
    fn premium_thresholds_use_strict_inequality() {
        assert_eq!(premium("1000", "1100"), (DeltaType::Increased, Severity::Info));
        assert_eq!(premium("1000", "1101"), (DeltaType::Increased, Severity::Warning));
        assert_eq!(premium("1000", "1200"), (DeltaType::Increased, Severity::Warning));
        assert_eq!(premium("1000", "1100.49"), (DeltaType::Increased, Severity::Warning));
        assert_eq!(premium("1000", "1200.4"), (DeltaType::Increased, Severity::Critical));
        assert_eq!(premium("1000", "1201"), (DeltaType::Increased, Severity::Critical));
        assert_eq!(premium("1000", "1250"), (DeltaType::Increased, Severity::Critical));
    }

    #[test]
    fn premium_scaled_increases() {
        assert_eq!(premium("2000", "2420").1, Severity::Critical); // x1.21
        assert_eq!(premium("2000", "2300").1, Severity::Warning); // x1.15
        assert_eq!(premium("2000", "2100").1, Severity::Info); // x1.05
    }

    #[test]
    fn premium_from_zero_or_unparsable_is_info() {
        assert_eq!(premium("0", "5000").1, Severity::Info);
        assert_eq!(premium("n/a", "5000").1, Severity::Info);
        assert_eq!(premium("1000", "900").1, Severity::Info);
    }

    #[test]
    fn coverage_decrease_is_critical() {
        let field = TrackedField::CoverageAmount;
        let delta_type = classify(field, Some("300000"), Some("250000"));
        assert_eq!(delta_type, DeltaType::Decreased);
        assert_eq!(
            severity(field, Some("300000"), Some("250000"), delta_type),
            Severity::Critical
        );
        assert_eq!(
            severity(field, Some("250000"), Some("300000"), DeltaType::Increased),
            Severity::Info
        );
    }

    #[test]
    fn deductible_increase_is_warning() {
        let field = TrackedField::Deductible;
        let delta_type = classify(field, Some("500"), Some("1000"));
        assert_eq!(delta_type, DeltaType::Increased);
        assert_eq!(
            severity(field, Some("500"), Some("1000"), delta_type),
            Severity::Warning
        );
        assert_eq!(
            severity(field, Some("1000"), Some("500"), DeltaType::Decreased),
            Severity::Info
        );
    }

    #[test]
    fn fixed_severity_fields() {
        assert_eq!(
            severity(TrackedField::Carrier, Some("A"), Some("B"), DeltaType::Changed),
            Severity::Warning
        );
        assert_eq!(
            severity(
                TrackedField::RenewalDate,
                Some("2026-01-01"),
                Some("2027-01-01"),
                DeltaType::Changed
            ),
            Severity::Info
        );
        assert_eq!(
            severity(TrackedField::PolicyNumber, None, Some("X1"), DeltaType::Added),
            Severity::Info
        );
    }

    #[test]
    fn detect_skips_unchanged_fields() {
        let policy = PolicySnapshot {
            carrier: Some("Acme".to_string()),
            premium_amount: Some(Decimal::from(1000)),
            ..PolicySnapshot::default()
        };
        let new = extraction(json!({"carrier": "Acme", "premium_amount": 1000}));
        assert!(detect(&policy, &new, None).is_empty());
    }

    #[test]
    fn detect_skips_placeholders_and_empty_pairs() {
        let policy = PolicySnapshot {
            carrier: Some("Pending extraction...".to_string()),
            policy_number: Some("TBD".to_string()),
            deductible: Some(Decimal::ZERO),
            ..PolicySnapshot::default()
        };
        let new = extraction(json!({
            "carrier": "Acme",
            "policy_number": "P-1",
            "deductible": 0,
            "scope": ""
        }));
        assert!(detect(&policy, &new, None).is_empty());
    }

    #[test]
    fn detect_emits_in_tracked_order_with_context() {
        let policy_id = Uuid::now_v7();
        let document_id = Uuid::now_v7();
        let policy = PolicySnapshot {
            id: policy_id,
            carrier: Some("Acme".to_string()),
            coverage_amount: Some(Decimal::from(300_000)),
            premium_amount: Some(Decimal::from(1000)),
            renewal_date: chrono::NaiveDate::from_ymd_opt(2026, 5, 1),
            ..PolicySnapshot::default()
        };
        let new = extraction(json!({
            "renewal_date": "2027-05-01",
            "premium_amount": 1201,
            "coverage_amount": 250000,
            "carrier": "Globex",
            "policy_number": "P-77"
        }));

        let deltas = detect(&policy, &new, Some(document_id));
        let fields: Vec<TrackedField> = deltas.iter().map(|d| d.field_key).collect();
        assert_eq!(
            fields,
            vec![
                TrackedField::Carrier,
                TrackedField::PolicyNumber,
                TrackedField::CoverageAmount,
                TrackedField::PremiumAmount,
                TrackedField::RenewalDate,
            ]
        );
        assert!(deltas.iter().all(|d| d.policy_id == policy_id));
        assert!(deltas.iter().all(|d| d.document_id == Some(document_id)));

        let number = &deltas[1];
        assert_eq!(number.old_value, None);
        assert_eq!(number.delta_type, DeltaType::Added);

        let coverage = &deltas[2];
        assert_eq!(coverage.old_value.as_deref(), Some("300000"));
        assert_eq!(coverage.new_value.as_deref(), Some("250000"));
        assert_eq!(coverage.severity, Severity::Critical);

        assert_eq!(deltas[3].severity, Severity::Critical);
        assert_eq!(deltas[0].severity, Severity::Warning);
    }

    #[test]
    fn detect_reports_removed_when_key_absent() {
        let policy = PolicySnapshot {
            deductible: Some(Decimal::from(750)),
            ..PolicySnapshot::default()
        };
        let deltas = detect(&policy, &Extraction::new(), None);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].delta_type, DeltaType::Removed);
        assert_eq!(deltas[0].new_value, None);
        assert_eq!(deltas[0].severity, Severity::Info);
    }

    #[test]
    fn enums_parse_their_stored_form() {
        for t in [
            DeltaType::Added,
            DeltaType::Removed,
            DeltaType::Increased,
            DeltaType::Decreased,
            DeltaType::Changed,
        ] {
            assert_eq!(t.as_str().parse::<DeltaType>(), Ok(t));
        }
        for s in [Severity::Critical, Severity::Warning, Severity::Info] {
            assert_eq!(s.as_str().parse::<Severity>(), Ok(s));
        }
        assert!("urgent".parse::<Severity>().is_err());
    }
}
