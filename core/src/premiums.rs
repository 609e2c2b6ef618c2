//! Premium history trend math and scheduled premium payments.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::policy::UnknownValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PremiumSource {
    Manual,
    Extraction,
    Renewal,
}

impl PremiumSource {
    pub fn as_str(self) -> &'static str {
        match self {
            PremiumSource::Manual => "manual",
            PremiumSource::Extraction => "extraction",
            PremiumSource::Renewal => "renewal",
        }
    }
}

impl fmt::Display for PremiumSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PremiumSource {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(PremiumSource::Manual),
            "extraction" => Ok(PremiumSource::Extraction),
            "renewal" => Ok(PremiumSource::Renewal),
            other => Err(UnknownValue {
                kind: "premium source",
                value: other.to_string(),
            }),
        }
    }
}

/// One recorded annual premium, in dollars and cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PremiumEntry {
    pub id: Uuid,
    pub amount: Decimal,
    pub effective_date: NaiveDate,
    pub source: PremiumSource,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// How often a scheduled premium payment recurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentFrequency {
    Monthly,
    Quarterly,
    SemiAnnual,
    Annual,
}

impl PaymentFrequency {
    pub const ALL: [PaymentFrequency; 4] = [
        PaymentFrequency::Monthly,
        PaymentFrequency::Quarterly,
        PaymentFrequency::SemiAnnual,
        PaymentFrequency::Annual,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentFrequency::Monthly => "monthly",
            PaymentFrequency::Quarterly => "quarterly",
            PaymentFrequency::SemiAnnual => "semi_annual",
            PaymentFrequency::Annual => "annual",
        }
    }
}

impl FromStr for PaymentFrequency {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentFrequency::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| UnknownValue {
                kind: "payment frequency",
                value: s.to_string(),
            })
    }
}

/// One scheduled premium payment. Unpaid while `paid_date` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PremiumPayment {
    pub id: Uuid,
    pub policy_id: Uuid,
    pub amount: Decimal,
    pub frequency: PaymentFrequency,
    pub due_date: NaiveDate,
    pub paid_date: Option<NaiveDate>,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PremiumPayment {
    pub fn is_paid(&self) -> bool {
        self.paid_date.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PremiumTrendEntry {
    #[serde(flatten)]
    pub entry: PremiumEntry,
    /// Change against the previous entry, one decimal. Null for the first entry
    /// and when the previous amount is zero.
    pub change_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PremiumTrend {
    pub history: Vec<PremiumTrendEntry>,
    pub total_change_pct: f64,
    pub entry_count: usize,
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round_ties_even() / 10.0
}

/// Percentage change from `previous` to `current`; `None` when `previous` is not positive.
pub fn change_pct(previous: Decimal, current: Decimal) -> Option<f64> {
    if previous <= Decimal::ZERO {
        return None;
    }
    let pct = ((current - previous) / previous * Decimal::ONE_HUNDRED).to_f64()?;
    Some(round_one_decimal(pct))
}

/// Order entries by effective date and annotate each with its change from the one before.
pub fn summarize(mut entries: Vec<PremiumEntry>) -> PremiumTrend {
    entries.sort_by_key(|e| e.effective_date);

    let total_change_pct = match (entries.first(), entries.last()) {
        (Some(first), Some(last)) => change_pct(first.amount, last.amount).unwrap_or(0.0),
        _ => 0.0,
    };

    let mut previous: Option<Decimal> = None;
    let history: Vec<PremiumTrendEntry> = entries
        .into_iter()
        .map(|entry| {
            let change = previous.and_then(|prev| change_pct(prev, entry.amount));
            previous = Some(entry.amount);
            PremiumTrendEntry {
                entry,
                change_pct: change,
            }
        })
        .collect();

    PremiumTrend {
        entry_count: history.len(),
        history,
        total_change_pct,
    }
}

/// True when an entry with the same amount and effective date is already recorded.
pub fn is_duplicate(
    existing: &[PremiumEntry],
    amount: Decimal,
    effective_date: NaiveDate,
) -> bool {
    existing
        .iter()
        .any(|e| e.amount == amount && e.effective_date == effective_date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(amount: i64, date: &str) -> PremiumEntry {
        PremiumEntry {
            id: Uuid::now_v7(),
            amount: Decimal::from(amount),
            effective_date: date.parse().unwrap(),
            source: PremiumSource::Manual,
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_history() {
        let trend = summarize(Vec::new());
        assert_eq!(trend.entry_count, 0);
        assert_eq!(trend.total_change_pct, 0.0);
        assert!(trend.history.is_empty());
    }

    #[test]
    fn changes_are_relative_to_previous_date() {
        let trend = summarize(vec![
            entry(1_320, "2026-01-01"),
            entry(1_000, "2024-01-01"),
            entry(1_200, "2025-01-01"),
        ]);
        let amounts: Vec<Decimal> = trend.history.iter().map(|h| h.entry.amount).collect();
        assert_eq!(
            amounts,
            vec![Decimal::from(1_000), Decimal::from(1_200), Decimal::from(1_320)]
        );

        let changes: Vec<Option<f64>> = trend.history.iter().map(|h| h.change_pct).collect();
        assert_eq!(changes, vec![None, Some(20.0), Some(10.0)]);
        assert_eq!(trend.total_change_pct, 32.0);
        assert_eq!(trend.entry_count, 3);
    }

    #[test]
    fn zero_previous_amount_has_no_change() {
        let trend = summarize(vec![entry(0, "2024-01-01"), entry(900, "2025-01-01")]);
        assert_eq!(trend.history[1].change_pct, None);
        assert_eq!(trend.total_change_pct, 0.0);
    }

    #[test]
    fn change_is_rounded_to_one_decimal() {
        let d = |text: &str| text.parse::<Decimal>().unwrap();
        assert_eq!(change_pct(d("3"), d("4")), Some(33.3));
        assert_eq!(change_pct(d("1000"), d("950")), Some(-5.0));
        assert_eq!(change_pct(d("1000.00"), d("1200.40")), Some(20.0));
        assert_eq!(change_pct(d("1000"), d("1100.49")), Some(10.0));
    }

    #[test]
    fn duplicate_needs_same_amount_and_date() {
        let existing = vec![entry(1_000, "2026-10-18")];
        let today: NaiveDate = "2026-10-18".parse().unwrap();
        let amount = Decimal::from(1_000);
        assert!(is_duplicate(&existing, "1000.00".parse().unwrap(), today));
        assert!(!is_duplicate(&existing, "1000.01".parse().unwrap(), today));
        assert!(!is_duplicate(&existing, amount, today.succ_opt().unwrap()));
    }

    #[test]
    fn frequency_round_trips_through_text() {
        for frequency in PaymentFrequency::ALL {
            assert_eq!(frequency.as_str().parse::<PaymentFrequency>(), Ok(frequency));
        }
        assert!("weekly".parse::<PaymentFrequency>().is_err());
        assert_eq!(
            serde_json::to_value(PaymentFrequency::SemiAnnual).unwrap(),
            serde_json::json!("semi_annual")
        );
    }

    #[test]
    fn source_round_trips_through_text() {
        for source in [
            PremiumSource::Manual,
            PremiumSource::Extraction,
            PremiumSource::Renewal,
        ] {
            assert_eq!(source.as_str().parse::<PremiumSource>(), Ok(source));
        }
        assert!("invoice".parse::<PremiumSource>().is_err());
    }
}
