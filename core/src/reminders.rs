//! Renewal reminder schedule and computed policy alerts.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::policy::PolicySnapshot;
use crate::premiums::PremiumPayment;

/// Days before renewal at which a reminder becomes due.
pub const REMINDER_OFFSETS_DAYS: [u64; 3] = [30, 14, 7];

pub const RENEWAL_WINDOW_DAYS: i64 = 30;
pub const RENEWAL_URGENT_DAYS: i64 = 14;
pub const EXPIRED_WINDOW_DAYS: i64 = 30;
pub const ANNUAL_REVIEW_MIN_AGE_DAYS: i64 = 335;
pub const ANNUAL_REVIEW_WINDOW_DAYS: i64 = 30;
/// Unpaid premiums due within this many days raise an upcoming-payment alert.
pub const UPCOMING_PAYMENT_DAYS: i64 = 7;
/// An overdue premium turns high severity after this many days.
pub const OVERDUE_HIGH_AFTER_DAYS: i64 = 14;

/// Reminder dates for a renewal, skipping any already in the past.
pub fn reminder_dates(renewal_date: NaiveDate, today: NaiveDate) -> Vec<NaiveDate> {
    REMINDER_OFFSETS_DAYS
        .iter()
        .filter_map(|days| renewal_date.checked_sub_days(Days::new(*days)))
        .filter(|remind_at| *remind_at >= today)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    OverduePayment,
    UpcomingPayment,
    Renewal,
    Expired,
    AnnualReview,
}

/// Declaration order is display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SmartAlert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub policy_id: Uuid,
    pub title: String,
    pub description: String,
    pub action: String,
}

/// Display name used in alert titles: nickname, then carrier.
pub fn policy_label<'a>(nickname: Option<&'a str>, policy: &'a PolicySnapshot) -> &'a str {
    nickname
        .filter(|n| !n.trim().is_empty())
        .or(policy.carrier.as_deref())
        .unwrap_or("Policy")
}

fn plural_days(days: i64) -> &'static str {
    if days == 1 { "day" } else { "days" }
}

/// Earliest unpaid overdue premium, then the earliest one due within the upcoming window.
fn payment_alerts(
    policy: &PolicySnapshot,
    label: &str,
    payments: &[PremiumPayment],
    today: NaiveDate,
    out: &mut Vec<SmartAlert>,
) {
    let unpaid: Vec<&PremiumPayment> = payments
        .iter()
        .filter(|p| p.policy_id == policy.id && !p.is_paid())
        .collect();

    if let Some(overdue) = unpaid
        .iter()
        .filter(|p| p.due_date < today)
        .min_by_key(|p| p.due_date)
    {
        let days_late = (today - overdue.due_date).num_days();
        out.push(SmartAlert {
            kind: AlertKind::OverduePayment,
            severity: if days_late > OVERDUE_HIGH_AFTER_DAYS {
                AlertSeverity::High
            } else {
                AlertSeverity::Medium
            },
            policy_id: policy.id,
            title: format!("Overdue payment: {label}"),
            description: format!(
                "${:.2} was due {} ({days_late} {} ago)",
                overdue.amount,
                overdue.due_date,
                plural_days(days_late)
            ),
            action: "Mark as paid or make payment".to_string(),
        });
    }

    if let Some(upcoming) = unpaid
        .iter()
        .filter(|p| {
            let days = (p.due_date - today).num_days();
            (0..=UPCOMING_PAYMENT_DAYS).contains(&days)
        })
        .min_by_key(|p| p.due_date)
    {
        let days = (upcoming.due_date - today).num_days();
        out.push(SmartAlert {
            kind: AlertKind::UpcomingPayment,
            severity: AlertSeverity::Low,
            policy_id: policy.id,
            title: format!("Payment due soon: {label}"),
            description: format!(
                "${:.2} due in {days} {} ({})",
                upcoming.amount,
                plural_days(days),
                upcoming.due_date
            ),
            action: "Review payment".to_string(),
        });
    }
}

fn alerts_for(policy: &PolicySnapshot, label: &str, today: NaiveDate, out: &mut Vec<SmartAlert>) {
    if let Some(renewal) = policy.renewal_date {
        let days = (renewal - today).num_days();
        if days > 0 && days <= RENEWAL_WINDOW_DAYS {
            out.push(SmartAlert {
                kind: AlertKind::Renewal,
                severity: if days <= RENEWAL_URGENT_DAYS {
                    AlertSeverity::Medium
                } else {
                    AlertSeverity::Low
                },
                policy_id: policy.id,
                title: format!("Renewal approaching: {label}"),
                description: format!(
                    "Renews in {days} days ({renewal}). Shop for better rates now."
                ),
                action: "Review policy before renewal".to_string(),
            });
        } else if days <= 0 && days > -EXPIRED_WINDOW_DAYS {
            out.push(SmartAlert {
                kind: AlertKind::Expired,
                severity: AlertSeverity::High,
                policy_id: policy.id,
                title: format!("Policy may have expired: {label}"),
                description: format!(
                    "Renewal date was {renewal} ({} days ago)",
                    days.abs()
                ),
                action: "Verify policy status with carrier".to_string(),
            });
        }
    }

    if let Some(created) = policy.created_at.map(|c| c.date_naive()) {
        let days_old = (today - created).num_days();
        if days_old > ANNUAL_REVIEW_MIN_AGE_DAYS && days_old % 365 < ANNUAL_REVIEW_WINDOW_DAYS {
            out.push(SmartAlert {
                kind: AlertKind::AnnualReview,
                severity: AlertSeverity::Low,
                policy_id: policy.id,
                title: format!("Annual review: {label}"),
                description: "It's been about a year. Review coverage, limits, and beneficiaries."
                    .to_string(),
                action: "Review policy details".to_string(),
            });
        }
    }
}

/// Alerts for every `(policy, label)` pair, high severity first.
/// Alerts of equal severity keep policy order; within a policy, payment alerts
/// come before renewal and review alerts.
pub fn smart_alerts<'a, I>(
    policies: I,
    payments: &[PremiumPayment],
    today: NaiveDate,
) -> Vec<SmartAlert>
where
    I: IntoIterator<Item = (&'a PolicySnapshot, &'a str)>,
{
    let mut alerts = Vec::new();
    for (policy, label) in policies {
        payment_alerts(policy, label, payments, today, &mut alerts);
        alerts_for(policy, label, today, &mut alerts);
    }
    alerts.sort_by_key(|a| a.severity);
    alerts
}
