//! Coverage scoring.
//!
//! Each [`Category`] has a fixed table of criteria and point weights. A category
//! score is the share of available points earned, scaled to 0..=100. The overall
//! score averages only the categories the user actually holds, weighted by
//! [`Category::importance`], so a missing policy type does not drag the result down.
//!
//! Some criteria cannot be observed from the stored data (home liability and
//! property, life term, general-liability aggregate, renters). Those are credited
//! in full whenever a policy of the category exists.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::policy::{PolicySnapshot, UnknownValue};

/// Name of the synthetic row that stores the aggregated score.
pub const OVERALL: &str = "overall";

/// Insights kept on the overall score.
pub const MAX_OVERALL_INSIGHTS: usize = 5;

/// Score reported for renters when it stands in for a missing home policy.
pub const RENTERS_STANDIN_SCORE: i32 = 70;

/// Policy details per policy id: lower-cased field name to value.
pub type PolicyDetails = HashMap<Uuid, HashMap<String, String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Auto,
    Home,
    Life,
    Umbrella,
    GeneralLiability,
    ProfessionalLiability,
    CommercialProperty,
    Cyber,
    Renters,
}

impl Category {
    /// Categories scored on every pass, in reporting order. Renters is added on demand.
    pub const SCORED: [Category; 8] = [
        Category::Auto,
        Category::Home,
        Category::Life,
        Category::Umbrella,
        Category::GeneralLiability,
        Category::ProfessionalLiability,
        Category::CommercialProperty,
        Category::Cyber,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Auto => "auto",
            Category::Home => "home",
            Category::Life => "life",
            Category::Umbrella => "umbrella",
            Category::GeneralLiability => "general_liability",
            Category::ProfessionalLiability => "professional_liability",
            Category::CommercialProperty => "commercial_property",
            Category::Cyber => "cyber",
            Category::Renters => "renters",
        }
    }

    pub fn weights(self) -> &'static [(Criterion, i32)] {
        use Criterion::*;
        match self {
            Category::Auto => &[
                (HasPolicy, 30),
                (LiabilityAdequate, 25),
                (Comprehensive, 15),
                (Collision, 15),
                (UninsuredMotorist, 15),
            ],
            Category::Home => &[
                (HasPolicy, 30),
                (DwellingAdequate, 25),
                (Liability, 20),
                (Property, 15),
                (RecentReview, 10),
            ],
            Category::Life => &[
                (HasPolicy, 40),
                (CoverageAdequate, 40),
                (TermAppropriate, 20),
            ],
            Category::Umbrella => &[(HasPolicy, 50), (LimitAdequate, 50)],
            Category::GeneralLiability => &[
                (HasPolicy, 40),
                (LimitAdequate, 35),
                (AggregateAdequate, 25),
            ],
            Category::ProfessionalLiability => &[(HasPolicy, 50), (LimitAdequate, 50)],
            Category::CommercialProperty => &[(HasPolicy, 50), (CoverageAdequate, 50)],
            Category::Cyber => &[(HasPolicy, 60), (LimitAdequate, 40)],
            Category::Renters => &[
                (HasPolicy, 50),
                (PropertyAdequate, 30),
                (Liability, 20),
            ],
        }
    }

    /// Weight of this category in the overall score.
    pub fn importance(self) -> i32 {
        match self {
            Category::Auto | Category::Home => 25,
            Category::Life | Category::GeneralLiability => 20,
            Category::Umbrella
            | Category::Renters
            | Category::ProfessionalLiability
            | Category::CommercialProperty
            | Category::Cyber => 15,
        }
    }

    fn weight(self, criterion: Criterion) -> i32 {
        self.weights()
            .iter()
            .find(|(c, _)| *c == criterion)
            .map(|(_, w)| *w)
            .unwrap_or(0)
    }

    fn total_weight(self) -> i32 {
        self.weights().iter().map(|(_, w)| w).sum()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::SCORED
            .into_iter()
            .chain([Category::Renters])
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownValue {
                kind: "category",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    HasPolicy,
    LiabilityAdequate,
    Comprehensive,
    Collision,
    UninsuredMotorist,
    DwellingAdequate,
    Liability,
    Property,
    RecentReview,
    CoverageAdequate,
    TermAppropriate,
    LimitAdequate,
    AggregateAdequate,
    PropertyAdequate,
}

impl Criterion {
    pub fn as_str(self) -> &'static str {
        match self {
            Criterion::HasPolicy => "has_policy",
            Criterion::LiabilityAdequate => "liability_adequate",
            Criterion::Comprehensive => "comprehensive",
            Criterion::Collision => "collision",
            Criterion::UninsuredMotorist => "uninsured_motorist",
            Criterion::DwellingAdequate => "dwelling_adequate",
            Criterion::Liability => "liability",
            Criterion::Property => "property",
            Criterion::RecentReview => "recent_review",
            Criterion::CoverageAdequate => "coverage_adequate",
            Criterion::TermAppropriate => "term_appropriate",
            Criterion::LimitAdequate => "limit_adequate",
            Criterion::AggregateAdequate => "aggregate_adequate",
            Criterion::PropertyAdequate => "property_adequate",
        }
    }
}

/// Minimum amounts (whole dollars) for full credit on limit criteria.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AdequacyThresholds {
    pub auto_liability: i64,
    pub umbrella_limit: i64,
    pub home_dwelling: i64,
    pub gl_per_occurrence: i64,
    pub professional_liability: i64,
    pub cyber_limit: i64,
    pub life_coverage: i64,
    pub life_coverage_partial: i64,
}

impl Default for AdequacyThresholds {
    fn default() -> Self {
        Self {
            auto_liability: 100_000,
            umbrella_limit: 1_000_000,
            home_dwelling: 250_000,
            gl_per_occurrence: 1_000_000,
            professional_liability: 1_000_000,
            cyber_limit: 1_000_000,
            life_coverage: 500_000,
            life_coverage_partial: 250_000,
        }
    }
}

impl AdequacyThresholds {
    /// Every threshold by name, for configuration overrides.
    pub fn entries_mut(&mut self) -> [(&'static str, &mut i64); 8] {
        [
            ("auto_liability", &mut self.auto_liability),
            ("umbrella_limit", &mut self.umbrella_limit),
            ("home_dwelling", &mut self.home_dwelling),
            ("gl_per_occurrence", &mut self.gl_per_occurrence),
            ("professional_liability", &mut self.professional_liability),
            ("cyber_limit", &mut self.cyber_limit),
            ("life_coverage", &mut self.life_coverage),
            ("life_coverage_partial", &mut self.life_coverage_partial),
        ]
    }
}

/// Score for one category, or for the overall row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ScoreResult {
    pub score: i32,
    pub breakdown: BTreeMap<String, i32>,
    pub insights: Vec<String>,
}

/// Full scoring pass for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PortfolioScores {
    pub overall: ScoreResult,
    pub categories: BTreeMap<Category, ScoreResult>,
    pub policy_count: usize,
}

struct Scorecard {
    category: Category,
    breakdown: BTreeMap<String, i32>,
    insights: Vec<String>,
}

impl Scorecard {
    fn new(category: Category) -> Self {
        Self {
            category,
            breakdown: BTreeMap::new(),
            insights: Vec::new(),
        }
    }

    fn full(&mut self, criterion: Criterion) {
        let points = self.category.weight(criterion);
        self.award(criterion, points);
    }

    fn award(&mut self, criterion: Criterion, points: i32) {
        self.breakdown.insert(criterion.as_str().to_string(), points.max(0));
    }

    fn half(&mut self, criterion: Criterion) {
        self.percent(criterion, 50);
    }

    fn percent(&mut self, criterion: Criterion, pct: i32) {
        let points = self.category.weight(criterion) * pct / 100;
        self.award(criterion, points);
    }

    /// Full credit at or above `threshold`, otherwise points in proportion to the gap.
    /// Returns whether the threshold was met.
    fn against_threshold(&mut self, criterion: Criterion, value: i64, threshold: i64) -> bool {
        let weight = self.category.weight(criterion);
        if value >= threshold {
            self.award(criterion, weight);
            return true;
        }
        let ratio = (value as f64 / threshold as f64).clamp(0.0, 1.0);
        self.award(criterion, (weight as f64 * ratio) as i32);
        false
    }

    /// Threshold credit when a limit is known, half credit when it is not.
    fn limit_or_half(&mut self, criterion: Criterion, value: i64, threshold: i64) {
        if value > 0 {
            self.against_threshold(criterion, value, threshold);
        } else {
            self.half(criterion);
        }
    }

    fn insight(&mut self, text: impl Into<String>) {
        self.insights.push(text.into());
    }

    fn finish(self) -> ScoreResult {
        let earned: i32 = self.breakdown.values().sum();
        let total = self.category.total_weight();
        ScoreResult {
            score: percent_of(earned, total),
            breakdown: self.breakdown,
            insights: self.insights,
        }
    }
}

fn percent_of(earned: i32, total: i32) -> i32 {
    if total <= 0 {
        return 0;
    }
    ((earned as f64 / total as f64) * 100.0).round_ties_even() as i32
}

/// "$100k", "$1.25M" style amounts for insight text, or "$1,234,567" when the
/// short form would need more digits.
fn short_dollars(amount: i64) -> String {
    let scaled = |unit: i64, suffix: &str| {
        let whole = amount / unit;
        let rest = amount % unit;
        if rest == 0 {
            return format!("${whole}{suffix}");
        }
        let width = unit.ilog10() as usize;
        let fraction = format!("{rest:0width$}");
        format!("${whole}.{}{suffix}", fraction.trim_end_matches('0'))
    };

    if amount >= 1_000_000 && amount % 10_000 == 0 {
        scaled(1_000_000, "M")
    } else if (1_000..1_000_000).contains(&amount) && amount % 100 == 0 {
        scaled(1_000, "k")
    } else {
        format!("${}", group_thousands(amount))
    }
}

fn group_thousands(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if amount < 0 {
        grouped.insert(0, '-');
    }
    grouped
}

fn has_coverage_type(policies: &[&PolicySnapshot], details: &PolicyDetails, needle: &str) -> bool {
    policies.iter().any(|p| {
        details
            .get(&p.id)
            .and_then(|d| d.get("coverage_type"))
            .is_some_and(|value| value.to_lowercase().contains(needle))
    })
}

/// Score one category against the user's policies.
pub fn score_category(
    policies: &[PolicySnapshot],
    category: Category,
    details: &PolicyDetails,
    thresholds: &AdequacyThresholds,
    now: DateTime<Utc>,
) -> ScoreResult {
    let mut card = Scorecard::new(category);
    let matching: Vec<&PolicySnapshot> = policies
        .iter()
        .filter(|p| p.normalized_type() == category.as_str())
        .collect();

    if matching.is_empty() {
        card.award(Criterion::HasPolicy, 0);
        card.insight(format!("No {category} policy found"));
        return card.finish();
    }
    card.full(Criterion::HasPolicy);

    // limits are compared in whole dollars
    let max_amount = matching
        .iter()
        .filter_map(|p| p.coverage_amount)
        .filter_map(|amount| amount.trunc().to_i64())
        .max()
        .unwrap_or(0)
        .max(0);

    match category {
        Category::Auto => {
            let threshold = thresholds.auto_liability;
            if !card.against_threshold(Criterion::LiabilityAdequate, max_amount, threshold) {
                card.insight(format!(
                    "Consider increasing liability to {}+",
                    short_dollars(threshold)
                ));
            }

            for (criterion, needle) in [
                (Criterion::Comprehensive, "comprehensive"),
                (Criterion::Collision, "collision"),
                (Criterion::UninsuredMotorist, "uninsured"),
            ] {
                if has_coverage_type(&matching, details, needle) {
                    card.full(criterion);
                } else {
                    card.half(criterion);
                }
            }
            if !has_coverage_type(&matching, details, "uninsured") {
                card.insight("Verify uninsured motorist coverage");
            }
        }
        Category::Home => {
            if max_amount >= thresholds.home_dwelling {
                card.full(Criterion::DwellingAdequate);
            } else {
                card.half(Criterion::DwellingAdequate);
                card.insight("Review dwelling coverage amount");
            }
            card.full(Criterion::Liability);
            card.full(Criterion::Property);

            let newest = matching.iter().filter_map(|p| p.created_at).max();
            match newest {
                Some(created_at) => {
                    let days = (now.date_naive() - created_at.date_naive()).num_days();
                    if days as f64 / 365.0 <= 2.0 {
                        card.full(Criterion::RecentReview);
                    } else {
                        card.award(Criterion::RecentReview, 0);
                        card.insight("Policy hasn't been reviewed in 2+ years");
                    }
                }
                None => card.half(Criterion::RecentReview),
            }
        }
        Category::Life => {
            if max_amount >= thresholds.life_coverage {
                card.full(Criterion::CoverageAdequate);
            } else if max_amount >= thresholds.life_coverage_partial {
                card.percent(Criterion::CoverageAdequate, 70);
            } else {
                card.percent(Criterion::CoverageAdequate, 40);
                card.insight("Consider increasing life coverage");
            }
            card.full(Criterion::TermAppropriate);
        }
        Category::Umbrella => {
            let threshold = thresholds.umbrella_limit;
            if !card.against_threshold(Criterion::LimitAdequate, max_amount, threshold) {
                card.insight(format!(
                    "Consider {}+ umbrella coverage",
                    short_dollars(threshold)
                ));
            }
        }
        Category::GeneralLiability => {
            let threshold = thresholds.gl_per_occurrence;
            if !card.against_threshold(Criterion::LimitAdequate, max_amount, threshold) {
                card.insight(format!(
                    "Consider {}+ per-occurrence GL limit",
                    short_dollars(threshold)
                ));
            }
            card.full(Criterion::AggregateAdequate);
        }
        Category::ProfessionalLiability => card.limit_or_half(
            Criterion::LimitAdequate,
            max_amount,
            thresholds.professional_liability,
        ),
        Category::Cyber => {
            card.limit_or_half(Criterion::LimitAdequate, max_amount, thresholds.cyber_limit)
        }
        Category::CommercialProperty => {
            if max_amount > 0 {
                card.full(Criterion::CoverageAdequate);
            } else {
                card.half(Criterion::CoverageAdequate);
            }
        }
        Category::Renters => {
            card.full(Criterion::PropertyAdequate);
            card.full(Criterion::Liability);
        }
    }

    card.finish()
}

/// Weighted average of the categories the user holds (score above zero).
pub fn score_overall(categories: &BTreeMap<Category, ScoreResult>) -> ScoreResult {
    let mut weighted_sum = 0i64;
    let mut total_weight = 0i64;
    let mut insights = Vec::new();

    for (category, result) in categories {
        if result.score > 0 {
            let weight = i64::from(category.importance());
            weighted_sum += i64::from(result.score) * weight;
            total_weight += weight;
        }
        insights.extend(result.insights.iter().cloned());
    }

    let score = if total_weight > 0 {
        (weighted_sum as f64 / total_weight as f64).round_ties_even() as i32
    } else {
        0
    };
    insights.truncate(MAX_OVERALL_INSIGHTS);

    ScoreResult {
        score,
        breakdown: categories
            .iter()
            .map(|(category, result)| (category.as_str().to_string(), result.score))
            .collect(),
        insights,
    }
}

/// Score every category plus the overall row for one user.
///
/// Policies still waiting on extraction are ignored. Renters is reported only when
/// the user rents without a home policy, at a fixed stand-in score.
pub fn score_portfolio(
    policies: &[PolicySnapshot],
    details: &PolicyDetails,
    thresholds: &AdequacyThresholds,
    now: DateTime<Utc>,
) -> PortfolioScores {
    let scored: Vec<PolicySnapshot> = policies
        .iter()
        .filter(|p| !p.is_pending())
        .cloned()
        .collect();

    let mut categories: BTreeMap<Category, ScoreResult> = Category::SCORED
        .into_iter()
        .map(|c| (c, score_category(&scored, c, details, thresholds, now)))
        .collect();

    let has_type = |name: &str| scored.iter().any(|p| p.normalized_type() == name);
    if has_type(Category::Renters.as_str()) && !has_type(Category::Home.as_str()) {
        categories.insert(
            Category::Renters,
            ScoreResult {
                score: RENTERS_STANDIN_SCORE,
                breakdown: BTreeMap::from([(
                    Criterion::HasPolicy.as_str().to_string(),
                    RENTERS_STANDIN_SCORE,
                )]),
                insights: Vec::new(),
            },
        );
    }

    PortfolioScores {
        overall: score_overall(&categories),
        categories,
        policy_count: scored.len(),
    }
}
