//! Intent Classifier
//!
//! Deterministic keyword classifier for user queries plus lightweight entity
//! extraction (amounts with Indian unit normalization, timelines, goal and
//! loan types). First matching intent category wins; there is no scoring.

use crate::context::TaskContext;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    GoalPlanning,
    PortfolioReview,
    RiskAssessment,
    BudgetAnalysis,
    LoanAffordability,
    ComprehensiveAnalysis,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::GoalPlanning => "goal_planning",
            Intent::PortfolioReview => "portfolio_review",
            Intent::RiskAssessment => "risk_assessment",
            Intent::BudgetAnalysis => "budget_analysis",
            Intent::LoanAffordability => "loan_affordability",
            Intent::ComprehensiveAnalysis => "comprehensive_analysis",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static keyword lists, zero allocation. Order within a list does not
/// matter; the order of the lists in `classify` does.
const GOAL_PLANNING_KEYWORDS: &[&str] = &[
    // Saving towards something
    "save", "saving", "goal", "target", "corpus",
    // Common goal subjects
    "education", "retirement", "retire", "child", "wedding", "marriage",
    "house", "dream",
];

const PORTFOLIO_REVIEW_KEYWORDS: &[&str] = &[
    "portfolio", "holdings", "investments", "rebalance", "allocation",
    "diversify", "diversified", "mutual fund", "stocks", "equity",
];

const RISK_ASSESSMENT_KEYWORDS: &[&str] = &[
    "risk", "risky", "exposure", "volatile", "volatility", "safe", "safety",
    "downside",
];

const BUDGET_ANALYSIS_KEYWORDS: &[&str] = &[
    "budget", "spending", "spend", "expense", "expenses", "cash flow",
    "cashflow", "where does my money",
];

const LOAN_AFFORDABILITY_KEYWORDS: &[&str] = &[
    "loan", "emi", "borrow", "mortgage", "afford", "affordability", "credit",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractedEntities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_years: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loan_type: Option<String>,
}

impl ExtractedEntities {
    /// Writes the extracted entities into a task context under stable keys.
    pub fn apply_to(&self, ctx: &mut TaskContext) {
        if let Some(amount) = self.amount {
            ctx.insert("amount", json!(amount));
        }
        if let Some(years) = self.timeline_years {
            ctx.insert("timeline_years", json!(years));
        }
        if let Some(goal) = &self.goal_type {
            ctx.insert("goal_type", json!(goal));
        }
        if let Some(loan) = &self.loan_type {
            ctx.insert("loan_type", json!(loan));
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub entities: ExtractedEntities,
}

/// Intent classifier
pub struct IntentClassifier;

impl IntentClassifier {
    /// Classify a user query into an intent plus extracted entities.
    /// Priority order is fixed; the first category with a keyword hit wins
    /// and unmatched queries get the comprehensive fallback.
    pub fn classify(query: &str) -> Classification {
        let lowered = query.to_lowercase();

        let categories: &[(Intent, &[&str])] = &[
            (Intent::GoalPlanning, GOAL_PLANNING_KEYWORDS),
            (Intent::PortfolioReview, PORTFOLIO_REVIEW_KEYWORDS),
            (Intent::RiskAssessment, RISK_ASSESSMENT_KEYWORDS),
            (Intent::BudgetAnalysis, BUDGET_ANALYSIS_KEYWORDS),
            (Intent::LoanAffordability, LOAN_AFFORDABILITY_KEYWORDS),
        ];

        let intent = categories
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|kw| lowered.contains(*kw)))
            .map(|(intent, _)| *intent)
            .unwrap_or(Intent::ComprehensiveAnalysis);

        Classification {
            intent,
            entities: extract_entities(&lowered),
        }
    }
}

//
// ================= Entity Extraction =================
//

fn extract_entities(lowered: &str) -> ExtractedEntities {
    let tokens: Vec<&str> = lowered.split_whitespace().collect();

    let mut entities = ExtractedEntities {
        goal_type: extract_goal_type(lowered),
        loan_type: extract_loan_type(lowered),
        ..Default::default()
    };

    for (i, raw) in tokens.iter().enumerate() {
        let token = strip_token(raw);
        let next = tokens.get(i + 1).map(|t| strip_token(t)).unwrap_or("");

        // Timeline: "10 years", "18 months", hyphenated "10-year".
        if entities.timeline_years.is_none() {
            if let Some(years) = parse_timeline(token, next) {
                entities.timeline_years = Some(years);
                continue;
            }
        }

        // Amounts: "₹50 lakhs", "1.5 crore", "500k", bare rupee figures.
        if entities.amount.is_none() {
            if let Some(amount) = parse_amount(raw, token, next) {
                entities.amount = Some(amount);
            }
        }
    }

    entities
}

/// Strips currency prefixes, separators, and trailing punctuation from a
/// whitespace token.
fn strip_token(raw: &str) -> &str {
    let mut token = raw.trim_matches(|c: char| matches!(c, '.' | ',' | '?' | '!' | '(' | ')'));
    for prefix in ["₹", "rs.", "rs", "inr"] {
        if let Some(rest) = token.strip_prefix(prefix) {
            token = rest;
            break;
        }
    }
    token
}

fn parse_number(token: &str) -> Option<f64> {
    let cleaned: String = token.chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

fn parse_timeline(token: &str, next: &str) -> Option<f64> {
    // Hyphenated forms first: "10-year", "6-month".
    if let Some((num, unit)) = token.split_once('-') {
        if let Some(n) = parse_number(num) {
            if unit.starts_with("year") || unit.starts_with("yr") {
                return Some(n);
            }
            if unit.starts_with("month") {
                return Some(n / 12.0);
            }
        }
    }

    let n = parse_number(token)?;
    if next.starts_with("year") || next.starts_with("yr") {
        Some(n)
    } else if next.starts_with("month") {
        Some(n / 12.0)
    } else {
        None
    }
}

fn parse_amount(raw: &str, token: &str, next: &str) -> Option<f64> {
    // Attached units: "500k", "1.5cr".
    if let Some(rest) = token.strip_suffix("cr") {
        if let Some(n) = parse_number(rest) {
            return Some(n * 10_000_000.0);
        }
    }
    if let Some(rest) = token.strip_suffix('k') {
        if let Some(n) = parse_number(rest) {
            return Some(n * 1_000.0);
        }
    }

    let n = parse_number(token)?;

    // Unit as the following word.
    if next.starts_with("lakh") || next.starts_with("lac") {
        return Some(n * 100_000.0);
    }
    if next.starts_with("crore") || next == "cr" {
        return Some(n * 10_000_000.0);
    }
    if next.starts_with("thousand") || next == "k" {
        return Some(n * 1_000.0);
    }

    // Timeline numbers are not amounts.
    if next.starts_with("year") || next.starts_with("yr") || next.starts_with("month") {
        return None;
    }

    // Bare numbers only count when carrying a currency marker or big enough
    // to plausibly be money.
    let has_currency_marker =
        raw.starts_with('₹') || raw.starts_with("rs") || raw.starts_with("inr");
    if has_currency_marker || n >= 1_000.0 {
        Some(n)
    } else {
        None
    }
}

fn extract_goal_type(lowered: &str) -> Option<String> {
    const GOAL_TYPES: &[(&str, &[&str])] = &[
        ("education", &["education", "college", "school", "study"]),
        ("retirement", &["retirement", "retire", "pension"]),
        ("house", &["house", "flat", "apartment", "property"]),
        ("car", &["car", "vehicle", "bike"]),
        ("wedding", &["wedding", "marriage"]),
        ("emergency", &["emergency", "rainy day"]),
    ];

    GOAL_TYPES
        .iter()
        .find(|(_, markers)| markers.iter().any(|m| lowered.contains(*m)))
        .map(|(name, _)| name.to_string())
}

fn extract_loan_type(lowered: &str) -> Option<String> {
    if !lowered.contains("loan") && !lowered.contains("mortgage") && !lowered.contains("emi") {
        return None;
    }

    const LOAN_TYPES: &[(&str, &[&str])] = &[
        ("home", &["home loan", "housing loan", "mortgage"]),
        ("car", &["car loan", "auto loan", "vehicle loan"]),
        ("education", &["education loan", "student loan"]),
        ("personal", &["personal loan"]),
    ];

    LOAN_TYPES
        .iter()
        .find(|(_, markers)| markers.iter().any(|m| lowered.contains(*m)))
        .map(|(name, _)| name.to_string())
}
