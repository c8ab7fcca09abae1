//! Built-in financial calculation tools
//!
//! Deterministic calculators the specialized agents lean on. Structural
//! argument checks live in the registry schema; the handlers only guard
//! numeric domains (positive principals, non-zero tenures) and report those
//! as validation failures so the registry does not retry them.

use crate::error::OrchestrationError;
use crate::Result;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{ParamKind, ParameterSpec, Tool, ToolRegistry, ToolSchema};

fn domain_error(tool: &str, violation: impl Into<String>) -> OrchestrationError {
    OrchestrationError::ToolValidation {
        tool: tool.to_string(),
        violations: vec![violation.into()],
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn number(args: &Value, key: &str) -> Option<f64> {
    args.get(key).and_then(Value::as_f64)
}

//
// ================= calculate_emi =================
//

pub struct CalculateEmiTool;

#[async_trait::async_trait]
impl Tool for CalculateEmiTool {
    fn name(&self) -> &'static str {
        "calculate_emi"
    }

    fn description(&self) -> &'static str {
        "Calculate the monthly EMI, total payment, and interest for a loan"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParameterSpec::required("principal", ParamKind::Number, "Loan principal amount"),
            ParameterSpec::required("annual_rate", ParamKind::Number, "Annual interest rate in percent"),
            ParameterSpec::required("tenure_years", ParamKind::Number, "Loan tenure in years"),
        ])
    }

    async fn call(&self, args: &Value) -> Result<Value> {
        let principal = number(args, "principal").unwrap_or_default();
        let annual_rate = number(args, "annual_rate").unwrap_or_default();
        let tenure_years = number(args, "tenure_years").unwrap_or_default();

        if principal <= 0.0 {
            return Err(domain_error(self.name(), "principal must be positive"));
        }
        if annual_rate < 0.0 {
            return Err(domain_error(self.name(), "annual_rate must not be negative"));
        }
        if tenure_years <= 0.0 {
            return Err(domain_error(self.name(), "tenure_years must be positive"));
        }

        let monthly_rate = annual_rate / 1200.0;
        let months = tenure_years * 12.0;
        let emi = if monthly_rate == 0.0 {
            principal / months
        } else {
            let factor = (1.0 + monthly_rate).powf(months);
            principal * monthly_rate * factor / (factor - 1.0)
        };
        let total_payment = emi * months;

        Ok(json!({
            "emi": round2(emi),
            "total_payment": round2(total_payment),
            "total_interest": round2(total_payment - principal),
            "months": months as u64,
        }))
    }
}

//
// ================= savings_rate =================
//

pub struct SavingsRateTool;

#[async_trait::async_trait]
impl Tool for SavingsRateTool {
    fn name(&self) -> &'static str {
        "savings_rate"
    }

    fn description(&self) -> &'static str {
        "Compute monthly savings and savings rate from income and expenses"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParameterSpec::required("monthly_income", ParamKind::Number, "Gross monthly income"),
            ParameterSpec::required("monthly_expenses", ParamKind::Number, "Total monthly expenses"),
        ])
    }

    async fn call(&self, args: &Value) -> Result<Value> {
        let income = number(args, "monthly_income").unwrap_or_default();
        let expenses = number(args, "monthly_expenses").unwrap_or_default();

        if income <= 0.0 {
            return Err(domain_error(self.name(), "monthly_income must be positive"));
        }
        if expenses < 0.0 {
            return Err(domain_error(self.name(), "monthly_expenses must not be negative"));
        }

        let savings = income - expenses;
        let rate = savings / income * 100.0;
        let assessment = if rate >= 30.0 {
            "excellent"
        } else if rate >= 20.0 {
            "healthy"
        } else if rate >= 10.0 {
            "needs improvement"
        } else {
            "at risk"
        };

        Ok(json!({
            "monthly_savings": round2(savings),
            "savings_rate_percent": round2(rate),
            "assessment": assessment,
        }))
    }
}

//
// ================= project_growth =================
//

pub struct ProjectGrowthTool;

#[async_trait::async_trait]
impl Tool for ProjectGrowthTool {
    fn name(&self) -> &'static str {
        "project_growth"
    }

    fn description(&self) -> &'static str {
        "Project the future value of monthly investments and/or a lump sum"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParameterSpec::optional("monthly_investment", ParamKind::Number, "Recurring monthly contribution"),
            ParameterSpec::optional("lump_sum", ParamKind::Number, "One-time starting amount"),
            ParameterSpec::required("annual_return_percent", ParamKind::Number, "Expected annual return in percent"),
            ParameterSpec::required("years", ParamKind::Number, "Investment horizon in years"),
        ])
    }

    async fn call(&self, args: &Value) -> Result<Value> {
        let monthly = number(args, "monthly_investment").unwrap_or(0.0);
        let lump_sum = number(args, "lump_sum").unwrap_or(0.0);
        let annual_return = number(args, "annual_return_percent").unwrap_or_default();
        let years = number(args, "years").unwrap_or_default();

        if years <= 0.0 {
            return Err(domain_error(self.name(), "years must be positive"));
        }
        if monthly <= 0.0 && lump_sum <= 0.0 {
            return Err(domain_error(
                self.name(),
                "either monthly_investment or lump_sum must be positive",
            ));
        }

        let i = annual_return / 1200.0;
        let n = years * 12.0;

        // Annuity-due future value for the recurring leg.
        let fv_recurring = if i == 0.0 {
            monthly * n
        } else {
            monthly * (((1.0 + i).powf(n) - 1.0) / i) * (1.0 + i)
        };
        let fv_lump = lump_sum * (1.0 + i).powf(n);
        let invested = monthly * n + lump_sum;
        let future_value = fv_recurring + fv_lump;

        Ok(json!({
            "future_value": round2(future_value),
            "invested": round2(invested),
            "growth": round2(future_value - invested),
        }))
    }
}

//
// ================= risk_score =================
//

pub struct RiskScoreTool;

#[async_trait::async_trait]
impl Tool for RiskScoreTool {
    fn name(&self) -> &'static str {
        "risk_score"
    }

    fn description(&self) -> &'static str {
        "Score a user's risk capacity from age, horizon, dependents, and savings"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParameterSpec::required("age", ParamKind::Integer, "User age in years"),
            ParameterSpec::optional("investment_horizon_years", ParamKind::Number, "Years until the money is needed"),
            ParameterSpec::optional("dependents", ParamKind::Integer, "Number of financial dependents"),
            ParameterSpec::optional("monthly_income", ParamKind::Number, "Gross monthly income"),
            ParameterSpec::optional("existing_savings", ParamKind::Number, "Liquid savings on hand"),
        ])
    }

    async fn call(&self, args: &Value) -> Result<Value> {
        let age = args.get("age").and_then(Value::as_i64).unwrap_or_default();
        if age <= 0 || age > 120 {
            return Err(domain_error(self.name(), "age must be between 1 and 120"));
        }

        let mut score: i64 = 50;
        let mut factors = Vec::new();

        if age < 30 {
            score += 15;
            factors.push("young investor, long runway".to_string());
        } else if age <= 45 {
            score += 5;
            factors.push("prime earning years".to_string());
        } else if age <= 60 {
            score -= 5;
            factors.push("approaching retirement".to_string());
        } else {
            score -= 15;
            factors.push("retirement age, capital preservation matters".to_string());
        }

        if let Some(horizon) = number(args, "investment_horizon_years") {
            if horizon >= 10.0 {
                score += 15;
                factors.push("long investment horizon".to_string());
            } else if horizon >= 5.0 {
                score += 5;
                factors.push("medium investment horizon".to_string());
            } else if horizon < 2.0 {
                score -= 10;
                factors.push("short horizon limits equity exposure".to_string());
            }
        }

        if let Some(dependents) = args.get("dependents").and_then(Value::as_i64) {
            if dependents > 0 {
                let penalty = 5 * dependents.min(3);
                score -= penalty;
                factors.push(format!("{dependents} dependents reduce risk capacity"));
            }
        }

        if let (Some(income), Some(savings)) = (
            number(args, "monthly_income"),
            number(args, "existing_savings"),
        ) {
            if income > 0.0 {
                let months_covered = savings / income;
                if months_covered >= 12.0 {
                    score += 10;
                    factors.push("strong savings cushion".to_string());
                } else if months_covered >= 6.0 {
                    score += 5;
                    factors.push("adequate savings cushion".to_string());
                } else if months_covered < 3.0 {
                    score -= 5;
                    factors.push("thin emergency cushion".to_string());
                }
            }
        }

        let score = score.clamp(0, 100);
        let bucket = if score < 40 {
            "conservative"
        } else if score <= 70 {
            "moderate"
        } else {
            "aggressive"
        };

        Ok(json!({
            "risk_score": score,
            "risk_bucket": bucket,
            "factors": factors,
        }))
    }
}

//
// ================= spending_summary =================
//

pub struct SpendingSummaryTool;

#[async_trait::async_trait]
impl Tool for SpendingSummaryTool {
    fn name(&self) -> &'static str {
        "spending_summary"
    }

    fn description(&self) -> &'static str {
        "Summarize categorized expenses with totals and per-category shares"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParameterSpec::required("expenses", ParamKind::Object, "Map of category to monthly amount"),
            ParameterSpec::optional("monthly_income", ParamKind::Number, "Gross monthly income"),
        ])
    }

    async fn call(&self, args: &Value) -> Result<Value> {
        let expenses = args
            .get("expenses")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        if expenses.is_empty() {
            return Err(domain_error(self.name(), "expenses must not be empty"));
        }

        let mut total = 0.0;
        let mut top_category: Option<(&str, f64)> = None;
        for (category, amount) in &expenses {
            let Some(amount) = amount.as_f64() else {
                return Err(domain_error(
                    self.name(),
                    format!("expense '{category}' must be a number"),
                ));
            };
            if amount < 0.0 {
                return Err(domain_error(
                    self.name(),
                    format!("expense '{category}' must not be negative"),
                ));
            }
            total += amount;
            if top_category.map_or(true, |(_, top)| amount > top) {
                top_category = Some((category, amount));
            }
        }

        let mut breakdown = Map::new();
        if total > 0.0 {
            for (category, amount) in &expenses {
                let amount = amount.as_f64().unwrap_or(0.0);
                breakdown.insert(
                    category.clone(),
                    json!(round2(amount / total * 100.0)),
                );
            }
        }

        let mut out = json!({
            "total_spend": round2(total),
            "top_category": top_category.map(|(name, _)| name),
            "breakdown_percent": Value::Object(breakdown),
        });

        if let Some(income) = number(args, "monthly_income") {
            if income > 0.0 {
                out["savings_potential"] = json!(round2(income - total));
                out["expense_ratio_percent"] = json!(round2(total / income * 100.0));
            }
        }

        Ok(out)
    }
}

/// Create the default registry with every built-in calculator registered.
pub fn create_default_registry() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(CalculateEmiTool))?;
    registry.register(Arc::new(SavingsRateTool))?;
    registry.register(Arc::new(ProjectGrowthTool))?;
    registry.register(Arc::new(RiskScoreTool))?;
    registry.register(Arc::new(SpendingSummaryTool))?;

    Ok(registry)
}
