use crate::errors::{AppError, AppResult};
use crate::models::{GeneratedPlanDocument, QuarterPlan, QUARTERS_PER_YEAR, WEEKS_PER_QUARTER};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Result of a successful validation. Depth problems ride along as warnings.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPlan {
    pub document: GeneratedPlanDocument,
    pub audit: DepthAudit,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarterDepth {
    pub has_weekly_plan: bool,
    pub week_count: usize,
    pub avg_days_per_week: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DepthAudit {
    pub quarters: BTreeMap<u8, QuarterDepth>,
}

impl DepthAudit {
    pub fn warnings(&self) -> Vec<String> {
        self.quarters
            .iter()
            .filter(|(_, depth)| !depth.has_weekly_plan)
            .map(|(id, depth)| {
                format!(
                    "Q{}: incomplete weekly plan ({} weeks, avg {:.1} days/week)",
                    id, depth.week_count, depth.avg_days_per_week
                )
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.quarters.values().all(|depth| depth.has_weekly_plan)
    }
}

pub fn plan_schema() -> Value {
    json!({
        "type": "object",
        "required": ["identitySummary", "yearlyGoal", "quarters", "microSteps", "habits"],
        "properties": {
            "identitySummary": { "type": "string", "minLength": 1 },
            "yearlyGoal": { "type": "string", "minLength": 1 },
            "purpose": { "type": "string" },
            "timeCommitment": { "type": "string" },
            "estimatedDuration": { "type": "string" },
            "reflection": { "type": "string" },
            "microSteps": { "type": "array", "items": { "type": "string" } },
            "habits": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name"],
                    "properties": {
                        "name": { "type": "string", "minLength": 1 },
                        "frequency": { "type": "string" },
                        "cue": { "type": "string" }
                    }
                }
            },
            "quarters": {
                "type": "array",
                "minItems": 1,
                "maxItems": QUARTERS_PER_YEAR,
                "items": {
                    "type": "object",
                    "required": ["quarter"],
                    "properties": {
                        "quarter": { "type": "integer", "minimum": 1, "maximum": QUARTERS_PER_YEAR },
                        "title": { "type": "string" },
                        "focus": { "type": "string" },
                        "milestone": { "type": "string" },
                        "weeks": {
                            "type": "array",
                            "maxItems": WEEKS_PER_QUARTER,
                            "items": {
                                "type": "object",
                                "properties": {
                                    "week": { "type": "integer", "minimum": 1, "maximum": WEEKS_PER_QUARTER },
                                    "focus": { "type": "string" },
                                    "days": {
                                        "type": "array",
                                        "maxItems": 7,
                                        "items": {
                                            "type": "object",
                                            "required": ["day"],
                                            "properties": {
                                                "day": { "type": "string", "minLength": 1 },
                                                "task": { "type": "string" },
                                                "description": { "type": "string" }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}

/// Parse, shape-check and depth-audit sanitized generator output.
pub fn validate_plan(text: &str) -> AppResult<ValidatedPlan> {
    let value = parse_json_value(text)?;
    let errors = schema_errors(&value, &plan_schema())?;
    if !errors.is_empty() {
        return Err(AppError::Schema(errors));
    }

    let document: GeneratedPlanDocument =
        serde_json::from_value(value).map_err(|error| AppError::Schema(vec![error.to_string()]))?;
    let duplicates = duplicate_quarters(&document);
    if !duplicates.is_empty() {
        return Err(AppError::Schema(
            duplicates
                .into_iter()
                .map(|id| format!("/quarters: quarter {} appears more than once", id))
                .collect(),
        ));
    }

    let audit = audit_depth(&document);
    let warnings = audit.warnings();
    Ok(ValidatedPlan {
        document,
        audit,
        warnings,
    })
}

/// Measure how fully each quarter's weekly plan was populated.
pub fn audit_depth(document: &GeneratedPlanDocument) -> DepthAudit {
    let quarters = (1..=QUARTERS_PER_YEAR)
        .map(|id| (id, quarter_depth(document.quarter(id))))
        .collect();
    DepthAudit { quarters }
}

fn quarter_depth(quarter: Option<&QuarterPlan>) -> QuarterDepth {
    let Some(quarter) = quarter else {
        return QuarterDepth {
            has_weekly_plan: false,
            week_count: 0,
            avg_days_per_week: 0.0,
        };
    };

    let week_count = quarter.weeks.len();
    let populated = quarter.weeks.iter().filter(|week| week.is_populated()).count();
    let total_days: usize = quarter.weeks.iter().map(|week| week.days.len()).sum();
    let avg_days_per_week = if week_count == 0 {
        0.0
    } else {
        total_days as f64 / week_count as f64
    };

    // Half of the weeks a quarter should have, not just the ones it got.
    let expected = week_count.max(WEEKS_PER_QUARTER);
    QuarterDepth {
        has_weekly_plan: populated > 0 && populated * 2 >= expected,
        week_count,
        avg_days_per_week,
    }
}

fn duplicate_quarters(document: &GeneratedPlanDocument) -> Vec<u8> {
    let mut seen = BTreeSet::new();
    let mut duplicates = BTreeSet::new();
    for quarter in &document.quarters {
        if !seen.insert(quarter.quarter) {
            duplicates.insert(quarter.quarter);
        }
    }
    duplicates.into_iter().collect()
}

fn parse_json_value(raw: &str) -> AppResult<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::Parse("structured output is empty".to_string()));
    }
    serde_json::from_str(trimmed).map_err(|error| {
        AppError::Parse(format!(
            "structured output is not valid JSON (line {}, column {}): {}",
            error.line(),
            error.column(),
            error
        ))
    })
}

fn schema_errors(value: &Value, schema: &Value) -> AppResult<Vec<String>> {
    let compiled = jsonschema::JSONSchema::compile(schema)
        .map_err(|error| AppError::Internal(format!("failed to compile plan schema: {}", error)))?;

    let errors: Vec<String> = compiled
        .validate(value)
        .err()
        .map(|errors| {
            errors
                .map(|error| {
                    let path = error.instance_path.to_string();
                    if path.is_empty() {
                        error.to_string()
                    } else {
                        format!("{}: {}", path, error)
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    Ok(errors)
}
