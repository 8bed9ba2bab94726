use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const NOT_PROVIDED: &str = "Not provided";
pub const QUARTERS_PER_YEAR: u8 = 4;
pub const WEEKS_PER_QUARTER: usize = 13;
pub const DAYS_PER_WEEK: usize = 7;

/// Onboarding answers. Every field is optional; blanks render as [`NOT_PROVIDED`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct UserProfile {
    pub identity_statement: Option<String>,
    pub purpose: Option<String>,
    pub yearly_goal: Option<String>,
    pub daily_time_capacity: Option<String>,
    pub habit_focus: Option<String>,
    pub health_focus: Option<String>,
    pub friction_triggers: Option<String>,
}

impl UserProfile {
    pub fn answer(value: &Option<String>) -> &str {
        match value.as_deref().map(str::trim) {
            Some(answer) if !answer.is_empty() => answer,
            _ => NOT_PROVIDED,
        }
    }

    pub fn identity_statement(&self) -> &str {
        Self::answer(&self.identity_statement)
    }

    pub fn purpose(&self) -> &str {
        Self::answer(&self.purpose)
    }

    pub fn yearly_goal(&self) -> &str {
        Self::answer(&self.yearly_goal)
    }

    pub fn daily_time_capacity(&self) -> &str {
        Self::answer(&self.daily_time_capacity)
    }

    pub fn habit_focus(&self) -> &str {
        Self::answer(&self.habit_focus)
    }

    pub fn health_focus(&self) -> &str {
        Self::answer(&self.health_focus)
    }

    pub fn friction_triggers(&self) -> &str {
        Self::answer(&self.friction_triggers)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedPlanDocument {
    pub identity_summary: String,
    pub yearly_goal: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub time_commitment: String,
    #[serde(default)]
    pub estimated_duration: String,
    #[serde(default)]
    pub reflection: String,
    pub quarters: Vec<QuarterPlan>,
    pub micro_steps: Vec<String>,
    pub habits: Vec<HabitSuggestion>,
}

impl GeneratedPlanDocument {
    pub fn quarter(&self, id: u8) -> Option<&QuarterPlan> {
        self.quarters.iter().find(|quarter| quarter.quarter == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarterPlan {
    pub quarter: u8,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub focus: String,
    #[serde(default)]
    pub milestone: String,
    #[serde(default)]
    pub weeks: Vec<WeekPlan>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekPlan {
    #[serde(default)]
    pub week: u8,
    #[serde(default)]
    pub focus: String,
    #[serde(default)]
    pub days: Vec<DayTask>,
}

impl WeekPlan {
    /// A week counts as planned when it has days and every day is named.
    pub fn is_populated(&self) -> bool {
        !self.days.is_empty() && self.days.iter().all(|day| !day.day.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayTask {
    pub day: String,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitSuggestion {
    pub name: String,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub cue: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanSource {
    Cache,
    Generated,
    Synthesized,
    StaleCache,
}

impl PlanSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Generated => "generated",
            Self::Synthesized => "synthesized",
            Self::StaleCache => "stale-cache",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOptions {
    pub force_refresh: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOutcome {
    pub document: GeneratedPlanDocument,
    pub warnings: Vec<String>,
    pub source: PlanSource,
    pub generated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureArea {
    Journal,
    Challenges,
    DailyActivity,
    HabitLog,
}

impl FeatureArea {
    pub const ALL: [FeatureArea; 4] = [
        FeatureArea::Journal,
        FeatureArea::Challenges,
        FeatureArea::DailyActivity,
        FeatureArea::HabitLog,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Journal => "journal",
            Self::Challenges => "challenges",
            Self::DailyActivity => "daily_activity",
            Self::HabitLog => "habit_log",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|area| area.as_str() == value)
    }

    /// Key the pre-migration build stored this area under.
    pub fn legacy_key(self, user_id: &str) -> String {
        match self {
            Self::Journal => format!("journal_entries_{}", user_id),
            Self::Challenges => format!("challenges_{}", user_id),
            Self::DailyActivity => format!("daily_activity_{}", user_id),
            Self::HabitLog => format!("habit_log_{}", user_id),
        }
    }

    pub fn flag_key(self, user_id: &str) -> String {
        format!("migrated:{}:{}", self.as_str(), user_id)
    }
}

/// Durable-tier row for one migrated feature record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRecordRow {
    pub user_id: String,
    pub feature_area: FeatureArea,
    pub record_key: String,
    pub payload: serde_json::Value,
    pub recorded_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}
