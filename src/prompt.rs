//! Instruction payload for the plan generator.
//!
//! Rendering is a pure function of the profile so a failed generation can be
//! reproduced byte for byte from the same answers.

use crate::models::{UserProfile, DAYS_PER_WEEK, QUARTERS_PER_YEAR, WEEKS_PER_QUARTER};

const WEEKDAYS: [&str; DAYS_PER_WEEK] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

const ROLE: &str = "You are an identity-based planning coach. You turn a person's answers about who they want to become into a complete one-year plan they can act on every day.";

const MISSION: &str = "Produce a yearly plan broken into 4 quarters, each quarter into 13 weeks, and each week into 7 daily tasks. Respond with a single JSON object and nothing else: no markdown, no code fences, no commentary.";

const RULES: &[&str] = &[
    "Every quarter, every week and every day must have a distinct focus. Never repeat a weekly focus inside a quarter.",
    "Never write generic placeholder tasks such as \"Work on goal\", \"Continue progress\", \"TBD\" or \"Task 1\".",
    "Every task must name a concrete resource or action: a specific tool, chapter, exercise, person, place or deliverable.",
    "Size each daily task to fit inside the person's daily time capacity.",
    "Weave habit and health focus into the weekly rhythm and plan around the stated friction triggers.",
    "Write all 4 quarters in full. Do not abbreviate, summarise or say \"repeat for remaining weeks\".",
];

const GOOD_EXAMPLE: &str = r#"{"day": "Tuesday", "task": "Build the login screen in SwiftUI", "description": "Follow Apple's 'Managing user input' tutorial and commit a working email/password form."}"#;

const BAD_EXAMPLE: &str = r#"{"day": "Tuesday", "task": "Work on app", "description": "Make progress on your goal."}"#;

const CHECKLIST: &[&str] = &[
    "Exactly 4 quarters, numbered 1 to 4.",
    "Each quarter has 13 weeks, numbered 1 to 13.",
    "Each week has 7 days, Monday to Sunday, each with a task and a description.",
    "No placeholders, no repeated weekly focus, no abbreviated quarters.",
    "Output is one complete JSON object that parses without edits.",
];

pub fn build_plan_prompt(profile: &UserProfile) -> String {
    let mut prompt = String::with_capacity(8 * 1024);

    prompt.push_str(ROLE);
    prompt.push_str("\n\n");
    prompt.push_str(MISSION);
    prompt.push_str("\n\n=== PROFILE ===\n");
    prompt.push_str(&render_profile(profile));

    prompt.push_str("\n=== PLANNING RULES ===\n");
    for (index, rule) in RULES.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", index + 1, rule));
    }

    prompt.push_str("\n=== EXAMPLES ===\n");
    prompt.push_str("GOOD daily task:\n");
    prompt.push_str(GOOD_EXAMPLE);
    prompt.push_str("\nBAD daily task (never do this):\n");
    prompt.push_str(BAD_EXAMPLE);
    prompt.push('\n');

    prompt.push_str("\n=== OUTPUT FORMAT ===\n");
    prompt.push_str(&render_output_template());

    prompt.push_str("\n=== QUALITY CHECKLIST ===\n");
    for item in CHECKLIST {
        prompt.push_str(&format!("- [ ] {}\n", item));
    }
    prompt.push_str("Before answering, confirm every item above. A plan with placeholders or missing depth is rejected.\n");

    prompt
}

fn render_profile(profile: &UserProfile) -> String {
    let fields = [
        ("Identity statement", profile.identity_statement()),
        ("Purpose", profile.purpose()),
        ("Yearly goal", profile.yearly_goal()),
        ("Daily time capacity", profile.daily_time_capacity()),
        ("Habit focus", profile.habit_focus()),
        ("Health focus", profile.health_focus()),
        ("Friction triggers", profile.friction_triggers()),
    ];
    fields
        .iter()
        .map(|(label, value)| format!("- {}: {}\n", label, value))
        .collect()
}

fn render_output_template() -> String {
    let quarters = (1..=QUARTERS_PER_YEAR)
        .map(render_quarter_template)
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        "{{\n  \"identitySummary\": \"<who this person is becoming, one paragraph>\",\n  \"yearlyGoal\": \"<the goal restated as a measurable outcome>\",\n  \"purpose\": \"<why this matters to them>\",\n  \"timeCommitment\": \"<daily and weekly time budget>\",\n  \"estimatedDuration\": \"<how long until the goal is reached>\",\n  \"reflection\": \"<a short reflection prompt for the year>\",\n  \"quarters\": [\n{}\n  ],\n  \"microSteps\": [\"<first 5-minute action>\", \"<second 5-minute action>\", \"<third 5-minute action>\"],\n  \"habits\": [{{\"name\": \"<habit>\", \"frequency\": \"<how often>\", \"cue\": \"<trigger>\"}}]\n}}\n",
        quarters
    )
}

fn render_quarter_template(quarter: u8) -> String {
    let days = WEEKDAYS
        .iter()
        .map(|day| {
            format!(
                "            {{\"day\": \"{}\", \"task\": \"<concrete task>\", \"description\": \"<resource and expected result>\"}}",
                day
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        "    {{\n      \"quarter\": {q},\n      \"title\": \"<Q{q} theme>\",\n      \"focus\": \"<Q{q} distinct focus>\",\n      \"milestone\": \"<what is true at the end of Q{q}>\",\n      \"weeks\": [\n        {{\n          \"week\": 1,\n          \"focus\": \"<week focus>\",\n          \"days\": [\n{days}\n          ]\n        }}\n        <weeks 2 through {weeks} of Q{q}, same shape, each with its own focus and all 7 days>\n      ]\n    }}",
        q = quarter,
        days = days,
        weeks = WEEKS_PER_QUARTER,
    )
}
