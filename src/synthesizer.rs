//! Deterministic local plan for when no generator is configured.
//!
//! Activities are picked from keyword-triggered templates so the output is a
//! pure function of the profile, like the prompt.

use crate::models::{
    DayTask, GeneratedPlanDocument, HabitSuggestion, QuarterPlan, UserProfile, WeekPlan, NOT_PROVIDED,
    QUARTERS_PER_YEAR, WEEKS_PER_QUARTER,
};

const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

struct Track {
    keywords: &'static [&'static str],
    name: &'static str,
    quarter_focus: [&'static str; 4],
    activities: [&'static str; 7],
    habit: &'static str,
}

const TRACKS: &[Track] = &[
    Track {
        keywords: &["app", "ship", "code", "software", "startup", "product", "launch"],
        name: "building",
        quarter_focus: [
            "Foundations and first prototype",
            "Core features end to end",
            "Polish, testing and beta users",
            "Launch and iterate on feedback",
        ],
        activities: [
            "Write the week's feature list in the project README",
            "Build one screen or endpoint from the feature list",
            "Write tests for yesterday's work and fix what breaks",
            "Read one chapter of the framework's official guide and apply it",
            "Ship a build to a test device and note three issues",
            "Show the build to one person and record their reaction",
            "Review the week in the changelog and plan next week",
        ],
        habit: "Open the project before checking messages",
    },
    Track {
        keywords: &["run", "fitness", "health", "weight", "marathon", "gym", "strength"],
        name: "training",
        quarter_focus: [
            "Consistency and base fitness",
            "Progressive load",
            "Performance block",
            "Peak and sustain",
        ],
        activities: [
            "Easy 20-minute run logged in a training app",
            "Bodyweight strength circuit from a saved routine",
            "Interval session: 6 x 1 minute hard, 2 minutes easy",
            "Mobility follow-along video, 15 minutes",
            "Tempo run at conversational-plus pace",
            "Long slow session, 10% longer than last week",
            "Rest day: meal prep and a weekly progress photo",
        ],
        habit: "Lay out workout clothes the night before",
    },
    Track {
        keywords: &["write", "book", "blog", "novel", "author", "newsletter"],
        name: "writing",
        quarter_focus: [
            "Outline and daily pages",
            "First full draft",
            "Revision passes",
            "Publish and share",
        ],
        activities: [
            "Write 300 words in the draft document",
            "Outline the next section on index cards",
            "Write 500 words without editing",
            "Read one chapter of a book in the same genre and take notes",
            "Revise the week's pages for clarity",
            "Share one excerpt with a reader and collect notes",
            "Update the word-count tracker and plan next week's scenes",
        ],
        habit: "Write before opening the browser",
    },
    Track {
        keywords: &["learn", "study", "language", "course", "exam", "degree", "skill"],
        name: "learning",
        quarter_focus: [
            "Fundamentals",
            "Guided practice",
            "Independent projects",
            "Mastery and teaching others",
        ],
        activities: [
            "Complete one lesson in the chosen course",
            "Make 10 flashcards from the lesson and review them",
            "Do the lesson's practice exercises",
            "Watch one expert talk on the topic and summarise it",
            "Apply the week's material in a small project",
            "Explain one concept out loud or in a short post",
            "Take a self-quiz and list gaps for next week",
        ],
        habit: "Review flashcards with the first coffee",
    },
];

static GENERAL_TRACK: Track = Track {
    keywords: &[],
    name: "general",
    quarter_focus: [
        "Clarify the goal and set up the system",
        "Build momentum",
        "Deepen the practice",
        "Consolidate and reflect",
    ],
    activities: [
        "Write today's single most important action in a notebook",
        "Spend the time block on the goal's hardest task",
        "Research one resource that moves the goal forward",
        "Do the smallest next step on the goal and record it",
        "Ask one person for advice or accountability",
        "Clear one obstacle from the friction list",
        "Weekly review: what worked, what to change",
    ],
    habit: "Start the day by reading the yearly goal",
};

pub fn synthesize_plan(profile: &UserProfile) -> GeneratedPlanDocument {
    let track = select_track(profile);
    let capacity = profile.daily_time_capacity();
    let goal = profile.yearly_goal();

    let quarters = (1..=QUARTERS_PER_YEAR)
        .map(|quarter| build_quarter(track, quarter, capacity))
        .collect();

    let mut habits = vec![HabitSuggestion {
        name: track.habit.to_string(),
        frequency: "daily".to_string(),
        cue: "start of the first time block".to_string(),
    }];
    if profile.health_focus() != NOT_PROVIDED {
        habits.push(HabitSuggestion {
            name: format!("Health: {}", profile.health_focus()),
            frequency: "daily".to_string(),
            cue: "after the main task".to_string(),
        });
    }
    if profile.habit_focus() != NOT_PROVIDED {
        habits.push(HabitSuggestion {
            name: profile.habit_focus().to_string(),
            frequency: "daily".to_string(),
            cue: "same time every day".to_string(),
        });
    }

    GeneratedPlanDocument {
        identity_summary: if profile.identity_statement() != NOT_PROVIDED {
            profile.identity_statement().to_string()
        } else {
            format!("Someone who makes steady {} progress every day", track.name)
        },
        yearly_goal: goal.to_string(),
        purpose: profile.purpose().to_string(),
        time_commitment: capacity.to_string(),
        estimated_duration: "12 months".to_string(),
        reflection: "What did this week's work prove about who you are becoming?".to_string(),
        quarters,
        micro_steps: vec![
            format!("Write \"{}\" where you will see it every morning", goal),
            format!("Block {} in tomorrow's calendar", capacity),
            track.activities[0].to_string(),
        ],
        habits,
    }
}

fn select_track(profile: &UserProfile) -> &'static Track {
    let haystack = format!(
        "{} {} {}",
        profile.yearly_goal(),
        profile.purpose(),
        profile.identity_statement()
    )
    .to_lowercase();
    let words: Vec<&str> = haystack
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();

    TRACKS
        .iter()
        .find(|track| track.keywords.iter().any(|keyword| words.contains(keyword)))
        .unwrap_or(&GENERAL_TRACK)
}

fn build_quarter(track: &Track, quarter: u8, capacity: &str) -> QuarterPlan {
    let focus = track.quarter_focus[usize::from(quarter - 1)];
    let weeks = (1..=WEEKS_PER_QUARTER as u8)
        .map(|week| WeekPlan {
            week,
            focus: format!("{}: week {} of {}", focus, week, WEEKS_PER_QUARTER),
            days: WEEKDAYS
                .iter()
                .enumerate()
                .map(|(index, day)| {
                    let activity = track.activities[(index + usize::from(week) - 1) % track.activities.len()];
                    DayTask {
                        day: day.to_string(),
                        task: activity.to_string(),
                        description: format!("Q{} week {}: {} (within {})", quarter, week, activity, capacity),
                    }
                })
                .collect(),
        })
        .collect();

    QuarterPlan {
        quarter,
        title: format!("Q{}: {}", quarter, focus),
        focus: focus.to_string(),
        milestone: format!("{} complete", focus),
        weeks,
    }
}
