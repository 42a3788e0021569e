//! crates/companion_core/src/report.rs
//!
//! Weekly report cache-refresh policy.
//!
//! A report is cached per child and ISO week. Opening the history recomputes it
//! only when no report exists for the current week, or when enough new sessions
//! have accumulated since the cached report's snapshot.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::{ChildProfile, ConversationSession, WeekId, WeeklyReport};
use crate::ports::{DatabaseService, PortError, PortResult, ReportGenerationService};

/// New sessions needed since the last snapshot before a report is regenerated.
pub const REGENERATION_THRESHOLD: u32 = 10;

/// Sessions shorter than this are too thin to summarize.
pub const MIN_TURNS_FOR_REPORT: u32 = 3;

pub const EMPTY_WEEK_SUMMARY: &str =
    "No conversations long enough to summarize yet this week. Check back after a few more chats!";

/// Decides whether the cached report must be regenerated.
///
/// A session count lower than the snapshot (e.g. after deletions) never triggers regeneration.
pub fn should_regenerate(snapshot: Option<u32>, session_count: u32) -> bool {
    match snapshot {
        None => true,
        Some(snapshot) => session_count.saturating_sub(snapshot) >= REGENERATION_THRESHOLD,
    }
}

/// Sessions from `week` with enough turns to be worth summarizing, in input order.
pub fn qualifying_sessions(
    sessions: &[ConversationSession],
    week: WeekId,
) -> Vec<&ConversationSession> {
    sessions
        .iter()
        .filter(|s| week.contains(s.started_at) && s.turn_count >= MIN_TURNS_FOR_REPORT)
        .collect()
}

pub fn build_report_prompt(
    child: &ChildProfile,
    sessions: &[&ConversationSession],
    week: WeekId,
) -> String {
    let mut prompt = format!(
        "You are writing a short weekly update for a parent about their child's conversations \
         with a friendly voice companion.\n\nChild: {}",
        child.name
    );
    if let Some(age) = child.age {
        prompt.push_str(&format!(", age {}", age));
    }
    if !child.interests.is_empty() {
        prompt.push_str(&format!(". Interests: {}", child.interests.join(", ")));
    }
    prompt.push_str(&format!(
        ".\nWeek: {} ({} to {}).\nConversations this week ({}):\n",
        week,
        week.start().format("%b %-d"),
        (week.end() - chrono::Duration::days(1)).format("%b %-d"),
        sessions.len()
    ));

    for (i, session) in sessions.iter().enumerate() {
        let length = match session.duration() {
            Some(d) => format!("{} min", d.num_minutes().max(1)),
            None => "unfinished".to_string(),
        };
        prompt.push_str(&format!(
            "{}. {} - {} turns, {}",
            i + 1,
            session.started_at.format("%A %H:%M"),
            session.turn_count,
            length
        ));
        if let Some(opening) = &session.opening_line {
            prompt.push_str(&format!(", started with: \"{}\"", opening));
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "\nRespond with ONLY a JSON object of the form \
         {\"summary\": string, \"highlights\": [string], \"suggestions\": [string]}. \
         The summary is 2-3 warm sentences. Give up to 3 highlights and up to 2 suggestions \
         for things the parent could talk about with the child. No markdown.",
    );
    prompt
}

/// The constrained shape the model is asked to return.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReportContent {
    pub summary: String,
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReportParseError {
    #[error("no JSON object found in model output")]
    NoJson,
    #[error("malformed report JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("report summary is empty")]
    EmptySummary,
}

/// Extracts the report JSON from model output, tolerating code fences and surrounding prose.
pub fn parse_report_content(raw: &str) -> Result<ReportContent, ReportParseError> {
    let start = raw.find('{').ok_or(ReportParseError::NoJson)?;
    let end = raw.rfind('}').ok_or(ReportParseError::NoJson)?;
    if end < start {
        return Err(ReportParseError::NoJson);
    }

    let mut content: ReportContent = serde_json::from_str(&raw[start..=end])?;
    content.summary = content.summary.trim().to_string();
    if content.summary.is_empty() {
        return Err(ReportParseError::EmptySummary);
    }
    let clean = |items: Vec<String>| -> Vec<String> {
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    };
    content.highlights = clean(content.highlights);
    content.suggestions = clean(content.suggestions);
    Ok(content)
}

/// Returns the current week's report for `child`, regenerating it when the policy says so.
pub async fn refresh_weekly_report(
    db: &dyn DatabaseService,
    generator: &dyn ReportGenerationService,
    child: &ChildProfile,
    now: DateTime<Utc>,
) -> PortResult<WeeklyReport> {
    let week = WeekId::containing(now);
    let cached = db.get_weekly_report(child.id, week).await?;
    let session_count = db.count_sessions_for_child(child.id).await?;

    let snapshot = cached.as_ref().map(|r| r.session_count_snapshot);
    if !should_regenerate(snapshot, session_count) {
        if let Some(report) = cached {
            return Ok(report);
        }
    }

    info!(
        "Regenerating weekly report {} for child {} (sessions: {}, snapshot: {:?})",
        week, child.id, session_count, snapshot
    );

    let sessions = db
        .list_sessions_between(child.id, week.start(), week.end())
        .await?;
    let qualifying = qualifying_sessions(&sessions, week);

    if qualifying.is_empty() {
        // Not cached, so the first qualifying session is summarized on the next refresh.
        return Ok(WeeklyReport {
            child_id: child.id,
            week,
            summary: EMPTY_WEEK_SUMMARY.to_string(),
            highlights: Vec::new(),
            suggestions: Vec::new(),
            sessions_considered: 0,
            session_count_snapshot: session_count,
            generated_at: now,
        });
    }

    let prompt = build_report_prompt(child, &qualifying, week);
    let generated = generator.generate_report(&prompt).await.and_then(|raw| {
        parse_report_content(&raw)
            .map_err(|e| PortError::Unexpected(format!("Weekly report generation failed: {}", e)))
    });
    let content = match (generated, cached) {
        (Ok(content), _) => content,
        (Err(e), Some(previous)) => {
            warn!("Serving the previous weekly report for child {}: {}", child.id, e);
            return Ok(previous);
        }
        (Err(e), None) => return Err(e),
    };

    let report = WeeklyReport {
        child_id: child.id,
        week,
        summary: content.summary,
        highlights: content.highlights,
        suggestions: content.suggestions,
        sessions_considered: qualifying.len() as u32,
        session_count_snapshot: session_count,
        generated_at: now,
    };
    db.upsert_weekly_report(&report).await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn session(started_at: DateTime<Utc>, turn_count: u32) -> ConversationSession {
        ConversationSession {
            id: Uuid::new_v4(),
            child_id: Uuid::nil(),
            user_id: Uuid::nil(),
            started_at,
            ended_at: Some(started_at + chrono::Duration::minutes(6)),
            turn_count,
            opening_line: Some("Do dinosaurs sleep?".to_string()),
        }
    }

    fn child() -> ChildProfile {
        ChildProfile {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            name: "Mina".to_string(),
            age: Some(6),
            interests: vec!["dinosaurs".to_string(), "drawing".to_string()],
            photo_path: None,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn regenerates_without_snapshot() {
        assert!(should_regenerate(None, 0));
        assert!(should_regenerate(None, 25));
    }

    #[test]
    fn regenerates_only_at_threshold() {
        assert!(!should_regenerate(Some(4), 13));
        assert!(should_regenerate(Some(4), 14));
        assert!(should_regenerate(Some(4), 40));
        assert!(!should_regenerate(Some(20), 5));
    }

    #[test]
    fn threshold_property_holds_over_a_grid() {
        for snapshot in 0..30u32 {
            for count in 0..60u32 {
                let expected = count >= snapshot && count - snapshot >= 10;
                assert_eq!(should_regenerate(Some(snapshot), count), expected);
            }
        }
    }

    #[test]
    fn filters_short_and_out_of_week_sessions() {
        let week: WeekId = "2026-W42".parse().unwrap();
        let inside = Utc.with_ymd_and_hms(2026, 10, 14, 17, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2026, 10, 11, 23, 59, 0).unwrap();
        let sessions = vec![
            session(inside, 3),
            session(inside, 2),
            session(before, 12),
            session(week.end(), 8),
        ];
        let kept = qualifying_sessions(&sessions, week);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, sessions[0].id);
    }

    #[test]
    fn prompt_mentions_child_and_sessions() {
        let week: WeekId = "2026-W42".parse().unwrap();
        let s = session(Utc.with_ymd_and_hms(2026, 10, 14, 17, 0, 0).unwrap(), 7);
        let prompt = build_report_prompt(&child(), &[&s], week);
        assert!(prompt.contains("Mina, age 6"));
        assert!(prompt.contains("dinosaurs, drawing"));
        assert!(prompt.contains("2026-W42 (Oct 12 to Oct 18)"));
        assert!(prompt.contains("Wednesday 17:00 - 7 turns, 6 min"));
        assert!(prompt.contains("Do dinosaurs sleep?"));
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "```json\n{\"summary\": \" Mina loved talking about dinosaurs. \", \
                   \"highlights\": [\"Asked why T. rex had small arms\", \"\"], \
                   \"suggestions\": [\"Visit a museum\"]}\n```";
        let content = parse_report_content(raw).unwrap();
        assert_eq!(content.summary, "Mina loved talking about dinosaurs.");
        assert_eq!(content.highlights, vec!["Asked why T. rex had small arms"]);
        assert_eq!(content.suggestions, vec!["Visit a museum"]);
    }

    #[test]
    fn missing_lists_default_to_empty() {
        let content = parse_report_content("{\"summary\": \"Quiet week.\"}").unwrap();
        assert!(content.highlights.is_empty());
        assert!(content.suggestions.is_empty());
    }

    #[test]
    fn rejects_unusable_output() {
        assert!(matches!(
            parse_report_content("Sorry, I can't help with that."),
            Err(ReportParseError::NoJson)
        ));
        assert!(matches!(
            parse_report_content("{\"summary\": \"   \"}"),
            Err(ReportParseError::EmptySummary)
        ));
        assert!(matches!(
            parse_report_content("{\"highlights\": []}"),
            Err(ReportParseError::Malformed(_))
        ));
    }
}
