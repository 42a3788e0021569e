//! crates/companion_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Returned when a stored tag does not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

//=========================================================================================
// Accounts
//=========================================================================================

// Represents a parent account - used throughout app
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: Uuid,
    pub email: Option<String>,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

// Represents a browser login session (auth cookie)
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// A child profile owned by a parent account.
#[derive(Debug, Clone)]
pub struct ChildProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub age: Option<u8>,
    pub interests: Vec<String>,
    pub photo_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Conversations
//=========================================================================================

/// One bounded conversation between a child and the companion.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    pub id: Uuid,
    pub child_id: Uuid,
    pub user_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Incremented together with every appended turn.
    pub turn_count: u32,
    /// The first thing the child said in this session.
    pub opening_line: Option<String>,
}

impl ConversationSession {
    /// Elapsed time between start and end, if the session has ended.
    pub fn duration(&self) -> Option<Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Speaker {
    Child,
    Companion,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Child => "child",
            Speaker::Companion => "companion",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Speaker {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "child" => Ok(Speaker::Child),
            "companion" => Ok(Speaker::Companion),
            other => Err(UnknownVariant {
                kind: "speaker",
                value: other.to_string(),
            }),
        }
    }
}

/// A single utterance within a session.
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: Uuid,
    pub session_id: Uuid,
    /// 1-based position within the session.
    pub sequence: u32,
    pub speaker: Speaker,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Phrase Cards
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhraseCategory {
    Greeting,
    Feelings,
    Routine,
    Play,
    Learning,
    Custom,
}

impl PhraseCategory {
    pub const ALL: [PhraseCategory; 6] = [
        PhraseCategory::Greeting,
        PhraseCategory::Feelings,
        PhraseCategory::Routine,
        PhraseCategory::Play,
        PhraseCategory::Learning,
        PhraseCategory::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhraseCategory::Greeting => "greeting",
            PhraseCategory::Feelings => "feelings",
            PhraseCategory::Routine => "routine",
            PhraseCategory::Play => "play",
            PhraseCategory::Learning => "learning",
            PhraseCategory::Custom => "custom",
        }
    }
}

impl fmt::Display for PhraseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhraseCategory {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PhraseCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "phrase category",
                value: s.to_string(),
            })
    }
}

/// A short prompt phrase a parent can hand to the companion.
#[derive(Debug, Clone)]
pub struct PhraseCard {
    pub id: Uuid,
    pub user_id: Uuid,
    pub text: String,
    pub category: PhraseCategory,
    pub is_preset: bool,
    pub usage_count: u32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Weekly Reports
//=========================================================================================

/// An ISO-8601 week, e.g. `2026-W42`.
///
/// Internally anchored on the week's Monday so that every value is a real week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WeekId {
    monday: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid ISO week identifier: '{0}'")]
pub struct InvalidWeekId(pub String);

impl WeekId {
    /// Builds a week from an ISO year and week number, rejecting weeks that do not exist.
    pub fn new(year: i32, week: u32) -> Option<Self> {
        NaiveDate::from_isoywd_opt(year, week, Weekday::Mon).map(|monday| Self { monday })
    }

    /// The ISO week that contains the given instant (UTC).
    pub fn containing(at: DateTime<Utc>) -> Self {
        let date = at.date_naive();
        let offset = i64::from(date.weekday().num_days_from_monday());
        Self {
            monday: date - Duration::days(offset),
        }
    }

    pub fn year(&self) -> i32 {
        self.monday.iso_week().year()
    }

    pub fn week(&self) -> u32 {
        self.monday.iso_week().week()
    }

    /// Monday 00:00 UTC.
    pub fn start(&self) -> DateTime<Utc> {
        self.monday.and_time(NaiveTime::MIN).and_utc()
    }

    /// The following Monday 00:00 UTC (exclusive).
    pub fn end(&self) -> DateTime<Utc> {
        self.start() + Duration::days(7)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start() && at < self.end()
    }
}

impl fmt::Display for WeekId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-W{:02}", self.year(), self.week())
    }
}

impl FromStr for WeekId {
    type Err = InvalidWeekId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidWeekId(s.to_string());
        let (year, week) = s.split_once("-W").ok_or_else(invalid)?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let week = week.parse::<u32>().map_err(|_| invalid())?;
        WeekId::new(year, week).ok_or_else(invalid)
    }
}

/// A cached, AI-generated summary of one child's week.
#[derive(Debug, Clone)]
pub struct WeeklyReport {
    pub child_id: Uuid,
    pub week: WeekId,
    pub summary: String,
    pub highlights: Vec<String>,
    pub suggestions: Vec<String>,
    /// How many sessions fed the prompt.
    pub sessions_considered: u32,
    /// The child's total session count when this report was generated.
    pub session_count_snapshot: u32,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn week_id_formats_and_parses() {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 15, 30, 0).unwrap();
        let week = WeekId::containing(at);
        assert_eq!(week.to_string(), "2026-W42");
        assert_eq!("2026-W42".parse::<WeekId>().unwrap(), week);
    }

    #[test]
    fn week_bounds_are_monday_to_monday() {
        let week: WeekId = "2026-W42".parse().unwrap();
        assert_eq!(week.start(), Utc.with_ymd_and_hms(2026, 10, 12, 0, 0, 0).unwrap());
        assert_eq!(week.end(), Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap());
        assert!(week.contains(Utc.with_ymd_and_hms(2026, 10, 18, 23, 59, 59).unwrap()));
        assert!(!week.contains(week.end()));
    }

    #[test]
    fn iso_year_differs_from_calendar_year_at_boundary() {
        // 2027-01-01 is a Friday and belongs to 2026-W53.
        let at = Utc.with_ymd_and_hms(2027, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(WeekId::containing(at).to_string(), "2026-W53");
    }

    #[test]
    fn rejects_nonexistent_weeks() {
        assert!("2025-W53".parse::<WeekId>().is_err());
        assert!("2026-42".parse::<WeekId>().is_err());
        assert!(WeekId::new(2026, 0).is_none());
    }

    #[test]
    fn tags_round_trip_through_strings() {
        assert_eq!("companion".parse::<Speaker>().unwrap(), Speaker::Companion);
        assert_eq!("feelings".parse::<PhraseCategory>().unwrap(), PhraseCategory::Feelings);
        let err = "robot".parse::<Speaker>().unwrap_err();
        assert_eq!(err.kind, "speaker");
    }
}
