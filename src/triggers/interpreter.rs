//! Free-text schedule interpretation
//!
//! Turns phrases such as "every weekday at 8:30am" into a 5-field cron
//! expression. The registry treats the interpreter as fallible: when it
//! cannot make sense of the text the trigger falls back to the daily default.

use crate::error::{Error, Result};
use async_trait::async_trait;
use croner::parser::{CronParser, Seconds};
use croner::Cron;
use regex::Regex;
use std::sync::LazyLock;

/// Daily at 09:00
pub const DEFAULT_CRON: &str = "0 9 * * *";
pub const DEFAULT_TIMEZONE: &str = "UTC";

#[async_trait]
pub trait ScheduleInterpreter: Send + Sync {
    /// Produce a 5-field cron expression for `text`.
    async fn parse(&self, text: &str) -> Result<String>;
}

/// Check that `expression` is a 5-field cron expression the timer backend
/// will accept.
pub fn validate_cron(expression: &str) -> Result<()> {
    parse_cron(expression).map(|_| ())
}

/// Parse a 5-field expression exactly as the timer backend does: a leading
/// seconds field of `0`, and day-of-month and day-of-week combined with AND,
/// so `0 9 1 * 1` only fires when the 1st is a Monday.
pub fn parse_cron(expression: &str) -> Result<Cron> {
    let trimmed = expression.trim();
    let fields = trimmed.split_whitespace().count();
    if fields != 5 {
        return Err(Error::Configuration(format!(
            "cron expression '{trimmed}' must have 5 fields, found {fields}"
        )));
    }
    CronParser::builder()
        .seconds(Seconds::Required)
        .dom_and_dow(true)
        .build()
        .parse(&format!("0 {trimmed}"))
        .map_err(|e| Error::Configuration(format!("invalid cron expression '{trimmed}': {e}")))
}

// Minutes are always two digits; "at 9:5" must not read as 09:00
static AT_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bat\s+(\d{1,2})(?::(\d+))?\s*(am|pm)?\b").expect("time regex is valid")
});

static EVERY_N: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^every\s+(\d+)\s+(minute|hour|day)s?$").expect("interval regex is valid")
});

const WEEKDAYS: [(&str, u8); 7] = [
    ("sunday", 0),
    ("monday", 1),
    ("tuesday", 2),
    ("wednesday", 3),
    ("thursday", 4),
    ("friday", 5),
    ("saturday", 6),
];

/// Deterministic phrase matcher covering the common English schedules.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedScheduleInterpreter;

impl RuleBasedScheduleInterpreter {
    fn interpret(text: &str) -> Option<String> {
        let lower = text.trim().to_lowercase();
        let lower = lower.trim_end_matches('.');

        match lower {
            "every minute" | "minutely" => return Some("* * * * *".to_string()),
            "every hour" | "hourly" => return Some("0 * * * *".to_string()),
            "every day" | "daily" => return Some(DEFAULT_CRON.to_string()),
            "every week" | "weekly" => return Some("0 9 * * 1".to_string()),
            "every month" | "monthly" => return Some("0 9 1 * *".to_string()),
            _ => {}
        }

        if let Some(caps) = EVERY_N.captures(lower) {
            let n: u32 = caps[1].parse().ok().filter(|n| *n > 0)?;
            return match &caps[2] {
                "minute" if n < 60 => Some(format!("*/{n} * * * *")),
                "hour" if n < 24 => Some(format!("0 */{n} * * *")),
                "day" if n < 32 => Some(format!("0 9 */{n} * *")),
                _ => None,
            };
        }

        let (hour, minute) = match AT_TIME.captures(lower) {
            Some(caps) => {
                let end = caps.get(0).map_or(0, |m| m.end());
                if lower[end..].starts_with(':') {
                    return None;
                }
                let mut hour: u32 = caps[1].parse().ok()?;
                let minute: u32 = match caps.get(2) {
                    Some(m) if m.as_str().len() == 2 => m.as_str().parse().ok()?,
                    Some(_) => return None,
                    None => 0,
                };
                match caps.get(3).map(|m| m.as_str()) {
                    Some("pm") if hour < 12 => hour += 12,
                    Some("am") if hour == 12 => hour = 0,
                    _ => {}
                }
                if hour > 23 || minute > 59 {
                    return None;
                }
                (hour, minute)
            }
            None if lower.contains("midnight") => (0, 0),
            None if lower.contains("noon") => (12, 0),
            None => (9, 0),
        };

        let day_of_week = if lower.contains("weekday") {
            "1-5".to_string()
        } else if lower.contains("weekend") {
            "0,6".to_string()
        } else {
            let days: Vec<String> = WEEKDAYS
                .iter()
                .filter(|(name, _)| lower.contains(name))
                .map(|(_, n)| n.to_string())
                .collect();
            if days.is_empty() {
                if !(lower.starts_with("every day")
                    || lower.starts_with("daily")
                    || lower.starts_with("each day")
                    || lower.starts_with("every morning")
                    || lower.starts_with("every evening")
                    || lower.starts_with("at "))
                {
                    return None;
                }
                "*".to_string()
            } else {
                days.join(",")
            }
        };

        Some(format!("{minute} {hour} * * {day_of_week}"))
    }
}

#[async_trait]
impl ScheduleInterpreter for RuleBasedScheduleInterpreter {
    async fn parse(&self, text: &str) -> Result<String> {
        let cron = Self::interpret(text).ok_or_else(|| {
            Error::Configuration(format!("could not interpret schedule '{}'", text.trim()))
        })?;
        validate_cron(&cron)?;
        tracing::debug!("🕘 Interpreted schedule '{}' as '{}'", text.trim(), cron);
        Ok(cron)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(text: &str) -> Result<String> {
        RuleBasedScheduleInterpreter.parse(text).await
    }

    #[tokio::test]
    async fn test_common_phrases() {
        assert_eq!(parse("every day at 9am").await.unwrap(), "0 9 * * *");
        assert_eq!(parse("Every day at 6:30 PM").await.unwrap(), "30 18 * * *");
        assert_eq!(parse("every 15 minutes").await.unwrap(), "*/15 * * * *");
        assert_eq!(parse("every 2 hours").await.unwrap(), "0 */2 * * *");
        assert_eq!(parse("hourly").await.unwrap(), "0 * * * *");
        assert_eq!(parse("every weekday at 8:30am").await.unwrap(), "30 8 * * 1-5");
        assert_eq!(parse("every monday at 8am").await.unwrap(), "0 8 * * 1");
        assert_eq!(
            parse("every monday and friday at noon").await.unwrap(),
            "0 12 * * 1,5"
        );
        assert_eq!(parse("daily at midnight").await.unwrap(), "0 0 * * *");
    }

    #[tokio::test]
    async fn test_unrecognized_text_is_an_error() {
        assert!(parse("whenever the moon is full").await.is_err());
        assert!(parse("every 0 minutes").await.is_err());
        assert!(parse("every day at 25:00").await.is_err());
        assert!(parse("every day at 9:5").await.is_err());
        assert!(parse("every day at 9:555").await.is_err());
        assert!(parse("at 9:").await.is_err());
    }

    #[test]
    fn test_validate_cron() {
        assert!(validate_cron("0 9 * * *").is_ok());
        assert!(validate_cron("*/5 * * * 1-5").is_ok());
        assert!(validate_cron("0 9 * *").is_err());
        assert!(validate_cron("61 9 * * *").is_err());
        assert!(validate_cron("banana").is_err());
    }

    #[test]
    fn test_day_of_month_and_weekday_must_both_match() {
        use chrono::{Datelike, TimeZone, Utc, Weekday};

        let cron = parse_cron("0 9 1 * 1").unwrap();
        // Monday 1 January 2024; the next Monday the 1st is 1 April
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let next = cron.find_next_occurrence(&start, false).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap());
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next.day(), 1);
    }
}
