//! Weekday masks for alarm recurrence, evaluated in each alarm's own timezone.

use chrono::Weekday;

use crate::error::TimeError;

/// A non-empty subset of weekdays, stored as a 7-bit mask (bit 0 = Monday).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaysOfWeek(u8);

const ALL: u8 = 0b0111_1111;

impl DaysOfWeek {
    pub const ALL: DaysOfWeek = DaysOfWeek(ALL);

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Parse a comma-separated list like "Mon,Tue,Wed,Thu,Fri,Sat,Sun".
    /// Accepts both three-letter abbreviations and full names, case-insensitively.
    pub fn parse(s: &str) -> Result<Self, TimeError> {
        let mut mask = 0u8;
        for part in s.split(',') {
            let day = parse_weekday(part.trim())?;
            mask |= 1 << day.num_days_from_monday();
        }
        if mask == 0 {
            return Err(TimeError::InvalidWeekday(s.to_string()));
        }
        Ok(DaysOfWeek(mask))
    }

    /// Canonical "Mon,Tue,..." rendering in week order, for storage and display.
    pub fn render(&self) -> String {
        const LABELS: [(&str, u8); 7] = [
            ("Mon", 0),
            ("Tue", 1),
            ("Wed", 2),
            ("Thu", 3),
            ("Fri", 4),
            ("Sat", 5),
            ("Sun", 6),
        ];
        LABELS
            .iter()
            .filter(|(_, bit)| self.0 & (1 << bit) != 0)
            .map(|(label, _)| *label)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for DaysOfWeek {
    fn default() -> Self {
        DaysOfWeek::ALL
    }
}

fn parse_weekday(s: &str) -> Result<Weekday, TimeError> {
    match s.to_lowercase().as_str() {
        "monday" | "mon" => Ok(Weekday::Mon),
        "tuesday" | "tue" => Ok(Weekday::Tue),
        "wednesday" | "wed" => Ok(Weekday::Wed),
        "thursday" | "thu" => Ok(Weekday::Thu),
        "friday" | "fri" => Ok(Weekday::Fri),
        "saturday" | "sat" => Ok(Weekday::Sat),
        "sunday" | "sun" => Ok(Weekday::Sun),
        _ => Err(TimeError::InvalidWeekday(s.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_week() {
        let days = DaysOfWeek::parse("Mon,Tue,Wed,Thu,Fri,Sat,Sun").unwrap();
        assert_eq!(days, DaysOfWeek::ALL);
        for day in [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ] {
            assert!(days.contains(day));
        }
    }

    #[test]
    fn parses_weekend_only() {
        let days = DaysOfWeek::parse("Sat,Sun").unwrap();
        assert!(days.contains(Weekday::Sat));
        assert!(days.contains(Weekday::Sun));
        assert!(!days.contains(Weekday::Mon));
    }

    #[test]
    fn case_and_full_name_insensitive() {
        let days = DaysOfWeek::parse("monday, FRIDAY").unwrap();
        assert!(days.contains(Weekday::Mon));
        assert!(days.contains(Weekday::Fri));
        assert!(!days.contains(Weekday::Tue));
    }

    #[test]
    fn rejects_unknown_day() {
        assert!(DaysOfWeek::parse("Mon,Blursday").is_err());
    }

    #[test]
    fn rejects_empty() {
        assert!(DaysOfWeek::parse("").is_err());
    }

    #[test]
    fn render_roundtrips_week_order() {
        let days = DaysOfWeek::parse("Sun,Mon,Wed").unwrap();
        assert_eq!(days.render(), "Mon,Wed,Sun");
    }
}
