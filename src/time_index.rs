//! The time-indexed alarm structure: O(1) add/remove and O(k) due-alarm lookup.
//!
//! Three-level nested map `hour -> minute -> second -> {alarm_id}`, mirroring
//! the (hour, minute, second) keying of the reference scheduler, plus an
//! `alarm_id -> Alarm` table that is the authoritative in-memory copy. Both
//! structures are kept in lockstep by this type alone; callers never touch the
//! nested map directly.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Timelike, Utc};

use crate::error::{SchedulerError, TimeError};
use crate::model::{Alarm, AlarmKey};
use crate::timeconv;

type SecondBucket = HashSet<String>;
type MinuteLevel = HashMap<u32, SecondBucket>;
type HourLevel = HashMap<u32, MinuteLevel>;

#[derive(Default)]
pub struct AlarmIndex {
    alarms: HashMap<String, Alarm>,
    index: HashMap<u32, HourLevel>,
}

fn parse_hms(utc_time: &str) -> Result<(u32, u32, u32), TimeError> {
    let t = timeconv::parse_time_of_day(utc_time)?;
    Ok((t.hour(), t.minute(), t.second()))
}

impl AlarmIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    /// Insert a new alarm. Fails with `AlreadyExists` if the alarm's id already
    /// appears in the table.
    pub fn insert(&mut self, alarm: Alarm) -> Result<(), SchedulerError> {
        let alarm_id = alarm.alarm_id();
        if self.alarms.contains_key(&alarm_id) {
            return Err(SchedulerError::AlreadyExists(alarm_id));
        }
        let (h, m, s) = parse_hms(&alarm.utc_time)?;
        self.index
            .entry(h)
            .or_default()
            .entry(m)
            .or_default()
            .entry(s)
            .or_default()
            .insert(alarm_id.clone());
        self.alarms.insert(alarm_id, alarm);
        Ok(())
    }

    /// Remove the alarm identified by `key`, pruning empty index nodes.
    /// Returns `None` if no matching alarm exists — this is never an error,
    /// tolerating concurrent double-deletion.
    pub fn remove(&mut self, key: &AlarmKey) -> Option<Alarm> {
        let alarm_id = format!("alarm_{}_{}_{}", key.code_id, key.email, key.local_time);
        self.remove_by_id(&alarm_id)
    }

    pub fn remove_by_id(&mut self, alarm_id: &str) -> Option<Alarm> {
        let alarm = self.alarms.remove(alarm_id)?;
        let (h, m, s) = match parse_hms(&alarm.utc_time) {
            Ok(hms) => hms,
            Err(_) => return Some(alarm),
        };
        if let Some(hour_level) = self.index.get_mut(&h) {
            if let Some(minute_level) = hour_level.get_mut(&m) {
                if let Some(bucket) = minute_level.get_mut(&s) {
                    bucket.remove(alarm_id);
                    if bucket.is_empty() {
                        minute_level.remove(&s);
                    }
                }
                if minute_level.is_empty() {
                    hour_level.remove(&m);
                }
            }
            if hour_level.is_empty() {
                self.index.remove(&h);
            }
        }
        Some(alarm)
    }

    pub fn clear(&mut self) {
        self.alarms.clear();
        self.index.clear();
    }

    /// Stable ordering by `(code_id, email, local_time)`.
    pub fn list(&self, limit: usize, offset: usize) -> Vec<&Alarm> {
        let mut all: Vec<&Alarm> = self.alarms.values().collect();
        all.sort_by(|a, b| (&a.code_id, &a.email, &a.local_time).cmp(&(&b.code_id, &b.email, &b.local_time)));
        all.into_iter().skip(offset).take(limit).collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &Alarm> {
        self.alarms.values()
    }

    /// Every alarm whose `utc_time` bucket is `now_utc`'s HH:MM:SS and whose
    /// `days_of_week`, evaluated in the alarm's own timezone, contains that
    /// day. O(k) in the size of the matched bucket, not the whole table.
    pub fn due_at(&self, now_utc: DateTime<Utc>) -> Vec<&Alarm> {
        let Some(minutes) = self.index.get(&now_utc.hour()) else {
            return Vec::new();
        };
        let Some(seconds) = minutes.get(&now_utc.minute()) else {
            return Vec::new();
        };
        let Some(ids) = seconds.get(&now_utc.second()) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.alarms.get(id))
            .filter(|alarm| alarm_matches_weekday(alarm, now_utc))
            .collect()
    }

    /// Count of alarms whose `utc_time` falls in each hour of the day, for
    /// periodic operational stats logging. Index 0 = 00:xx UTC.
    pub fn hour_histogram(&self) -> [usize; 24] {
        let mut hist = [0usize; 24];
        for (h, minutes) in &self.index {
            let count: usize = minutes.values().map(HashSet::len).sum();
            hist[*h as usize] = count;
        }
        hist
    }

    /// One-shot alarms whose matching UTC instant has passed by more than one
    /// hour: residue from downtime or a missed tick. Returns the removed keys.
    pub fn sweep_stale_one_shots(&mut self, now_utc: DateTime<Utc>) -> Vec<Alarm> {
        let stale_ids: Vec<String> = self
            .alarms
            .iter()
            .filter(|(_, alarm)| !alarm.is_recurring && is_stale(alarm, now_utc))
            .map(|(id, _)| id.clone())
            .collect();
        stale_ids.into_iter().filter_map(|id| self.remove_by_id(&id)).collect()
    }
}

fn alarm_matches_weekday(alarm: &Alarm, now_utc: DateTime<Utc>) -> bool {
    let Ok(tz) = timeconv::parse_timezone(&alarm.timezone) else {
        return false;
    };
    let today = timeconv::weekday_in_tz(now_utc, tz);
    alarm.days_of_week.contains(today)
}

fn is_stale(alarm: &Alarm, now_utc: DateTime<Utc>) -> bool {
    let Ok((h, m, s)) = parse_hms(&alarm.utc_time) else {
        return false;
    };
    let Some(scheduled_today) = now_utc
        .date_naive()
        .and_hms_opt(h, m, s)
        .map(|naive| chrono::DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
    else {
        return false;
    };
    now_utc.signed_duration_since(scheduled_today) > chrono::Duration::hours(1)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::days::DaysOfWeek;
    use crate::model::Alarm;

    fn alarm(code_id: &str, utc_time: &str, is_recurring: bool, days: &str, tz: &str) -> Alarm {
        let now = Utc::now();
        Alarm {
            code_id: code_id.to_string(),
            email: "u@x".to_string(),
            local_time: "09:00:00".to_string(),
            utc_time: utc_time.to_string(),
            is_recurring,
            days_of_week: DaysOfWeek::parse(days).unwrap(),
            timezone: tz.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn insert_then_due_at_finds_it() {
        let mut idx = AlarmIndex::new();
        idx.insert(alarm("A", "09:00:00", false, "Mon,Tue,Wed,Thu,Fri,Sat,Sun", "UTC"))
            .unwrap();
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 9, 0, 0).unwrap();
        let due = idx.due_at(now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].code_id, "A");
    }

    #[test]
    fn due_at_empty_when_no_match() {
        let mut idx = AlarmIndex::new();
        idx.insert(alarm("A", "09:00:00", false, "Mon,Tue,Wed,Thu,Fri,Sat,Sun", "UTC"))
            .unwrap();
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 9, 0, 1).unwrap();
        assert!(idx.due_at(now).is_empty());
    }

    #[test]
    fn weekday_filter_rejects_non_matching_day() {
        let mut idx = AlarmIndex::new();
        idx.insert(alarm("C", "12:00:00", true, "Sat,Sun", "UTC")).unwrap();
        // 2026-07-28 is a Tuesday.
        let monday_like = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        assert!(idx.due_at(monday_like).is_empty());
        // 2026-08-01 is a Saturday.
        let saturday = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        assert_eq!(idx.due_at(saturday).len(), 1);
    }

    #[test]
    fn duplicate_insert_rejected() {
        let mut idx = AlarmIndex::new();
        idx.insert(alarm("A", "09:00:00", false, "Mon,Tue,Wed,Thu,Fri,Sat,Sun", "UTC"))
            .unwrap();
        let err = idx.insert(alarm("A", "09:00:00", false, "Mon,Tue,Wed,Thu,Fri,Sat,Sun", "UTC"));
        assert!(matches!(err, Err(SchedulerError::AlreadyExists(_))));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn remove_prunes_empty_nodes() {
        let mut idx = AlarmIndex::new();
        idx.insert(alarm("A", "09:00:00", false, "Mon,Tue,Wed,Thu,Fri,Sat,Sun", "UTC"))
            .unwrap();
        let key = AlarmKey {
            code_id: "A".to_string(),
            email: "u@x".to_string(),
            local_time: "09:00:00".to_string(),
        };
        let removed = idx.remove(&key);
        assert!(removed.is_some());
        assert_eq!(idx.len(), 0);
        assert!(idx.index.is_empty());
    }

    #[test]
    fn remove_missing_key_returns_none() {
        let mut idx = AlarmIndex::new();
        let key = AlarmKey {
            code_id: "ghost".to_string(),
            email: "u@x".to_string(),
            local_time: "09:00:00".to_string(),
        };
        assert!(idx.remove(&key).is_none());
    }

    #[test]
    fn list_is_stable_by_triple() {
        let mut idx = AlarmIndex::new();
        idx.insert(alarm("B", "09:00:00", true, "Mon,Tue,Wed,Thu,Fri,Sat,Sun", "UTC"))
            .unwrap();
        idx.insert(alarm("A", "09:00:00", true, "Mon,Tue,Wed,Thu,Fri,Sat,Sun", "UTC"))
            .unwrap();
        let listed = idx.list(10, 0);
        assert_eq!(listed[0].code_id, "A");
        assert_eq!(listed[1].code_id, "B");
    }

    #[test]
    fn hour_histogram_counts_by_utc_hour() {
        let mut idx = AlarmIndex::new();
        idx.insert(alarm("A", "09:00:00", true, "Mon,Tue,Wed,Thu,Fri,Sat,Sun", "UTC"))
            .unwrap();
        idx.insert(alarm("B", "09:30:00", true, "Mon,Tue,Wed,Thu,Fri,Sat,Sun", "UTC"))
            .unwrap();
        idx.insert(alarm("C", "14:00:00", true, "Mon,Tue,Wed,Thu,Fri,Sat,Sun", "UTC"))
            .unwrap();
        let hist = idx.hour_histogram();
        assert_eq!(hist[9], 2);
        assert_eq!(hist[14], 1);
        assert_eq!(hist[0], 0);
    }

    #[test]
    fn sweep_removes_only_stale_one_shots() {
        let mut idx = AlarmIndex::new();
        idx.insert(alarm("late", "06:00:00", false, "Mon,Tue,Wed,Thu,Fri,Sat,Sun", "UTC"))
            .unwrap();
        idx.insert(alarm("recurring", "06:00:00", true, "Mon,Tue,Wed,Thu,Fri,Sat,Sun", "UTC"))
            .unwrap();
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 9, 0, 0).unwrap();
        let removed = idx.sweep_stale_one_shots(now);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].code_id, "late");
        assert_eq!(idx.len(), 1);
    }
}
