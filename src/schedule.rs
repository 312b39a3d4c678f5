use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug)]
pub enum ScheduleError {
    Validation(String),
    NotFound(String),
    Query(String),
    Tx(String),
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub class_id: String,
    pub weekday: u8,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub skip_holidays: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePreview {
    pub total_generated: usize,
    pub existing_skipped: usize,
    pub dates: Vec<NaiveDate>,
}

#[derive(Debug, Clone, Copy)]
pub struct HolidayPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl HolidayPeriod {
    /// Closed interval, both bounds inclusive.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Upstream weekday numbering: 0 = Sunday .. 6 = Saturday.
pub fn weekday_from_index(index: u8) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

/// All dates matching `weekday` in `[start, end]`: advance to the first
/// match, then step a week at a time.
pub fn candidate_dates(
    weekday: Weekday,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<NaiveDate>, ScheduleError> {
    if start > end {
        return Err(ScheduleError::Validation(
            "startDate must not be after endDate".to_string(),
        ));
    }
    let offset =
        (7 + weekday.num_days_from_sunday() - start.weekday().num_days_from_sunday()) % 7;
    let mut current = start + Duration::days(offset as i64);
    let mut dates = Vec::new();
    while current <= end {
        dates.push(current);
        current += Duration::days(7);
    }
    Ok(dates)
}

pub fn drop_holidays(dates: Vec<NaiveDate>, holidays: &[HolidayPeriod]) -> Vec<NaiveDate> {
    dates
        .into_iter()
        .filter(|d| !holidays.iter().any(|h| h.contains(*d)))
        .collect()
}

fn load_holidays(conn: &Connection) -> Result<Vec<HolidayPeriod>, ScheduleError> {
    let mut stmt = conn
        .prepare("SELECT start_date, end_date FROM holiday_periods")
        .map_err(|e| ScheduleError::Query(e.to_string()))?;
    stmt.query_map([], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| ScheduleError::Query(e.to_string()))?
    .into_iter()
    .map(|(start, end)| {
        let start = NaiveDate::parse_from_str(&start, "%Y-%m-%d")
            .map_err(|e| ScheduleError::Query(format!("bad holiday start_date: {}", e)))?;
        let end = NaiveDate::parse_from_str(&end, "%Y-%m-%d")
            .map_err(|e| ScheduleError::Query(format!("bad holiday end_date: {}", e)))?;
        Ok(HolidayPeriod { start, end })
    })
    .collect()
}

/// Generate recurring sessions for a class. Candidates falling on holidays
/// (when requested) or on dates the class already meets are skipped; with
/// `dry_run` the same preview is computed without writing. Zero new dates
/// is a success.
pub fn generate_sessions(
    conn: &Connection,
    req: &GenerateRequest,
) -> Result<GeneratePreview, ScheduleError> {
    let weekday = weekday_from_index(req.weekday).ok_or_else(|| {
        ScheduleError::Validation("weekday must be between 0 (Sunday) and 6 (Saturday)".to_string())
    })?;

    let class_exists = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&req.class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| ScheduleError::Query(e.to_string()))?
        .is_some();
    if !class_exists {
        return Err(ScheduleError::NotFound("class not found".to_string()));
    }

    let mut candidates = candidate_dates(weekday, req.start_date, req.end_date)?;
    if req.skip_holidays {
        let holidays = load_holidays(conn)?;
        candidates = drop_holidays(candidates, &holidays);
    }

    let mut stmt = conn
        .prepare("SELECT session_date FROM class_sessions WHERE class_id = ?")
        .map_err(|e| ScheduleError::Query(e.to_string()))?;
    let existing: HashSet<String> = stmt
        .query_map([&req.class_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
        .map_err(|e| ScheduleError::Query(e.to_string()))?;

    let mut dates = Vec::new();
    let mut existing_skipped = 0_usize;
    for date in candidates {
        if existing.contains(&date.format("%Y-%m-%d").to_string()) {
            existing_skipped += 1;
        } else {
            dates.push(date);
        }
    }

    if !req.dry_run && !dates.is_empty() {
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| ScheduleError::Tx(e.to_string()))?;
        for date in &dates {
            tx.execute(
                "INSERT INTO class_sessions(id, class_id, session_date, start_time, end_time)
                 VALUES(?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &req.class_id,
                    date.format("%Y-%m-%d").to_string(),
                    &req.start_time,
                    &req.end_time,
                ),
            )
            .map_err(|e| ScheduleError::Tx(e.to_string()))?;
        }
        tx.commit().map_err(|e| ScheduleError::Tx(e.to_string()))?;
    }

    Ok(GeneratePreview {
        total_generated: dates.len(),
        existing_skipped,
        dates,
    })
}
