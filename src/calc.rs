use serde::Serialize;

/// 1-decimal grade rounding, half away from zero: 7.25 -> 7.3, 7.15 -> 7.2.
/// `f64::round` ties away from zero, which is exactly this policy.
pub fn round_grade(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// 2-decimal percentage rounding, same tie policy.
pub fn round_percent(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn validate_grade(x: f64) -> bool {
    (0.0..=10.0).contains(&x)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightCheck {
    pub is_valid: bool,
    pub total: i64,
    pub difference: i64,
}

/// Evaluation weights are integer percents and must sum to exactly 100
/// before any grade for the class is accepted.
pub fn validate_weights(weights: &[i64]) -> WeightCheck {
    let total: i64 = weights.iter().sum();
    WeightCheck {
        is_valid: total == 100,
        total,
        difference: 100 - total,
    }
}

impl WeightCheck {
    /// Human-readable gap description, e.g. "weights sum to 90%, missing
    /// 10% to reach 100%".
    pub fn gap_message(&self) -> String {
        if self.difference > 0 {
            format!(
                "weights sum to {}%, missing {}% to reach 100%",
                self.total, self.difference
            )
        } else {
            format!(
                "weights sum to {}%, exceeding 100% by {}%",
                self.total, -self.difference
            )
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeEntry {
    pub grade: f64,
    pub weight: i64,
}

/// Weighted average of grades, rounded to 1 decimal. `None` when there are
/// no entries or the weights sum to zero; callers persist that as NULL so a
/// student with no grades is distinguishable from a genuine 0.0 average.
pub fn weighted_average(entries: &[GradeEntry]) -> Option<f64> {
    let total_weight: i64 = entries.iter().map(|e| e.weight).sum();
    if entries.is_empty() || total_weight == 0 {
        return None;
    }
    let weighted_sum: f64 = entries.iter().map(|e| e.grade * e.weight as f64).sum();
    Some(round_grade(weighted_sum / total_weight as f64))
}

pub fn attendance_percent(total_sessions: i64, absences: i64) -> f64 {
    if total_sessions == 0 {
        return 100.0;
    }
    let present = (total_sessions - absences) as f64;
    round_percent(100.0 * present / total_sessions as f64)
}

pub fn absence_percent(total_sessions: i64, absences: i64) -> f64 {
    if total_sessions == 0 {
        return 0.0;
    }
    round_percent(100.0 * absences as f64 / total_sessions as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Normal,
    Warning,
    Critical,
}

/// Absence thresholds: >= 25% critical, [20%, 25%) warning.
pub fn alert_level(absence_pct: f64) -> AlertLevel {
    if absence_pct >= 25.0 {
        AlertLevel::Critical
    } else if absence_pct >= 20.0 {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStatus {
    pub attendance_percent: f64,
    pub absence_percent: f64,
    pub alert_level: AlertLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_message: Option<String>,
    pub needs_alert: bool,
}

pub fn attendance_status(total_sessions: i64, absences: i64) -> AttendanceStatus {
    let attendance = attendance_percent(total_sessions, absences);
    let absence = absence_percent(total_sessions, absences);
    let level = alert_level(absence);
    let alert_message = match level {
        AlertLevel::Normal => None,
        AlertLevel::Warning => Some(format!(
            "absences at {:.2}%, approaching the 25% limit",
            absence
        )),
        AlertLevel::Critical => Some(format!("absences at {:.2}%, at or above the 25% limit", absence)),
    };
    AttendanceStatus {
        attendance_percent: attendance,
        absence_percent: absence,
        alert_level: level,
        needs_alert: alert_message.is_some(),
        alert_message,
    }
}
