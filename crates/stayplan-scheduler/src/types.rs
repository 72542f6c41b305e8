use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    error::{Result, SchedulerError},
    timezone::resolve_zone,
};

/// Tag selecting which [`Recurrence`] variant a schedule carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Once,
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Once => "once",
            ScheduleType::Daily => "daily",
            ScheduleType::Weekly => "weekly",
            ScheduleType::Biweekly => "biweekly",
            ScheduleType::Monthly => "monthly",
        }
    }
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScheduleType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "once" => Ok(ScheduleType::Once),
            "daily" => Ok(ScheduleType::Daily),
            "weekly" => Ok(ScheduleType::Weekly),
            "biweekly" => Ok(ScheduleType::Biweekly),
            "monthly" => Ok(ScheduleType::Monthly),
            other => Err(SchedulerError::InvalidSchedule(format!(
                "unknown schedule type `{other}`; must be once, daily, weekly, biweekly or monthly"
            ))),
        }
    }
}

/// `HH:MM` wire format for wall-clock times.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
            .map_err(|_| serde::de::Error::custom(format!("invalid time `{raw}`; expected HH:MM")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnceRule {
    /// RFC3339 instant, or a bare wall-clock time read in `timezone`.
    pub date_time: String,
    #[serde(default)]
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRule {
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    #[serde(default)]
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyRule {
    /// 0 = Sunday … 6 = Saturday.
    pub day_of_week: u8,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    #[serde(default)]
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiweeklyRule {
    /// 0 = Sunday … 6 = Saturday.
    pub day_of_week: u8,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    /// Phase anchor; the first occurrence is the first `day_of_week` on or after it.
    pub start_date: NaiveDate,
    #[serde(default)]
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyRule {
    /// 1–31; clamped to the last day of shorter months.
    pub day_of_month: u8,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    #[serde(default)]
    pub timezone: String,
}

/// A recurrence rule: the `schedule_type` tag plus its typed `schedule_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schedule_type", content = "schedule_data", rename_all = "snake_case")]
pub enum Recurrence {
    Once(OnceRule),
    Daily(DailyRule),
    Weekly(WeeklyRule),
    Biweekly(BiweeklyRule),
    Monthly(MonthlyRule),
}

fn decode<T: DeserializeOwned>(kind: ScheduleType, data: serde_json::Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| SchedulerError::InvalidSchedule(format!("invalid {kind} schedule data: {e}")))
}

impl Recurrence {
    /// Parse an untyped `(schedule_type, schedule_data)` pair and validate it.
    pub fn parse(schedule_type: &str, data: serde_json::Value) -> Result<Self> {
        let kind: ScheduleType = schedule_type.trim().parse()?;
        let recurrence = match kind {
            ScheduleType::Once => Recurrence::Once(decode(kind, data)?),
            ScheduleType::Daily => Recurrence::Daily(decode(kind, data)?),
            ScheduleType::Weekly => Recurrence::Weekly(decode(kind, data)?),
            ScheduleType::Biweekly => Recurrence::Biweekly(decode(kind, data)?),
            ScheduleType::Monthly => Recurrence::Monthly(decode(kind, data)?),
        };
        recurrence.validate()?;
        Ok(recurrence)
    }

    /// Rebuild from the `schedule_type` / `schedule_data` columns.
    pub(crate) fn from_stored(schedule_type: &str, data_json: &str) -> Result<Self> {
        let kind: ScheduleType = schedule_type.parse()?;
        Ok(match kind {
            ScheduleType::Once => Recurrence::Once(serde_json::from_str(data_json)?),
            ScheduleType::Daily => Recurrence::Daily(serde_json::from_str(data_json)?),
            ScheduleType::Weekly => Recurrence::Weekly(serde_json::from_str(data_json)?),
            ScheduleType::Biweekly => Recurrence::Biweekly(serde_json::from_str(data_json)?),
            ScheduleType::Monthly => Recurrence::Monthly(serde_json::from_str(data_json)?),
        })
    }

    /// JSON of the variant body, as stored in `schedule_data`.
    pub(crate) fn data_json(&self) -> Result<String> {
        let json = match self {
            Recurrence::Once(r) => serde_json::to_string(r)?,
            Recurrence::Daily(r) => serde_json::to_string(r)?,
            Recurrence::Weekly(r) => serde_json::to_string(r)?,
            Recurrence::Biweekly(r) => serde_json::to_string(r)?,
            Recurrence::Monthly(r) => serde_json::to_string(r)?,
        };
        Ok(json)
    }

    pub fn schedule_type(&self) -> ScheduleType {
        match self {
            Recurrence::Once(_) => ScheduleType::Once,
            Recurrence::Daily(_) => ScheduleType::Daily,
            Recurrence::Weekly(_) => ScheduleType::Weekly,
            Recurrence::Biweekly(_) => ScheduleType::Biweekly,
            Recurrence::Monthly(_) => ScheduleType::Monthly,
        }
    }

    /// IANA zone name embedded in the rule; may be empty before creation
    /// resolves it.
    pub fn timezone(&self) -> &str {
        match self {
            Recurrence::Once(r) => &r.timezone,
            Recurrence::Daily(r) => &r.timezone,
            Recurrence::Weekly(r) => &r.timezone,
            Recurrence::Biweekly(r) => &r.timezone,
            Recurrence::Monthly(r) => &r.timezone,
        }
    }

    pub fn set_timezone(&mut self, zone: impl Into<String>) {
        let zone = zone.into();
        match self {
            Recurrence::Once(r) => r.timezone = zone,
            Recurrence::Daily(r) => r.timezone = zone,
            Recurrence::Weekly(r) => r.timezone = zone,
            Recurrence::Biweekly(r) => r.timezone = zone,
            Recurrence::Monthly(r) => r.timezone = zone,
        }
    }

    /// Range checks serde cannot express.
    pub fn validate(&self) -> Result<()> {
        resolve_zone(self.timezone())?;
        match self {
            Recurrence::Once(r) if r.date_time.trim().is_empty() => Err(
                SchedulerError::InvalidSchedule("date_time is required for once schedule".into()),
            ),
            Recurrence::Weekly(WeeklyRule { day_of_week, .. })
            | Recurrence::Biweekly(BiweeklyRule { day_of_week, .. })
                if *day_of_week > 6 =>
            {
                Err(SchedulerError::InvalidSchedule(format!(
                    "day_of_week must be 0-6, got {day_of_week}"
                )))
            }
            Recurrence::Monthly(r) if !(1..=31).contains(&r.day_of_month) => {
                Err(SchedulerError::InvalidSchedule(format!(
                    "day_of_month must be 1-31, got {}",
                    r.day_of_month
                )))
            }
            _ => Ok(()),
        }
    }
}

/// A persisted recurrence rule owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// UUIDv7 string, primary key.
    pub id: String,
    /// Owner identity (account email).
    pub user_id: String,
    /// Display label only.
    pub name: String,
    #[serde(flatten)]
    pub recurrence: Recurrence,
    /// False once retired or deleted; the runner never selects it again.
    pub is_active: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub collection_id: Option<String>,
    pub search_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`ScheduleStore::create`](crate::store::ScheduleStore::create).
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub user_id: String,
    pub name: String,
    pub schedule_type: String,
    pub schedule_data: serde_json::Value,
    pub collection_id: Option<String>,
    pub search_id: Option<String>,
    /// Owner's profile zone, used when `schedule_data` names none.
    pub user_timezone: String,
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Audit record of one fire attempt. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRun {
    pub id: String,
    pub schedule_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    /// Set only on `completed` / `failed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// Set only on `failed`.
    pub error_msg: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsiteData {
    pub name: String,
    /// Point-of-sale markets to query on this website.
    pub pos: Vec<String>,
}

/// One search request handed to the job sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchItem {
    pub website: WebsiteData,
    pub location: String,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub adults: u32,
    pub star_rating: String,
}

/// The resolved submission source of a due schedule.
#[derive(Debug, Clone)]
pub enum Payload {
    Collection {
        id: String,
        name: String,
        items: Vec<SearchItem>,
    },
    Search {
        id: String,
        name: String,
        items: Vec<SearchItem>,
    },
}

impl Payload {
    pub fn label(&self) -> &str {
        match self {
            Payload::Collection { name, .. } | Payload::Search { name, .. } => name,
        }
    }

    pub fn items(&self) -> &[SearchItem] {
        match self {
            Payload::Collection { items, .. } | Payload::Search { items, .. } => items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_daily_rule() {
        let rec = Recurrence::parse("daily", json!({"time": "17:00", "timezone": "Asia/Kolkata"}))
            .expect("parse failed");
        match rec {
            Recurrence::Daily(ref r) => {
                assert_eq!(r.time, NaiveTime::from_hms_opt(17, 0, 0).unwrap());
                assert_eq!(r.timezone, "Asia/Kolkata");
            }
            ref other => panic!("expected daily, got {other:?}"),
        }
        assert_eq!(rec.schedule_type(), ScheduleType::Daily);
    }

    #[test]
    fn missing_timezone_is_empty_not_an_error() {
        let rec = Recurrence::parse("weekly", json!({"day_of_week": 1, "time": "10:00"})).unwrap();
        assert_eq!(rec.timezone(), "");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = Recurrence::parse("hourly", json!({"time": "10:00"})).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert!(Recurrence::parse("daily", json!({"timezone": "UTC"})).is_err());
        assert!(Recurrence::parse("biweekly", json!({"day_of_week": 2, "time": "10:00"})).is_err());
        assert!(Recurrence::parse("once", json!({"date_time": ""})).is_err());
    }

    #[test]
    fn out_of_range_days_are_rejected() {
        assert!(Recurrence::parse("weekly", json!({"day_of_week": 7, "time": "10:00"})).is_err());
        assert!(Recurrence::parse("weekly", json!({"day_of_week": -1, "time": "10:00"})).is_err());
        assert!(Recurrence::parse("monthly", json!({"day_of_month": 0, "time": "10:00"})).is_err());
        assert!(
            Recurrence::parse("monthly", json!({"day_of_month": 32, "time": "10:00"})).is_err()
        );
    }

    #[test]
    fn malformed_time_and_zone_are_rejected() {
        assert!(Recurrence::parse("daily", json!({"time": "25:00"})).is_err());
        assert!(Recurrence::parse("daily", json!({"time": "five pm"})).is_err());
        assert!(Recurrence::parse("daily", json!({"time": "17:00", "timezone": "IST"})).is_err());
    }

    #[test]
    fn stored_form_round_trips() {
        let rec = Recurrence::parse(
            "biweekly",
            json!({
                "day_of_week": 3,
                "time": "08:15",
                "start_date": "2026-10-05",
                "timezone": "UTC"
            }),
        )
        .unwrap();
        let stored = rec.data_json().unwrap();
        assert!(stored.contains(r#""time":"08:15""#));
        assert!(stored.contains(r#""start_date":"2026-10-05""#));
        let back = Recurrence::from_stored("biweekly", &stored).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn search_item_uses_camel_case_on_the_wire() {
        let item = SearchItem {
            website: WebsiteData {
                name: "booking".into(),
                pos: vec!["US".into(), "IN".into()],
            },
            location: "Goa".into(),
            check_in_date: NaiveDate::from_ymd_opt(2026, 12, 20).unwrap(),
            check_out_date: NaiveDate::from_ymd_opt(2026, 12, 22).unwrap(),
            adults: 2,
            star_rating: "4".into(),
        };
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains(r#""checkInDate":"2026-12-20""#));
        assert!(json.contains(r#""starRating":"4""#));
        assert!(json.contains(r#""pos":["US","IN"]"#));
    }
}
