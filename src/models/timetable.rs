use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Day of the week a timetable slot recurs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
            DayOfWeek::Sunday => "sunday",
        }
    }
}

impl std::str::FromStr for DayOfWeek {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monday" => Ok(DayOfWeek::Monday),
            "tuesday" => Ok(DayOfWeek::Tuesday),
            "wednesday" => Ok(DayOfWeek::Wednesday),
            "thursday" => Ok(DayOfWeek::Thursday),
            "friday" => Ok(DayOfWeek::Friday),
            "saturday" => Ok(DayOfWeek::Saturday),
            "sunday" => Ok(DayOfWeek::Sunday),
            _ => Err(format!("Invalid day of week: {}", s)),
        }
    }
}

/// A recurring class slot. `subject_id` refers to a [`super::Subject`] by
/// convention only; the store does not enforce it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimetableEntry {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub day_of_week: DayOfWeek,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub room: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_slot"))]
pub struct CreateTimetableEntry {
    pub subject_id: Uuid,
    pub day_of_week: DayOfWeek,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// Room or virtual classroom label
    #[validate(length(min = 1, max = 64))]
    pub room: Option<String>,
}

fn validate_slot(input: &CreateTimetableEntry) -> Result<(), ValidationError> {
    if input.end_time <= input.start_time {
        return Err(ValidationError::new("end_time_before_start_time"));
    }
    Ok(())
}

/// The two columns the reconciliation job reads from a timetable entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimetableRef {
    pub id: Uuid,
    pub subject_id: Uuid,
}
