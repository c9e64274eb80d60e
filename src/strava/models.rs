//! Strava API resource models
//!
//! Deserialization is lenient: Strava omits fields depending on privacy
//! settings and activity type, so most fields default when absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Summary activity, as returned by the activity list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Activity {
    /// Activity ID
    pub id: u64,
    /// Activity name
    pub name: String,
    /// Distance in meters
    pub distance: f64,
    /// Moving time in seconds
    pub moving_time: u64,
    /// Elapsed time in seconds
    pub elapsed_time: u64,
    /// Total elevation gain in meters
    pub total_elevation_gain: f64,
    /// Activity type (e.g. "Ride")
    #[serde(rename = "type")]
    pub activity_type: String,
    /// Sport type (e.g. "MountainBikeRide")
    pub sport_type: String,
    /// Start time in UTC
    pub start_date: DateTime<Utc>,
    /// Start time in the athlete's timezone
    pub start_date_local: DateTime<Utc>,
    /// Timezone label
    pub timezone: String,
    /// Number of achievements
    pub achievement_count: u32,
    /// Number of kudos
    pub kudos_count: u32,
    /// Number of comments
    pub comment_count: u32,
    /// Number of athletes
    pub athlete_count: u32,
    /// Number of photos
    pub photo_count: u32,
    /// Polyline map
    pub map: Option<Value>,
    /// Recorded on a trainer
    pub trainer: bool,
    /// Marked as commute
    pub commute: bool,
    /// Created manually
    pub manual: bool,
    /// Private activity
    pub private: bool,
    /// Flagged activity
    pub flagged: bool,
    /// Workout type
    pub workout_type: Option<u32>,
    /// Average speed in meters per second
    pub average_speed: f64,
    /// Maximum speed in meters per second
    pub max_speed: f64,
    /// Heart-rate data recorded
    pub has_heartrate: bool,
    /// Average heart rate
    pub average_heartrate: Option<f64>,
    /// Maximum heart rate
    pub max_heartrate: Option<f64>,
    /// Highest elevation
    pub elev_high: Option<f64>,
    /// Lowest elevation
    pub elev_low: Option<f64>,
}

/// Full activity, as returned by `GET /activities/{id}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailedActivity {
    /// Summary fields
    #[serde(flatten)]
    pub summary: Activity,
    /// Description
    pub description: Option<String>,
    /// Athlete reference
    pub athlete: Option<Value>,
    /// Calories burned
    pub calories: Option<f64>,
    /// Segment efforts (raw)
    pub segment_efforts: Option<Vec<Value>>,
    /// Metric splits
    pub splits_metric: Option<Vec<Value>>,
    /// Imperial splits
    pub splits_standard: Option<Vec<Value>>,
    /// Best efforts
    pub best_efforts: Option<Vec<Value>>,
    /// Photos
    pub photos: Option<Value>,
    /// Gear
    pub gear: Option<Value>,
    /// Recording device
    pub device_name: Option<String>,
}

/// Segment
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Segment {
    pub id: u64,
    pub name: String,
    pub activity_type: String,
    pub distance: f64,
    pub average_grade: f64,
    pub maximum_grade: f64,
    pub elevation_high: f64,
    pub elevation_low: f64,
    pub total_elevation_gain: f64,
    pub start_latlng: Vec<f64>,
    pub end_latlng: Vec<f64>,
    pub climb_category: i32,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub private: bool,
    pub starred: bool,
}

/// One athlete's effort on a segment within an activity
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentEffort {
    pub id: u64,
    pub activity_id: u64,
    pub segment_id: u64,
    pub name: String,
    pub elapsed_time: u64,
    pub moving_time: u64,
    pub start_date: DateTime<Utc>,
    pub start_date_local: DateTime<Utc>,
    pub distance: f64,
    pub average_watts: Option<f64>,
    pub device_watts: Option<bool>,
    pub average_heartrate: Option<f64>,
    pub max_heartrate: Option<f64>,
    /// Personal record rank (1-3), absent if not a PR
    pub pr_rank: Option<u32>,
    pub achievements: Option<Vec<Value>>,
    pub athlete: Option<Value>,
    pub segment: Segment,
}

/// Segment leaderboard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentLeaderboard {
    /// Total number of entries matching the filters
    pub entry_count: Option<u64>,
    /// Total number of efforts
    pub effort_count: Option<u64>,
    /// KOM type (e.g. "kom")
    pub kom_type: Option<String>,
    /// Entries on the requested page
    pub entries: Vec<LeaderboardEntry>,
}

/// Segment leaderboard entry
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderboardEntry {
    pub athlete_name: String,
    pub elapsed_time: u64,
    pub moving_time: u64,
    pub start_date: Option<DateTime<Utc>>,
    pub start_date_local: Option<DateTime<Utc>>,
    pub rank: u32,
}

/// Optional leaderboard filters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderboardFilters {
    /// "M" or "F"
    pub gender: Option<String>,
    /// e.g. "25_34"
    pub age_group: Option<String>,
    /// e.g. "75_84"
    pub weight_class: Option<String>,
    /// Only athletes the authenticated athlete follows
    pub following: Option<bool>,
    /// Only members of this club
    pub club_id: Option<u64>,
    /// "this_year", "this_month", "this_week" or "today"
    pub date_range: Option<String>,
    /// Entries shown around the authenticated athlete
    pub context_entries: Option<u32>,
}

impl LeaderboardFilters {
    /// Query parameters for the set filters
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(v) = &self.gender {
            query.push(("gender", v.clone()));
        }
        if let Some(v) = &self.age_group {
            query.push(("age_group", v.clone()));
        }
        if let Some(v) = &self.weight_class {
            query.push(("weight_class", v.clone()));
        }
        if let Some(v) = self.following {
            query.push(("following", v.to_string()));
        }
        if let Some(v) = self.club_id {
            query.push(("club_id", v.to_string()));
        }
        if let Some(v) = &self.date_range {
            query.push(("date_range", v.clone()));
        }
        if let Some(v) = self.context_entries {
            query.push(("context_entries", v.to_string()));
        }
        query
    }
}

/// Strava error body
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ErrorResponse {
    pub message: String,
    pub code: Option<i64>,
    pub errors: Vec<Value>,
}
