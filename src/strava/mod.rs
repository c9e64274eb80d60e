//! Strava REST API client and resource models

mod client;
pub mod models;

pub use client::StravaClient;
pub use models::{
    Activity, DetailedActivity, LeaderboardEntry, LeaderboardFilters, Segment, SegmentEffort,
    SegmentLeaderboard,
};
