//! Strava tool catalogue and dispatch

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::protocol::{Tool, ToolAnnotations};
use crate::strava::{LeaderboardFilters, StravaClient};
use crate::{Error, Result};

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    30
}

#[derive(Debug, Deserialize)]
struct GetUserActivitiesArgs {
    before: Option<i64>,
    after: Option<i64>,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_per_page")]
    per_page: u32,
}

#[derive(Debug, Deserialize)]
struct GetActivityArgs {
    activity_id: u64,
    #[serde(default)]
    include_all_efforts: bool,
}

#[derive(Debug, Deserialize)]
struct GetActivitySegmentsArgs {
    activity_id: u64,
}

#[derive(Debug, Deserialize)]
struct GetSegmentLeaderboardArgs {
    segment_id: u64,
    #[serde(flatten)]
    filters: LeaderboardFilters,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_per_page")]
    per_page: u32,
}

fn read_only() -> Option<ToolAnnotations> {
    Some(ToolAnnotations {
        title: None,
        read_only_hint: Some(true),
        idempotent_hint: Some(true),
        open_world_hint: Some(true),
    })
}

fn pagination_schema() -> (Value, Value) {
    (
        json!({"type": "integer", "minimum": 1, "default": 1, "description": "Page number"}),
        json!({"type": "integer", "minimum": 1, "maximum": 200, "default": 30, "description": "Number of items per page"}),
    )
}

/// Tools exposed by the server
pub fn tool_definitions() -> Vec<Tool> {
    let (page, per_page) = pagination_schema();

    vec![
        Tool {
            name: "get_user_activities".to_string(),
            title: Some("List activities".to_string()),
            description: Some("Get the authenticated athlete's activities".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "before": {"type": "integer", "description": "Only activities before this epoch timestamp"},
                    "after": {"type": "integer", "description": "Only activities after this epoch timestamp"},
                    "page": page,
                    "per_page": per_page
                }
            }),
            annotations: read_only(),
        },
        Tool {
            name: "get_activity".to_string(),
            title: Some("Get activity".to_string()),
            description: Some("Get details of a specific activity".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "activity_id": {"type": "integer", "description": "The ID of the activity"},
                    "include_all_efforts": {"type": "boolean", "default": false, "description": "Include all segment efforts"}
                },
                "required": ["activity_id"]
            }),
            annotations: read_only(),
        },
        Tool {
            name: "get_activity_segments".to_string(),
            title: Some("Get activity segments".to_string()),
            description: Some("Get the segment efforts of a specific activity".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "activity_id": {"type": "integer", "description": "The ID of the activity"}
                },
                "required": ["activity_id"]
            }),
            annotations: read_only(),
        },
        Tool {
            name: "get_segment_leaderboard".to_string(),
            title: Some("Get segment leaderboard".to_string()),
            description: Some("Get the leaderboard for a given segment".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "segment_id": {"type": "integer", "description": "The ID of the segment"},
                    "gender": {"type": "string", "enum": ["M", "F"], "description": "Filter by gender"},
                    "age_group": {"type": "string", "description": "Filter by age group (e.g. 25_34)"},
                    "weight_class": {"type": "string", "description": "Filter by weight class"},
                    "following": {"type": "boolean", "description": "Only athletes the authenticated athlete follows"},
                    "club_id": {"type": "integer", "description": "Filter by club"},
                    "date_range": {"type": "string", "enum": ["this_year", "this_month", "this_week", "today"]},
                    "context_entries": {"type": "integer", "description": "Entries around the authenticated athlete"},
                    "page": page,
                    "per_page": per_page
                },
                "required": ["segment_id"]
            }),
            annotations: read_only(),
        },
    ]
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments
    };
    serde_json::from_value(arguments)
        .map_err(|e| Error::InvalidParams(format!("{tool}: {e}")))
}

/// Run one tool and return its JSON result
///
/// Unknown tools and malformed arguments fail with `InvalidParams`.
pub async fn call_tool(client: &StravaClient, name: &str, arguments: Value) -> Result<Value> {
    debug!(tool = name, "Calling tool");

    match name {
        "get_user_activities" => {
            let args: GetUserActivitiesArgs = parse_args(name, arguments)?;
            let activities = client
                .get_activities(args.before, args.after, args.page, args.per_page)
                .await?;
            Ok(serde_json::to_value(activities)?)
        }
        "get_activity" => {
            let args: GetActivityArgs = parse_args(name, arguments)?;
            let activity = client
                .get_activity(args.activity_id, args.include_all_efforts)
                .await?;
            Ok(serde_json::to_value(activity)?)
        }
        "get_activity_segments" => {
            let args: GetActivitySegmentsArgs = parse_args(name, arguments)?;
            let efforts = client.get_activity_segments(args.activity_id).await?;
            Ok(serde_json::to_value(efforts)?)
        }
        "get_segment_leaderboard" => {
            let args: GetSegmentLeaderboardArgs = parse_args(name, arguments)?;
            let leaderboard = client
                .get_segment_leaderboard(args.segment_id, &args.filters, args.page, args.per_page)
                .await?;
            Ok(serde_json::to_value(leaderboard)?)
        }
        other => Err(Error::InvalidParams(format!("Unknown tool: {other}"))),
    }
}
