//! Strava REST client
//!
//! Thin GET wrappers over the v3 API. Every request takes its bearer token
//! from the [`AccessTokenCache`]; nothing is retried.

use std::sync::Arc;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info};

use super::models::{
    Activity, DetailedActivity, ErrorResponse, LeaderboardFilters, SegmentEffort,
    SegmentLeaderboard,
};
use crate::oauth::AccessTokenCache;
use crate::{Error, Result};

/// Characters of an unparseable error body kept in the error message
const ERROR_EXCERPT_CHARS: usize = 50;

/// Client for the Strava v3 REST API
pub struct StravaClient {
    http_client: Client,
    base_url: String,
    tokens: Arc<AccessTokenCache>,
}

impl StravaClient {
    /// Create a client rooted at `base_url` (e.g. `https://www.strava.com/api/v3`)
    pub fn new(http_client: Client, base_url: impl Into<String>, tokens: Arc<AccessTokenCache>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http_client,
            base_url,
            tokens,
        }
    }

    /// Token cache backing this client
    pub fn tokens(&self) -> &Arc<AccessTokenCache> {
        &self.tokens
    }

    /// List the authenticated athlete's activities
    ///
    /// `before` / `after` are epoch seconds.
    pub async fn get_activities(
        &self,
        before: Option<i64>,
        after: Option<i64>,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<Activity>> {
        let mut query = vec![("page", page.to_string()), ("per_page", per_page.to_string())];
        if let Some(before) = before {
            query.push(("before", before.to_string()));
        }
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        let activities: Vec<Activity> = self.get_json("/athlete/activities", &query).await?;
        info!(count = activities.len(), page, "Fetched activities");
        Ok(activities)
    }

    /// Fetch one activity
    pub async fn get_activity(&self, activity_id: u64, include_all_efforts: bool) -> Result<DetailedActivity> {
        let query = activity_query(include_all_efforts);
        let activity: DetailedActivity = self
            .get_json(&format!("/activities/{activity_id}"), &query)
            .await?;
        info!(activity_id, "Fetched activity");
        Ok(activity)
    }

    /// Segment efforts of one activity, with their activity and segment IDs filled in
    pub async fn get_activity_segments(&self, activity_id: u64) -> Result<Vec<SegmentEffort>> {
        let activity: Value = self
            .get_json(&format!("/activities/{activity_id}"), &activity_query(true))
            .await?;

        let Some(efforts) = activity.get("segment_efforts").and_then(Value::as_array) else {
            debug!(activity_id, "Activity has no segment efforts");
            return Ok(Vec::new());
        };

        let efforts = efforts
            .iter()
            .cloned()
            .map(|mut effort| {
                enrich_segment_effort(&mut effort, activity_id);
                serde_json::from_value(effort).map_err(Error::from)
            })
            .collect::<Result<Vec<SegmentEffort>>>()?;

        info!(activity_id, count = efforts.len(), "Fetched segment efforts");
        Ok(efforts)
    }

    /// Leaderboard of one segment
    pub async fn get_segment_leaderboard(
        &self,
        segment_id: u64,
        filters: &LeaderboardFilters,
        page: u32,
        per_page: u32,
    ) -> Result<SegmentLeaderboard> {
        let mut query = filters.to_query();
        query.push(("page", page.to_string()));
        query.push(("per_page", per_page.to_string()));

        let leaderboard: SegmentLeaderboard = self
            .get_json(&format!("/segments/{segment_id}/leaderboard"), &query)
            .await?;
        info!(segment_id, entries = leaderboard.entries.len(), "Fetched segment leaderboard");
        Ok(leaderboard)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let token = self.tokens.ensure_access_token().await?;
        let url = format!("{}{path}", self.base_url);
        debug!(path, "Strava API request");

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED {
                // Revoked or expired early; renew on the next call
                self.tokens.invalidate_if(&token);
            }
            let message = api_error_message(status, &body);
            error!(status = status.as_u16(), path, message = %message, "Strava API request failed");
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

fn activity_query(include_all_efforts: bool) -> Vec<(&'static str, String)> {
    if include_all_efforts {
        vec![("include_all_efforts", "true".to_string())]
    } else {
        Vec::new()
    }
}

/// Fill in the IDs Strava leaves implicit and derive a missing elevation gain
fn enrich_segment_effort(effort: &mut Value, activity_id: u64) {
    let Some(obj) = effort.as_object_mut() else {
        return;
    };
    obj.insert("activity_id".to_string(), Value::from(activity_id));

    let Some(segment) = obj.get_mut("segment").and_then(Value::as_object_mut) else {
        return;
    };
    let segment_id = segment.get("id").cloned().unwrap_or(Value::Null);

    if !segment.contains_key("total_elevation_gain") {
        let high = segment.get("elevation_high").and_then(Value::as_f64).unwrap_or(0.0);
        let low = segment.get("elevation_low").and_then(Value::as_f64).unwrap_or(0.0);
        segment.insert(
            "total_elevation_gain".to_string(),
            Value::from((high - low).max(0.0)),
        );
    }

    obj.insert("segment_id".to_string(), segment_id);
}

fn api_error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) if !err.message.is_empty() => match err.code {
            Some(code) => format!("{} (code: {code})", err.message),
            None => err.message,
        },
        _ => {
            let excerpt: String = body.chars().take(ERROR_EXCERPT_CHARS).collect();
            format!("HTTP {} - {excerpt}", status.as_u16())
        }
    }
}
