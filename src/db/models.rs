use chrono::{DateTime, Utc};
use secrecy::SecretString;

/// One Slack user's binding to a GitLab account. At most one row exists per
/// (slack_user_id, slack_team_id); re-linking replaces the GitLab side.
///
/// Tokens are wrapped in [`SecretString`] so `Debug` output and logs never
/// carry them.
#[derive(Debug)]
pub struct LinkedAccount {
    pub id: i64,
    pub slack_user_id: String,
    pub slack_team_id: String,
    pub gitlab_user_id: i64,
    pub gitlab_username: String,
    pub gitlab_email: Option<String>,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// GitLab-side fields written on OAuth redemption.
#[derive(Debug)]
pub struct GitLabAccountData {
    pub gitlab_user_id: i64,
    pub gitlab_username: String,
    pub gitlab_email: Option<String>,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
}

/// Append-only audit row for one delivery attempt.
#[derive(Debug, Clone)]
pub struct NewNotificationRecord {
    pub account_id: i64,
    pub event_kind: String,
    pub project_id: i64,
    pub merge_request_iid: i64,
    pub object_id: i64,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NotificationRecord {
    pub id: i64,
    pub account_id: i64,
    pub event_kind: String,
    pub project_id: i64,
    pub merge_request_iid: i64,
    pub object_id: i64,
    pub payload: serde_json::Value,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWebhookLog {
    pub event_type: String,
    pub project_id: Option<i64>,
    pub object_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct WebhookLogEntry {
    pub id: i64,
    pub event_type: String,
    pub project_id: Option<i64>,
    pub object_id: Option<i64>,
    pub processed: bool,
    pub received_at: DateTime<Utc>,
    pub error_message: Option<String>,
}
