use async_trait::async_trait;

use super::DatabaseError;
use super::models::{
    GitLabAccountData, LinkedAccount, NewNotificationRecord, NewWebhookLog, NotificationRecord,
    WebhookLogEntry,
};

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_by_slack_identity(
        &self,
        slack_user_id: &str,
        slack_team_id: &str,
    ) -> Result<Option<LinkedAccount>, DatabaseError>;
    async fn get_by_gitlab_user_id(
        &self,
        gitlab_user_id: i64,
    ) -> Result<Option<LinkedAccount>, DatabaseError>;
    async fn get_by_gitlab_emails(
        &self,
        emails: &[String],
    ) -> Result<Vec<LinkedAccount>, DatabaseError>;
    async fn get_all(&self) -> Result<Vec<LinkedAccount>, DatabaseError>;
    /// Insert-or-replace keyed on (slack_user_id, slack_team_id).
    async fn upsert(
        &self,
        slack_user_id: &str,
        slack_team_id: &str,
        data: &GitLabAccountData,
    ) -> Result<LinkedAccount, DatabaseError>;
    /// Idempotent; deleting an absent binding is not an error.
    async fn delete(
        &self,
        slack_user_id: &str,
        slack_team_id: &str,
    ) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_notification(
        &self,
        record: &NewNotificationRecord,
    ) -> Result<i64, DatabaseError>;
    async fn list_notifications_for_account(
        &self,
        account_id: i64,
    ) -> Result<Vec<NotificationRecord>, DatabaseError>;
    async fn append_webhook_log(&self, entry: &NewWebhookLog) -> Result<i64, DatabaseError>;
    /// Written exactly once per inbound webhook after processing completes.
    async fn update_webhook_outcome(
        &self,
        id: i64,
        processed: bool,
        error: Option<&str>,
    ) -> Result<(), DatabaseError>;
    async fn get_webhook_log(&self, id: i64) -> Result<Option<WebhookLogEntry>, DatabaseError>;
}
