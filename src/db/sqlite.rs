use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use secrecy::ExposeSecret;

use crate::db::schema_sqlite::{linked_accounts, notifications, webhook_logs};

use super::{
    DatabaseError,
    models::{
        GitLabAccountData, LinkedAccount, NewNotificationRecord, NewWebhookLog,
        NotificationRecord, WebhookLogEntry,
    },
};

diesel::define_sql_function! { fn last_insert_rowid() -> BigInt; }

// SQLite timestamps are stored as RFC 3339 text.
fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format: {}", e)))
}

fn establish_connection(path: &str) -> Result<SqliteConnection, DatabaseError> {
    use diesel::connection::SimpleConnection;
    let mut conn =
        SqliteConnection::establish(path).map_err(|e| DatabaseError::Connection(e.to_string()))?;
    // Concurrent writers open separate connections; wait out the lock instead
    // of failing with SQLITE_BUSY.
    conn.batch_execute("PRAGMA busy_timeout = 5000;")
        .map_err(|e| DatabaseError::Connection(e.to_string()))?;
    Ok(conn)
}

// The API surfaces i64 ids while SQLite keys are i32; an out-of-range id must
// fail instead of silently addressing another row.
fn row_key(value: i64) -> Result<i32, DatabaseError> {
    i32::try_from(value).map_err(|_| DatabaseError::Query(format!("row id {value} out of range")))
}

// SQLite uses i32 for INTEGER primary keys, but the API keeps i64.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = linked_accounts)]
struct DbLinkedAccount {
    id: i32,
    slack_user_id: String,
    slack_team_id: String,
    gitlab_user_id: i64,
    gitlab_username: String,
    gitlab_email: Option<String>,
    access_token: String,
    refresh_token: Option<String>,
    created_at: String,
    updated_at: String,
}

impl DbLinkedAccount {
    fn into_linked_account(self) -> Result<LinkedAccount, DatabaseError> {
        let created_at = string_to_datetime(&self.created_at)?;
        let updated_at = string_to_datetime(&self.updated_at)?;
        Ok(LinkedAccount {
            id: self.id as i64,
            slack_user_id: self.slack_user_id,
            slack_team_id: self.slack_team_id,
            gitlab_user_id: self.gitlab_user_id,
            gitlab_username: self.gitlab_username,
            gitlab_email: self.gitlab_email,
            access_token: self.access_token.into(),
            refresh_token: self.refresh_token.map(Into::into),
            created_at,
            updated_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = linked_accounts)]
struct NewLinkedAccountRow<'a> {
    slack_user_id: &'a str,
    slack_team_id: &'a str,
    gitlab_user_id: i64,
    gitlab_username: &'a str,
    gitlab_email: Option<&'a str>,
    access_token: &'a str,
    refresh_token: Option<&'a str>,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = notifications)]
struct DbNotification {
    id: i32,
    account_id: i64,
    event_kind: String,
    project_id: i64,
    merge_request_iid: i64,
    object_id: i64,
    payload: String,
    sent_at: String,
}

impl DbNotification {
    fn into_record(self) -> Result<NotificationRecord, DatabaseError> {
        let sent_at = string_to_datetime(&self.sent_at)?;
        let payload = serde_json::from_str(&self.payload)
            .map_err(|e| DatabaseError::Query(format!("invalid payload snapshot: {}", e)))?;
        Ok(NotificationRecord {
            id: self.id as i64,
            account_id: self.account_id,
            event_kind: self.event_kind,
            project_id: self.project_id,
            merge_request_iid: self.merge_request_iid,
            object_id: self.object_id,
            payload,
            sent_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = notifications)]
struct NewNotificationRow<'a> {
    account_id: i64,
    event_kind: &'a str,
    project_id: i64,
    merge_request_iid: i64,
    object_id: i64,
    payload: String,
    sent_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = webhook_logs)]
struct DbWebhookLog {
    id: i32,
    event_type: String,
    project_id: Option<i64>,
    object_id: Option<i64>,
    processed: bool,
    received_at: String,
    error_message: Option<String>,
}

impl DbWebhookLog {
    fn into_entry(self) -> Result<WebhookLogEntry, DatabaseError> {
        let received_at = string_to_datetime(&self.received_at)?;
        Ok(WebhookLogEntry {
            id: self.id as i64,
            event_type: self.event_type,
            project_id: self.project_id,
            object_id: self.object_id,
            processed: self.processed,
            received_at,
            error_message: self.error_message,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = webhook_logs)]
struct NewWebhookLogRow<'a> {
    event_type: &'a str,
    project_id: Option<i64>,
    object_id: Option<i64>,
    processed: bool,
    received_at: String,
}

pub struct SqliteAccountStore {
    db_path: Arc<String>,
}

impl SqliteAccountStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::AccountStore for SqliteAccountStore {
    async fn get_by_slack_identity(
        &self,
        slack_user: &str,
        slack_team: &str,
    ) -> Result<Option<LinkedAccount>, DatabaseError> {
        let slack_user = slack_user.to_string();
        let slack_team = slack_team.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::linked_accounts::dsl::*;
            linked_accounts
                .filter(slack_user_id.eq(slack_user))
                .filter(slack_team_id.eq(slack_team))
                .select(DbLinkedAccount::as_select())
                .first::<DbLinkedAccount>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|a| a.into_linked_account())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_by_gitlab_user_id(
        &self,
        gitlab_id: i64,
    ) -> Result<Option<LinkedAccount>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::linked_accounts::dsl::*;
            linked_accounts
                .filter(gitlab_user_id.eq(gitlab_id))
                .select(DbLinkedAccount::as_select())
                .first::<DbLinkedAccount>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|a| a.into_linked_account())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_by_gitlab_emails(
        &self,
        emails: &[String],
    ) -> Result<Vec<LinkedAccount>, DatabaseError> {
        if emails.is_empty() {
            return Ok(Vec::new());
        }
        let emails = emails.to_vec();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::linked_accounts::dsl::*;
            linked_accounts
                .filter(gitlab_email.eq_any(emails))
                .select(DbLinkedAccount::as_select())
                .load::<DbLinkedAccount>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .into_iter()
                .map(|a| a.into_linked_account())
                .collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_all(&self) -> Result<Vec<LinkedAccount>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::linked_accounts::dsl::*;
            linked_accounts
                .select(DbLinkedAccount::as_select())
                .load::<DbLinkedAccount>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .into_iter()
                .map(|a| a.into_linked_account())
                .collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn upsert(
        &self,
        slack_user: &str,
        slack_team: &str,
        data: &GitLabAccountData,
    ) -> Result<LinkedAccount, DatabaseError> {
        let slack_user = slack_user.to_string();
        let slack_team = slack_team.to_string();
        let gitlab_id = data.gitlab_user_id;
        let username = data.gitlab_username.clone();
        let email = data.gitlab_email.clone();
        let access = data.access_token.expose_secret().to_string();
        let refresh = data
            .refresh_token
            .as_ref()
            .map(|t| t.expose_secret().to_string());
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let now = datetime_to_string(&Utc::now());
            let row = NewLinkedAccountRow {
                slack_user_id: &slack_user,
                slack_team_id: &slack_team,
                gitlab_user_id: gitlab_id,
                gitlab_username: &username,
                gitlab_email: email.as_deref(),
                access_token: &access,
                refresh_token: refresh.as_deref(),
                created_at: now.clone(),
                updated_at: now,
            };

            use crate::db::schema_sqlite::linked_accounts::dsl::*;

            // UNIQUE(slack_user_id, slack_team_id) makes this an atomic
            // insert-or-replace of any prior binding.
            diesel::replace_into(linked_accounts)
                .values(&row)
                .execute(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            linked_accounts
                .filter(slack_user_id.eq(&slack_user))
                .filter(slack_team_id.eq(&slack_team))
                .select(DbLinkedAccount::as_select())
                .first::<DbLinkedAccount>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .into_linked_account()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn delete(&self, slack_user: &str, slack_team: &str) -> Result<(), DatabaseError> {
        let slack_user = slack_user.to_string();
        let slack_team = slack_team.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::linked_accounts::dsl::*;
            diesel::delete(
                linked_accounts
                    .filter(slack_user_id.eq(slack_user))
                    .filter(slack_team_id.eq(slack_team)),
            )
            .execute(&mut conn)
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

pub struct SqliteAuditStore {
    db_path: Arc<String>,
}

impl SqliteAuditStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::AuditStore for SqliteAuditStore {
    async fn append_notification(
        &self,
        record: &NewNotificationRecord,
    ) -> Result<i64, DatabaseError> {
        let record = record.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let payload = serde_json::to_string(&record.payload)
                .map_err(|e| DatabaseError::Query(format!("payload serialization: {}", e)))?;
            let row = NewNotificationRow {
                account_id: record.account_id,
                event_kind: &record.event_kind,
                project_id: record.project_id,
                merge_request_iid: record.merge_request_iid,
                object_id: record.object_id,
                payload,
                sent_at: datetime_to_string(&Utc::now()),
            };
            diesel::insert_into(notifications::table)
                .values(&row)
                .execute(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            diesel::select(last_insert_rowid())
                .get_result::<i64>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn list_notifications_for_account(
        &self,
        account: i64,
    ) -> Result<Vec<NotificationRecord>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::notifications::dsl::*;
            notifications
                .filter(account_id.eq(account))
                .order(id.asc())
                .select(DbNotification::as_select())
                .load::<DbNotification>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .into_iter()
                .map(|n| n.into_record())
                .collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn append_webhook_log(&self, entry: &NewWebhookLog) -> Result<i64, DatabaseError> {
        let entry = entry.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let row = NewWebhookLogRow {
                event_type: &entry.event_type,
                project_id: entry.project_id,
                object_id: entry.object_id,
                processed: false,
                received_at: datetime_to_string(&Utc::now()),
            };
            diesel::insert_into(webhook_logs::table)
                .values(&row)
                .execute(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            diesel::select(last_insert_rowid())
                .get_result::<i64>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn update_webhook_outcome(
        &self,
        log_id: i64,
        outcome: bool,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let key = row_key(log_id)?;
        let error = error.map(ToOwned::to_owned);
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::webhook_logs::dsl::*;
            diesel::update(webhook_logs.filter(id.eq(key)))
                .set((processed.eq(outcome), error_message.eq(error)))
                .execute(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_webhook_log(&self, log_id: i64) -> Result<Option<WebhookLogEntry>, DatabaseError> {
        let key = row_key(log_id)?;
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::webhook_logs::dsl::*;
            webhook_logs
                .filter(id.eq(key))
                .select(DbWebhookLog::as_select())
                .first::<DbWebhookLog>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|l| l.into_entry())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}
