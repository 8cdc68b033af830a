use std::sync::Arc;

use diesel::Connection;
use diesel::RunQueryDsl;
use diesel::sqlite::SqliteConnection;

use crate::config::DatabaseConfig;
use crate::db::sqlite::{SqliteAccountStore, SqliteAuditStore};
use crate::db::{AccountStore, AuditStore, DatabaseError};

#[derive(Clone)]
pub struct DatabaseManager {
    db_path: Arc<String>,
    account_store: Arc<dyn AccountStore>,
    audit_store: Arc<dyn AuditStore>,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let path = config.filename.clone();

        if let Some(parent) = std::path::Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;
            }
        }

        let path_arc = Arc::new(path);
        let account_store = Arc::new(SqliteAccountStore::new(path_arc.clone()));
        let audit_store = Arc::new(SqliteAuditStore::new(path_arc.clone()));

        Ok(Self {
            db_path: path_arc,
            account_store,
            audit_store,
        })
    }

    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        let path = self.db_path.as_ref().clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = SqliteConnection::establish(&path)
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS linked_accounts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    slack_user_id TEXT NOT NULL,
                    slack_team_id TEXT NOT NULL,
                    gitlab_user_id INTEGER NOT NULL,
                    gitlab_username TEXT NOT NULL,
                    gitlab_email TEXT,
                    access_token TEXT NOT NULL,
                    refresh_token TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(slack_user_id, slack_team_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS notifications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    account_id INTEGER NOT NULL,
                    event_kind TEXT NOT NULL,
                    project_id INTEGER NOT NULL,
                    merge_request_iid INTEGER NOT NULL,
                    object_id INTEGER NOT NULL,
                    payload TEXT NOT NULL,
                    sent_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS webhook_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    event_type TEXT NOT NULL,
                    project_id INTEGER,
                    object_id INTEGER,
                    processed BOOLEAN NOT NULL DEFAULT FALSE,
                    received_at TEXT NOT NULL DEFAULT (datetime('now')),
                    error_message TEXT
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_linked_accounts_slack ON linked_accounts(slack_user_id, slack_team_id)",
                "CREATE INDEX IF NOT EXISTS idx_linked_accounts_gitlab_id ON linked_accounts(gitlab_user_id)",
                "CREATE INDEX IF NOT EXISTS idx_notifications_account ON notifications(account_id)",
                "CREATE INDEX IF NOT EXISTS idx_webhook_logs_received ON webhook_logs(received_at)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    pub fn account_store(&self) -> Arc<dyn AccountStore> {
        self.account_store.clone()
    }

    pub fn audit_store(&self) -> Arc<dyn AuditStore> {
        self.audit_store.clone()
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;
    use tempfile::NamedTempFile;

    use super::DatabaseManager;
    use crate::config::DatabaseConfig;
    use crate::db::{GitLabAccountData, NewNotificationRecord, NewWebhookLog};

    async fn test_manager() -> (DatabaseManager, NamedTempFile) {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let config = DatabaseConfig {
            filename: file.path().to_string_lossy().to_string(),
        };
        let manager = DatabaseManager::new(&config).await.expect("db manager");
        manager.migrate().await.expect("migrate");
        (manager, file)
    }

    fn gitlab_data(id: i64, username: &str) -> GitLabAccountData {
        GitLabAccountData {
            gitlab_user_id: id,
            gitlab_username: username.to_string(),
            gitlab_email: Some(format!("{username}@example.com")),
            access_token: format!("token-{username}").into(),
            refresh_token: Some(format!("refresh-{username}").into()),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_prior_binding_for_same_slack_identity() {
        let (manager, _file) = test_manager().await;
        let store = manager.account_store();

        store
            .upsert("U1", "T1", &gitlab_data(100, "alice"))
            .await
            .expect("first upsert");
        store
            .upsert("U1", "T1", &gitlab_data(200, "alice2"))
            .await
            .expect("second upsert");

        let all = store.get_all().await.expect("get all");
        assert_eq!(all.len(), 1, "re-linking must replace, never duplicate");
        assert_eq!(all[0].gitlab_user_id, 200);
        assert_eq!(all[0].gitlab_username, "alice2");
        assert_eq!(all[0].access_token.expose_secret(), "token-alice2");
    }

    #[tokio::test]
    async fn lookup_by_gitlab_user_id_and_email() {
        let (manager, _file) = test_manager().await;
        let store = manager.account_store();

        store
            .upsert("U1", "T1", &gitlab_data(100, "alice"))
            .await
            .expect("upsert alice");
        store
            .upsert("U2", "T1", &gitlab_data(200, "bob"))
            .await
            .expect("upsert bob");

        let alice = store
            .get_by_gitlab_user_id(100)
            .await
            .expect("query")
            .expect("alice exists");
        assert_eq!(alice.slack_user_id, "U1");

        assert!(
            store
                .get_by_gitlab_user_id(999)
                .await
                .expect("query")
                .is_none()
        );

        let by_email = store
            .get_by_gitlab_emails(&["bob@example.com".to_string()])
            .await
            .expect("email query");
        assert_eq!(by_email.len(), 1);
        assert_eq!(by_email[0].slack_user_id, "U2");

        let none = store.get_by_gitlab_emails(&[]).await.expect("empty query");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (manager, _file) = test_manager().await;
        let store = manager.account_store();

        store
            .upsert("U1", "T1", &gitlab_data(100, "alice"))
            .await
            .expect("upsert");
        store.delete("U1", "T1").await.expect("first delete");
        store.delete("U1", "T1").await.expect("second delete");

        assert!(
            store
                .get_by_slack_identity("U1", "T1")
                .await
                .expect("query")
                .is_none()
        );
    }

    #[tokio::test]
    async fn webhook_log_outcome_roundtrip() {
        let (manager, _file) = test_manager().await;
        let audit = manager.audit_store();

        let log_id = audit
            .append_webhook_log(&NewWebhookLog {
                event_type: "Merge Request Hook".to_string(),
                project_id: Some(42),
                object_id: Some(7),
            })
            .await
            .expect("append log");

        let entry = audit
            .get_webhook_log(log_id)
            .await
            .expect("query")
            .expect("entry exists");
        assert!(!entry.processed);
        assert_eq!(entry.project_id, Some(42));

        audit
            .update_webhook_outcome(log_id, false, Some("delivery failed"))
            .await
            .expect("update outcome");

        let entry = audit
            .get_webhook_log(log_id)
            .await
            .expect("query")
            .expect("entry exists");
        assert!(!entry.processed);
        assert_eq!(entry.error_message.as_deref(), Some("delivery failed"));
    }

    #[tokio::test]
    async fn out_of_range_webhook_log_id_is_rejected() {
        let (manager, _file) = test_manager().await;
        let audit = manager.audit_store();

        let too_big = i64::from(i32::MAX) + 1;
        assert!(
            audit
                .update_webhook_outcome(too_big, true, None)
                .await
                .is_err()
        );
        assert!(audit.get_webhook_log(too_big).await.is_err());
    }

    #[tokio::test]
    async fn notification_records_append_only_per_account() {
        let (manager, _file) = test_manager().await;
        let store = manager.account_store();
        let audit = manager.audit_store();

        let account = store
            .upsert("U1", "T1", &gitlab_data(100, "alice"))
            .await
            .expect("upsert");

        audit
            .append_notification(&NewNotificationRecord {
                account_id: account.id,
                event_kind: "merge_request".to_string(),
                project_id: 42,
                merge_request_iid: 7,
                object_id: 1234,
                payload: serde_json::json!({ "action": "open", "reason": "assignee" }),
            })
            .await
            .expect("append record");

        let records = audit
            .list_notifications_for_account(account.id)
            .await
            .expect("list records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_kind, "merge_request");
        assert_eq!(records[0].payload["reason"], "assignee");
    }
}
