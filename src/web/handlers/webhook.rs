use std::sync::Arc;

use salvo::prelude::*;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::db::{AuditStore, DatabaseError, NewWebhookLog};
use crate::notifier::{NotifierCore, ProcessOutcome};
use crate::web::web_state;

use super::render_error;

const EVENT_HEADER: &str = "x-gitlab-event";
const TOKEN_HEADER: &str = "x-gitlab-token";

fn extract_object_id(payload: &Value) -> Option<i64> {
    payload
        .pointer("/object_attributes/id")
        .or_else(|| payload.pointer("/merge_request/id"))
        .and_then(Value::as_i64)
}

/// Records the webhook, runs the pipeline and writes the log outcome exactly
/// once: processed on success (a no-op and partial delivery failures
/// included), failed with the error message otherwise. Only the initial log
/// insert can abort ingestion.
async fn ingest_webhook(
    audit: &Arc<dyn AuditStore>,
    notifier: &NotifierCore,
    event_label: &str,
    payload: &Value,
) -> Result<(i64, Result<ProcessOutcome, String>), DatabaseError> {
    let log_entry = NewWebhookLog {
        event_type: event_label.to_string(),
        project_id: payload.pointer("/project/id").and_then(Value::as_i64),
        object_id: extract_object_id(payload),
    };
    let log_id = audit.append_webhook_log(&log_entry).await?;

    match notifier.handle_webhook(event_label, payload).await {
        Ok(outcome) => {
            if let Err(err) = audit.update_webhook_outcome(log_id, true, None).await {
                warn!(%err, "failed to update webhook outcome");
            }
            Ok((log_id, Ok(outcome)))
        }
        Err(err) => {
            let message = err.to_string();
            if let Err(err) = audit
                .update_webhook_outcome(log_id, false, Some(&message))
                .await
            {
                warn!(%err, "failed to update webhook outcome");
            }
            Ok((log_id, Err(message)))
        }
    }
}

/// Inbound GitLab webhook endpoint. Authenticates against the shared secret
/// when one is configured, then hands off to [`ingest_webhook`].
#[handler]
pub async fn gitlab_webhook(req: &mut Request, res: &mut Response) {
    let state = web_state();

    if let Some(expected) = &state.config.webhook.secret {
        let presented = req.header::<String>(TOKEN_HEADER);
        if presented.as_deref() != Some(expected.as_str()) {
            warn!("webhook rejected: missing or invalid token");
            render_error(res, StatusCode::UNAUTHORIZED, "invalid webhook token");
            return;
        }
    }

    let Some(event_label) = req.header::<String>(EVENT_HEADER) else {
        render_error(res, StatusCode::BAD_REQUEST, "missing x-gitlab-event header");
        return;
    };

    let payload: Value = match req.parse_json().await {
        Ok(payload) => payload,
        Err(err) => {
            warn!(%event_label, "webhook rejected: body is not json: {}", err);
            render_error(res, StatusCode::BAD_REQUEST, "request body must be json");
            return;
        }
    };

    let audit = state.db_manager.audit_store();
    match ingest_webhook(&audit, &state.notifier, &event_label, &payload).await {
        Ok((_, Ok(outcome))) => {
            info!(
                %event_label,
                resolved = outcome.resolved,
                delivered = outcome.delivered,
                "webhook processed"
            );
            res.render(Json(json!({ "status": "success" })));
        }
        Ok((_, Err(message))) => {
            error!(%event_label, "webhook processing failed: {}", message);
            render_error(res, StatusCode::INTERNAL_SERVER_ERROR, &message);
        }
        Err(err) => {
            error!(%err, "failed to record inbound webhook");
            render_error(res, StatusCode::INTERNAL_SERVER_ERROR, "storage failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tempfile::NamedTempFile;

    use super::ingest_webhook;
    use crate::config::DatabaseConfig;
    use crate::db::DatabaseManager;
    use crate::notifier::{NotificationDispatcher, NotifierCore, RecipientResolver};
    use crate::slack::{MessageSender, SlackError};

    struct SilentSender;

    #[async_trait]
    impl MessageSender for SilentSender {
        async fn send_direct_message(
            &self,
            _slack_user_id: &str,
            _text: &str,
            _blocks: &Value,
        ) -> Result<(), SlackError> {
            Ok(())
        }
    }

    async fn test_pipeline() -> (Arc<DatabaseManager>, NotifierCore, NamedTempFile) {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let config = DatabaseConfig {
            filename: file.path().to_string_lossy().to_string(),
        };
        let db = Arc::new(DatabaseManager::new(&config).await.expect("db manager"));
        db.migrate().await.expect("migrate");

        let notifier = NotifierCore::new(
            RecipientResolver::new(db.account_store()),
            NotificationDispatcher::new(Arc::new(SilentSender)),
            db.audit_store(),
        );
        (db, notifier, file)
    }

    #[tokio::test]
    async fn unrecognized_event_ends_processed_without_error() {
        let (db, notifier, _file) = test_pipeline().await;
        let audit = db.audit_store();

        let (log_id, outcome) =
            ingest_webhook(&audit, &notifier, "Push Hook", &json!({ "ref": "main" }))
                .await
                .expect("ingestion succeeds");
        let outcome = outcome.expect("pipeline succeeds");
        assert_eq!(outcome.resolved, 0);

        let entry = audit
            .get_webhook_log(log_id)
            .await
            .expect("query")
            .expect("entry exists");
        assert!(entry.processed);
        assert!(entry.error_message.is_none());
        assert_eq!(entry.event_type, "Push Hook");
    }

    #[tokio::test]
    async fn malformed_payload_ends_failed_with_recorded_error() {
        let (db, notifier, _file) = test_pipeline().await;
        let audit = db.audit_store();

        let payload = json!({
            "project": { "id": 42, "name": "widgets", "web_url": "https://gitlab.example.com/w" },
            "object_attributes": { "iid": "seven" }
        });
        let (log_id, outcome) =
            ingest_webhook(&audit, &notifier, "Merge Request Hook", &payload)
                .await
                .expect("ingestion succeeds");
        let message = outcome.expect_err("classification fails");
        assert!(message.contains("malformed"));

        let entry = audit
            .get_webhook_log(log_id)
            .await
            .expect("query")
            .expect("entry exists");
        assert!(!entry.processed);
        assert_eq!(entry.project_id, Some(42));
        assert_eq!(entry.error_message.as_deref(), Some(message.as_str()));
    }
}
