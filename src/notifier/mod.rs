use std::sync::Arc;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::{AuditStore, DatabaseError, NewNotificationRecord};
use crate::gitlab::{ClassifyError, InboundEvent, classify};

pub use self::dispatcher::NotificationDispatcher;
pub use self::resolver::{NotifyReason, Recipient, RecipientResolver};

pub mod dispatcher;
pub mod resolver;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

/// Per-webhook delivery tally. `resolved == delivered + failed`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub resolved: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Ties classification, recipient resolution and dispatch together. One
/// failed delivery never aborts the remaining recipients of the same event.
pub struct NotifierCore {
    resolver: RecipientResolver,
    dispatcher: NotificationDispatcher,
    audit: Arc<dyn AuditStore>,
}

impl NotifierCore {
    pub fn new(
        resolver: RecipientResolver,
        dispatcher: NotificationDispatcher,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            resolver,
            dispatcher,
            audit,
        }
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Full pipeline for one inbound webhook.
    pub async fn handle_webhook(
        &self,
        event_label: &str,
        payload: &Value,
    ) -> Result<ProcessOutcome, NotifyError> {
        match classify(event_label, payload)? {
            None => {
                debug!(%event_label, "recognized event without actionable payload");
                Ok(ProcessOutcome::default())
            }
            Some(InboundEvent::Other { label }) => {
                debug!(%label, "ignoring unhandled event type");
                Ok(ProcessOutcome::default())
            }
            Some(event) => Ok(self.process(&event).await?),
        }
    }

    /// Fans an already-classified event out to every resolved recipient
    /// concurrently. Delivery failures are tallied, logged and audited, never
    /// propagated.
    pub async fn process(&self, event: &InboundEvent) -> Result<ProcessOutcome, DatabaseError> {
        let recipients = self.resolver.resolve(event).await?;
        if recipients.is_empty() {
            debug!(kind = event.kind(), "no linked recipients for event");
            return Ok(ProcessOutcome::default());
        }

        let attempts = recipients
            .iter()
            .map(|recipient| self.deliver_one(event, recipient));
        let results = futures::future::join_all(attempts).await;

        let delivered = results.iter().filter(|ok| **ok).count();
        let outcome = ProcessOutcome {
            resolved: results.len(),
            delivered,
            failed: results.len() - delivered,
        };
        info!(
            kind = event.kind(),
            resolved = outcome.resolved,
            delivered = outcome.delivered,
            failed = outcome.failed,
            "event processed"
        );
        Ok(outcome)
    }

    async fn deliver_one(&self, event: &InboundEvent, recipient: &Recipient) -> bool {
        let result = match event {
            InboundEvent::MergeRequest(mr) => {
                self.dispatcher
                    .dispatch_merge_request(&recipient.account, mr, recipient.reason)
                    .await
            }
            InboundEvent::Comment(comment) => {
                self.dispatcher
                    .dispatch_comment(&recipient.account, comment)
                    .await
            }
            // Resolution never yields recipients for other events.
            InboundEvent::Other { .. } => return true,
        };

        if let Err(error) = &result {
            warn!(
                slack_user_id = %recipient.account.slack_user_id,
                %error,
                "notification delivery failed"
            );
        }

        if let Some(record) = audit_record(event, recipient, &result) {
            if let Err(error) = self.audit.append_notification(&record).await {
                warn!(%error, "failed to record notification audit entry");
            }
        }

        result.is_ok()
    }
}

/// One audit row per delivery attempt, successful or not.
fn audit_record(
    event: &InboundEvent,
    recipient: &Recipient,
    result: &Result<(), crate::slack::SlackError>,
) -> Option<NewNotificationRecord> {
    let delivered = result.is_ok();
    match event {
        InboundEvent::MergeRequest(mr) => Some(NewNotificationRecord {
            account_id: recipient.account.id,
            event_kind: event.kind().to_string(),
            project_id: mr.project.id,
            merge_request_iid: mr.iid,
            object_id: mr.id,
            payload: json!({
                "action": mr.action,
                "reason": recipient.reason.as_str(),
                "author": mr.author_name,
                "delivered": delivered,
            }),
        }),
        InboundEvent::Comment(comment) => Some(NewNotificationRecord {
            account_id: recipient.account.id,
            event_kind: event.kind().to_string(),
            project_id: comment.project.id,
            merge_request_iid: comment.mr_iid,
            object_id: comment.note_id,
            payload: json!({
                "reason": recipient.reason.as_str(),
                "author": comment.author_name,
                "delivered": delivered,
            }),
        }),
        InboundEvent::Other { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use tempfile::NamedTempFile;

    use super::{NotificationDispatcher, NotifierCore, RecipientResolver};
    use crate::config::DatabaseConfig;
    use crate::db::{DatabaseManager, GitLabAccountData};
    use crate::slack::{MessageSender, SlackError};

    /// Records every delivery and fails for one configured user.
    struct FlakySender {
        fail_for: Option<String>,
        sent: Mutex<Vec<String>>,
    }

    impl FlakySender {
        fn new(fail_for: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                fail_for: fail_for.map(str::to_string),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MessageSender for FlakySender {
        async fn send_direct_message(
            &self,
            slack_user_id: &str,
            _text: &str,
            _blocks: &Value,
        ) -> Result<(), SlackError> {
            if self.fail_for.as_deref() == Some(slack_user_id) {
                return Err(SlackError::Api("channel_not_found".to_string()));
            }
            self.sent.lock().push(slack_user_id.to_string());
            Ok(())
        }
    }

    async fn notifier_with_accounts(
        sender: Arc<FlakySender>,
        accounts: &[(i64, &str, &str)],
    ) -> (NotifierCore, Arc<DatabaseManager>, NamedTempFile) {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let config = DatabaseConfig {
            filename: file.path().to_string_lossy().to_string(),
        };
        let db = Arc::new(DatabaseManager::new(&config).await.expect("db manager"));
        db.migrate().await.expect("migrate");

        let store = db.account_store();
        for (gitlab_id, username, slack_user) in accounts {
            store
                .upsert(
                    slack_user,
                    "T1",
                    &GitLabAccountData {
                        gitlab_user_id: *gitlab_id,
                        gitlab_username: username.to_string(),
                        gitlab_email: None,
                        access_token: "token".to_string().into(),
                        refresh_token: None,
                    },
                )
                .await
                .expect("seed account");
        }

        let notifier = NotifierCore::new(
            RecipientResolver::new(db.account_store()),
            NotificationDispatcher::new(sender),
            db.audit_store(),
        );
        (notifier, db, file)
    }

    fn merge_request_payload(assignee_ids: &[i64]) -> Value {
        let assignees: Vec<Value> = assignee_ids.iter().map(|id| json!({ "id": id })).collect();
        json!({
            "object_kind": "merge_request",
            "user": { "name": "Carol" },
            "project": { "id": 42, "name": "widgets", "web_url": "https://gitlab.example.com/acme/widgets" },
            "object_attributes": {
                "iid": 7,
                "id": 1234,
                "title": "Add frobnicator",
                "state": "opened",
                "action": "open",
                "source_branch": "feature/frob",
                "target_branch": "main"
            },
            "assignees": assignees
        })
    }

    #[tokio::test]
    async fn one_failed_delivery_does_not_abort_siblings() {
        let sender = FlakySender::new(Some("UB"));
        let (notifier, db, _file) = notifier_with_accounts(
            sender.clone(),
            &[(100, "alice", "UA"), (200, "bob", "UB"), (300, "carol", "UC")],
        )
        .await;

        let outcome = notifier
            .handle_webhook("Merge Request Hook", &merge_request_payload(&[100, 200, 300]))
            .await
            .expect("processing succeeds");

        assert_eq!(outcome.resolved, 3);
        assert_eq!(outcome.delivered, 2);
        assert_eq!(outcome.failed, 1);

        let mut sent = sender.sent.lock().clone();
        sent.sort_unstable();
        assert_eq!(sent, vec!["UA", "UC"]);

        // Every attempt is audited, the failed one included.
        let audit = db.audit_store();
        for (slack_user, delivered) in [("UA", true), ("UB", false), ("UC", true)] {
            let account = db
                .account_store()
                .get_by_slack_identity(slack_user, "T1")
                .await
                .expect("lookup succeeds")
                .expect("account exists");
            let records = audit
                .list_notifications_for_account(account.id)
                .await
                .expect("audit list succeeds");
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].event_kind, "merge_request");
            assert_eq!(records[0].payload["delivered"], json!(delivered));
        }
    }

    #[tokio::test]
    async fn unrecognized_event_is_ignored_without_delivery() {
        let sender = FlakySender::new(None);
        let (notifier, _db, _file) =
            notifier_with_accounts(sender.clone(), &[(100, "alice", "UA")]).await;

        let outcome = notifier
            .handle_webhook("Push Hook", &json!({ "anything": true }))
            .await
            .expect("processing succeeds");

        assert_eq!(outcome.resolved, 0);
        assert!(sender.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn incomplete_recognized_payload_is_a_noop() {
        let sender = FlakySender::new(None);
        let (notifier, _db, _file) =
            notifier_with_accounts(sender.clone(), &[(100, "alice", "UA")]).await;

        let outcome = notifier
            .handle_webhook("Merge Request Hook", &json!({ "project": { "id": 1, "name": "w", "web_url": "u" } }))
            .await
            .expect("processing succeeds");

        assert_eq!(outcome.resolved, 0);
        assert!(sender.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_surfaces_as_error() {
        let sender = FlakySender::new(None);
        let (notifier, _db, _file) = notifier_with_accounts(sender, &[]).await;

        let mut payload = merge_request_payload(&[]);
        payload["object_attributes"]["iid"] = json!("seven");
        let error = notifier
            .handle_webhook("Merge Request Hook", &payload)
            .await
            .expect_err("classification fails");
        assert!(matches!(error, super::NotifyError::Classify(_)));
    }

    #[tokio::test]
    async fn mention_fan_out_records_note_object_id() {
        let sender = FlakySender::new(None);
        let (notifier, db, _file) =
            notifier_with_accounts(sender.clone(), &[(100, "alice", "UA")]).await;

        let payload = json!({
            "object_kind": "note",
            "user": { "name": "Carol" },
            "project": { "id": 42, "name": "widgets", "web_url": "https://gitlab.example.com/acme/widgets" },
            "object_attributes": { "id": 555, "note": "ping @alice" },
            "merge_request": { "iid": 7, "title": "Add frobnicator" }
        });

        let outcome = notifier
            .handle_webhook("Note Hook", &payload)
            .await
            .expect("processing succeeds");
        assert_eq!(outcome.delivered, 1);

        let account = db
            .account_store()
            .get_by_slack_identity("UA", "T1")
            .await
            .expect("lookup succeeds")
            .expect("account exists");
        let records = db
            .audit_store()
            .list_notifications_for_account(account.id)
            .await
            .expect("audit list succeeds");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_kind, "mention");
        assert_eq!(records[0].object_id, 555);
        assert_eq!(records[0].merge_request_iid, 7);
    }
}
