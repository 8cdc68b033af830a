use std::collections::HashSet;
use std::sync::Arc;

use crate::db::{AccountStore, DatabaseError, LinkedAccount};
use crate::gitlab::{CommentEvent, InboundEvent, MergeRequestEvent, extract_mentions};

/// Why a linked account is being notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyReason {
    Assignee,
    Reviewer,
    Mention,
}

impl NotifyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyReason::Assignee => "assignee",
            NotifyReason::Reviewer => "reviewer",
            NotifyReason::Mention => "mention",
        }
    }
}

#[derive(Debug)]
pub struct Recipient {
    pub account: LinkedAccount,
    pub reason: NotifyReason,
}

/// Maps a classified event to the linked accounts that must be notified.
pub struct RecipientResolver {
    accounts: Arc<dyn AccountStore>,
}

impl RecipientResolver {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }

    /// Unknown GitLab identities are silently skipped; only storage failures
    /// propagate.
    pub async fn resolve(&self, event: &InboundEvent) -> Result<Vec<Recipient>, DatabaseError> {
        match event {
            InboundEvent::MergeRequest(mr) => self.resolve_merge_request(mr).await,
            InboundEvent::Comment(comment) => self.resolve_comment(comment).await,
            InboundEvent::Other { .. } => Ok(Vec::new()),
        }
    }

    /// Assignees first, then reviewers. A person holding both roles gets two
    /// entries on purpose, so both roles surface as separate notifications.
    async fn resolve_merge_request(
        &self,
        event: &MergeRequestEvent,
    ) -> Result<Vec<Recipient>, DatabaseError> {
        let mut recipients = Vec::new();

        for (ids, reason) in [
            (&event.assignee_ids, NotifyReason::Assignee),
            (&event.reviewer_ids, NotifyReason::Reviewer),
        ] {
            for gitlab_id in ids {
                if let Some(account) = self.accounts.get_by_gitlab_user_id(*gitlab_id).await? {
                    recipients.push(Recipient { account, reason });
                }
            }
        }

        Ok(recipients)
    }

    /// Filters linked accounts by mentioned username (case-sensitive exact
    /// match). Each matching account appears once regardless of how many
    /// times it was mentioned.
    async fn resolve_comment(
        &self,
        event: &CommentEvent,
    ) -> Result<Vec<Recipient>, DatabaseError> {
        let mentions = extract_mentions(&event.text);
        if mentions.is_empty() {
            return Ok(Vec::new());
        }
        let mentioned: HashSet<&str> = mentions.iter().map(String::as_str).collect();

        let recipients = self
            .accounts
            .get_all()
            .await?
            .into_iter()
            .filter(|account| mentioned.contains(account.gitlab_username.as_str()))
            .map(|account| Recipient {
                account,
                reason: NotifyReason::Mention,
            })
            .collect();
        Ok(recipients)
    }
}
