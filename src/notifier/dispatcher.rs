use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};

use crate::db::LinkedAccount;
use crate::gitlab::{CommentEvent, MergeRequestEvent};
use crate::slack::{MessageSender, SlackError};

use super::resolver::NotifyReason;

const DESCRIPTION_LIMIT: usize = 300;
const COMMENT_LIMIT: usize = 500;

/// Merge-request lifecycle actions GitLab reports. Unrecognized actions fall
/// back to a generic label instead of being dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeRequestAction {
    Open,
    Close,
    Reopen,
    Update,
    Approved,
    Unapproved,
    Approval,
    Unapproval,
    Merge,
    Ready,
}

impl MergeRequestAction {
    fn parse(action: &str) -> Option<Self> {
        match action {
            "open" => Some(Self::Open),
            "close" => Some(Self::Close),
            "reopen" => Some(Self::Reopen),
            "update" => Some(Self::Update),
            "approved" => Some(Self::Approved),
            "unapproved" => Some(Self::Unapproved),
            "approval" => Some(Self::Approval),
            "unapproval" => Some(Self::Unapproval),
            "merge" => Some(Self::Merge),
            "ready" => Some(Self::Ready),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Open => "Opened",
            Self::Close => "Closed",
            Self::Reopen => "Reopened",
            Self::Update => "Updated",
            Self::Approved => "Approved",
            Self::Unapproved => "Rejected",
            Self::Approval => "Approved",
            Self::Unapproval => "Unapproved",
            Self::Merge => "Merged",
            Self::Ready => "Ready for review",
        }
    }
}

pub fn action_label(action: &str) -> String {
    match MergeRequestAction::parse(action) {
        Some(known) => known.label().to_string(),
        None => format!("changed: {action}"),
    }
}

fn role_text(reason: NotifyReason) -> &'static str {
    match reason {
        NotifyReason::Assignee => "assigned to you",
        NotifyReason::Reviewer => "review requested from you",
        NotifyReason::Mention => "you were mentioned",
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let truncated: String = text.chars().take(limit).collect();
    format!("{truncated}...")
}

static MENTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(\w+)").expect("valid mention regex"));

fn emphasize_mentions(text: &str) -> String {
    MENTION_RE.replace_all(text, "*@$1*").to_string()
}

fn link_button(label: &str, url: &str) -> Value {
    json!({
        "type": "button",
        "text": { "type": "plain_text", "text": label },
        "url": url,
    })
}

/// Fallback text plus Block Kit blocks for a merge-request notification.
pub fn render_merge_request(event: &MergeRequestEvent, reason: NotifyReason) -> (String, Value) {
    let label = action_label(&event.action);
    let text = format!("{label} merge request: {}", event.title);

    let mut blocks = vec![
        json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!("*{label} merge request*\n\n*{}*", event.title),
            }
        }),
        json!({
            "type": "section",
            "fields": [
                { "type": "mrkdwn", "text": format!("*Project:*\n{}", event.project.name) },
                { "type": "mrkdwn", "text": format!("*Author:*\n{}", event.author_name) },
                { "type": "mrkdwn", "text": format!("*Your role:*\n{}", role_text(reason)) },
                { "type": "mrkdwn", "text": format!("*Status:*\n{}", event.state) },
            ]
        }),
    ];

    if let Some(description) = &event.description {
        blocks.push(json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!("*Description:*\n{}", truncate(description, DESCRIPTION_LIMIT)),
            }
        }));
    }

    let mut buttons = Vec::new();
    if let Some(url) = &event.url {
        buttons.push(link_button("View MR", url));
    }
    buttons.push(link_button("Open project", &event.project.web_url));
    blocks.push(json!({ "type": "actions", "elements": buttons }));

    blocks.push(json!({
        "type": "context",
        "elements": [{
            "type": "mrkdwn",
            "text": format!(
                "MR !{} • `{}` → `{}`",
                event.iid, event.source_branch, event.target_branch
            ),
        }]
    }));

    (text, Value::Array(blocks))
}

/// Fallback text plus Block Kit blocks for a comment-mention notification.
pub fn render_comment(event: &CommentEvent) -> (String, Value) {
    let text = format!("Mention in MR: {}", event.mr_title);
    let comment = emphasize_mentions(&truncate(&event.text, COMMENT_LIMIT));

    let mut blocks = vec![
        json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!("*You were mentioned in a comment*\n\n*MR: {}*", event.mr_title),
            }
        }),
        json!({
            "type": "section",
            "fields": [
                { "type": "mrkdwn", "text": format!("*Project:*\n{}", event.project.name) },
                { "type": "mrkdwn", "text": format!("*Comment author:*\n{}", event.author_name) },
            ]
        }),
        json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": format!("*Comment:*\n{comment}") }
        }),
    ];

    let mut buttons = Vec::new();
    // The comment anchor when GitLab provides one, otherwise the MR itself.
    if let Some(url) = event.url.as_ref().or(event.mr_url.as_ref()) {
        buttons.push(link_button("Reply", url));
    }
    if let Some(url) = &event.mr_url {
        buttons.push(link_button("View MR", url));
    }
    if !buttons.is_empty() {
        blocks.push(json!({ "type": "actions", "elements": buttons }));
    }

    blocks.push(json!({
        "type": "context",
        "elements": [{
            "type": "mrkdwn",
            "text": format!("MR !{} • {}", event.mr_iid, event.project.name),
        }]
    }));

    (text, Value::Array(blocks))
}

/// Renders and delivers one notification per call. No retries; a failed
/// delivery is reported to the caller and isolated there.
pub struct NotificationDispatcher {
    sender: Arc<dyn MessageSender>,
}

impl NotificationDispatcher {
    pub fn new(sender: Arc<dyn MessageSender>) -> Self {
        Self { sender }
    }

    pub async fn dispatch_merge_request(
        &self,
        account: &LinkedAccount,
        event: &MergeRequestEvent,
        reason: NotifyReason,
    ) -> Result<(), SlackError> {
        let (text, blocks) = render_merge_request(event, reason);
        self.sender
            .send_direct_message(&account.slack_user_id, &text, &blocks)
            .await
    }

    pub async fn dispatch_comment(
        &self,
        account: &LinkedAccount,
        event: &CommentEvent,
    ) -> Result<(), SlackError> {
        let (text, blocks) = render_comment(event);
        self.sender
            .send_direct_message(&account.slack_user_id, &text, &blocks)
            .await
    }

    /// Operational check that the bot can reach a user. Not audited.
    pub async fn dispatch_test(&self, slack_user_id: &str) -> Result<(), SlackError> {
        let blocks = json!([{
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": "*Test notification*\n\nThe GitLab-Slack integration can reach you.",
            }
        }]);
        self.sender
            .send_direct_message(slack_user_id, "Test notification", &blocks)
            .await
    }

    /// Tells a user their integration is broken. Not audited.
    pub async fn dispatch_error(
        &self,
        slack_user_id: &str,
        error: &str,
        context: &str,
    ) -> Result<(), SlackError> {
        let blocks = json!([
            {
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!("*Error in GitLab integration*\n\n{context}"),
                }
            },
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("*Error:*\n`{error}`") }
            },
            {
                "type": "context",
                "elements": [{
                    "type": "mrkdwn",
                    "text": "Try reconnecting your GitLab account with `/gitlab-connect`",
                }]
            }
        ]);
        self.sender
            .send_direct_message(slack_user_id, "Error in GitLab integration", &blocks)
            .await
    }
}
