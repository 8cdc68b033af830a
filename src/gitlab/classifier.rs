use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::{MERGE_REQUEST_HOOK, NOTE_HOOK};

/// The classifier is the single boundary where untyped webhook JSON becomes
/// internal types. Nothing downstream re-inspects the raw payload.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
}

#[derive(Debug, Clone)]
pub struct ProjectRef {
    pub id: i64,
    pub name: String,
    pub web_url: String,
}

#[derive(Debug, Clone)]
pub struct MergeRequestEvent {
    pub project: ProjectRef,
    /// Project-scoped number (`!7`).
    pub iid: i64,
    /// Instance-global id.
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub state: String,
    pub action: String,
    pub source_branch: String,
    pub target_branch: String,
    pub url: Option<String>,
    pub assignee_ids: Vec<i64>,
    pub reviewer_ids: Vec<i64>,
    pub author_name: String,
}

#[derive(Debug, Clone)]
pub struct CommentEvent {
    pub project: ProjectRef,
    pub mr_iid: i64,
    pub mr_title: String,
    pub mr_url: Option<String>,
    pub note_id: i64,
    pub text: String,
    pub url: Option<String>,
    pub author_name: String,
}

/// A classified webhook payload, immutable once constructed.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    MergeRequest(MergeRequestEvent),
    Comment(CommentEvent),
    Other { label: String },
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::MergeRequest(_) => "merge_request",
            InboundEvent::Comment(_) => "mention",
            InboundEvent::Other { .. } => "other",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawProject {
    id: i64,
    name: String,
    web_url: String,
}

impl RawProject {
    fn into_ref(self) -> ProjectRef {
        ProjectRef {
            id: self.id,
            name: self.name,
            web_url: self.web_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMergeRequestAttributes {
    iid: i64,
    id: i64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    state: String,
    #[serde(default)]
    action: Option<String>,
    source_branch: String,
    target_branch: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawNoteAttributes {
    id: i64,
    note: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMergeRequestRef {
    iid: i64,
    title: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUserRef {
    id: i64,
}

fn author_name(payload: &Value) -> String {
    payload
        .pointer("/user/name")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

fn parse_field<T: serde::de::DeserializeOwned>(
    value: &Value,
    field: &str,
) -> Result<T, ClassifyError> {
    serde_json::from_value(value.clone())
        .map_err(|e| ClassifyError::MalformedPayload(format!("{field}: {e}")))
}

fn parse_user_ids(payload: &Value, field: &str) -> Result<Vec<i64>, ClassifyError> {
    match payload.get(field) {
        Some(v) if !v.is_null() => {
            let users: Vec<RawUserRef> = parse_field(v, field)?;
            Ok(users.into_iter().map(|u| u.id).collect())
        }
        _ => Ok(Vec::new()),
    }
}

fn present<'a>(payload: &'a Value, field: &str) -> Option<&'a Value> {
    payload.get(field).filter(|v| !v.is_null())
}

/// Maps a raw webhook to a classified event.
///
/// Returns `Ok(None)` for recognized event labels whose payload is missing
/// the sub-objects this service needs (a no-op, not an error). Unrecognized
/// labels classify as [`InboundEvent::Other`]. Only structurally malformed
/// payloads fail.
pub fn classify(event_label: &str, payload: &Value) -> Result<Option<InboundEvent>, ClassifyError> {
    match event_label {
        MERGE_REQUEST_HOOK => classify_merge_request(payload),
        NOTE_HOOK => classify_note(payload),
        other => Ok(Some(InboundEvent::Other {
            label: other.to_string(),
        })),
    }
}

fn classify_merge_request(payload: &Value) -> Result<Option<InboundEvent>, ClassifyError> {
    let Some(attributes) = present(payload, "object_attributes") else {
        return Ok(None);
    };
    let Some(project) = present(payload, "project") else {
        return Err(ClassifyError::MalformedPayload(
            "merge request event without project".to_string(),
        ));
    };

    let attrs: RawMergeRequestAttributes = parse_field(attributes, "object_attributes")?;
    let project: RawProject = parse_field(project, "project")?;

    Ok(Some(InboundEvent::MergeRequest(MergeRequestEvent {
        project: project.into_ref(),
        iid: attrs.iid,
        id: attrs.id,
        title: attrs.title,
        description: attrs.description.filter(|d| !d.trim().is_empty()),
        state: attrs.state,
        action: attrs.action.unwrap_or_default(),
        source_branch: attrs.source_branch,
        target_branch: attrs.target_branch,
        url: attrs.url,
        assignee_ids: parse_user_ids(payload, "assignees")?,
        reviewer_ids: parse_user_ids(payload, "reviewers")?,
        author_name: author_name(payload),
    })))
}

fn classify_note(payload: &Value) -> Result<Option<InboundEvent>, ClassifyError> {
    let Some(attributes) = present(payload, "object_attributes") else {
        return Ok(None);
    };
    let Some(merge_request) = present(payload, "merge_request") else {
        // Notes on issues, snippets or commits are not in scope.
        return Ok(None);
    };
    let Some(project) = present(payload, "project") else {
        return Err(ClassifyError::MalformedPayload(
            "note event without project".to_string(),
        ));
    };

    let note: RawNoteAttributes = parse_field(attributes, "object_attributes")?;
    let mr: RawMergeRequestRef = parse_field(merge_request, "merge_request")?;
    let project: RawProject = parse_field(project, "project")?;

    Ok(Some(InboundEvent::Comment(CommentEvent {
        project: project.into_ref(),
        mr_iid: mr.iid,
        mr_title: mr.title,
        mr_url: mr.url,
        note_id: note.id,
        text: note.note,
        url: note.url,
        author_name: author_name(payload),
    })))
}

static MENTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(\w+)").expect("valid mention regex"));

/// Collects `@username` occurrences in order. Duplicate mentions of the same
/// name are preserved here; recipient resolution deduplicates by account.
pub fn extract_mentions(text: &str) -> Vec<String> {
    MENTION_RE
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}
