pub use self::classifier::{
    ClassifyError, CommentEvent, InboundEvent, MergeRequestEvent, ProjectRef, classify,
    extract_mentions,
};
pub use self::oauth::{LinkError, LinkingFlow, PendingLinkStates, TokenPair};

pub mod classifier;
pub mod oauth;

/// Case-sensitive `x-gitlab-event` labels this service reacts to.
pub const MERGE_REQUEST_HOOK: &str = "Merge Request Hook";
pub const NOTE_HOOK: &str = "Note Hook";
