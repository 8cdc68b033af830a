pub use self::error::DatabaseError;
pub use self::manager::DatabaseManager;
pub use self::models::{
    GitLabAccountData, LinkedAccount, NewNotificationRecord, NewWebhookLog, NotificationRecord,
    WebhookLogEntry,
};
pub use self::stores::{AccountStore, AuditStore};

pub mod error;
pub mod manager;
pub mod models;
pub mod schema_sqlite;
pub mod sqlite;
pub mod stores;
