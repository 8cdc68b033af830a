pub use self::parser::{
    Config, DatabaseConfig, GitLabConfig, LoggingConfig, ServerConfig, SlackConfig, WebhookConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
