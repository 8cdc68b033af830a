use std::path::PathBuf;

use clap::Parser;

/// Slack notifications for GitLab merge request activity.
#[derive(Debug, Parser)]
#[command(name = "slack-gitlab-notifier", version, about)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "CONFIG_PATH")]
    pub config: Option<PathBuf>,
}
