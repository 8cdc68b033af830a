#![forbid(unsafe_code)]
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

mod cli;
mod config;
mod db;
mod gitlab;
mod notifier;
mod slack;
mod utils;
mod web;

use config::Config;
use notifier::{NotificationDispatcher, NotifierCore, RecipientResolver};
use web::WebServer;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let config = Arc::new(Config::load(args.config.as_deref())?);
    utils::logging::init_tracing(&config.logging);
    info!("slack-gitlab notifier starting up");

    let db_manager = Arc::new(db::DatabaseManager::new(&config.database).await?);
    db_manager.migrate().await?;

    let slack_client: Arc<dyn slack::MessageSender> =
        Arc::new(slack::SlackClient::new(config.clone())?);
    let linking = Arc::new(gitlab::LinkingFlow::new(config.clone(), db_manager.clone())?);

    let notifier = Arc::new(NotifierCore::new(
        RecipientResolver::new(db_manager.account_store()),
        NotificationDispatcher::new(slack_client),
        db_manager.audit_store(),
    ));

    let web_server = WebServer::new(
        config.clone(),
        db_manager.clone(),
        linking.clone(),
        notifier.clone(),
    )
    .await?;

    web_server.start().await?;

    info!("slack-gitlab notifier shutting down");
    Ok(())
}
