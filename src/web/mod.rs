use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use once_cell::sync::OnceCell;
use salvo::prelude::*;
use tracing::info;

use crate::config::Config;
use crate::db::DatabaseManager;
use crate::gitlab::LinkingFlow;
use crate::notifier::NotifierCore;

pub mod handlers;

use self::handlers::{
    auth::oauth_callback,
    commands::slack_command,
    health::{get_status, health_check},
    webhook::gitlab_webhook,
};

#[derive(Clone)]
pub struct WebState {
    pub config: Arc<Config>,
    pub db_manager: Arc<DatabaseManager>,
    pub linking: Arc<LinkingFlow>,
    pub notifier: Arc<NotifierCore>,
    pub started_at: Instant,
}

static WEB_STATE: OnceCell<WebState> = OnceCell::new();

pub fn web_state() -> &'static WebState {
    WEB_STATE
        .get()
        .expect("web state is not initialized before handler execution")
}

#[derive(Clone)]
pub struct WebServer {
    config: Arc<Config>,
}

impl WebServer {
    pub async fn new(
        config: Arc<Config>,
        db_manager: Arc<DatabaseManager>,
        linking: Arc<LinkingFlow>,
        notifier: Arc<NotifierCore>,
    ) -> Result<Self> {
        let _ = WEB_STATE.set(WebState {
            config: config.clone(),
            db_manager,
            linking,
            notifier,
            started_at: Instant::now(),
        });

        Ok(Self { config })
    }

    pub async fn start(&self) -> Result<()> {
        let bind_addr = format!(
            "{}:{}",
            self.config.server.bind_address, self.config.server.port
        );
        info!("Starting web server on {}", bind_addr);

        let acceptor = TcpListener::new(bind_addr).bind().await;
        Server::new(acceptor).serve(create_router()).await;

        Ok(())
    }
}

pub fn create_router() -> Router {
    Router::new()
        .get(get_status)
        .push(Router::with_path("health").get(health_check))
        .push(Router::with_path("status").get(get_status))
        .push(Router::with_path("webhook/gitlab").post(gitlab_webhook))
        .push(Router::with_path("auth/gitlab/callback").get(oauth_callback))
        .push(Router::with_path("slack/commands").post(slack_command))
}
