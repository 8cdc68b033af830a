use salvo::prelude::*;
use serde_json::{Value, json};
use tracing::warn;

use crate::web::web_state;

use super::render_error;

fn ephemeral(text: &str) -> Value {
    json!({ "response_type": "ephemeral", "text": text })
}

fn ephemeral_with_blocks(text: &str, blocks: Value) -> Value {
    json!({ "response_type": "ephemeral", "text": text, "blocks": blocks })
}

/// Slack slash-command endpoint. Slack posts form-encoded fields and expects
/// a JSON message body back within its 3-second window, so every branch here
/// stays local (the OAuth round-trip happens later in the user's browser).
#[handler]
pub async fn slack_command(req: &mut Request, res: &mut Response) {
    let command = req.form::<String>("command").await;
    let user_id = req.form::<String>("user_id").await;
    let team_id = req.form::<String>("team_id").await;

    let (Some(command), Some(user_id), Some(team_id)) = (command, user_id, team_id) else {
        render_error(res, StatusCode::BAD_REQUEST, "missing slash command fields");
        return;
    };

    match command.as_str() {
        "/gitlab-connect" => connect(&user_id, &team_id, res),
        "/gitlab-status" => status(&user_id, &team_id, res).await,
        "/gitlab-disconnect" => disconnect(&user_id, &team_id, res).await,
        other => {
            warn!(command = %other, "unknown slash command");
            res.render(Json(ephemeral(&format!("Unknown command: {other}"))));
        }
    }
}

fn connect(user_id: &str, team_id: &str, res: &mut Response) {
    let authorize_url = web_state().linking.begin_link(user_id, team_id);
    let blocks = json!([
        {
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": "*Connect your GitLab account*\n\nAuthorize the integration \
                         to receive merge request notifications as direct messages.",
            }
        },
        {
            "type": "actions",
            "elements": [{
                "type": "button",
                "text": { "type": "plain_text", "text": "Connect GitLab" },
                "url": authorize_url,
                "style": "primary",
            }]
        },
        {
            "type": "context",
            "elements": [{
                "type": "mrkdwn",
                "text": "The link is valid for 10 minutes and can be used once.",
            }]
        }
    ]);
    res.render(Json(ephemeral_with_blocks(
        "Connect your GitLab account",
        blocks,
    )));
}

async fn status(user_id: &str, team_id: &str, res: &mut Response) {
    let lookup = web_state()
        .db_manager
        .account_store()
        .get_by_slack_identity(user_id, team_id)
        .await;

    match lookup {
        Ok(Some(account)) => {
            res.render(Json(ephemeral(&format!(
                "Connected to GitLab as *@{}* since {}.",
                account.gitlab_username,
                account.created_at.format("%Y-%m-%d")
            ))));
        }
        Ok(None) => {
            res.render(Json(ephemeral(
                "No GitLab account connected. Run `/gitlab-connect` to link one.",
            )));
        }
        Err(err) => {
            warn!(%err, "slash command status lookup failed");
            render_error(res, StatusCode::INTERNAL_SERVER_ERROR, "storage failure");
        }
    }
}

async fn disconnect(user_id: &str, team_id: &str, res: &mut Response) {
    match web_state().linking.unlink(user_id, team_id).await {
        Ok(()) => {
            res.render(Json(ephemeral(
                "GitLab account disconnected. You will no longer receive notifications.",
            )));
        }
        Err(err) => {
            warn!(%err, "slash command disconnect failed");
            render_error(res, StatusCode::INTERNAL_SERVER_ERROR, "storage failure");
        }
    }
}
