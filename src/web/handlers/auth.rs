use salvo::prelude::*;
use tracing::warn;

use crate::gitlab::LinkError;
use crate::web::web_state;

fn terminal_page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\
         <html><head><title>{title}</title></head>\
         <body style=\"font-family: sans-serif; text-align: center; margin-top: 4em;\">\
         <h1>{title}</h1><p>{body}</p>\
         <p>You can close this window and return to Slack.</p>\
         </body></html>"
    )
}

/// Browser-facing OAuth redirect target. Renders a terminal HTML page in all
/// outcomes; there is nowhere further to redirect the user to.
#[handler]
pub async fn oauth_callback(req: &mut Request, res: &mut Response) {
    let code = req.query::<String>("code");
    let state = req.query::<String>("state");
    let error = req.query::<String>("error");

    let result = web_state()
        .linking
        .complete_link(code.as_deref(), state.as_deref(), error.as_deref())
        .await;

    match result {
        Ok(account) => {
            res.render(Text::Html(terminal_page(
                "GitLab account connected",
                &format!(
                    "Your GitLab account <strong>@{}</strong> is now linked. \
                     You will receive Slack notifications for your merge requests.",
                    account.gitlab_username
                ),
            )));
        }
        Err(err) => {
            warn!("account linking failed: {}", err);
            let status = match &err {
                LinkError::AuthorizationDenied(_)
                | LinkError::MalformedCallback
                | LinkError::InvalidOrExpiredState => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let body = match &err {
                LinkError::AuthorizationDenied(_) => {
                    "GitLab reported that authorization was denied. \
                     Run <code>/gitlab-connect</code> in Slack to try again."
                }
                LinkError::InvalidOrExpiredState => {
                    "This authorization link has expired or was already used. \
                     Run <code>/gitlab-connect</code> in Slack to get a fresh one."
                }
                LinkError::MalformedCallback => {
                    "The authorization response was incomplete. \
                     Run <code>/gitlab-connect</code> in Slack to try again."
                }
                _ => {
                    "Something went wrong while completing the connection. \
                     Run <code>/gitlab-connect</code> in Slack to try again."
                }
            };
            res.status_code(status);
            res.render(Text::Html(terminal_page("Connection failed", body)));
        }
    }
}
