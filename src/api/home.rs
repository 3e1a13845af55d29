//! Home page
//!
//! Shows the signed-in user, or the Clef login button for anonymous visitors.

use axum::{extract::State, response::Html};
use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::AppState;
use crate::auth::MaybeUser;
use crate::config::AppConfig;
use crate::data::User;

/// GET /
pub async fn home(State(state): State<AppState>, MaybeUser(current): MaybeUser) -> Html<String> {
    let user = current.as_ref().map(|current| &current.user);
    Html(render_home(user, &state.config))
}

fn render_home(user: Option<&User>, config: &AppConfig) -> String {
    let body = match user {
        Some(user) => format!(
            r#"<h1>Welcome back</h1>
            <p>You are logged in as <strong>{email}</strong> (user #{id}).</p>
            <p>Log out from the Clef app on your phone to end this session.</p>"#,
            email = encode_text(&user.email),
            id = user.id,
        ),
        None => format!(
            r#"<h1>Sign in</h1>
            <script type="text/javascript"
                src="{script}"
                class="clef-button"
                data-app-id="{app_id}"
                data-redirect-url="{redirect_url}"></script>"#,
            script = encode_double_quoted_attribute(&config.provider.button_script_url),
            app_id = encode_double_quoted_attribute(&config.provider.app_id),
            redirect_url = encode_double_quoted_attribute(&config.server.login_redirect_url()),
        ),
    };

    format!(
        r#"<!DOCTYPE html>
        <html>
        <head><title>wavelogin</title></head>
        <body>
            {body}
        </body>
        </html>
    "#
    )
}
