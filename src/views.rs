/// HTML views
///
/// Pure rendering of the provider index and of an authenticated profile.
/// Templates are compiled once at startup; Handlebars escapes every value.
use handlebars::Handlebars;
use serde_json::json;

use crate::auth::{AuthError, AuthenticatedIdentity, ProviderIndex};

const INDEX_TEMPLATE: &str = "index";
const PROFILE_TEMPLATE: &str = "profile";

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Sign In</title>
</head>
<body>
    <main>
        <h1>Sign In</h1>
        {{#each providers}}
        <p><a href="/auth/{{id}}">Log in with {{display_name}}</a></p>
        {{else}}
        <p>No identity providers are configured.</p>
        {{/each}}
    </main>
</body>
</html>
"#;

const PROFILE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{{provider}} profile</title>
</head>
<body>
    <main>
        <p><a href="/logout/{{provider}}">logout</a></p>
        <p>Name: {{name}} [{{last_name}}, {{first_name}}]</p>
        <p>Email: {{email}}</p>
        <p>NickName: {{nickname}}</p>
        <p>Location: {{location}}</p>
        <p>AvatarURL: {{avatar_url}}{{#if avatar_url}} <img src="{{avatar_url}}">{{/if}}</p>
        <p>Description: {{description}}</p>
        <p>UserID: {{user_id}}</p>
        <p>AccessToken: {{access_token}}</p>
        <p>ExpiresAt: {{expires_at}}</p>
        <p>RefreshToken: {{refresh_token}}</p>
    </main>
</body>
</html>
"#;

pub struct Views {
    registry: Handlebars<'static>,
}

impl Views {
    pub fn new() -> Result<Self, AuthError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);

        registry
            .register_template_string(INDEX_TEMPLATE, INDEX_HTML)
            .map_err(|e| AuthError::Render(format!("index template: {}", e)))?;
        registry
            .register_template_string(PROFILE_TEMPLATE, PROFILE_HTML)
            .map_err(|e| AuthError::Render(format!("profile template: {}", e)))?;

        Ok(Self { registry })
    }

    pub fn render_index(&self, index: &ProviderIndex) -> Result<String, AuthError> {
        let data = json!({ "providers": index.entries() });
        self.registry
            .render(INDEX_TEMPLATE, &data)
            .map_err(|e| AuthError::Render(e.to_string()))
    }

    pub fn render_profile(&self, identity: &AuthenticatedIdentity) -> Result<String, AuthError> {
        self.registry
            .render(PROFILE_TEMPLATE, identity)
            .map_err(|e| AuthError::Render(e.to_string()))
    }
}
