use std::fmt;

use time::OffsetDateTime;

/// One row of the `api` table: password-grant credentials plus the last
/// issued access token.
#[derive(Clone, sqlx::FromRow)]
pub struct ApiCredentials {
    pub id: i64,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub token: Option<String>,
    pub token_updated: Option<OffsetDateTime>,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("token_updated", &self.token_updated)
            .finish_non_exhaustive()
    }
}
