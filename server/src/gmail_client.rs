//! Gmail client factory: returns an authenticated client per user,
//! refreshing the access token when it is within 60s of expiry. Token
//! mutation is guarded per-user so two concurrent callers never refresh the
//! same account's token twice.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use entity::oauth_account;
use lib_utils::crypt;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;

use crate::{email::gmail::GmailRestClient, error::AppError, server_config::cfg};

const REFRESH_SKEW_SECS: i64 = 60;
const MAX_REFRESH_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct GmailClientFactory {
    http_client: reqwest::Client,
    conn: DatabaseConnection,
    /// One mutex per user id so refreshes serialize without blocking other
    /// users' requests.
    locks: Arc<DashMap<i32, Arc<Mutex<()>>>>,
}

impl GmailClientFactory {
    pub fn new(http_client: reqwest::Client, conn: DatabaseConnection) -> Self {
        Self {
            http_client,
            conn,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, user_id: i32) -> Arc<Mutex<()>> {
        self.locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Returns a client bound to a valid (refreshed if needed) access token
    /// for `user_id`.
    pub async fn get(&self, user_id: i32) -> Result<GmailRestClient, AppError> {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        let account = self.load_account(user_id).await?;

        let access_token = if needs_refresh(account.expires_at.into()) {
            self.refresh(account).await?
        } else {
            crypt::decrypt(&account.access_token_enc)?
        };

        Ok(GmailRestClient::new(self.http_client.clone(), access_token))
    }

    /// Forces a refresh regardless of the stored expiry — used when a Gmail
    /// call itself returns 401, so the caller can retry once with a fresh
    /// token.
    pub async fn force_refresh(&self, user_id: i32) -> Result<GmailRestClient, AppError> {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        let account = self.load_account(user_id).await?;
        let access_token = self.refresh(account).await?;
        Ok(GmailRestClient::new(self.http_client.clone(), access_token))
    }

    async fn load_account(&self, user_id: i32) -> Result<oauth_account::Model, AppError> {
        oauth_account::Entity::find()
            .filter(oauth_account::Column::UserId.eq(user_id))
            .one(&self.conn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no oauth account for user {user_id}")))
    }

    async fn refresh(&self, account: oauth_account::Model) -> Result<String, AppError> {
        let refresh_token = crypt::decrypt(&account.refresh_token_enc)?;

        let mut attempt = 0u32;
        let mut delay = Duration::from_secs(1);
        loop {
            match self.request_refresh(&refresh_token).await {
                Ok((access_token, expires_in)) => {
                    let expires_at = Utc::now() + ChronoDuration::seconds(expires_in);
                    let access_token_enc = crypt::encrypt(&access_token)?;

                    let mut model: oauth_account::ActiveModel = account.into();
                    model.access_token_enc = Set(access_token_enc);
                    model.expires_at = Set(expires_at.into());
                    model.updated_at = Set(Utc::now().into());
                    model.update(&self.conn).await?;

                    return Ok(access_token);
                }
                Err(e) if attempt < MAX_REFRESH_RETRIES - 1 => {
                    tracing::warn!("token refresh attempt {attempt} failed: {:?}", e);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(10));
                    attempt += 1;
                }
                Err(_) => return Err(AppError::TokenExpired),
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> anyhow::Result<(String, i64)> {
        #[derive(serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: i64,
        }

        let resp = self
            .http_client
            .post("https://oauth2.googleapis.com/token")
            .form(&[
                ("client_id", cfg.google_client_id.as_str()),
                ("client_secret", cfg.google_client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?
            .error_for_status()?;

        let data: TokenResponse = resp.json().await?;
        Ok((data.access_token, data.expires_in))
    }
}

fn needs_refresh(expires_at: DateTime<Utc>) -> bool {
    expires_at - Utc::now() < ChronoDuration::seconds(REFRESH_SKEW_SECS)
}
