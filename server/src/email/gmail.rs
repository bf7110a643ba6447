//! Raw Gmail REST client used by the email-send worker and the inbound
//! pipeline: a `gmail_url!` macro over rate-limited `reqwest`, plus
//! `mail_parser` for pulling sanitized headers and body text out of a
//! raw RFC 5322 payload. No label-taxonomy calls — just send/get/insert/
//! delete/history, the calls the sequencer actually needs.

use std::time::Duration;

use anyhow::Context;
use base64::{engine::general_purpose::URL_SAFE, Engine};
use leaky_bucket::RateLimiter;
use mail_parser::MessageParser;
use serde::{Deserialize, Serialize};
use serde_json::json;

const GMAIL_QUOTA_PER_SECOND: usize = 20;
/// Per-call timeout for all Gmail REST requests.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

macro_rules! gmail_url {
    ($($params:expr),*) => {
        {
            const GMAIL_ENDPOINT: &str = "https://www.googleapis.com/gmail/v1/users/me";
            let list_params = vec![$($params),*];
            let path = list_params.join("/");
            format!("{}/{}", GMAIL_ENDPOINT, path)
        }
    };
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessage {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GmailMessage {
    pub id: Option<String>,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    #[serde(rename = "labelIds")]
    pub label_ids: Option<Vec<String>>,
    #[serde(rename = "historyId")]
    pub history_id: Option<String>,
    pub raw: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GmailThread {
    pub id: Option<String>,
    pub messages: Option<Vec<GmailMessage>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryListResponse {
    pub history: Option<Vec<HistoryRecord>>,
    #[serde(rename = "historyId")]
    pub history_id: Option<String>,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryRecord {
    #[serde(rename = "messagesAdded")]
    pub messages_added: Option<Vec<HistoryMessageAdded>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryMessageAdded {
    pub message: GmailMessage,
}

/// Thin per-request handle bound to one user's access token. Cheap to
/// construct; the factory in `gmail_client.rs` makes a fresh one per call.
pub struct GmailRestClient {
    http_client: reqwest::Client,
    access_token: String,
    rate_limiter: RateLimiter,
}

impl GmailRestClient {
    pub fn new(http_client: reqwest::Client, access_token: String) -> Self {
        let rate_limiter = RateLimiter::builder()
            .initial(GMAIL_QUOTA_PER_SECOND)
            .interval(Duration::from_secs(1))
            .refill(GMAIL_QUOTA_PER_SECOND)
            .build();

        Self {
            http_client,
            access_token,
            rate_limiter,
        }
    }

    /// `users.messages.send`. `raw` is the base64url RFC 5322 message;
    /// `thread_id` ties the send to an existing thread.
    pub async fn send(&self, raw: &str, thread_id: Option<&str>) -> anyhow::Result<SendMessage> {
        self.rate_limiter.acquire(1).await;
        let mut body = json!({ "raw": raw });
        if let Some(thread_id) = thread_id {
            body["threadId"] = json!(thread_id);
        }

        let resp = self
            .http_client
            .post(gmail_url!("messages", "send"))
            .bearer_auth(&self.access_token)
            .timeout(CALL_TIMEOUT)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        Ok(resp.json::<SendMessage>().await?)
    }

    /// `users.messages.get(format=RAW)` — used for both the sanitized-inbound
    /// path and the sent-folder rewrite.
    pub async fn get_message_raw(&self, message_id: &str) -> anyhow::Result<GmailMessage> {
        self.rate_limiter.acquire(1).await;
        let resp = self
            .http_client
            .get(gmail_url!("messages", message_id))
            .bearer_auth(&self.access_token)
            .timeout(CALL_TIMEOUT)
            .query(&[("format", "RAW")])
            .send()
            .await?
            .error_for_status()?;

        Ok(resp.json::<GmailMessage>().await?)
    }

    /// `users.threads.get(format=METADATA)` — thread-header resolution.
    pub async fn get_thread(&self, thread_id: &str) -> anyhow::Result<GmailThread> {
        self.rate_limiter.acquire(1).await;
        let resp = self
            .http_client
            .get(gmail_url!("threads", thread_id))
            .bearer_auth(&self.access_token)
            .timeout(CALL_TIMEOUT)
            .query(&[
                ("format", "metadata"),
                ("metadataHeaders", "Message-ID"),
                ("metadataHeaders", "References"),
                ("metadataHeaders", "Subject"),
            ])
            .send()
            .await?
            .error_for_status()?;

        Ok(resp.json::<GmailThread>().await?)
    }

    /// `users.messages.insert` — the untracked sent-folder mirror.
    pub async fn insert(
        &self,
        raw: &str,
        thread_id: Option<&str>,
        label_ids: &[&str],
    ) -> anyhow::Result<SendMessage> {
        self.rate_limiter.acquire(1).await;
        let mut body = json!({ "raw": raw, "labelIds": label_ids });
        if let Some(thread_id) = thread_id {
            body["threadId"] = json!(thread_id);
        }

        let resp = self
            .http_client
            .post(gmail_url!("messages"))
            .bearer_auth(&self.access_token)
            .timeout(CALL_TIMEOUT)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        Ok(resp.json::<SendMessage>().await?)
    }

    pub async fn delete_message(&self, message_id: &str) -> anyhow::Result<()> {
        self.rate_limiter.acquire(1).await;
        self.http_client
            .delete(gmail_url!("messages", message_id))
            .bearer_auth(&self.access_token)
            .timeout(CALL_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// `users.history.list` — the inbound pipeline's walk over new messages.
    pub async fn list_history(
        &self,
        start_history_id: i64,
        page_token: Option<&str>,
    ) -> anyhow::Result<HistoryListResponse> {
        self.rate_limiter.acquire(1).await;
        let mut query = vec![
            ("startHistoryId".to_string(), start_history_id.to_string()),
            ("historyTypes".to_string(), "messageAdded".to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken".to_string(), token.to_string()));
        }

        let resp = self
            .http_client
            .get(gmail_url!("history"))
            .bearer_auth(&self.access_token)
            .timeout(CALL_TIMEOUT)
            .query(&query)
            .send()
            .await?
            .error_for_status()?;

        Ok(resp.json::<HistoryListResponse>().await?)
    }
}

/// Decodes a Gmail `raw` (base64url RFC 5322) payload into parsed headers
/// and a sanitized text body.
pub struct ParsedMessage {
    pub subject: Option<String>,
    pub from: Option<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub content_type: Option<String>,
    pub has_failed_recipients_header: bool,
    pub html_body: Option<String>,
    pub raw_bytes: Vec<u8>,
}

pub fn parse_raw_message(raw: &str) -> anyhow::Result<ParsedMessage> {
    let bytes = URL_SAFE
        .decode(raw.replace('-', "+").replace('_', "/"))
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(raw))
        .context("invalid base64 raw message")?;

    let message = MessageParser::default()
        .parse(&bytes)
        .context("failed to parse RFC 5322 message")?;

    let references = message
        .references()
        .as_text_list()
        .map(|list| list.into_iter().map(str::to_string).collect())
        .unwrap_or_default();

    let content_type = message
        .content_type()
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub),
            None => ct.ctype().to_string(),
        });

    let has_failed_recipients_header = message.header("X-Failed-Recipients").is_some();

    Ok(ParsedMessage {
        subject: message.subject().map(str::to_string),
        from: message
            .from()
            .and_then(|f| f.first())
            .and_then(|addr| addr.address())
            .map(str::to_string),
        message_id: message.message_id().map(str::to_string),
        in_reply_to: message.in_reply_to().as_text().map(str::to_string),
        references,
        content_type,
        has_failed_recipients_header,
        html_body: message.body_html(0).map(|b| b.to_string()),
        raw_bytes: bytes,
    })
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_gmail_url() {
        let url = gmail_url!("messages");
        assert_eq!(url, "https://www.googleapis.com/gmail/v1/users/me/messages");
        let url = gmail_url!("messages", "send");
        assert_eq!(
            url,
            "https://www.googleapis.com/gmail/v1/users/me/messages/send"
        );
    }
}
