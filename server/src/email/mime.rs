//! RFC 5322 message construction and tracking injection: thread-header
//! resolution, subject encoding, open/click tracking rewrites, and the
//! base64url raw payload Gmail's `messages.send` expects. Built on
//! `mail_builder::MessageBuilder`.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use mail_builder::MessageBuilder;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::server_config::cfg;

/// `ThreadHeaders` resolved from a Gmail thread's existing messages.
/// `None` when this is the first send in a thread.
#[derive(Debug, Clone, Default)]
pub struct ThreadHeaders {
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub original_subject: Option<String>,
}

/// A freshly minted RFC 5322 Message-ID, in `<local@domain>` form.
pub fn generate_message_id() -> String {
    format!("<{}@mail.gmail.com>", Uuid::new_v4())
}

/// RFC 2047 `=?UTF-8?B?...?=` encoding, applied only when the subject carries
/// non-ASCII bytes.
pub fn encode_subject(subject: &str) -> String {
    if subject.is_ascii() {
        subject.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(subject.as_bytes()))
    }
}

pub fn reply_subject(original_subject: &str) -> String {
    if original_subject.trim_start().to_lowercase().starts_with("re:") {
        original_subject.to_string()
    } else {
        format!("Re: {original_subject}")
    }
}

/// One rewritten `<a href>` found while tracking a message's HTML body.
#[derive(Debug, Clone)]
pub struct TrackedLinkRewrite {
    pub link_id: String,
    pub original_url: String,
}

/// Appends an open-tracking pixel and rewrites every `<a href>` to route
/// through the click redirector. Returns the rewritten HTML plus the set
/// of links that now need `TrackedLink` rows.
pub fn inject_tracking(html: &str, hash: &str) -> (String, Vec<TrackedLinkRewrite>) {
    static RE_HREF: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"(?i)<a\s+([^>]*?)href\s*=\s*"([^"]+)"([^>]*)>"#).unwrap());

    let mut links = Vec::new();
    let track_base = &cfg.track_api_url;

    let rewritten = RE_HREF.replace_all(html, |caps: &regex::Captures| {
        let before = &caps[1];
        let original_url = caps[2].to_string();
        let after = &caps[3];
        let link_id = Uuid::new_v4().to_string();
        let tracked_url = format!("{track_base}/api/track/{hash}/click?lid={link_id}");
        links.push(TrackedLinkRewrite {
            link_id,
            original_url,
        });
        format!(r#"<a {before}href="{tracked_url}"{after}>"#)
    });

    let pixel = format!(
        r#"<img src="{track_base}/api/track/{hash}.png" width="1" height="1" style="display:none" alt="" />"#
    );
    let html_with_pixel = format!("{rewritten}{pixel}");

    (html_with_pixel, links)
}

/// Builds the base64url-encoded RFC 5322 message Gmail's `messages.send`
/// expects.
pub struct OutboundMessage<'a> {
    pub to: &'a str,
    pub subject: &'a str,
    pub html_body: &'a str,
    pub message_id: &'a str,
    pub in_reply_to: Option<&'a str>,
    pub references: &'a [String],
}

pub fn build_raw_message(msg: &OutboundMessage<'_>) -> anyhow::Result<String> {
    let mut builder = MessageBuilder::new()
        .to(msg.to)
        .subject(encode_subject(msg.subject))
        .message_id(msg.message_id.trim_start_matches('<').trim_end_matches('>').to_string())
        .html_body(msg.html_body);

    if let Some(in_reply_to) = msg.in_reply_to {
        builder = builder.in_reply_to(vec![in_reply_to
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_string()]);
    }
    if !msg.references.is_empty() {
        let references = msg
            .references
            .iter()
            .map(|r| r.trim_start_matches('<').trim_end_matches('>').to_string())
            .collect::<Vec<_>>();
        builder = builder.references(references);
    }

    let raw = builder
        .write_to_vec()
        .map_err(|e| anyhow::anyhow!("failed to serialize message: {e}"))?;

    Ok(URL_SAFE_NO_PAD.encode(raw))
}

/// Strips the tracking pixel and rewritten links back to the original HTML
/// for the sent-folder mirror. Since the tracked HTML is produced solely by
/// `inject_tracking`, undoing it is a matter of dropping the appended pixel
/// and restoring the recorded original URLs.
pub fn strip_tracking(tracked_html: &str, links: &[TrackedLinkRewrite]) -> String {
    static RE_PIXEL: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"<img src="[^"]*api/track/[^"]*\.png"[^>]*/>"#).unwrap());

    let mut html = RE_PIXEL.replace_all(tracked_html, "").to_string();
    for link in links {
        let tracked_fragment = format!("lid={}", link.link_id);
        if let Some(start) = html.find(&tracked_fragment) {
            if let Some(quote_start) = html[..start].rfind('"') {
                if let Some(quote_end_rel) = html[start..].find('"') {
                    let quote_end = start + quote_end_rel;
                    html.replace_range(quote_start + 1..quote_end, &link.original_url);
                }
            }
        }
    }
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_pixel_and_rewrites_links() {
        let html = r#"<p>Hi <a href="https://example.com">click</a></p>"#;
        let (tracked, links) = inject_tracking(html, "abc123");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].original_url, "https://example.com");
        assert!(tracked.contains("api/track/abc123.png"));
        assert!(tracked.contains(&format!("lid={}", links[0].link_id)));
    }

    #[test]
    fn ascii_subject_is_not_encoded() {
        assert_eq!(encode_subject("Hello there"), "Hello there");
    }

    #[test]
    fn reply_subject_does_not_double_prefix() {
        assert_eq!(reply_subject("Re: Hello"), "Re: Hello");
        assert_eq!(reply_subject("Hello"), "Re: Hello");
    }

    #[test]
    fn strip_tracking_restores_original_url() {
        let html = r#"<p>Hi <a href="https://example.com">click</a></p>"#;
        let (tracked, links) = inject_tracking(html, "abc123");
        let restored = strip_tracking(&tracked, &links);
        assert!(restored.contains(r#"href="https://example.com""#));
        assert!(!restored.contains("api/track/abc123.png"));
    }
}
