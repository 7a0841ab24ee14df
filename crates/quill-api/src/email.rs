//! Outbound transactional email.
//!
//! Handlers only see the [`EmailSender`] trait; the server wires in
//! [`ResendMailer`] when an API key is configured and tests use an
//! in-memory fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use quill_types::models::Role;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("email provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("email provider returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver one message. Returns the provider's message id.
    async fn send(&self, email: OutgoingEmail) -> Result<String, EmailError>;
}

/// Client for a Resend-compatible `POST /emails` endpoint.
pub struct ResendMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

#[derive(Serialize)]
struct SendBody<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

impl ResendMailer {
    pub fn new(api_url: String, api_key: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
            from,
        }
    }
}

#[async_trait]
impl EmailSender for ResendMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<String, EmailError> {
        let body = SendBody {
            from: &self.from,
            to: [email.to.as_str()],
            subject: &email.subject,
            html: &email.html,
        };

        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EmailError::Rejected {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let sent: SendResponse = resp.json().await?;
        debug!("Email to {} accepted as {}", email.to, sent.id);
        Ok(sent.id)
    }
}

pub fn invitation_email(to: &str, role: Role, title: &str, link: &str, inviter: &str) -> OutgoingEmail {
    OutgoingEmail {
        to: to.to_string(),
        subject: format!("{} shared \"{}\" with you", inviter, title),
        html: format!(
            "<p>{inviter} invited you to <strong>{title}</strong> as {role}.</p>\
             <p><a href=\"{link}\">Open the document</a></p>",
            inviter = escape_html(inviter),
            title = escape_html(title),
            link = escape_html(link),
        ),
    }
}

pub fn password_reset_email(to: &str, link: &str) -> OutgoingEmail {
    OutgoingEmail {
        to: to.to_string(),
        subject: "Reset your password".to_string(),
        html: format!(
            "<p>Someone asked to reset the password for this account.</p>\
             <p><a href=\"{}\">Choose a new password</a></p>\
             <p>If it wasn't you, ignore this email.</p>",
            escape_html(link)
        ),
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invitation_escapes_document_title() {
        let email = invitation_email(
            "bob@example.com",
            Role::Editor,
            "<script>alert(1)</script>",
            "https://quill.local/documents/1",
            "alice@example.com",
        );
        assert_eq!(email.to, "bob@example.com");
        assert!(email.html.contains("as editor"));
        assert!(email.html.contains("&lt;script&gt;"));
        assert!(!email.html.contains("<script>"));
    }

    #[test]
    fn invitation_subject_is_plain_text() {
        let email = invitation_email(
            "bob@example.com",
            Role::Viewer,
            "Q&A <draft>",
            "https://quill.local/documents/1",
            "o'brien@example.com",
        );
        assert_eq!(email.subject, "o'brien@example.com shared \"Q&A <draft>\" with you");
        assert!(email.html.contains("Q&amp;A &lt;draft&gt;"));
    }
}
