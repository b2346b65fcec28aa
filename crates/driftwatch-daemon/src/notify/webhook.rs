//! Generic webhook sink.
//!
//! Renders a text template against the notification payload and posts the
//! result. The template language is the tiny subset the sentinel has
//! always supported: `{{ .Stack }}`, `{{ .Transitions }}`,
//! `{{ .GeneratedAt }}`, and a `toJson` helper applied to any of the
//! three. An invalid template is a fatal configuration error.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use driftwatch_core::transition::ServiceTransition;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::poster::{HttpPoster, TimingConfig};
use super::{Notify, NotifyError};

/// Template used when `WEBHOOK_TEMPLATE` is not set.
pub const DEFAULT_WEBHOOK_TEMPLATE: &str =
    r#"{"stack":"{{ .Stack }}","transitions":{{ toJson .Transitions }}}"#;

/// The template context for webhook notifications.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    stack: &'a str,
    transitions: &'a [ServiceTransition],
    generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Stack,
    Transitions,
    GeneratedAt,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        match name {
            ".Stack" => Some(Self::Stack),
            ".Transitions" => Some(Self::Transitions),
            ".GeneratedAt" => Some(Self::GeneratedAt),
            _ => None,
        }
    }
}

#[derive(Debug)]
enum Token {
    Literal(String),
    Field(Field),
    ToJson(Field),
}

#[derive(Debug)]
struct Template {
    tokens: Vec<Token>,
}

impl Template {
    fn parse(source: &str) -> Result<Self, NotifyError> {
        let mut tokens = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                tokens.push(Token::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                return Err(NotifyError::Template(
                    "unclosed {{ action }}".to_string(),
                ));
            };
            tokens.push(parse_action(after[..end].trim())?);
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            tokens.push(Token::Literal(rest.to_string()));
        }

        Ok(Self { tokens })
    }

    fn render(&self, payload: &WebhookPayload<'_>) -> Result<String, NotifyError> {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Field(field) => match field {
                    Field::Stack => out.push_str(payload.stack),
                    Field::GeneratedAt => out.push_str(
                        &payload
                            .generated_at
                            .to_rfc3339_opts(SecondsFormat::Secs, true),
                    ),
                    // A bare transition list only has a useful text form as
                    // JSON, so it renders the same as toJson.
                    Field::Transitions => out.push_str(&to_json(*field, payload)?),
                },
                Token::ToJson(field) => out.push_str(&to_json(*field, payload)?),
            }
        }
        Ok(out)
    }
}

fn parse_action(action: &str) -> Result<Token, NotifyError> {
    if let Some(field) = Field::parse(action) {
        return Ok(Token::Field(field));
    }
    if let Some(argument) = action.strip_prefix("toJson ") {
        let argument = argument.trim();
        return Field::parse(argument)
            .map(Token::ToJson)
            .ok_or_else(|| NotifyError::Template(format!("unknown field {argument:?}")));
    }
    Err(NotifyError::Template(format!("unknown action {action:?}")))
}

fn to_json(field: Field, payload: &WebhookPayload<'_>) -> Result<String, NotifyError> {
    let value = match field {
        Field::Stack => serde_json::to_string(payload.stack),
        Field::Transitions => serde_json::to_string(payload.transitions),
        Field::GeneratedAt => serde_json::to_string(
            &payload
                .generated_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
    };
    value.map_err(|source| NotifyError::Payload {
        service: "webhook",
        source,
    })
}

/// Generic webhook notifier.
#[derive(Debug)]
pub struct WebhookNotifier {
    template: Template,
    poster: HttpPoster,
}

impl WebhookNotifier {
    /// Creates a webhook notifier, or `None` when the URL is empty.
    ///
    /// An empty `template` selects [`DEFAULT_WEBHOOK_TEMPLATE`].
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Template`] when the template does not parse;
    /// the caller treats this as fatal.
    pub fn new(webhook_url: &str, template: &str) -> Result<Option<Self>, NotifyError> {
        Self::with_timing(webhook_url, template, TimingConfig::default())
    }

    pub(crate) fn with_timing(
        webhook_url: &str,
        template: &str,
        timing: TimingConfig,
    ) -> Result<Option<Self>, NotifyError> {
        if webhook_url.is_empty() {
            return Ok(None);
        }
        let template = if template.is_empty() {
            DEFAULT_WEBHOOK_TEMPLATE
        } else {
            template
        };
        Ok(Some(Self {
            template: Template::parse(template)?,
            poster: HttpPoster::new(
                "webhook",
                webhook_url.to_string(),
                "application/json",
                timing,
            ),
        }))
    }
}

#[async_trait]
impl Notify for WebhookNotifier {
    async fn notify(
        &self,
        cancel: &CancellationToken,
        stack: &str,
        transitions: &[ServiceTransition],
    ) -> Result<(), NotifyError> {
        if transitions.is_empty() {
            return Ok(());
        }
        let stack = if stack.is_empty() { "default" } else { stack };

        self.poster.wait_for_rate_limit(cancel, stack).await?;

        let payload = WebhookPayload {
            stack,
            transitions,
            generated_at: Utc::now(),
        };
        let body = self.template.render(&payload)?;
        self.poster.post_with_retry(cancel, body.as_bytes()).await?;

        debug!(stack, transitions = transitions.len(), "webhook notification sent");
        Ok(())
    }
}
