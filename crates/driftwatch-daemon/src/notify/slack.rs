//! Slack sink.
//!
//! Builds Block Kit messages: a header, a context line, and one section
//! per transition. Slack caps messages at 50 blocks; two are reserved for
//! the header and context, so large batches are chunked at 48 transitions
//! with `(part i/n)` markers.

use async_trait::async_trait;
use driftwatch_core::health::DriftDetail;
use driftwatch_core::transition::{ImageChange, ReplicaChange, ServiceTransition};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::poster::{HttpPoster, TimingConfig};
use super::{NoopNotifier, Notify, NotifyError};

const SLACK_MAX_BLOCKS: usize = 50;
const SLACK_RESERVED_BLOCKS: usize = 2;
const SLACK_MAX_TRANSITIONS: usize = SLACK_MAX_BLOCKS - SLACK_RESERVED_BLOCKS;

#[derive(Debug, Serialize, PartialEq, Eq)]
struct TextObject {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
}

impl TextObject {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            kind: "plain_text",
            text: text.into(),
        }
    }

    fn mrkdwn(text: impl Into<String>) -> Self {
        Self {
            kind: "mrkdwn",
            text: text.into(),
        }
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Header {
        text: TextObject,
    },
    Context {
        elements: Vec<TextObject>,
    },
    Section {
        text: TextObject,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        fields: Vec<TextObject>,
    },
}

#[derive(Debug, Serialize)]
struct SlackMessage {
    /// Fallback text; always present for notification previews.
    text: String,
    blocks: Vec<Block>,
}

/// Slack webhook notifier.
pub struct SlackNotifier {
    poster: HttpPoster,
}

/// Creates the Slack sink, or a noop sink when the webhook URL is empty.
#[must_use]
pub fn new_slack_notifier(webhook_url: &str) -> Box<dyn Notify> {
    if webhook_url.is_empty() {
        return Box::new(NoopNotifier::new(
            "slack webhook not configured; notifications disabled",
        ));
    }
    Box::new(SlackNotifier::new(webhook_url, TimingConfig::default()))
}

impl SlackNotifier {
    pub(crate) fn new(webhook_url: &str, timing: TimingConfig) -> Self {
        Self {
            poster: HttpPoster::new(
                "slack",
                webhook_url.to_string(),
                "application/json",
                timing,
            ),
        }
    }
}

#[async_trait]
impl Notify for SlackNotifier {
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

        let messages = build_messages(stack, transitions);
        let message_count = messages.len();
        for message in messages {
            let payload =
                serde_json::to_vec(&message).map_err(|source| NotifyError::Payload {
                    service: "slack",
                    source,
                })?;
            self.poster.post_with_retry(cancel, &payload).await?;
        }

        debug!(
            stack,
            transitions = transitions.len(),
            messages = message_count,
            "slack notification sent"
        );
        Ok(())
    }
}

fn build_messages(stack: &str, transitions: &[ServiceTransition]) -> Vec<SlackMessage> {
    let total = transitions.len();
    let part_total = total.div_ceil(SLACK_MAX_TRANSITIONS);

    transitions
        .chunks(SLACK_MAX_TRANSITIONS)
        .enumerate()
        .map(|(index, chunk)| build_message(stack, chunk, total, index + 1, part_total))
        .collect()
}

fn build_message(
    stack: &str,
    transitions: &[ServiceTransition],
    total: usize,
    part_index: usize,
    part_total: usize,
) -> SlackMessage {
    let mut summary = format!("Stack {stack}: {total} service transition(s)");
    if part_total > 1 {
        summary = format!("{summary} (part {part_index}/{part_total})");
    }

    let mut context = vec![TextObject::mrkdwn(format!("Stack: *{stack}*"))];
    if part_total > 1 {
        context.push(TextObject::mrkdwn(format!("Batch: {part_index}/{part_total}")));
    }

    let mut blocks = Vec::with_capacity(transitions.len() + SLACK_RESERVED_BLOCKS);
    blocks.push(Block::Header {
        text: TextObject::plain(summary.clone()),
    });
    blocks.push(Block::Context { elements: context });
    blocks.extend(transitions.iter().map(transition_block));

    SlackMessage {
        text: summary,
        blocks,
    }
}

fn transition_block(change: &ServiceTransition) -> Block {
    let previous = change
        .previous_status
        .map_or("UNKNOWN", |status| status.as_str());
    let title = format!(
        "*{}*: `{previous}` → `{}`",
        change.name, change.current_status
    );

    let mut fields = Vec::with_capacity(4);
    if !change.reasons.is_empty() {
        fields.push(TextObject::mrkdwn(format!(
            "*Reasons:*\n{}",
            change.reasons.join(", ")
        )));
    }
    if let Some(replicas) = &change.replica_change {
        fields.push(TextObject::mrkdwn(format_replica_change(replicas)));
    }
    if let Some(image) = &change.image_change {
        fields.push(TextObject::mrkdwn(format_image_change(image)));
    }
    if !change.drift.is_empty() {
        fields.push(TextObject::mrkdwn(format_drift(&change.drift)));
    }

    Block::Section {
        text: TextObject::mrkdwn(title),
        fields,
    }
}

fn format_replica_change(change: &ReplicaChange) -> String {
    format!(
        "*Replicas:*\nDesired {} (Δ {}), Running {} (Δ {})",
        change.current_desired, change.desired_delta, change.current_running, change.running_delta
    )
}

fn format_image_change(change: &ImageChange) -> String {
    let desired = if change.current_desired.is_empty() {
        "unknown"
    } else {
        &change.current_desired
    };
    let actual = if change.current_actual.is_empty() {
        "unknown"
    } else {
        &change.current_actual
    };
    format!("*Image:*\nDesired `{desired}`\nActual `{actual}`")
}

fn format_drift(drift: &[DriftDetail]) -> String {
    let parts: Vec<String> = drift
        .iter()
        .map(|detail| format!("{} {}/{}", detail.kind, detail.resource, detail.name))
        .collect();
    format!("*Drift:*\n• {}", parts.join("\n• "))
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use driftwatch_core::health::{DriftKind, ResourceKind, ServiceStatus};

    use super::*;

    fn transition(name: &str) -> ServiceTransition {
        ServiceTransition {
            name: name.to_string(),
            previous_status: Some(ServiceStatus::Ok),
            current_status: ServiceStatus::Degraded,
            reasons: vec!["replicas running 1/2".to_string()],
            drift: Vec::new(),
            replica_change: Some(ReplicaChange {
                previous_desired: 2,
                current_desired: 2,
                previous_running: 2,
                current_running: 1,
                desired_delta: 0,
                running_delta: -1,
            }),
            image_change: Some(ImageChange {
                previous_desired: "app:v1".to_string(),
                current_desired: "app:v1".to_string(),
                previous_actual: "app:v1".to_string(),
                current_actual: "app:v1".to_string(),
            }),
        }
    }

    #[test]
    fn single_message_layout() {
        let messages = build_messages("edge", &[transition("api")]);
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.text, "Stack edge: 1 service transition(s)");
        assert_eq!(message.blocks.len(), 3);
        assert!(matches!(message.blocks[0], Block::Header { .. }));
        assert!(matches!(message.blocks[1], Block::Context { .. }));

        let Block::Section { text, fields } = &message.blocks[2] else {
            panic!("expected section block");
        };
        assert_eq!(text.text, "*api*: `OK` → `DEGRADED`");
        assert_eq!(fields.len(), 3);
        assert!(fields[0].text.starts_with("*Reasons:*"));
        assert_eq!(fields[1].text, "*Replicas:*\nDesired 2 (Δ 0), Running 1 (Δ -1)");
        assert!(fields[2].text.starts_with("*Image:*"));
    }

    #[test]
    fn unknown_previous_status_label() {
        let mut change = transition("api");
        change.previous_status = None;
        let messages = build_messages("edge", &[change]);
        let Block::Section { text, .. } = &messages[0].blocks[2] else {
            panic!("expected section block");
        };
        assert_eq!(text.text, "*api*: `UNKNOWN` → `DEGRADED`");
    }

    #[test]
    fn drift_field_rendering() {
        let mut change = transition("api");
        change.drift = vec![
            DriftDetail {
                kind: DriftKind::Missing,
                resource: ResourceKind::Config,
                name: "cfg1".to_string(),
            },
            DriftDetail {
                kind: DriftKind::Extra,
                resource: ResourceKind::Secret,
                name: "sec2".to_string(),
            },
        ];
        let messages = build_messages("edge", &[change]);
        let Block::Section { fields, .. } = &messages[0].blocks[2] else {
            panic!("expected section block");
        };
        let drift = &fields.last().unwrap().text;
        assert_eq!(drift, "*Drift:*\n• MISSING config/cfg1\n• EXTRA secret/sec2");
    }

    #[test]
    fn large_batches_chunk_at_block_limit() {
        let transitions: Vec<ServiceTransition> =
            (0..100).map(|i| transition(&format!("svc{i:03}"))).collect();
        let messages = build_messages("edge", &transitions);
        assert_eq!(messages.len(), 3);

        for (index, message) in messages.iter().enumerate() {
            assert!(message.blocks.len() <= SLACK_MAX_BLOCKS);
            assert!(message
                .text
                .contains(&format!("(part {}/3)", index + 1)));
            let Block::Context { elements } = &message.blocks[1] else {
                panic!("expected context block");
            };
            assert_eq!(elements[1].text, format!("Batch: {}/3", index + 1));
        }
        assert_eq!(messages[0].blocks.len(), 50);
        assert_eq!(messages[2].blocks.len(), 4 + SLACK_RESERVED_BLOCKS);
    }

    #[test]
    fn message_serializes_to_block_kit_json() {
        let messages = build_messages("edge", &[transition("api")]);
        let json = serde_json::to_value(&messages[0]).unwrap();
        assert_eq!(json["blocks"][0]["type"], "header");
        assert_eq!(json["blocks"][0]["text"]["type"], "plain_text");
        assert_eq!(json["blocks"][1]["type"], "context");
        assert_eq!(json["blocks"][2]["type"], "section");
        assert_eq!(json["blocks"][2]["text"]["type"], "mrkdwn");
    }

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn delivers_batch_to_webhook() {
        let hits = Arc::new(AtomicU32::new(0));
        let app = Router::new()
            .route(
                "/services/T000/B000",
                post(
                    |State(hits): State<Arc<AtomicU32>>, Json(body): Json<serde_json::Value>| async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        assert!(body["text"].as_str().unwrap().contains("Stack edge"));
                        StatusCode::OK
                    },
                ),
            )
            .with_state(Arc::clone(&hits));
        let addr = serve(app).await;

        let notifier = SlackNotifier::new(
            &format!("http://{addr}/services/T000/B000"),
            TimingConfig {
                rate_interval: std::time::Duration::from_millis(1),
                ..TimingConfig::default()
            },
        );
        notifier
            .notify(
                &CancellationToken::new(),
                "edge",
                &[transition("api"), transition("web")],
            )
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        // No server at all: an empty batch must not attempt delivery.
        let notifier = SlackNotifier::new("http://127.0.0.1:9/hook", TimingConfig::default());
        notifier
            .notify(&CancellationToken::new(), "edge", &[])
            .await
            .unwrap();
    }
}
