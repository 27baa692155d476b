mod common;

use artifact_studio_core::{
    AttachmentSource, ChatMode, ContentPart, Dispatcher, GenerateInput, GenerationEngine,
    GenerationError, GenerationEvent, GenerationOutcome, ModelTransport, QuotaGovernor, QuotaState,
    RequestBuilder, Role, Tier, TransportError, Workspace, EMPTY_RESPONSE_FALLBACK,
};
use chrono::Utc;
use common::*;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Harness {
    engine: GenerationEngine,
    sessions: Arc<InMemorySessionStore>,
    quotas: Arc<InMemoryQuotaStore>,
    user: Uuid,
}

impl Harness {
    fn new(transport: Arc<dyn ModelTransport>) -> Self {
        let sessions = InMemorySessionStore::new();
        let quotas = InMemoryQuotaStore::new();
        let engine = GenerationEngine::new(
            Dispatcher::new(transport),
            RequestBuilder::default(),
            QuotaGovernor::default(),
            sessions.clone(),
            quotas.clone(),
        );
        Self {
            engine,
            sessions,
            quotas,
            user: Uuid::new_v4(),
        }
    }

    fn workspace(&self, mode: ChatMode) -> Workspace {
        Workspace::new(self.user, config(mode))
    }

    async fn run(
        &self,
        workspace: &mut Workspace,
        input: GenerateInput,
    ) -> (Result<GenerationOutcome, GenerationError>, Vec<GenerationEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = self
            .engine
            .generate(workspace, self.user, input, CancellationToken::new(), &tx)
            .await;
        (result, drain(&mut rx))
    }
}

fn resumed(owner: Uuid, mode: ChatMode, code: &str) -> Workspace {
    let mut record = Workspace::new(owner, config(mode)).to_record();
    record.code = code.to_string();
    Workspace::resume(record)
}

#[tokio::test]
async fn creator_generation_streams_into_the_artifact() {
    let transport = ScriptedTransport::new(vec![ok(&[
        "Here you go\n```html\n<h1>",
        "Hi</h1>\n```\nDone.",
    ])]);
    let h = Harness::new(transport.clone());
    let mut ws = h.workspace(ChatMode::Creator);

    let (result, events) = h
        .run(&mut ws, GenerateInput::new("build it", ChatMode::Creator))
        .await;

    assert_eq!(result.unwrap(), GenerationOutcome::Completed);
    assert_eq!(ws.artifact(), "<h1>Hi</h1>\n\n");

    let messages = ws.threads().thread(ChatMode::Creator).messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].text, "Here you go\n```html\n<h1>Hi</h1>\n```\nDone.");
    assert!(messages[1].is_complete);
    assert!(!ws.threads().is_busy(ChatMode::Creator));

    let artifacts: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            GenerationEvent::ArtifactUpdated { code } => Some(code.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(artifacts, vec!["<h1>", "<h1>Hi</h1>\n\n"]);
    assert!(matches!(events.first(), Some(GenerationEvent::UserMessage { .. })));
    assert!(matches!(
        events.last(),
        Some(GenerationEvent::Settled {
            outcome: GenerationOutcome::Completed,
            ..
        })
    ));

    assert_eq!(h.sessions.saves(), 1);
    assert_eq!(h.sessions.get(ws.id()).unwrap().code, "<h1>Hi</h1>\n\n");
    assert_eq!(h.quotas.get(h.user).daily_requests_count, 1);
}

#[tokio::test]
async fn creator_request_snapshots_the_previous_artifact() {
    let transport = ScriptedTransport::new(vec![
        ok(&["```html\n<p>v1</p>\n```"]),
        ok(&["```html\n<p>v2</p>\n```"]),
    ]);
    let h = Harness::new(transport.clone());
    let mut ws = h.workspace(ChatMode::Creator);

    h.run(&mut ws, GenerateInput::new("first", ChatMode::Creator)).await.0.unwrap();
    // The empty starting artifact is not recorded.
    assert!(ws.history().is_empty());

    h.run(&mut ws, GenerateInput::new("second", ChatMode::Creator)).await.0.unwrap();
    assert_eq!(ws.history().len(), 1);
    assert_eq!(ws.history().current(), Some("<p>v1</p>\n\n"));
    assert_eq!(ws.artifact(), "<p>v2</p>\n\n");
}

#[tokio::test]
async fn history_and_code_context_reach_the_model() {
    let transport = ScriptedTransport::new(vec![
        ok(&["```html\n<p>v1</p>\n```"]),
        ok(&["It is a paragraph."]),
    ]);
    let h = Harness::new(transport.clone());
    let mut ws = h.workspace(ChatMode::Creator);

    h.run(&mut ws, GenerateInput::new("make a paragraph", ChatMode::Creator))
        .await
        .0
        .unwrap();
    h.run(&mut ws, GenerateInput::new("what did you build?", ChatMode::Question))
        .await
        .0
        .unwrap();

    let requests = transport.requests();
    assert!(!requests[0].prompt_text().contains("Conversation history:"));
    assert!(requests[0].prompt_text().ends_with("make a paragraph"));

    // The question thread has no history of its own yet, but sees the code.
    let question = &requests[1];
    assert_eq!(question.mode, ChatMode::Question);
    assert!(question.system_instruction.contains("Working mode: **Question**."));
    assert!(!question.prompt_text().contains("Conversation history:"));
    assert!(question.prompt_text().contains("[CURRENT CODE]"));
    assert!(question.prompt_text().contains("<p>v1</p>"));
}

#[tokio::test]
async fn question_mode_never_touches_the_artifact() {
    let transport = ScriptedTransport::new(vec![ok(&["Try this:\n```js\nconsole.log(1)\n```"])]);
    let h = Harness::new(transport.clone());
    let mut ws = resumed(h.user, ChatMode::Question, "<p>keep</p>");

    let (result, events) = h
        .run(&mut ws, GenerateInput::new("how do I log?", ChatMode::Question))
        .await;

    assert_eq!(result.unwrap(), GenerationOutcome::Completed);
    assert_eq!(ws.artifact(), "<p>keep</p>");
    assert_eq!(ws.history().len(), 1);
    assert!(!events
        .iter()
        .any(|e| matches!(e, GenerationEvent::ArtifactUpdated { .. })));
    assert!(ws.threads().thread(ChatMode::Creator).messages().is_empty());
    assert_eq!(ws.threads().thread(ChatMode::Question).messages().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_attempts_are_retried() {
    let transport = ScriptedTransport::new(vec![limited(), limited(), ok(&["```\nA\n```"])]);
    let h = Harness::new(transport.clone());
    let mut ws = h.workspace(ChatMode::Creator);

    let (result, _) = h.run(&mut ws, GenerateInput::new("go", ChatMode::Creator)).await;

    assert_eq!(result.unwrap(), GenerationOutcome::Completed);
    assert_eq!(transport.attempts(), 3);
    assert_eq!(ws.artifact(), "A\n\n");
    // One request, one unit of quota, however many attempts it took.
    assert_eq!(h.quotas.get(h.user).daily_requests_count, 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_append_one_error_message() {
    let transport = ScriptedTransport::new(vec![limited(), limited(), limited(), limited()]);
    let h = Harness::new(transport.clone());
    let mut ws = h.workspace(ChatMode::Creator);

    let (result, _) = h.run(&mut ws, GenerateInput::new("go", ChatMode::Creator)).await;

    assert_eq!(
        result.unwrap(),
        GenerationOutcome::Failed {
            message: "Request limit reached (rate limit). Please wait a minute and try again."
                .to_string()
        }
    );
    assert_eq!(transport.attempts(), 4);
    let messages = ws.threads().thread(ChatMode::Creator).messages();
    assert_eq!(messages.iter().filter(|m| m.is_error).count(), 1);
    assert!(messages.last().unwrap().is_error);
    assert!(!ws.is_busy());
    assert_eq!(h.sessions.saves(), 1);
}

#[tokio::test]
async fn fatal_transport_error_reports_status() {
    let transport = ScriptedTransport::new(vec![Attempt::Fail(TransportError::fatal(
        Some(500),
        "Internal error",
    ))]);
    let h = Harness::new(transport.clone());
    let mut ws = h.workspace(ChatMode::Creator);

    let (result, _) = h.run(&mut ws, GenerateInput::new("go", ChatMode::Creator)).await;

    assert_eq!(
        result.unwrap(),
        GenerationOutcome::Failed {
            message: "Error communicating with the server (error code: 500)".to_string()
        }
    );
    assert_eq!(transport.attempts(), 1);
    assert_eq!(ws.artifact(), "");
}

#[tokio::test]
async fn stream_dropped_midway_keeps_the_partial_artifact() {
    let transport = ScriptedTransport::new(vec![Attempt::Deltas(vec![
        Ok("```\nA".to_string()),
        Err(TransportError::fatal(None, "connection reset")),
    ])]);
    let h = Harness::new(transport.clone());
    let mut ws = h.workspace(ChatMode::Creator);

    let (result, _) = h.run(&mut ws, GenerateInput::new("go", ChatMode::Creator)).await;

    assert_eq!(
        result.unwrap(),
        GenerationOutcome::Failed {
            message: "Error communicating with the server (error code: Unknown)".to_string()
        }
    );
    assert_eq!(transport.attempts(), 1);
    assert_eq!(ws.artifact(), "A");

    let messages = ws.threads().thread(ChatMode::Creator).messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].text, "```\nA");
    assert!(!messages[1].is_complete);
    assert!(messages[2].is_error);
    assert_eq!(messages.iter().filter(|m| m.is_error).count(), 1);
    assert!(!ws.is_busy());
    assert_eq!(h.sessions.saves(), 1);
}

#[tokio::test]
async fn exhausted_quota_rejects_before_anything_changes() {
    let transport = ScriptedTransport::new(vec![ok(&["never"])]);
    let h = Harness::new(transport.clone());
    h.quotas.set(
        h.user,
        QuotaState {
            daily_requests_count: 20,
            last_request_date: Some(Utc::now().date_naive()),
            tier: Tier::Free,
        },
    );
    let mut ws = h.workspace(ChatMode::Creator);

    let (result, events) = h.run(&mut ws, GenerateInput::new("go", ChatMode::Creator)).await;

    assert!(matches!(result, Err(GenerationError::QuotaExceeded { limit: 20 })));
    assert_eq!(transport.attempts(), 0);
    assert!(ws.threads().is_empty());
    assert!(events.is_empty());
    assert_eq!(h.sessions.saves(), 0);
    assert_eq!(h.quotas.get(h.user).daily_requests_count, 20);
}

#[tokio::test]
async fn exempt_tiers_keep_counting_past_the_limit() {
    let transport = ScriptedTransport::new(vec![ok(&["fine"])]);
    let h = Harness::new(transport.clone());
    h.quotas.set(
        h.user,
        QuotaState {
            daily_requests_count: 20,
            last_request_date: Some(Utc::now().date_naive()),
            tier: Tier::Premium,
        },
    );
    let mut ws = h.workspace(ChatMode::Question);

    let (result, _) = h.run(&mut ws, GenerateInput::new("hi", ChatMode::Question)).await;

    assert_eq!(result.unwrap(), GenerationOutcome::Completed);
    assert_eq!(h.quotas.get(h.user).daily_requests_count, 21);
}

#[tokio::test]
async fn unreadable_attachment_fails_before_dispatch() {
    let transport = ScriptedTransport::new(vec![ok(&["never"])]);
    let h = Harness::new(transport.clone());
    let mut ws = h.workspace(ChatMode::Creator);
    let input = GenerateInput::new("look at this", ChatMode::Creator).with_attachments(vec![
        AttachmentSource::File("/definitely/not/here/screenshot.png".into()),
    ]);

    let (result, _) = h.run(&mut ws, input).await;

    assert!(matches!(result, Err(GenerationError::Attachment(_))));
    assert_eq!(transport.attempts(), 0);
    assert!(ws.threads().is_empty());
    assert_eq!(h.quotas.get(h.user).daily_requests_count, 0);
}

#[tokio::test]
async fn attachments_are_sent_inline() {
    let transport = ScriptedTransport::new(vec![ok(&["nice picture"])]);
    let h = Harness::new(transport.clone());
    let mut ws = h.workspace(ChatMode::Question);
    let input = GenerateInput::new("what is this?", ChatMode::Question).with_attachments(vec![
        AttachmentSource::Bytes {
            name: "shot.png".to_string(),
            mime_type: None,
            data: vec![1, 2, 3],
        },
    ]);

    h.run(&mut ws, input).await.0.unwrap();

    let parts = &transport.requests()[0].parts;
    assert_eq!(parts.len(), 2);
    assert_eq!(
        parts[1],
        ContentPart::InlineData {
            mime_type: "image/png".to_string(),
            data: "AQID".to_string()
        }
    );
}

#[tokio::test]
async fn empty_stream_appends_the_fallback_reply() {
    let transport = ScriptedTransport::new(vec![ok(&[])]);
    let h = Harness::new(transport.clone());
    let mut ws = h.workspace(ChatMode::Creator);

    let (result, _) = h.run(&mut ws, GenerateInput::new("go", ChatMode::Creator)).await;

    assert_eq!(result.unwrap(), GenerationOutcome::Completed);
    let last = ws.threads().thread(ChatMode::Creator).messages().last().unwrap().clone();
    assert_eq!(last.text, EMPTY_RESPONSE_FALLBACK);
    assert!(last.is_complete);
    assert_eq!(ws.artifact(), "");
}

#[tokio::test]
async fn cancellation_keeps_what_was_already_applied() {
    let (transport, feed) = ChannelTransport::new();
    let h = Harness::new(transport);
    let mut ws = h.workspace(ChatMode::Creator);
    let token = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let generation = h.engine.generate(
        &mut ws,
        h.user,
        GenerateInput::new("go", ChatMode::Creator),
        token.clone(),
        &tx,
    );
    let driver = async {
        feed.unbounded_send(Ok("```html\n<p>one".to_string())).unwrap();
        feed.unbounded_send(Ok("</p>\n".to_string())).unwrap();
        let mut updates = 0;
        let mut seen = Vec::new();
        while updates < 2 {
            match rx.recv().await {
                Some(event) => {
                    if matches!(event, GenerationEvent::MessageUpdated { .. }) {
                        updates += 1;
                    }
                    seen.push(event);
                }
                None => break,
            }
        }
        token.cancel();
        feed.unbounded_send(Ok("<p>two</p>\n".to_string())).unwrap();
        feed.unbounded_send(Ok("```".to_string())).unwrap();
        seen
    };

    let (result, mut events) = tokio::join!(generation, driver);
    events.extend(drain(&mut rx));

    assert_eq!(result.unwrap(), GenerationOutcome::Cancelled);
    assert_eq!(ws.artifact(), "<p>one</p>\n");
    let reply = ws.threads().thread(ChatMode::Creator).messages().last().unwrap().clone();
    assert_eq!(reply.text, "```html\n<p>one</p>\n");
    assert!(!reply.is_complete);
    assert!(!ws.is_busy());
    assert_eq!(h.sessions.saves(), 1);
    assert!(matches!(
        events.last(),
        Some(GenerationEvent::Settled {
            outcome: GenerationOutcome::Cancelled,
            ..
        })
    ));
}
