//! Conversations and chat turns.
//!
//! A turn stores the user's message, classifies its sentiment, sends the whole
//! history to the completer with a sentiment hint just before the newest user
//! message, then stores the reply. The user message is kept even when the
//! completion fails.

use std::pin::Pin;
use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::{Stream, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use snow_ai::{
    AVAILABLE_MODELS, ChatCompleter, CompletionRequest, DEFAULT_MODEL, WireMessage,
    classify_sentiment,
};
use snow_db::Database;
use snow_types::api::{CreateConversationRequest, SendMessageRequest};
use snow_types::events::ChatStreamEvent;
use snow_types::models::{ChatMessage, Conversation, LearningStyle, Role, Tone};

use crate::error::{Result, ServiceError};
use crate::session::SessionContext;
use crate::state::{AppState, run_blocking};

/// Events of one streamed turn: snapshots, then the stored reply.
pub type TurnStream = Pin<Box<dyn Stream<Item = Result<ChatStreamEvent>> + Send + 'static>>;

// -- Persona --

/// Optional styling applied to the stored assistant reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Persona {
    pub tone: Tone,
    pub style: LearningStyle,
}

impl Persona {
    /// A persona only exists when the caller picked a tone or a style.
    pub fn from_choices(tone: Option<Tone>, style: Option<LearningStyle>) -> Option<Self> {
        if tone.is_none() && style.is_none() {
            return None;
        }
        Some(Self {
            tone: tone.unwrap_or_default(),
            style: style.unwrap_or_default(),
        })
    }

    pub fn apply(&self, reply: &str) -> String {
        let prefix = match self.tone {
            Tone::Formal => "Here is a formal explanation: ",
            Tone::Casual => "Here's a quick explanation: ",
        };
        let mut styled = format!("{}{}", prefix, reply);
        if self.style == LearningStyle::Detailed {
            styled.push_str("\n\nI can go into more detail if you'd like!");
        }
        styled
    }
}

fn finish_reply(reply: String, persona: Option<Persona>) -> String {
    match persona {
        Some(persona) => persona.apply(&reply),
        None => reply,
    }
}

// -- Conversation store --

pub fn create_conversation(db: &Database, user_id: Uuid, title: &str) -> Result<Conversation> {
    if title.trim().is_empty() {
        return Err(ServiceError::validation("title is required"));
    }

    let id = Uuid::new_v4();
    let row = db.insert_conversation(&id.to_string(), &user_id.to_string(), title)?;
    info!("Conversation {} created for {}", id, user_id);
    Ok(row.into_conversation()?)
}

/// The user's conversations, newest first.
pub fn list_conversations(db: &Database, user_id: Uuid) -> Result<Vec<Conversation>> {
    db.list_conversations(&user_id.to_string())?
        .into_iter()
        .map(|row| row.into_conversation().map_err(ServiceError::from))
        .collect()
}

pub fn get_conversation(db: &Database, conversation_id: Uuid) -> Result<Option<Conversation>> {
    Ok(db
        .get_conversation(&conversation_id.to_string())?
        .map(|row| row.into_conversation())
        .transpose()?)
}

/// Remove a conversation and all of its messages. Deleting an unknown id is a no-op.
pub fn delete_conversation(db: &Database, conversation_id: Uuid) -> Result<()> {
    if db.delete_conversation(&conversation_id.to_string())? {
        info!("Conversation {} deleted", conversation_id);
    }
    Ok(())
}

pub fn append_message(
    db: &Database,
    conversation_id: Uuid,
    role: Role,
    content: &str,
) -> Result<ChatMessage> {
    let id = Uuid::new_v4();
    let row = db.insert_chat_message(&id.to_string(), &conversation_id.to_string(), role, content)?;
    Ok(row.into_message()?)
}

/// Messages in the order they were appended; empty for an unknown conversation.
pub fn get_history(db: &Database, conversation_id: Uuid) -> Result<Vec<ChatMessage>> {
    db.chat_history(&conversation_id.to_string())?
        .into_iter()
        .map(|row| row.into_message().map_err(ServiceError::from))
        .collect()
}

// -- Turns --

fn validate_turn(user_text: &str, model: &str) -> Result<()> {
    if user_text.trim().is_empty() {
        return Err(ServiceError::validation("message is required"));
    }
    if !AVAILABLE_MODELS.contains(&model) {
        return Err(ServiceError::validation(format!("unknown model '{}'", model)));
    }
    Ok(())
}

/// Wire messages for the whole history with `framing` placed right before the
/// newest user message.
fn build_messages(history: &[ChatMessage], framing: &str) -> Vec<WireMessage> {
    let mut messages: Vec<WireMessage> = history.iter().map(WireMessage::from).collect();
    let at = history
        .iter()
        .rposition(|m| m.role == Role::User)
        .unwrap_or(messages.len());
    messages.insert(at, WireMessage::system(framing));
    messages
}

/// Store the user message and assemble the completion request.
async fn prepare_turn<C: ChatCompleter>(
    db: &Arc<Database>,
    completer: &C,
    conversation_id: Uuid,
    user_text: &str,
    model: &str,
) -> Result<CompletionRequest> {
    validate_turn(user_text, model)?;

    let history = {
        let db = db.clone();
        let text = user_text.to_string();
        run_blocking(move || {
            append_message(&db, conversation_id, Role::User, &text)?;
            get_history(&db, conversation_id)
        })
        .await?
    };

    let sentiment = classify_sentiment(completer, user_text, model).await;
    Ok(CompletionRequest::new(model, build_messages(&history, sentiment.framing())))
}

/// Store the finished reply. An empty reply counts as a failed completion.
async fn store_reply(
    db: &Arc<Database>,
    conversation_id: Uuid,
    reply: String,
    persona: Option<Persona>,
) -> Result<ChatMessage> {
    if reply.trim().is_empty() {
        warn!("Completion for conversation {} returned no content", conversation_id);
        return Err(ServiceError::CompletionFailed("completion returned no content".into()));
    }

    let db = db.clone();
    let content = finish_reply(reply, persona);
    run_blocking(move || append_message(&db, conversation_id, Role::Assistant, &content)).await
}

/// Run one chat turn and return the stored assistant message.
pub async fn run_turn<C: ChatCompleter>(
    db: &Arc<Database>,
    completer: &C,
    conversation_id: Uuid,
    user_text: &str,
    model: &str,
    persona: Option<Persona>,
) -> Result<ChatMessage> {
    let request = prepare_turn(db, completer, conversation_id, user_text, model).await?;

    let reply = completer.complete(request).await.map_err(|e| {
        warn!("Completion for conversation {} failed: {}", conversation_id, e);
        ServiceError::from(e)
    })?;

    store_reply(db, conversation_id, reply, persona).await
}

/// Like `run_turn`, but yields the reply as it grows. The assistant message is
/// stored only once the completion finishes; dropping the stream early leaves
/// just the user message behind.
pub fn run_turn_streaming<C: ChatCompleter + 'static>(
    db: Arc<Database>,
    completer: Arc<C>,
    conversation_id: Uuid,
    user_text: String,
    model: String,
    persona: Option<Persona>,
) -> TurnStream {
    Box::pin(async_stream::try_stream! {
        let request =
            prepare_turn(&db, completer.as_ref(), conversation_id, &user_text, &model).await?;

        let mut snapshots = completer.complete_streaming(request);
        let mut reply = String::new();

        while let Some(snapshot) = snapshots.next().await {
            let text = snapshot.map_err(|e| {
                warn!("Streaming completion for conversation {} failed: {}", conversation_id, e);
                ServiceError::from(e)
            })?;
            reply.clone_from(&text);
            yield ChatStreamEvent::Snapshot { text };
        }

        let message = store_reply(&db, conversation_id, reply, persona).await?;
        yield ChatStreamEvent::Done { message };
    })
}

// -- Handlers --

/// Load a conversation owned by the session user.
fn owned_conversation(
    db: &Database,
    session: &SessionContext,
    conversation_id: Uuid,
) -> Result<Conversation> {
    let conversation = get_conversation(db, conversation_id)?.ok_or(ServiceError::NotFound {
        entity: "Conversation",
        id: conversation_id.to_string(),
    })?;
    session.check_owner(&conversation)?;
    Ok(conversation)
}

pub async fn create<C: ChatCompleter + 'static>(
    State(state): State<AppState<C>>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse> {
    let db = state.db.clone();
    let conversation =
        run_blocking(move || create_conversation(&db, session.user_id, &req.title)).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn list<C: ChatCompleter + 'static>(
    State(state): State<AppState<C>>,
    Extension(session): Extension<SessionContext>,
) -> Result<impl IntoResponse> {
    let db = state.db.clone();
    Ok(Json(run_blocking(move || list_conversations(&db, session.user_id)).await?))
}

pub async fn delete<C: ChatCompleter + 'static>(
    State(state): State<AppState<C>>,
    Path(conversation_id): Path<Uuid>,
    Extension(session): Extension<SessionContext>,
) -> Result<impl IntoResponse> {
    let db = state.db.clone();
    run_blocking(move || {
        if let Some(conversation) = get_conversation(&db, conversation_id)? {
            session.check_owner(&conversation)?;
            delete_conversation(&db, conversation_id)?;
        }
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn history<C: ChatCompleter + 'static>(
    State(state): State<AppState<C>>,
    Path(conversation_id): Path<Uuid>,
    Extension(session): Extension<SessionContext>,
) -> Result<impl IntoResponse> {
    let db = state.db.clone();
    let history = run_blocking(move || {
        owned_conversation(&db, &session, conversation_id)?;
        get_history(&db, conversation_id)
    })
    .await?;
    Ok(Json(history))
}

pub async fn send_message<C: ChatCompleter + 'static>(
    State(state): State<AppState<C>>,
    Path(conversation_id): Path<Uuid>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse> {
    let db = state.db.clone();
    run_blocking(move || owned_conversation(&db, &session, conversation_id).map(drop)).await?;
    let model = req.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let reply = run_turn(
        &state.db,
        state.completer.as_ref(),
        conversation_id,
        &req.content,
        &model,
        Persona::from_choices(req.tone, req.style),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(reply)))
}

/// Server-sent events: `snapshot` events with the reply so far, then `done`
/// with the stored message, or a single `error`.
pub async fn stream_message<C: ChatCompleter + 'static>(
    State(state): State<AppState<C>>,
    Path(conversation_id): Path<Uuid>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse> {
    let db = state.db.clone();
    run_blocking(move || owned_conversation(&db, &session, conversation_id).map(drop)).await?;
    let model = req.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
    validate_turn(&req.content, &model)?;

    let events = run_turn_streaming(
        state.db.clone(),
        state.completer.clone(),
        conversation_id,
        req.content,
        model,
        Persona::from_choices(req.tone, req.style),
    )
    .map(|item| {
        let event = item.unwrap_or_else(|e| ChatStreamEvent::Error {
            message: e.to_string(),
        });
        Event::default().event(event.name()).json_data(&event)
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use snow_ai::{AiError, SnapshotStream};

    use super::*;

    /// Answers sentiment questions with a fixed word and chat requests with a
    /// fixed reply, recording every chat request it sees.
    struct Scripted {
        sentiment: &'static str,
        reply: std::result::Result<&'static str, &'static str>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl Scripted {
        fn replying(reply: &'static str) -> Self {
            Self {
                sentiment: "positive",
                reply: Ok(reply),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                sentiment: "neutral",
                reply: Err("upstream down"),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn last_request(&self) -> CompletionRequest {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl ChatCompleter for Scripted {
        async fn complete(&self, request: CompletionRequest) -> std::result::Result<String, AiError> {
            if request.max_tokens.is_some() {
                return Ok(self.sentiment.to_string());
            }
            self.seen.lock().unwrap().push(request);
            self.reply.map(str::to_string).map_err(AiError::completion)
        }

        fn complete_streaming(&self, request: CompletionRequest) -> SnapshotStream {
            self.seen.lock().unwrap().push(request);
            let reply = self.reply;
            Box::pin(async_stream::try_stream! {
                let text = reply.map_err(AiError::completion)?;
                let mut so_far = String::new();
                for word in text.split_inclusive(' ') {
                    so_far.push_str(word);
                    yield so_far.clone();
                }
            })
        }
    }

    fn setup() -> (Arc<Database>, Uuid) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user = crate::auth::register_user(&db, "alice", "pw1").unwrap();
        (db, user.id)
    }

    #[test]
    fn conversations_are_listed_newest_first_per_user() {
        let (db, alice) = setup();
        let bob = crate::auth::register_user(&db, "bob", "pw2").unwrap().id;

        let first = create_conversation(&db, alice, "first").unwrap();
        let second = create_conversation(&db, alice, "second").unwrap();
        create_conversation(&db, bob, "bob's").unwrap();

        let listed = list_conversations(&db, alice).unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn empty_title_is_rejected() {
        let (db, alice) = setup();
        let err = create_conversation(&db, alice, "   ").unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn history_keeps_append_order() {
        let (db, alice) = setup();
        let conv = create_conversation(&db, alice, "chat").unwrap();

        for (role, text) in [(Role::User, "a"), (Role::Assistant, "b"), (Role::User, "c")] {
            append_message(&db, conv.id, role, text).unwrap();
        }

        let history = get_history(&db, conv.id).unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn append_to_missing_conversation_is_not_found() {
        let (db, _) = setup();
        let err = append_message(&db, Uuid::new_v4(), Role::User, "hi").unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { entity: "Conversation", .. }));
    }

    #[test]
    fn delete_cascades_and_is_idempotent() {
        let (db, alice) = setup();
        let conv = create_conversation(&db, alice, "gone soon").unwrap();
        append_message(&db, conv.id, Role::User, "hello").unwrap();

        delete_conversation(&db, conv.id).unwrap();
        assert!(get_history(&db, conv.id).unwrap().is_empty());
        assert!(get_conversation(&db, conv.id).unwrap().is_none());

        delete_conversation(&db, conv.id).unwrap();
    }

    #[test]
    fn framing_goes_before_newest_user_message() {
        let (db, alice) = setup();
        let conv = create_conversation(&db, alice, "c").unwrap();
        append_message(&db, conv.id, Role::User, "one").unwrap();
        append_message(&db, conv.id, Role::Assistant, "two").unwrap();
        append_message(&db, conv.id, Role::User, "three").unwrap();

        let history = get_history(&db, conv.id).unwrap();
        let messages = build_messages(&history, "hint");

        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "system", "user"]);
        assert_eq!(messages[2].content, "hint");
        assert_eq!(messages[3].content, "three");
    }

    #[tokio::test]
    async fn turn_stores_both_messages() {
        let (db, alice) = setup();
        let conv = create_conversation(&db, alice, "trip planning").unwrap();
        let completer = Scripted::replying("Sounds fun!");

        let reply = run_turn(&db, &completer, conv.id, "hello", "gpt-4o-mini", None)
            .await
            .unwrap();

        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.content, "Sounds fun!");

        let history = get_history(&db, conv.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[1].id, reply.id);

        let sent = completer.last_request();
        assert_eq!(sent.model, "gpt-4o-mini");
        assert_eq!(
            sent.messages[0].content,
            "The user seems positive. Respond in an upbeat manner."
        );
        assert_eq!(sent.messages[1].content, "hello");
    }

    #[tokio::test]
    async fn failed_completion_keeps_user_message() {
        let (db, alice) = setup();
        let conv = create_conversation(&db, alice, "c").unwrap();

        let err = run_turn(&db, &Scripted::failing(), conv.id, "hello", "gpt-4o", None)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::CompletionFailed(_)));
        let history = get_history(&db, conv.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn unknown_model_is_rejected_before_storing() {
        let (db, alice) = setup();
        let conv = create_conversation(&db, alice, "c").unwrap();

        let err = run_turn(&db, &Scripted::replying("x"), conv.id, "hi", "gpt-2", None)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(get_history(&db, conv.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn persona_styles_stored_reply() {
        let (db, alice) = setup();
        let conv = create_conversation(&db, alice, "c").unwrap();
        let persona = Persona::from_choices(Some(Tone::Formal), Some(LearningStyle::Detailed));

        let reply = run_turn(&db, &Scripted::replying("Rust."), conv.id, "why", "gpt-4o", persona)
            .await
            .unwrap();

        assert_eq!(
            reply.content,
            "Here is a formal explanation: Rust.\n\nI can go into more detail if you'd like!"
        );
    }

    #[tokio::test]
    async fn empty_reply_is_a_failed_completion() {
        let (db, alice) = setup();
        let conv = create_conversation(&db, alice, "c").unwrap();

        let err = run_turn(&db, &Scripted::replying(""), conv.id, "hello", "gpt-4o", None)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::CompletionFailed(_)));
        let history = get_history(&db, conv.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn stream_without_snapshots_fails_without_storing_reply() {
        let (db, alice) = setup();
        let conv = create_conversation(&db, alice, "c").unwrap();

        let items: Vec<Result<ChatStreamEvent>> = run_turn_streaming(
            db.clone(),
            Arc::new(Scripted::replying("")),
            conv.id,
            "hello".into(),
            "gpt-4o-mini".into(),
            None,
        )
        .collect()
        .await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ServiceError::CompletionFailed(_))));
        assert_eq!(get_history(&db, conv.id).unwrap().len(), 1);
    }

    #[test]
    fn no_choices_means_no_persona() {
        assert_eq!(Persona::from_choices(None, None), None);
        let casual = Persona::from_choices(None, Some(LearningStyle::Quick)).unwrap();
        assert_eq!(casual.apply("ok"), "Here's a quick explanation: ok");
    }

    #[tokio::test]
    async fn streaming_turn_yields_snapshots_then_stores_reply() {
        let (db, alice) = setup();
        let conv = create_conversation(&db, alice, "c").unwrap();
        let completer = Arc::new(Scripted::replying("hi there friend"));

        let events: Vec<ChatStreamEvent> = run_turn_streaming(
            db.clone(),
            completer,
            conv.id,
            "hello".into(),
            "gpt-4o-mini".into(),
            None,
        )
        .map(|e| e.unwrap())
        .collect()
        .await;

        let snapshots: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                ChatStreamEvent::Snapshot { text } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(snapshots, vec!["hi ", "hi there ", "hi there friend"]);

        match events.last().unwrap() {
            ChatStreamEvent::Done { message } => assert_eq!(message.content, "hi there friend"),
            other => panic!("expected done, got {:?}", other),
        }
        assert_eq!(get_history(&db, conv.id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dropped_stream_stores_only_user_message() {
        let (db, alice) = setup();
        let conv = create_conversation(&db, alice, "c").unwrap();

        let mut stream = run_turn_streaming(
            db.clone(),
            Arc::new(Scripted::replying("one two three")),
            conv.id,
            "hello".into(),
            "gpt-4o-mini".into(),
            None,
        );
        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, ChatStreamEvent::Snapshot { .. }));
        drop(stream);

        let history = get_history(&db, conv.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn failed_stream_ends_with_error_and_stores_nothing_more() {
        let (db, alice) = setup();
        let conv = create_conversation(&db, alice, "c").unwrap();

        let items: Vec<Result<ChatStreamEvent>> = run_turn_streaming(
            db.clone(),
            Arc::new(Scripted::failing()),
            conv.id,
            "hello".into(),
            "gpt-4o-mini".into(),
            None,
        )
        .collect()
        .await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ServiceError::CompletionFailed(_))));
        assert_eq!(get_history(&db, conv.id).unwrap().len(), 1);
    }
}
