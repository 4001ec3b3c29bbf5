//! Chat session: the conversation store driven by a streaming client.
//!
//! A send appends the user message and an empty assistant placeholder, then
//! hands the question to the client. Client callbacks write back into the
//! conversation the turn started in, even if the user switched away since.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use crate::client::{ClientStatus, FrameHandler, StreamingClient};
use crate::config::Settings;
use crate::error::{ChatError, ClientError};
use crate::messages::MODE_ERROR;
use crate::store::{AssistantUpdate, Conversation, ConversationStore, Message};

/// Assistant reply while the backend is known to be offline.
pub const OFFLINE_NOTICE: &str = "🔧 Το backend δεν είναι διαθέσιμο. Για να χρησιμοποιήσετε το πλήρες σύστημα RAG:\n\n\
1. Εγκαταστήστε το Ollama και τα μοντέλα\n\
2. Εκκινήστε το Weaviate (Docker)\n\
3. Τρέξτε: python scripts/main.py\n\n\
Δείτε το README.md για αναλυτικές οδηγίες.";

/// Assistant reply when the socket dropped in the middle of an answer.
pub const CONNECTION_LOST_NOTICE: &str =
    "Η σύνδεση με το backend διακόπηκε κατά τη δημιουργία της απάντησης. Παρακαλώ δοκιμάστε ξανά.";

#[derive(Debug)]
struct Shared {
    store: ConversationStore,
    /// Conversation receiving the current turn's frames.
    turn_conversation: Option<String>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Text shown in place of the assistant answer for a failed turn.
pub fn describe_error(error: &ClientError, api_url: &str) -> String {
    match error {
        ClientError::BackendFrame(msg) => format!("Σφάλμα: {msg}"),
        ClientError::BackendUnavailable(_) | ClientError::ReconnectExhausted { .. } => {
            OFFLINE_NOTICE.to_string()
        }
        ClientError::RequestFailed { .. }
        | ClientError::Http(_)
        | ClientError::ConnectionFailed(_) => format!(
            "Σφάλμα σύνδεσης με το backend. Παρακαλώ ελέγξτε ότι ο server τρέχει στο {api_url}"
        ),
        ClientError::ConnectionLost(_) => CONNECTION_LOST_NOTICE.to_string(),
        other => format!("Σφάλμα: {other}"),
    }
}

struct StoreHandler {
    shared: Arc<Mutex<Shared>>,
    api_url: String,
}

impl StoreHandler {
    fn with_turn(&self, f: impl FnOnce(&mut ConversationStore, &str)) {
        let mut guard = lock(&self.shared);
        let Shared {
            store,
            turn_conversation,
        } = &mut *guard;
        match turn_conversation {
            Some(id) => f(store, id.as_str()),
            None => tracing::debug!("frame outside of any turn ignored"),
        }
    }
}

impl FrameHandler for StoreHandler {
    fn on_sources(&mut self, sources: Vec<String>, mode: Option<String>) {
        self.with_turn(|store, id| store.set_sources(id, sources, mode));
    }

    fn on_token(&mut self, content: String, mode: Option<String>) {
        self.with_turn(|store, id| {
            store.update_assistant_message(id, AssistantUpdate::Token { content, mode })
        });
    }

    fn on_answer(&mut self, sources: Vec<String>, content: String, mode: Option<String>) {
        self.with_turn(|store, id| {
            store.update_assistant_message(
                id,
                AssistantUpdate::Answer {
                    content,
                    sources,
                    mode,
                },
            )
        });
    }

    fn on_error(&mut self, error: ClientError) {
        tracing::warn!(%error, "turn failed");
        let text = describe_error(&error, &self.api_url);
        self.with_turn(|store, id| {
            let placeholder = store
                .conversation(id)
                .and_then(Conversation::last_message)
                .is_some_and(Message::is_placeholder);
            if placeholder {
                store.update_assistant_message(id, AssistantUpdate::Fail(text));
            } else {
                store.add_assistant_message(id, &text, Utc::now());
                store.set_mode(id, MODE_ERROR);
            }
        });
    }
}

pub struct ChatSession {
    shared: Arc<Mutex<Shared>>,
    client: StreamingClient,
}

impl ChatSession {
    /// Session with one greeting conversation. Needs a tokio runtime.
    pub fn start(settings: Settings) -> Self {
        Self::with_store(settings, ConversationStore::new())
    }

    pub fn with_store(settings: Settings, store: ConversationStore) -> Self {
        let shared = Arc::new(Mutex::new(Shared {
            store,
            turn_conversation: None,
        }));
        let handler = StoreHandler {
            shared: shared.clone(),
            api_url: settings.api_url.clone(),
        };
        let client = StreamingClient::spawn(settings, handler);
        Self { shared, client }
    }

    pub fn client(&self) -> &StreamingClient {
        &self.client
    }

    pub fn status(&self) -> ClientStatus {
        self.client.status()
    }

    /// Read the store under the session lock.
    pub fn read<R>(&self, f: impl FnOnce(&ConversationStore) -> R) -> R {
        f(&lock(&self.shared).store)
    }

    /// Copy of the current store.
    pub fn snapshot(&self) -> ConversationStore {
        self.read(ConversationStore::clone)
    }

    pub fn current_conversation_id(&self) -> String {
        self.read(|s| s.current_id().to_string())
    }

    /// Ask a question in the current conversation. Returns `Ok(false)` for a
    /// blank question, which is ignored.
    pub fn send_message(&self, text: &str) -> Result<bool, ChatError> {
        if text.trim().is_empty() {
            return Ok(false);
        }
        if self.client.is_loading() {
            return Err(ChatError::Busy);
        }
        {
            let mut guard = lock(&self.shared);
            let id = guard.store.current_id().to_string();
            let now = Utc::now();
            if guard.store.is_first_user_turn(&id) {
                guard.store.update_title(&id, text);
            }
            guard.store.add_user_message(&id, text, now);
            guard.store.add_assistant_message(&id, "", now);
            guard.turn_conversation = Some(id);
        }
        self.client.send_message(text)?;
        Ok(true)
    }

    pub fn stop(&self) -> Result<(), ChatError> {
        Ok(self.client.stop_generation()?)
    }

    pub fn reconnect(&self) -> Result<(), ChatError> {
        Ok(self.client.reconnect()?)
    }

    /// Create a greeting conversation, make it current and return its id.
    pub fn new_conversation(&self) -> String {
        let conversation = Conversation::seeded(Utc::now());
        let id = conversation.id.clone();
        lock(&self.shared).store.new_conversation(conversation);
        id
    }

    pub fn delete_conversation(&self, id: &str) {
        lock(&self.shared).store.delete_conversation(id);
    }

    pub fn switch_conversation(&self, id: &str) {
        lock(&self.shared).store.set_current_conversation(id);
    }

    pub fn search(&self, query: &str) -> Vec<Conversation> {
        self.read(|s| s.search(query).into_iter().cloned().collect())
    }

    /// Wait for startup to settle (connected, retrying or offline).
    pub async fn wait_ready(&self) -> Result<ClientStatus, ClientError> {
        self.client.wait_for(ClientStatus::is_settled).await
    }

    /// Wait for the current turn to finish.
    pub async fn wait_idle(&self) -> Result<ClientStatus, ClientError> {
        self.client.wait_for(|s| !s.is_loading).await
    }

    pub async fn dispose(self) {
        self.client.dispose().await;
    }
}
