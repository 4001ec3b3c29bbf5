//! In-memory chat history: conversations, messages and the active selection.
//!
//! Every write goes through an [`Intent`] applied by [`reduce`]; the
//! [`ConversationStore`] wrapper owns the state and stamps intents with the
//! current time. Intents naming an unknown conversation are no-ops.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::messages::{is_incremental, MODE_ERROR};

pub const DEFAULT_TITLE: &str = "Νέα Συνομιλία";
pub const GREETING: &str = "Καλώς ήρθατε στο Ερμής. Είμαι εδώ για να σας βοηθήσω με τους διακλαδικούς κανονισμούς και τα στρατιωτικά έγγραφα. Πώς μπορώ να σας βοηθήσω σήμερα;";
pub const TITLE_MAX_CHARS: usize = 40;
pub const TITLE_ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sources: None,
            timestamp,
            mode: None,
        }
    }

    pub fn assistant(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sources: None,
            timestamp,
            mode: None,
        }
    }

    /// Empty assistant message waiting for streamed content.
    pub fn is_placeholder(&self) -> bool {
        self.role == Role::Assistant && self.content.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Fresh conversation with a new id, the default title and the greeting.
    pub fn seeded(now: DateTime<Utc>) -> Self {
        Self::seeded_with_id(uuid::Uuid::new_v4().to_string(), now)
    }

    pub fn seeded_with_id(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: DEFAULT_TITLE.into(),
            messages: vec![Message::assistant(GREETING, now)],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// True while the conversation holds nothing but the greeting.
    pub fn is_first_user_turn(&self) -> bool {
        self.messages.len() == 1 && self.messages[0].role == Role::Assistant
    }

    /// Advance `updated_at`; never lets it stand still or move backwards.
    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = if at > self.updated_at {
            at
        } else {
            self.updated_at + TimeDelta::microseconds(1)
        };
    }
}

/// Edits applied to the trailing assistant message while a turn streams.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantUpdate {
    /// Streamed token: appended for `rag` mode, replaces the content otherwise.
    Token {
        content: String,
        mode: Option<String>,
    },
    /// Whole answer in one write: content, sources and mode together.
    Answer {
        content: String,
        sources: Vec<String>,
        mode: Option<String>,
    },
    Append(String),
    /// Turn the message into a failure notice.
    Fail(String),
    SetMode(Option<String>),
}

impl AssistantUpdate {
    pub fn apply(self, msg: &mut Message) {
        match self {
            AssistantUpdate::Token { content, mode } => {
                if is_incremental(mode.as_deref()) {
                    msg.content.push_str(&content);
                } else {
                    msg.content = content;
                }
                msg.mode = mode;
            }
            AssistantUpdate::Answer {
                content,
                sources,
                mode,
            } => {
                msg.content = content;
                if !sources.is_empty() {
                    msg.sources = Some(sources);
                }
                msg.mode = mode;
            }
            AssistantUpdate::Append(content) => msg.content.push_str(&content),
            AssistantUpdate::Fail(content) => {
                msg.content = content;
                msg.mode = Some(MODE_ERROR.into());
            }
            AssistantUpdate::SetMode(mode) => msg.mode = mode,
        }
    }
}

/// Named mutations of [`ChatState`].
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    AddUserMessage {
        conversation_id: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    AddAssistantMessage {
        conversation_id: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    UpdateAssistantMessage {
        conversation_id: String,
        update: AssistantUpdate,
    },
    SetSources {
        conversation_id: String,
        sources: Vec<String>,
        mode: Option<String>,
    },
    SetMode {
        conversation_id: String,
        mode: String,
    },
    UpdateTitle {
        conversation_id: String,
        title: String,
    },
    NewConversation(Conversation),
    DeleteConversation(String),
    SetCurrent(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatState {
    /// Newest first.
    pub conversations: Vec<Conversation>,
    pub current_conversation_id: String,
}

impl ChatState {
    /// State holding a single seeded conversation, which is current.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_conversation(Conversation::seeded(now))
    }

    pub fn with_conversation(conversation: Conversation) -> Self {
        Self {
            current_conversation_id: conversation.id.clone(),
            conversations: vec![conversation],
        }
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    pub fn current(&self) -> Option<&Conversation> {
        self.conversation(&self.current_conversation_id)
    }
}

/// Shorten a title to [`TITLE_MAX_CHARS`] characters plus an ellipsis.
pub fn truncate_title(text: &str) -> String {
    if text.chars().count() <= TITLE_MAX_CHARS {
        return text.to_string();
    }
    let mut title: String = text.chars().take(TITLE_MAX_CHARS).collect();
    title.push_str(TITLE_ELLIPSIS);
    title
}

/// Apply `f` to the last message of `conversation_id` if it is an assistant
/// message. Returns false (and leaves the state untouched) otherwise.
fn edit_last_assistant(
    state: &mut ChatState,
    conversation_id: &str,
    now: DateTime<Utc>,
    f: impl FnOnce(&mut Message),
) -> bool {
    let Some(conv) = state.conversation_mut(conversation_id) else {
        tracing::debug!(conversation_id, "assistant update for unknown conversation");
        return false;
    };
    match conv.messages.last_mut() {
        Some(last) if last.role == Role::Assistant => {
            f(last);
            conv.touch(now);
            true
        }
        _ => false,
    }
}

fn append_message(state: &mut ChatState, conversation_id: &str, msg: Message, now: DateTime<Utc>) {
    match state.conversation_mut(conversation_id) {
        Some(conv) => {
            conv.messages.push(msg);
            conv.touch(now);
        }
        None => tracing::debug!(conversation_id, "message for unknown conversation dropped"),
    }
}

/// Pure transition function: current state + intent → next state.
pub fn reduce(mut state: ChatState, intent: Intent, now: DateTime<Utc>) -> ChatState {
    match intent {
        Intent::AddUserMessage {
            conversation_id,
            content,
            timestamp,
        } => append_message(
            &mut state,
            &conversation_id,
            Message::user(content, timestamp),
            now,
        ),
        Intent::AddAssistantMessage {
            conversation_id,
            content,
            timestamp,
        } => append_message(
            &mut state,
            &conversation_id,
            Message::assistant(content, timestamp),
            now,
        ),
        Intent::UpdateAssistantMessage {
            conversation_id,
            update,
        } => {
            edit_last_assistant(&mut state, &conversation_id, now, |msg| update.apply(msg));
        }
        Intent::SetSources {
            conversation_id,
            sources,
            mode,
        } => {
            edit_last_assistant(&mut state, &conversation_id, now, |msg| {
                msg.sources = Some(sources);
                msg.mode = mode;
            });
        }
        Intent::SetMode {
            conversation_id,
            mode,
        } => {
            edit_last_assistant(&mut state, &conversation_id, now, |msg| {
                msg.mode = Some(mode);
            });
        }
        Intent::UpdateTitle {
            conversation_id,
            title,
        } => match state.conversation_mut(&conversation_id) {
            Some(conv) => {
                conv.title = truncate_title(&title);
                conv.touch(now);
            }
            None => tracing::debug!(%conversation_id, "rename of unknown conversation"),
        },
        Intent::NewConversation(conversation) => {
            state.conversations.retain(|c| c.id != conversation.id);
            state.current_conversation_id = conversation.id.clone();
            state.conversations.insert(0, conversation);
        }
        Intent::DeleteConversation(id) => {
            let before = state.conversations.len();
            state.conversations.retain(|c| c.id != id);
            if state.conversations.len() == before {
                tracing::debug!(%id, "delete of unknown conversation");
            }
            if state.conversations.is_empty() {
                let fresh = Conversation::seeded(now);
                state.current_conversation_id = fresh.id.clone();
                state.conversations.push(fresh);
            } else if state.current_conversation_id == id {
                state.current_conversation_id = state.conversations[0].id.clone();
            }
        }
        Intent::SetCurrent(id) => {
            if state.conversation(&id).is_some() {
                state.current_conversation_id = id;
            } else {
                tracing::debug!(%id, "switch to unknown conversation ignored");
            }
        }
    }
    state
}

/// Owner of the chat state. Reads borrow, writes go through intents.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    state: ChatState,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    /// Store seeded with one greeting conversation.
    pub fn new() -> Self {
        Self {
            state: ChatState::new(Utc::now()),
        }
    }

    pub fn from_state(state: ChatState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn apply(&mut self, intent: Intent) {
        self.apply_at(intent, Utc::now());
    }

    pub fn apply_at(&mut self, intent: Intent, now: DateTime<Utc>) {
        let state = std::mem::replace(
            &mut self.state,
            ChatState {
                conversations: Vec::new(),
                current_conversation_id: String::new(),
            },
        );
        self.state = reduce(state, intent, now);
    }

    pub fn add_user_message(&mut self, conversation_id: &str, text: &str, timestamp: DateTime<Utc>) {
        self.apply(Intent::AddUserMessage {
            conversation_id: conversation_id.into(),
            content: text.into(),
            timestamp,
        });
    }

    pub fn add_assistant_message(
        &mut self,
        conversation_id: &str,
        initial_content: &str,
        timestamp: DateTime<Utc>,
    ) {
        self.apply(Intent::AddAssistantMessage {
            conversation_id: conversation_id.into(),
            content: initial_content.into(),
            timestamp,
        });
    }

    pub fn update_assistant_message(&mut self, conversation_id: &str, update: AssistantUpdate) {
        self.apply(Intent::UpdateAssistantMessage {
            conversation_id: conversation_id.into(),
            update,
        });
    }

    /// Closure form of [`Self::update_assistant_message`]. Returns whether the
    /// last message was an assistant message and `f` ran.
    pub fn update_assistant_message_with(
        &mut self,
        conversation_id: &str,
        f: impl FnOnce(&mut Message),
    ) -> bool {
        edit_last_assistant(&mut self.state, conversation_id, Utc::now(), f)
    }

    pub fn set_sources(&mut self, conversation_id: &str, sources: Vec<String>, mode: Option<String>) {
        self.apply(Intent::SetSources {
            conversation_id: conversation_id.into(),
            sources,
            mode,
        });
    }

    pub fn set_mode(&mut self, conversation_id: &str, mode: &str) {
        self.apply(Intent::SetMode {
            conversation_id: conversation_id.into(),
            mode: mode.into(),
        });
    }

    pub fn update_title(&mut self, conversation_id: &str, title: &str) {
        self.apply(Intent::UpdateTitle {
            conversation_id: conversation_id.into(),
            title: title.into(),
        });
    }

    pub fn new_conversation(&mut self, conversation: Conversation) {
        self.apply(Intent::NewConversation(conversation));
    }

    pub fn delete_conversation(&mut self, id: &str) {
        self.apply(Intent::DeleteConversation(id.into()));
    }

    pub fn set_current_conversation(&mut self, id: &str) {
        self.apply(Intent::SetCurrent(id.into()));
    }

    pub fn current(&self) -> Option<&Conversation> {
        self.state.current()
    }

    pub fn current_id(&self) -> &str {
        &self.state.current_conversation_id
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.state.conversation(id)
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.state.conversations
    }

    /// Case-insensitive title filter.
    pub fn search(&self, query: &str) -> Vec<&Conversation> {
        let needle = query.to_lowercase();
        self.state
            .conversations
            .iter()
            .filter(|c| c.title.to_lowercase().contains(&needle))
            .collect()
    }

    /// Messages worth showing: empty assistant placeholders are hidden.
    pub fn visible_messages(&self, conversation_id: &str) -> Vec<&Message> {
        self.conversation(conversation_id)
            .map(|c| c.messages.iter().filter(|m| !m.is_placeholder()).collect())
            .unwrap_or_default()
    }

    pub fn is_first_user_turn(&self, conversation_id: &str) -> bool {
        self.conversation(conversation_id)
            .is_some_and(Conversation::is_first_user_turn)
    }
}
