//! Hermes chat client library: conversation store, streaming session client,
//! REST fallback and auth contract for the Hermes RAG backend.
//! Used by the `hermes` CLI.

pub mod api;
pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod messages;
pub mod store;

pub use api::{BackendApi, LoginResponse, SignupRequest};
pub use auth::Credentials;
pub use chat::ChatSession;
pub use client::{ClientStatus, FrameHandler, StreamingClient};
pub use config::{default_config_path, BackendSection, Config, ConfigError, ReconnectSection, Settings};
pub use connection::{CloseOutcome, ConnectionMachine, ConnectionState};
pub use error::{ChatError, ClientError};
pub use messages::ServerFrame;
pub use store::{
    reduce, AssistantUpdate, ChatState, Conversation, ConversationStore, Intent, Message, Role,
};
