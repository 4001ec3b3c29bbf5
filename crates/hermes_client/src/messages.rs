//! Wire types for the chat socket and the REST query fallback. Client ↔ backend JSON.

use serde::{Deserialize, Serialize};

/// Mode tag the backend attaches to incremental retrieval answers.
pub const MODE_RAG: &str = "rag";
/// Mode used for full-answer snapshots when the backend did not send one.
pub const MODE_CHAT: &str = "chat";
/// Mode stamped on assistant messages that describe a failure.
pub const MODE_ERROR: &str = "error";

/// Client → backend: question frame (socket) or request body (REST).
#[derive(Debug, Clone, Serialize)]
pub struct QueryMessage<'a> {
    pub question: &'a str,
}

impl<'a> QueryMessage<'a> {
    pub fn new(question: &'a str) -> Self {
        Self { question }
    }
}

/// Retrieved chunk metadata. Only `source` is shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// A source entry as sent by the backend: either a bare identifier or a
/// `{source, text, score}` object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SourceEntry {
    Name(String),
    Info(SourceInfo),
}

impl SourceEntry {
    fn into_name(self) -> String {
        match self {
            SourceEntry::Name(name) => name,
            SourceEntry::Info(info) => info.source,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SourcesFrame {
    #[serde(default)]
    sources: Option<Vec<SourceEntry>>,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenFrame {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorFrame {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorFrame {
    fn into_text(self) -> String {
        self.content
            .or(self.message)
            .or(self.error)
            .unwrap_or_else(|| "unknown error".into())
    }
}

/// One backend frame; discriminator is the JSON "type" field.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Sources {
        sources: Vec<String>,
        mode: Option<String>,
    },
    Token {
        content: String,
        mode: Option<String>,
    },
    Done,
    Error(String),
    /// Frame with a type this client does not know. Ignored by the driver.
    Unknown(String),
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<Self, String> {
        let value: serde_json::Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
        Self::from_json(&value)
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        let typ = match value.get("type").and_then(|t| t.as_str()) {
            Some(t) => t,
            // The backend answers an empty question with a bare {"error": ...}.
            None if value.get("error").is_some() => "error",
            None => return Err("missing type".into()),
        };
        match typ {
            "sources" => {
                let f: SourcesFrame =
                    serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
                Ok(ServerFrame::Sources {
                    sources: f
                        .sources
                        .unwrap_or_default()
                        .into_iter()
                        .map(SourceEntry::into_name)
                        .collect(),
                    mode: f.mode,
                })
            }
            "token" => {
                let f: TokenFrame =
                    serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
                Ok(ServerFrame::Token {
                    content: f.content.unwrap_or_default(),
                    mode: f.mode,
                })
            }
            "done" => Ok(ServerFrame::Done),
            "error" => {
                let f: ErrorFrame =
                    serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
                Ok(ServerFrame::Error(f.into_text()))
            }
            other => Ok(ServerFrame::Unknown(other.to_string())),
        }
    }
}

/// `POST /api/query` response.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<SourceInfo>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub demo_mode: bool,
}

impl QueryResponse {
    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.source.clone()).collect()
    }
}

/// Whether a token with this mode is an incremental chunk (appended) rather
/// than a full-answer snapshot (replaces the accumulated content).
pub fn is_incremental(mode: Option<&str>) -> bool {
    mode == Some(MODE_RAG)
}
