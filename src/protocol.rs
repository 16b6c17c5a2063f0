//! Public protocol structs for the WebSocket and HTTP endpoints of the
//! interactive form. Field keys travel as plain strings (`"pinyin"`,
//! `"hanja"`); unknown keys name custom fields.

use serde::{Deserialize, Serialize};

use crate::domain::ValidatorCategory;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    ListFiles,
    LoadFile {
        file: String,
    },
    GetSentence {
        index: usize,
        field: String,
    },
    GetPrompts,
    UpdatePrompt {
        field: String,
        /// `None` restores the built-in template.
        template: Option<String>,
    },
    Verify {
        index: usize,
        field: String,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Files {
        files: Vec<String>,
    },
    Loaded(LoadOut),
    Sentence(SentenceView),
    Prompts {
        prompts: Vec<PromptOut>,
    },
    Prompt(PromptOut),
    Verified(VerifyOut),
    Error {
        code: String,
        message: String,
    },
}

//
// HTTP request/response DTOs
//

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct FilesOut {
    pub files: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoadIn {
    pub file: String,
}

#[derive(Debug, Serialize)]
pub struct LoadOut {
    pub file: String,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct SentenceQuery {
    #[serde(default)]
    pub index: usize,
    #[serde(default = "default_field")]
    pub field: String,
}

fn default_field() -> String {
    "pinyin".into()
}

/// One other field of the record, shown as context next to the one under review.
#[derive(Debug, Serialize)]
pub struct ContextEntry {
    pub field: String,
    pub label: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct SentenceView {
    pub file: String,
    pub index: usize,
    pub total: usize,
    pub field: String,
    pub label: String,
    pub category: ValidatorCategory,
    pub sentence: String,
    pub current_value: String,
    /// Dictionary reading of the sentence, for reference only.
    pub reference_pinyin: String,
    pub pinyin_agrees: bool,
    pub context: Vec<ContextEntry>,
    pub prompt_preview: String,
}

#[derive(Debug, Serialize)]
pub struct PromptOut {
    pub field: String,
    pub label: String,
    pub template: String,
    pub preview: String,
}

#[derive(Debug, Serialize)]
pub struct PromptsOut {
    pub prompts: Vec<PromptOut>,
}

#[derive(Debug, Deserialize)]
pub struct PromptIn {
    pub field: String,
    #[serde(default)]
    pub template: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyIn {
    pub index: usize,
    pub field: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    /// The oracle proposed a different value; it was written and saved.
    Updated,
    /// The oracle confirmed the current value.
    Unchanged,
    /// Nothing usable could be extracted from the reply.
    Rejected,
}

#[derive(Debug, Serialize)]
pub struct VerifyOut {
    pub index: usize,
    pub field: String,
    pub status: VerifyStatus,
    pub previous: String,
    pub value: String,
    /// The oracle's trimmed reply, shown when nothing could be extracted.
    pub raw: String,
}
