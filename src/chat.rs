use serde::{Deserialize, Serialize};

/// Application payloads carried over an established secure channel,
/// dispatched by the explicit `type` tag.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ChatPayload {
    #[serde(rename = "chat")]
    Chat { from: String, text: String },
    #[serde(rename = "introduction", rename_all = "camelCase")]
    Introduction { from: String, display_name: String },
}

impl ChatPayload {
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_wire(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub from: String,
    pub text: String,
}

/// Append-only record of the conversation as seen locally. Outbound
/// messages land here before any fanout encryption completes.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<ChatEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Transcript::default()
    }

    pub fn append(&mut self, from: impl Into<String>, text: impl Into<String>) {
        self.entries.push(ChatEntry {
            from: from.into(),
            text: text.into(),
        });
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
