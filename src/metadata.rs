use serde::{Deserialize, Serialize};

/// Structured payload attached to a generation record.
///
/// The only defined shape is the edit record written when an image is
/// regenerated from an edit prompt. Anything else is carried through
/// untouched so older or foreign payloads survive a load/store cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenerationMetadata {
    Edit { edit_history: EditHistory },
    Other(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditHistory {
    pub original_prompt: String,
    pub edit_prompt: String,
    pub previous_enhanced_prompt: String,
    /// ISO-8601, set when the edit was made.
    pub timestamp: String,
}

impl GenerationMetadata {
    pub fn edit(edit_history: EditHistory) -> Self {
        Self::Edit { edit_history }
    }

    pub fn edit_history(&self) -> Option<&EditHistory> {
        match self {
            Self::Edit { edit_history } => Some(edit_history),
            Self::Other(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}
