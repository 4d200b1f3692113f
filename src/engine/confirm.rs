use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::SlotLabel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Claim,
    Release,
    Override,
}

/// What the acting user is asked to approve before a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub kind: PromptKind,
    pub date: NaiveDate,
    pub label: SlotLabel,
    pub position: usize,
    /// Current holder for `Override`: display name if the directory knows it,
    /// otherwise the raw principal id.
    pub holder: Option<String>,
    /// Raw principal id of the holder for `Override`.
    pub holder_id: Option<String>,
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PromptKind::Claim => write!(
                f,
                "Are you sure you want to sign up for {} {} ({})?",
                self.date,
                self.label,
                self.label.time_range()
            ),
            PromptKind::Release => write!(
                f,
                "Are you sure you want to remove your entry for {} {}?",
                self.date, self.label
            ),
            PromptKind::Override => write!(
                f,
                "This slot is already taken by {}. Do you want to remove it?",
                self.holder.as_deref().unwrap_or("someone else")
            ),
        }
    }
}

/// The acting user's answer to a prompt.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, prompt: &Prompt) -> bool;
}

/// Approves only the exact action the user already agreed to: same kind and,
/// for an override, the same holder. A slot that changed hands in the
/// meantime is never silently overridden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedAs {
    pub kind: PromptKind,
    pub holder_id: Option<String>,
}

impl ConfirmedAs {
    pub const fn new(kind: PromptKind) -> Self {
        Self {
            kind,
            holder_id: None,
        }
    }

    pub fn override_of(holder_id: impl Into<String>) -> Self {
        Self {
            kind: PromptKind::Override,
            holder_id: Some(holder_id.into()),
        }
    }

    /// What a client echoes back after seeing `prompt`.
    pub fn from_reply(kind: PromptKind, holder_id: Option<String>) -> Self {
        Self { kind, holder_id }
    }
}

#[async_trait]
impl Confirm for ConfirmedAs {
    async fn confirm(&self, prompt: &Prompt) -> bool {
        prompt.kind == self.kind && prompt.holder_id == self.holder_id
    }
}

/// Declines everything, remembering the prompt so it can be shown to the user.
#[derive(Debug, Default)]
pub struct AskFirst {
    asked: Mutex<Option<Prompt>>,
}

impl AskFirst {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_prompt(self) -> Option<Prompt> {
        self.asked.into_inner().ok().flatten()
    }
}

#[async_trait]
impl Confirm for AskFirst {
    async fn confirm(&self, prompt: &Prompt) -> bool {
        if let Ok(mut asked) = self.asked.lock() {
            *asked = Some(prompt.clone());
        }
        false
    }
}
