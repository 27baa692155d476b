//! crates/artifact_studio_core/src/thread.rs
//!
//! The two conversation threads (creator and question) that share one artifact.

use uuid::Uuid;

use crate::domain::{ChatMode, ConversationMessage};

/// One mode's ordered message sequence.
#[derive(Debug, Clone)]
pub struct ConversationThread {
    mode: ChatMode,
    messages: Vec<ConversationMessage>,
    busy: bool,
}

impl ConversationThread {
    pub fn new(mode: ChatMode, messages: Vec<ConversationMessage>) -> Self {
        Self {
            mode,
            messages,
            busy: false,
        }
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn push(&mut self, message: ConversationMessage) -> Uuid {
        let id = message.id;
        self.messages.push(message);
        id
    }

    pub fn message_mut(&mut self, id: Uuid) -> Option<&mut ConversationMessage> {
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    /// Replaces a streaming message's text, returning a copy of the updated message.
    pub fn update_text(&mut self, id: Uuid, text: &str) -> Option<ConversationMessage> {
        let message = self.message_mut(id)?;
        message.text.clear();
        message.text.push_str(text);
        Some(message.clone())
    }

    pub fn mark_complete(&mut self, id: Uuid) -> bool {
        match self.message_mut(id) {
            Some(message) => {
                message.is_complete = true;
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }
}

/// Both threads of a workspace.
#[derive(Debug, Clone)]
pub struct ConversationThreads {
    creator: ConversationThread,
    question: ConversationThread,
}

impl Default for ConversationThreads {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl ConversationThreads {
    pub fn new(creator: Vec<ConversationMessage>, question: Vec<ConversationMessage>) -> Self {
        Self {
            creator: ConversationThread::new(ChatMode::Creator, creator),
            question: ConversationThread::new(ChatMode::Question, question),
        }
    }

    pub fn thread(&self, mode: ChatMode) -> &ConversationThread {
        match mode {
            ChatMode::Creator => &self.creator,
            ChatMode::Question => &self.question,
        }
    }

    pub fn thread_mut(&mut self, mode: ChatMode) -> &mut ConversationThread {
        match mode {
            ChatMode::Creator => &mut self.creator,
            ChatMode::Question => &mut self.question,
        }
    }

    pub fn is_busy(&self, mode: ChatMode) -> bool {
        self.thread(mode).is_busy()
    }

    pub fn any_busy(&self) -> bool {
        self.creator.is_busy() || self.question.is_busy()
    }

    pub fn is_empty(&self) -> bool {
        self.creator.messages.is_empty() && self.question.messages.is_empty()
    }
}
