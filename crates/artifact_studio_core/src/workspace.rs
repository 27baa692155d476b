//! crates/artifact_studio_core/src/workspace.rs
//!
//! The in-memory state of one open project: both conversation threads, the
//! shared artifact and its version history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{ChatMode, ProjectConfig, ProjectSession, Tier};
use crate::history::VersionHistory;
use crate::thread::ConversationThreads;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkspaceError {
    #[error("A generation is in progress")]
    Busy,
    #[error("Manual code editing is available to premium users only")]
    EditNotAllowed,
}

/// Canned requests offered as one-click actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuickAction {
    FindBugs,
    AddSecurity,
    PrepareDeploy,
}

impl QuickAction {
    pub fn prompt(self) -> &'static str {
        match self {
            QuickAction::FindBugs => "Please scan the code and find bugs.",
            QuickAction::AddSecurity => "Please add security layers.",
            QuickAction::PrepareDeploy => "Please prepare the code for deployment.",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Workspace {
    id: Uuid,
    owner_id: Uuid,
    name: String,
    config: ProjectConfig,
    threads: ConversationThreads,
    artifact: String,
    history: VersionHistory,
    active_mode: ChatMode,
    last_modified: DateTime<Utc>,
}

impl Workspace {
    /// A brand-new project named after its prompt.
    pub fn new(owner_id: Uuid, config: ProjectConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name: config.prompt.clone(),
            active_mode: config.chat_mode,
            config,
            threads: ConversationThreads::default(),
            artifact: String::new(),
            history: VersionHistory::new(),
            last_modified: Utc::now(),
        }
    }

    pub fn resume(session: ProjectSession) -> Self {
        Self {
            id: session.id,
            owner_id: session.owner_id,
            name: session.name,
            active_mode: session.config.chat_mode,
            config: session.config,
            threads: ConversationThreads::new(session.creator_messages, session.question_messages),
            history: VersionHistory::with_initial(&session.code),
            artifact: session.code,
            last_modified: session.last_modified,
        }
    }

    pub fn to_record(&self) -> ProjectSession {
        ProjectSession {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name.clone(),
            config: ProjectConfig {
                chat_mode: self.active_mode,
                ..self.config.clone()
            },
            code: self.artifact.clone(),
            creator_messages: self.threads.thread(ChatMode::Creator).messages().to_vec(),
            question_messages: self.threads.thread(ChatMode::Question).messages().to_vec(),
            last_modified: self.last_modified,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    pub fn history(&self) -> &VersionHistory {
        &self.history
    }

    pub fn threads(&self) -> &ConversationThreads {
        &self.threads
    }

    pub fn active_mode(&self) -> ChatMode {
        self.active_mode
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    pub fn is_busy(&self) -> bool {
        self.threads.any_busy()
    }

    /// Switching never touches the other thread's messages or the artifact.
    pub fn switch_mode(&mut self, mode: ChatMode) -> Result<(), WorkspaceError> {
        if self.is_busy() {
            return Err(WorkspaceError::Busy);
        }
        self.active_mode = mode;
        Ok(())
    }

    /// Returns the restored artifact, or `None` when already at the oldest version.
    pub fn undo(&mut self) -> Result<Option<&str>, WorkspaceError> {
        if self.is_busy() {
            return Err(WorkspaceError::Busy);
        }
        match self.history.undo() {
            Some(code) => {
                self.artifact = code.to_string();
                self.touch();
                Ok(Some(&self.artifact))
            }
            None => Ok(None),
        }
    }

    pub fn redo(&mut self) -> Result<Option<&str>, WorkspaceError> {
        if self.is_busy() {
            return Err(WorkspaceError::Busy);
        }
        match self.history.redo() {
            Some(code) => {
                self.artifact = code.to_string();
                self.touch();
                Ok(Some(&self.artifact))
            }
            None => Ok(None),
        }
    }

    pub fn edit_artifact(&mut self, code: impl Into<String>, tier: Tier) -> Result<(), WorkspaceError> {
        if !tier.is_exempt() {
            return Err(WorkspaceError::EditNotAllowed);
        }
        if self.is_busy() {
            return Err(WorkspaceError::Busy);
        }
        self.artifact = code.into();
        self.touch();
        Ok(())
    }

    /// True for a fresh creator-mode project that has not generated anything yet.
    pub fn needs_kickoff(&self) -> bool {
        self.config.chat_mode == ChatMode::Creator && self.threads.is_empty() && self.artifact.is_empty()
    }

    pub fn kickoff_prompt(&self) -> String {
        format!(
            "I want to build: {}. Language: {}",
            self.config.prompt, self.config.language
        )
    }

    /// The artifact with a branding footer inserted before `</body>` (or appended).
    /// Non-exempt tiers also get the affiliate disclosure line.
    pub fn export_html(&self, tier: Tier, brand: &str) -> String {
        if self.artifact.is_empty() {
            return String::new();
        }

        let mut footer_content = format!(
            "Built with AI by <strong style=\"color: #9333ea;\">{}</strong>",
            brand
        );
        if !tier.is_exempt() {
            footer_content.push_str(
                "<br/><span style=\"font-size: 10px; color: #999;\">This site contains sponsored content and affiliate links.</span>",
            );
        }
        let footer = format!(
            "<footer style=\"width: 100%; padding: 20px; text-align: center; background: #f8f9fa; color: #6c757d; font-family: sans-serif; font-size: 12px; border-top: 1px solid #e9ecef; margin-top: auto;\">{}</footer>",
            footer_content
        );

        if self.artifact.contains("</body>") {
            self.artifact.replacen("</body>", &format!("{}</body>", footer), 1)
        } else {
            format!("{}{}", self.artifact, footer)
        }
    }

    pub(crate) fn threads_mut(&mut self) -> &mut ConversationThreads {
        &mut self.threads
    }

    pub(crate) fn set_artifact(&mut self, code: String) {
        self.artifact = code;
    }

    /// Snapshots the current artifact before a creator-mode request.
    pub(crate) fn snapshot_artifact(&mut self) {
        self.history.push_version(&self.artifact);
    }

    pub(crate) fn touch(&mut self) {
        self.last_modified = Utc::now();
    }
}
