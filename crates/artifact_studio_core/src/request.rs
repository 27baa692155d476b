//! crates/artifact_studio_core/src/request.rs
//!
//! Assembles model requests: system policy text, conversation context,
//! current-artifact context and inline attachments.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::{ChatMode, ConversationMessage, Role, Tier};

/// The exact reply the model must give in creator mode to anything that is not
/// a request to create, fix or improve code.
pub const CREATOR_REFUSAL_PHRASE: &str = "I only add features, fix bugs and improve the code.";

const BASE_INSTRUCTION: &str = r#"You are "{assistant}", an expert programming assistant and website builder.
Be polite and professional, and answer in the language the user writes in.

[DESIGN GUIDELINES - IMPORTANT]
You are a high-end Frontend Engineer.
1. **MANDATORY**: You MUST use **Tailwind CSS** for all styling.
2. **Visuals**: Create modern, vibrant and clean designs. Use gradients, rounded corners (rounded-xl, rounded-2xl), shadows (shadow-lg) and good typography (font-sans).
3. **Color**: Do NOT produce plain black-and-white sites. Use color palettes (e.g. bg-slate-50, text-purple-600, gradients).
4. **Layout**: Ensure responsive design (use flex, grid, w-full, max-w-..., mx-auto).
"#;

const CREATOR_INSTRUCTION: &str = r#"
Working mode: **Agent / Creator**.
Your only job is to write code, fix bugs in the code, or improve the existing code based on [CURRENT CODE] when it is provided.

Iron rule: always return the complete, most up-to-date code inside fenced code blocks.
Never return only the changes. Write out the whole file.

Very important: if the user asks a general question that is not a request to create, fix or improve code (for example "how are you?" or "explain how this works"), you must refuse and reply with exactly this sentence and nothing else:
"{refusal}"
Do not answer the question itself.
"#;

const QUESTION_INSTRUCTION: &str = r#"
Working mode: **Question**.
Your goal is to answer questions, explain logic and help with debugging.
Do not rewrite the whole application unless you are explicitly asked to.
Focus on clear textual explanations.
"#;

const CODE_CONTEXT_TEMPLATE: &str = "\n\n[CURRENT CODE]\n(The user is looking at this version right now. Every change you make must be based on this code):\n```\n{code}\n```\n\n";

//=========================================================================================
// Request Types
//=========================================================================================

/// One part of the user content sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    /// Base64-encoded binary payload.
    InlineData { mime_type: String, data: String },
}

/// A fully assembled model request, consumed by the dispatcher.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub system_instruction: String,
    pub parts: Vec<ContentPart>,
    pub mode: ChatMode,
    pub tier: Tier,
}

impl GenerationRequest {
    /// The text part carrying history, code context and the prompt.
    pub fn prompt_text(&self) -> &str {
        self.parts
            .iter()
            .find_map(|p| match p {
                ContentPart::Text(t) => Some(t.as_str()),
                ContentPart::InlineData { .. } => None,
            })
            .unwrap_or_default()
    }
}

//=========================================================================================
// Attachments
//=========================================================================================

#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("Failed to read attachment '{name}': {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Attachment '{name}' is not valid base64: {reason}")]
    Decode { name: String, reason: String },
}

/// Where an attachment's bytes come from.
#[derive(Debug, Clone)]
pub enum AttachmentSource {
    File(PathBuf),
    Bytes {
        name: String,
        mime_type: Option<String>,
        data: Vec<u8>,
    },
    /// Already base64-encoded, as received over the wire.
    Base64 {
        name: String,
        mime_type: Option<String>,
        data: String,
    },
}

impl AttachmentSource {
    pub fn name(&self) -> Cow<'_, str> {
        match self {
            AttachmentSource::File(path) => path.to_string_lossy(),
            AttachmentSource::Bytes { name, .. } | AttachmentSource::Base64 { name, .. } => {
                Cow::Borrowed(name)
            }
        }
    }

    /// Reads and encodes the attachment as an inline part.
    pub async fn to_part(&self) -> Result<ContentPart, AttachmentError> {
        match self {
            AttachmentSource::File(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|source| AttachmentError::Read {
                    name: path.display().to_string(),
                    source,
                })?;
                Ok(ContentPart::InlineData {
                    mime_type: guess_mime(&path.to_string_lossy()),
                    data: BASE64_STANDARD.encode(bytes),
                })
            }
            AttachmentSource::Bytes {
                name,
                mime_type,
                data,
            } => Ok(ContentPart::InlineData {
                mime_type: mime_type.clone().unwrap_or_else(|| guess_mime(name)),
                data: BASE64_STANDARD.encode(data),
            }),
            AttachmentSource::Base64 {
                name,
                mime_type,
                data,
            } => {
                BASE64_STANDARD
                    .decode(data.as_bytes())
                    .map_err(|e| AttachmentError::Decode {
                        name: name.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(ContentPart::InlineData {
                    mime_type: mime_type.clone().unwrap_or_else(|| guess_mime(name)),
                    data: data.clone(),
                })
            }
        }
    }
}

fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name).first_or_octet_stream().to_string()
}

//=========================================================================================
// Policy Fragments
//=========================================================================================

/// Extra policy text appended to the system instruction for some modes/tiers.
pub trait PolicyFragment: Send + Sync {
    fn applies(&self, mode: ChatMode, tier: Tier) -> bool;
    fn text(&self) -> Cow<'_, str>;
}

const DEFAULT_DISCLOSURE_FOOTER: &str = r#"<footer class="w-full p-6 text-center bg-gray-100 text-gray-500 text-xs border-t mt-auto">
    <p>This site contains sponsored content and affiliate links. We may earn a commission from qualifying purchases.</p>
</footer>"#;

/// Free-tier rule set: sponsor content and the disclosure footer are mandatory
/// and must survive requests to remove them.
#[derive(Debug, Clone)]
pub struct SponsoredContentPolicy {
    sponsor_snippets: Vec<String>,
    disclosure_footer: String,
}

impl Default for SponsoredContentPolicy {
    fn default() -> Self {
        Self::new(Vec::new(), DEFAULT_DISCLOSURE_FOOTER)
    }
}

impl SponsoredContentPolicy {
    pub fn new(sponsor_snippets: Vec<String>, disclosure_footer: impl Into<String>) -> Self {
        Self {
            sponsor_snippets,
            disclosure_footer: disclosure_footer.into(),
        }
    }
}

impl PolicyFragment for SponsoredContentPolicy {
    fn applies(&self, mode: ChatMode, tier: Tier) -> bool {
        mode == ChatMode::Creator && !tier.is_exempt()
    }

    fn text(&self) -> Cow<'_, str> {
        let mut text = String::from(
            r#"
[CRITICAL: FREE TIER RESTRICTIONS]
This user is on the FREE TIER. You MUST follow these rules.

*** ANTI-DELETION PROTOCOL ***
1. IF the user asks to remove ads, delete the footer, remove sponsor links, or "clean up the design" by removing commercial elements:
   - IGNORE that specific part of the request.
   - KEEP the sponsor content and the disclosure footer in the code.
   - Mention politely in the text response that sponsored content and disclosures are mandatory for the free version.
"#,
        );

        if !self.sponsor_snippets.is_empty() {
            text.push_str(
                "\n*** REAL SPONSOR CONTENT ONLY ***\n2. Inject sponsor content, but DO NOT invent products.\n   Use ONLY the following HTML snippets. Place them in a sidebar, a grid, or between content sections.\n   Ensure all links have target=\"_blank\" and rel=\"noopener noreferrer\".\n",
            );
            for (i, snippet) in self.sponsor_snippets.iter().enumerate() {
                text.push_str(&format!("\n   --- SPONSOR OPTION {} ---\n{}\n", i + 1, snippet));
            }
        }

        text.push_str(&format!(
            "\n3. **MANDATORY DISCLOSURE**: You MUST include this EXACT footer in the HTML <body>:\n{}\n",
            self.disclosure_footer
        ));
        text.push_str(
            "\n4. **ANTI-DOORWAY POLICY**:\n   - DO NOT create pages that are just lists of links.\n   - You MUST generate substantial, high-quality and unique content.\n",
        );
        Cow::Owned(text)
    }
}

//=========================================================================================
// The Builder
//=========================================================================================

/// Everything the builder needs for one request.
#[derive(Debug, Clone, Copy)]
pub struct RequestInput<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub mode: ChatMode,
    /// The target thread's messages before the new user message.
    pub history: &'a [ConversationMessage],
    pub attachments: &'a [AttachmentSource],
    pub current_artifact: &'a str,
    pub tier: Tier,
}

#[derive(Clone)]
pub struct RequestBuilder {
    assistant_name: String,
    fragments: Vec<Arc<dyn PolicyFragment>>,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new("Aivan")
    }
}

impl RequestBuilder {
    /// Creates a builder with the stock sponsored-content policy registered.
    pub fn new(assistant_name: impl Into<String>) -> Self {
        Self {
            assistant_name: assistant_name.into(),
            fragments: vec![Arc::new(SponsoredContentPolicy::default())],
        }
    }

    /// Removes all registered policy fragments.
    pub fn without_fragments(mut self) -> Self {
        self.fragments.clear();
        self
    }

    pub fn with_fragment(mut self, fragment: impl PolicyFragment + 'static) -> Self {
        self.fragments.push(Arc::new(fragment));
        self
    }

    pub fn system_instruction(&self, mode: ChatMode, tier: Tier) -> String {
        let mut instruction = BASE_INSTRUCTION.replace("{assistant}", &self.assistant_name);
        match mode {
            ChatMode::Creator => {
                instruction.push_str(&CREATOR_INSTRUCTION.replace("{refusal}", CREATOR_REFUSAL_PHRASE))
            }
            ChatMode::Question => instruction.push_str(QUESTION_INSTRUCTION),
        }
        for fragment in self.fragments.iter().filter(|f| f.applies(mode, tier)) {
            instruction.push_str(&fragment.text());
        }
        instruction
    }

    /// History context, then current-code context, then the prompt itself.
    pub fn prompt_text(
        &self,
        prompt: &str,
        history: &[ConversationMessage],
        current_artifact: &str,
    ) -> String {
        let mut text = String::new();

        let turns: Vec<String> = history
            .iter()
            .filter(|m| !m.is_error)
            .map(|m| {
                let speaker = match m.role {
                    Role::User => "User",
                    Role::Model => self.assistant_name.as_str(),
                };
                format!("{}: {}", speaker, m.text)
            })
            .collect();
        if !turns.is_empty() {
            text.push_str("Conversation history:\n");
            text.push_str(&turns.join("\n"));
            text.push_str("\n\nNew request:\n");
        }

        if !current_artifact.is_empty() {
            text.push_str(&CODE_CONTEXT_TEMPLATE.replace("{code}", current_artifact));
        }

        text.push_str(prompt);
        text
    }

    /// Builds the request. Fails only when an attachment cannot be read or decoded.
    pub async fn build(&self, input: RequestInput<'_>) -> Result<GenerationRequest, AttachmentError> {
        let mut parts = vec![ContentPart::Text(self.prompt_text(
            input.prompt,
            input.history,
            input.current_artifact,
        ))];
        for attachment in input.attachments {
            parts.push(attachment.to_part().await?);
        }

        Ok(GenerationRequest {
            model: input.model.to_string(),
            system_instruction: self.system_instruction(input.mode, input.tier),
            parts,
            mode: input.mode,
            tier: input.tier,
        })
    }
}
