pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod extractor;
pub mod history;
pub mod ports;
pub mod quota;
pub mod request;
pub mod thread;
pub mod workspace;

pub use dispatch::{DeltaStream, DispatchError, Dispatcher, RetryPolicy, EMPTY_RESPONSE_FALLBACK};
pub use domain::{ChatMode, ConversationMessage, ProjectConfig, ProjectSession, QuotaState, Role, Tier};
pub use engine::{
    EventSender, GenerateInput, GenerationEngine, GenerationError, GenerationEvent, GenerationOutcome,
};
pub use extractor::{extract_artifact, strip_code_regions, ArtifactExtractor};
pub use history::VersionHistory;
pub use ports::{
    ModelTransport, PortError, PortResult, QuotaStore, SessionStore, TextStream, TransportError,
    TransportErrorKind,
};
pub use quota::{QuotaDecision, QuotaGovernor, DEFAULT_DAILY_REQUEST_LIMIT};
pub use request::{
    AttachmentError, AttachmentSource, ContentPart, GenerationRequest, PolicyFragment, RequestBuilder,
    RequestInput, SponsoredContentPolicy,
};
pub use thread::{ConversationThread, ConversationThreads};
pub use workspace::{QuickAction, Workspace, WorkspaceError};
