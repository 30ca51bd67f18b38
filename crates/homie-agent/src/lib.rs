pub mod anthropic;
pub mod backend;
pub mod dedupe;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod prompt;
pub mod tools;

pub use anthropic::AnthropicBackend;
pub use backend::{
    Backend, BackendError, BackendMessage, BackendRole, CompletionParams, CompletionResult,
    MessageRole, Usage,
};
pub use dedupe::DedupeCache;
pub use engine::{EngineDeliveryHandler, TurnEngine};
pub use error::{AgentError, Result};
pub use lifecycle::Lifecycle;
pub use prompt::{external_data_message, IdentityLoader, PromptBuilder, SessionInfo, SystemPrompt};
pub use tools::{contains_injection_pattern, select_tools, ToolDefinition, ToolTier};
