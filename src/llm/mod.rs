pub mod openai;
mod retrying;
pub mod tools;
mod traits;

pub use openai::OpenAiCompatibleClient;
pub use retrying::RetryingLlm;
pub use tools::{tools_for_role, Tool, ToolRegistry};
pub use traits::{ChatMessage, LlmGateway, LlmResponse, ModelTier, Role, ToolCall, ToolSpec};
