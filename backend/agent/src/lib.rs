//! EdgeChat conversation runtime
//!
//! Owns the conversation log, the remaining-context budget, the per-request
//! inference session, and the orchestrator that ties them together.

pub mod conversation_log;
pub mod inference_session;
pub mod orchestrator;
pub mod prompt;
pub mod session_state;
pub mod token_budget;

pub use conversation_log::ConversationLog;
pub use inference_session::{InferenceSession, SessionHandle};
pub use orchestrator::{GenerationTicket, OrchestratorConfig, SessionOrchestrator};
pub use prompt::PromptTemplate;
pub use session_state::SessionState;
pub use token_budget::TokenBudgetTracker;
