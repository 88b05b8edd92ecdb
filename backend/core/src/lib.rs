pub mod error;
pub mod event;
pub mod message;
pub mod traits;
pub mod types;

pub use error::ChatError;
pub use event::{GenerationOutcome, SessionEvent, Visibility};
pub use message::{Author, Message, MessageId};
pub use traits::{Chunk, InferenceEngine};
pub use types::{Backend, ModelSpec, PromptStyle, Sampling, SilentReplyPolicy};
