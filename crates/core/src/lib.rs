pub mod models;
pub mod persona;
pub mod prompt;
pub mod session;

pub use models::*;
pub use prompt::{accumulate, build_prompt, normalize_text, CONTEXT_BEGIN, CONTEXT_END};
pub use session::ConversationSession;
