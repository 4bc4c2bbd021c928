pub mod openai;
pub mod traits;

pub use openai::OpenAi;
pub use traits::{ChatModel, Message, MessageRole};
