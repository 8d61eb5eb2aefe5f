//! External service clients.

pub mod openai;

pub use openai::OpenAiClient;
