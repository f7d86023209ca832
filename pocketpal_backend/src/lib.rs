pub mod assembler;
pub mod config;
pub mod contact;
pub mod events;
pub mod http_client;
pub mod llm_client;
pub mod message;
pub mod models;
pub mod prompt;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod sse;
pub mod store;
pub mod transcribe;
pub mod turn;
pub mod weather;

#[cfg(test)]
pub(crate) mod test_support;
