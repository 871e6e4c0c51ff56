pub mod anthropic;
pub mod base;
pub mod configs;
pub mod factory;
pub mod google;
pub mod mock;
pub mod openai;
pub mod sse;
pub mod utils;

pub use base::{CompletionRequest, EventStream, Provider, ProviderName, Translated};
pub use factory::ProviderRegistry;
