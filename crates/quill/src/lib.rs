pub mod accumulator;
pub mod conversation;
pub mod credentials;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod protocol;
pub mod providers;
pub mod tools;
