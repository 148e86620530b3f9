//! # Companion LLM client
//!
//! A small async abstraction over text-completion backends, used by the
//! companion memory service for sentiment scoring, chunk summaries and
//! questionnaire digests.
//!
//! ## Features
//!
//! - **One trait**: [`LlmClient`] with `generate` and chat-style `invoke`
//! - **HTTP backend**: [`OpenAiCompatibleClient`] (feature `http`, on by default)
//! - **Scripted backend**: [`ScriptedLlmClient`] for tests and offline runs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use companion_llm::{GenerateOptions, HttpClientConfig, LlmClient, OpenAiCompatibleClient, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = OpenAiCompatibleClient::new(HttpClientConfig::default())?;
//!     let text = client.generate("Say hi", GenerateOptions::new(0.1, 10)).await?;
//!     println!("{text}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod client;
mod errors;
#[cfg(feature = "http")]
mod http;
mod mock;

pub use client::{ChatResponse, GenerateOptions, LlmClient, ModelInfo};
pub use errors::{LlmError, Result};
#[cfg(feature = "http")]
pub use http::{HttpClientConfig, OpenAiCompatibleClient};
pub use mock::{RecordedCall, ScriptedLlmClient};
