//! LLM 多后端统一调用库
//!
//! One client contract over OpenAI-compatible, Gemini, Ollama and custom HTTP backends:
//! pluggable auth/request/response strategies, framing-agnostic streaming and a stable
//! error taxonomy.

pub mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod handler;
pub mod http;
pub mod models;
pub mod registry;
pub mod retry;
pub mod stream;
pub mod strategy;
pub mod types;
pub mod validate;

pub use client::{DynClient, LLMClient, UnifiedClient};
pub use error::{ErrorKind, LLMError};
pub use factory::{ClientOptions, create_client, create_llm_client};
pub use handler::{CallbackHandler, StreamHandler};
pub use registry::ProviderRegistry;
pub use types::*;
