//! Model backends for Stockwise.
//!
//! All providers implement the `stockwise_core::Provider` trait. The factory
//! builds them from configuration and wraps them in the retry policy.

pub mod factory;
#[cfg(feature = "local")]
pub mod local;
pub mod openai_compat;
pub mod retry;
pub mod stop;

pub use factory::{Backend, build_backend, build_reasoning_backend, build_summary_backend};
#[cfg(feature = "local")]
pub use local::LocalProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use retry::{RetryPolicy, RetryingProvider};
