//! # Snippet Sandbox
//!
//! Run short, untrusted Python snippets with JSON inputs and get a JSON
//! result back.
//!
//! Snippets are executed by an embedded interpreter for a Python subset
//! ([`interp`]) in a namespace that holds only an allow-list of builtins
//! and numeric modules. Isolation comes from several layers:
//!
//! - **Process ceilings**: `RLIMIT_CPU` and `RLIMIT_AS`, installed once
//!   ([`sandbox::limits`])
//! - **Wall-clock deadline**: checked cooperatively by the interpreter on
//!   every call ([`sandbox::deadline`])
//! - **Namespace allow-list**: no imports, no file or network primitives
//! - **Interpreter guards**: recursion, collection, string and integer size
//!   caps, plus bounded output capture
//!
//! ## Example
//!
//! ```rust,no_run
//! use snippet_sandbox::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SandboxConfig::builder()
//!         .timeout(Duration::from_secs(5))
//!         .build();
//!
//!     let sandbox = PythonSandbox::new(config)?;
//!     let outcome = sandbox
//!         .run(ExecutionRequest::new("result = n * 2").input("n", 21))
//!         .await;
//!
//!     assert_eq!(outcome.result(), Some(&serde_json::json!(42)));
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod interp;
pub mod logging;
pub mod prelude;
pub mod sandbox;
#[cfg(feature = "server")]
pub mod server;

// Re-export main types at crate root for convenience
pub use error::{Result, SandboxError};
pub use sandbox::config::{SandboxConfig, SandboxConfigBuilder};
pub use sandbox::deadline::DeadlineScope;
pub use sandbox::executor::PythonSandbox;
pub use sandbox::limits::{install_limits, installed_limits, ResourceLimits};
pub use sandbox::outcome::{ExecutionOutcome, ExecutionRequest};
