//! # Portico Client
//!
//! Outbound side of the gateway: the [`CallHelper`] that brackets every
//! downstream call with `client.*` metrics, a client span and a finish
//! log line, and [`run_with_retries`], which applies the context's
//! timeout and retry policy.
//!
//! Transports are out of scope here. A transport builds a [`CallHelper`]
//! per call and runs its send inside [`run_with_retries`]:
//!
//! ```rust,ignore
//! let result = run_with_retries(&ctx, options.retry_options(), |ctx, _| async move {
//!     let (ctx, mut call) = CallHelper::new(&ctx, "Users::get", &options);
//!     let ctx = call.start(&ctx);
//!     let result = transport.send(&ctx, &request).await;
//!     call.finish(&ctx, result.as_ref().err().map(|e| e.as_ref() as _));
//!     result
//! })
//! .await;
//! ```

#![doc(html_root_url = "https://docs.rs/portico-client/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod call;
mod error;
mod retry;
mod status;

pub use call::{CallHelper, ClientOptions, FAILED_MESSAGE, FINISHED_MESSAGE};
pub use error::{ClientError, ClientResult};
pub use retry::{is_retryable, run_with_retries};
pub use status::{RpcCode, RpcStatus};
