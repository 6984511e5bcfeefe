//! Running get-methods of TON smart contracts through a lite server.
//!
//! A get-method is a read-only contract method. The lite server runs it
//! against the state of a given block and returns the resulting TVM stack.
//! Since the server is not trusted, the response also carries proofs that
//! the contract state it ran on belongs to that block. [`ApiClient`] asks
//! for those proofs, checks them and only then hands the result back.
//!
//! ```ignore
//! let client = ApiClient::new(transport);
//! let res = client
//!     .run_get_method(&QueryContext::new(), &block, &addr, "seqno", &[])
//!     .await?;
//! let seqno = res.int(0)?;
//! ```
//!
//! The pieces can also be used on their own:
//! - [`stack`] encodes and decodes the TVM stack;
//! - [`proof`] checks account proofs against a trusted block;
//! - [`result`] gives typed access to returned values.
//!
//! [`ApiClient`]: client::ApiClient

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]

pub mod address;
pub mod block;
pub mod client;
pub mod config;
pub mod error;
pub mod method_id;
pub mod proof;
pub mod result;
pub mod stack;
pub mod tl;
pub mod tlb;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing_utils;

pub use client::{ApiClient, ProofCheckPolicy};
pub use error::RunMethodError;
pub use result::{ExecutionResult, MustAccess, ResultAccess};
pub use stack::StackValue;
pub use transport::{LiteTransport, QueryContext};
