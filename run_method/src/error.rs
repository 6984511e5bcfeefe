//! The error type of a get-method call.

use thiserror::Error;
use tvm_cell::boc::BocError;

use crate::{
    proof::ProofError,
    result::ResultError,
    stack::{StackDecodeError, StackEncodeError},
    tl::LiteServerError,
    transport::TransportError,
};

/// Everything that can make [`ApiClient::run_get_method`] fail.
///
/// [`ApiClient::run_get_method`]: crate::client::ApiClient::run_get_method
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum RunMethodError {
    /// The query did not complete.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The lite server answered with an error.
    #[error(transparent)]
    Remote(#[from] LiteServerError),

    /// The method ran but exited with a code other than 0 or 1.
    #[error("Contract exit code: {0}")]
    ContractExec(i32),

    /// The proofs returned with the result do not check out.
    #[error("Incorrect proof: {0}")]
    Proof(#[from] ProofError),

    /// The result stack could not be decoded.
    #[error("Failed to decode result stack: {0}")]
    Decode(#[from] StackDecodeError),

    /// The arguments could not be encoded.
    #[error("Failed to encode method arguments: {0}")]
    Encode(#[from] StackEncodeError),

    /// A bag of cells in the response is malformed.
    #[error("Failed to parse bag of cells: {0}")]
    Boc(#[from] BocError),

    /// Reading a result value failed.
    #[error(transparent)]
    Result(#[from] ResultError),

    /// The server answered with something other than a method result.
    #[error("Unexpected response from lite server: {0}")]
    UnexpectedResponse(String),
}
