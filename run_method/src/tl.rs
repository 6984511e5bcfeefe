//! Typed lite server requests and responses.
//!
//! These mirror `liteServer.runSmcMethod` and `liteServer.runMethodResult`.
//! Framing them on the wire is the transport's job.

use std::fmt;

use thiserror::Error;

use crate::block::{AccountId, BlockIdExt};

bitflags::bitflags! {
    /// Which optional parts a `runSmcMethod` call asks for (and a
    /// `runMethodResult` carries).
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct RunMethodMode: u32 {
        /// Shard proof plus the account state proof.
        const SHARD_PROOF = 1 << 0;
        /// Proof of the account cell.
        const STATE_PROOF = 1 << 1;
        /// The result stack.
        const RESULT = 1 << 2;
        /// The `c7` register the method ran with.
        const INIT_C7 = 1 << 3;
        /// Extra libraries used by the method.
        const LIB_EXTRAS = 1 << 4;
    }
}

/// `liteServer.runSmcMethod`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunSmcMethod {
    /// Requested parts.
    pub mode: RunMethodMode,
    /// Block whose state the method runs against.
    pub id: BlockIdExt,
    /// Contract to run.
    pub account: AccountId,
    /// See [`method_name_hash`](crate::method_id::method_name_hash).
    pub method_id: u64,
    /// The argument stack as a single-root bag of cells.
    pub params: Vec<u8>,
}

/// `liteServer.runMethodResult`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunMethodResult {
    /// Parts present in this result.
    pub mode: RunMethodMode,
    /// The block the method ran against.
    pub id: BlockIdExt,
    /// The shard block holding the account.
    pub shard_block: Option<BlockIdExt>,
    /// Proof that `shard_block` is part of `id`.
    pub shard_proof: Option<Vec<u8>>,
    /// Proof of the account in the state of its block.
    pub proof: Option<Vec<u8>>,
    /// Proof of the account cell itself.
    pub state_proof: Option<Vec<u8>>,
    /// The `c7` register.
    pub init_c7: Option<Vec<u8>>,
    /// Extra libraries.
    pub lib_extras: Option<Vec<u8>>,
    /// TVM exit code.
    pub exit_code: i32,
    /// The result stack as a bag of cells.
    pub result: Option<Vec<u8>>,
}

/// `liteServer.error`: the server refused or failed to serve a request.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("Lite server error {code}: {message}")]
pub struct LiteServerError {
    /// Error code.
    pub code: i32,
    /// Human readable description.
    pub message: String,
}

/// Requests this crate sends.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LiteRequest {
    /// Run a get-method.
    RunSmcMethod(RunSmcMethod),
}

/// Responses a transport can hand back.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LiteResponse {
    /// The result of a get-method run.
    RunMethodResult(RunMethodResult),
    /// An error reported by the server.
    Error(LiteServerError),
    /// Any other response, named by its TL constructor.
    Other(String),
}

impl fmt::Display for LiteResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteResponse::RunMethodResult(_) => write!(f, "liteServer.runMethodResult"),
            LiteResponse::Error(_) => write!(f, "liteServer.error"),
            LiteResponse::Other(name) => write!(f, "{}", name),
        }
    }
}
