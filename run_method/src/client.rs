//! Running get-methods on a lite server.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};
use tvm_cell::boc::{from_boc, from_boc_multi_root, to_boc};

use crate::{
    address::Address,
    block::BlockIdExt,
    config::ClientConfig,
    error::RunMethodError,
    method_id::method_name_hash,
    proof::{check_account_state_proof, check_state_proof, ProofError},
    result::{ExecutionResult, VerifiedAccount},
    stack::{self, StackValue},
    tl::{LiteRequest, LiteResponse, RunMethodMode, RunMethodResult, RunSmcMethod},
    transport::{LiteTransport, QueryContext, TransportError},
};

/// How much of a lite server response is checked before it is trusted.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofCheckPolicy {
    /// Nothing is checked and no proofs are requested.
    Unsafe,
    /// The account proof chain is checked against the given block.
    #[default]
    Fast,
    /// Same checks as [`ProofCheckPolicy::Fast`].
    Secure,
}

/// Runs get-methods through a [`LiteTransport`].
#[derive(Clone, Debug)]
pub struct ApiClient<T> {
    transport: T,
    policy: ProofCheckPolicy,
    default_timeout: Option<Duration>,
}

impl<T: LiteTransport> ApiClient<T> {
    /// A client with the default [`ProofCheckPolicy`] and no timeout.
    pub fn new(transport: T) -> Self {
        Self::from_config(transport, &ClientConfig::default())
    }

    /// A client configured by `config`.
    pub fn from_config(transport: T, config: &ClientConfig) -> Self {
        Self {
            transport,
            policy: config.policy,
            default_timeout: config.timeout(),
        }
    }

    /// Replaces the proof check policy.
    pub fn with_policy(mut self, policy: ProofCheckPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The proof check policy in use.
    pub fn policy(&self) -> ProofCheckPolicy {
        self.policy
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Runs `method` of `addr` on the state of `block` with `args`, the
    /// first argument ending up on top of the stack.
    ///
    /// Unless the policy is [`ProofCheckPolicy::Unsafe`], the account state
    /// the method ran on is checked against `block` before the result is
    /// decoded.
    pub async fn run_get_method(
        &self,
        ctx: &QueryContext,
        block: &BlockIdExt,
        addr: &Address,
        method: &str,
        args: &[StackValue],
    ) -> Result<ExecutionResult, RunMethodError> {
        let params = to_boc(&stack::encode(args)?);

        let mut mode = RunMethodMode::RESULT;
        if self.policy != ProofCheckPolicy::Unsafe {
            mode |= RunMethodMode::STATE_PROOF | RunMethodMode::SHARD_PROOF;
        }

        let method_id = method_name_hash(method);
        debug!(
            "Running {}({} args, id {}) of {} on block {}",
            method,
            args.len(),
            method_id,
            addr,
            block
        );

        let req = LiteRequest::RunSmcMethod(RunSmcMethod {
            mode,
            id: *block,
            account: addr.into(),
            method_id,
            params,
        });

        match self.query(ctx, req).await? {
            LiteResponse::RunMethodResult(res) => self.process_result(block, addr, method, res),
            LiteResponse::Error(e) => Err(e.into()),
            other => Err(RunMethodError::UnexpectedResponse(other.to_string())),
        }
    }

    /// Performs the query, giving up as soon as `ctx` is canceled or its
    /// deadline (or the default timeout) passes.
    async fn query(
        &self,
        ctx: &QueryContext,
        req: LiteRequest,
    ) -> Result<LiteResponse, TransportError> {
        let deadline = ctx
            .get_deadline()
            .or_else(|| self.default_timeout.map(|t| Instant::now() + t));

        let expired = async {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;

            _ = ctx.token().cancelled() => Err(TransportError::Canceled),
            _ = expired => Err(TransportError::Timeout),
            res = self.transport.query(ctx, req) => res,
        }
    }

    fn process_result(
        &self,
        block: &BlockIdExt,
        addr: &Address,
        method: &str,
        res: RunMethodResult,
    ) -> Result<ExecutionResult, RunMethodError> {
        if res.exit_code != 0 && res.exit_code != 1 {
            warn!("{} of {} exited with code {}", method, addr, res.exit_code);
            return Err(RunMethodError::ContractExec(res.exit_code));
        }

        let account = match self.policy {
            ProofCheckPolicy::Unsafe => None,
            ProofCheckPolicy::Fast | ProofCheckPolicy::Secure => {
                Some(verify_account(block, addr, &res)?)
            }
        };

        let result = from_boc(res.result.as_deref().unwrap_or_default())?;
        let values = stack::decode(&result)?;
        debug!("{} of {} returned {} values", method, addr, values.len());

        Ok(match account {
            Some(account) => ExecutionResult::verified(values, account),
            None => ExecutionResult::new(values),
        })
    }
}

/// Checks the proofs in `res` against `block` and returns the account they
/// show.
fn verify_account(
    block: &BlockIdExt,
    addr: &Address,
    res: &RunMethodResult,
) -> Result<VerifiedAccount, ProofError> {
    let proof = from_boc_multi_root(res.proof.as_deref().unwrap_or_default())?;

    let mut shard_proof = Vec::new();
    let mut shard_hash = None;
    if !addr.is_masterchain() {
        let bytes = res.shard_proof.as_deref().unwrap_or_default();
        if bytes.is_empty() {
            return Err(ProofError::NoShardProof);
        }
        shard_proof = from_boc_multi_root(bytes)?;

        let shard_block = res.shard_block.as_ref().ok_or(ProofError::ShardBlockNotPassed)?;
        shard_hash = Some(shard_block.root_hash);
    }

    let (shard_account, balance) = check_account_state_proof(
        addr,
        block,
        &proof,
        &shard_proof,
        shard_hash.as_ref(),
        false,
    )?;

    let state_proof = from_boc(res.state_proof.as_deref().unwrap_or_default())?;
    check_state_proof(&state_proof, shard_account.account.hash())?;

    Ok(VerifiedAccount {
        shard_account,
        balance,
    })
}
