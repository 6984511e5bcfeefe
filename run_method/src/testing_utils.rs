use std::sync::Mutex;

use tvm_cell::{
    bits::BitString,
    boc::{to_boc, to_boc_multi_root, BocOptions},
    builder::Builder,
    cell::{Cell, CellHash, CellResult},
    dict::{load_label, serialize_aug_dict, serialize_dict, DictExtra},
    merkle_proof::create_proof,
};

use crate::{
    address::MASTERCHAIN_ID,
    block::BlockIdExt,
    tl::{LiteRequest, LiteResponse, RunMethodMode, RunMethodResult},
    tlb::{CurrencyCollection, DepthBalanceInfo},
    transport::{LiteTransport, QueryContext, TransportError},
};

const GLOBAL_ID: i32 = -239;
const FULL_SHARD: i64 = i64::MIN;

/// Index of `accounts` among the references of a shard state.
const STATE_ACCOUNTS_REF: u8 = 1;
/// Index of `custom` among the references of a shard state.
const STATE_CUSTOM_REF: u8 = 3;
/// Index of `state_update` among the references of a block.
const BLOCK_STATE_UPDATE_REF: u8 = 2;

pub(crate) fn common_setup() {
    // Try init since multiple tests calling `init` will cause an error.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl DictExtra for DepthBalanceInfo {
    fn fork(left: &Self, right: &Self) -> Self {
        DepthBalanceInfo {
            split_depth: 0,
            balance: CurrencyCollection {
                grams: left.balance.grams + right.balance.grams,
                other: None,
            },
        }
    }

    fn store(&self, b: &mut Builder) -> CellResult<()> {
        b.store_uint(self.split_depth as u64, 5)?
            .store_coins(self.balance.grams)?
            .store_maybe_ref(self.balance.other.clone())?;
        Ok(())
    }
}

/// A `bt_leaf$0` holding a `ShardDescr` with constructor `tag`.
pub(crate) fn shard_descr_cell(tag: u8, root_hash: CellHash) -> Cell {
    let mut b = Builder::new();
    b.store_bit(false)
        .unwrap()
        .store_uint(tag as u64, 4)
        .unwrap()
        .store_u32(100)
        .unwrap()
        .store_u32(99)
        .unwrap()
        .store_u64(1_000)
        .unwrap()
        .store_u64(1_010)
        .unwrap()
        .store_bytes(&root_hash)
        .unwrap()
        .store_bytes(&[0xf5; 32])
        .unwrap();

    b.build().unwrap()
}

/// Reference indexes leading from a dictionary root to the leaf of `key`.
fn dict_path(root: &Cell, key: &BitString) -> Vec<u8> {
    let mut path = Vec::new();
    let mut cell = root.clone();
    let mut pos = 0;

    loop {
        let mut s = cell.parse().unwrap();
        pos += load_label(&mut s, key.len() - pos).unwrap().len();
        if pos == key.len() {
            return path;
        }

        let branch = key.get(pos).unwrap() as u8;
        pos += 1;
        path.push(branch);
        cell = cell.refs()[branch as usize].clone();
    }
}

fn account_cell(id: &[u8; 32], balance: u128) -> Cell {
    let mut b = Builder::new();
    b.store_bytes(id).unwrap().store_coins(balance).unwrap();
    b.build().unwrap()
}

/// Builds a `ShardAccounts` cell holding `accounts`. Returns the cell and
/// the dictionary root.
fn accounts_cell(accounts: &[([u8; 32], u128)]) -> (Cell, Cell) {
    let entries = accounts
        .iter()
        .map(|(id, balance)| {
            let extra = DepthBalanceInfo {
                split_depth: 0,
                balance: CurrencyCollection {
                    grams: *balance,
                    other: None,
                },
            };

            let mut value = Builder::new();
            value
                .store_ref(account_cell(id, *balance))
                .unwrap()
                .store_bytes(&[0xee; 32])
                .unwrap()
                .store_u64(5_000)
                .unwrap();

            (BitString::from_bytes(id), extra, value)
        })
        .collect();

    let (root, extra) = serialize_aug_dict(entries, 256).unwrap().unwrap();

    let mut b = Builder::new();
    b.store_maybe_ref(Some(root.clone())).unwrap();
    extra.store(&mut b).unwrap();

    (b.build().unwrap(), root)
}

fn state_cell(workchain: i32, seqno: u32, accounts: Cell, custom: Option<Cell>) -> Cell {
    let mut b = Builder::new();
    b.store_u32(0x9023_afe2)
        .unwrap()
        .store_i32(GLOBAL_ID)
        .unwrap()
        // shard_ident$00, no prefix bits
        .store_uint(0, 2)
        .unwrap()
        .store_uint(0, 6)
        .unwrap()
        .store_i32(workchain)
        .unwrap()
        .store_u64(FULL_SHARD as u64)
        .unwrap()
        .store_u32(seqno)
        .unwrap()
        .store_u32(0)
        .unwrap()
        .store_u32(1_700_000_000)
        .unwrap()
        .store_u64(40_000_000)
        .unwrap()
        .store_u32(seqno.saturating_sub(1))
        .unwrap()
        .store_ref(Builder::new().store_u8(0x0a).unwrap().build().unwrap())
        .unwrap()
        .store_bit(false)
        .unwrap()
        .store_ref(accounts)
        .unwrap()
        .store_ref(Builder::new().store_u8(0x0b).unwrap().build().unwrap())
        .unwrap()
        .store_maybe_ref(custom)
        .unwrap();

    b.build().unwrap()
}

fn block_cell(seqno: u32, state: &Cell) -> Cell {
    let old_state = Builder::new().store_u32(seqno - 1).unwrap().build().unwrap();
    let info = Builder::new().store_u32(seqno).unwrap().build().unwrap();
    let value_flow = Builder::new().store_u32(0xb8e4_8dfb).unwrap().build().unwrap();
    let extra = Builder::new().store_u32(0x4a33_f6fd).unwrap().build().unwrap();

    let mut b = Builder::new();
    b.store_u32(0x11ef_55aa)
        .unwrap()
        .store_i32(GLOBAL_ID)
        .unwrap()
        .store_ref(info)
        .unwrap()
        .store_ref(value_flow)
        .unwrap()
        .store_ref(Cell::merkle_update(old_state, state.clone()).unwrap())
        .unwrap()
        .store_ref(extra)
        .unwrap();

    b.build().unwrap()
}

fn block_id(workchain: i32, seqno: u32, block: &Cell) -> BlockIdExt {
    BlockIdExt {
        workchain,
        shard: FULL_SHARD,
        seqno,
        root_hash: *block.hash(),
        file_hash: [0xf1; 32],
    }
}

/// A block of `workchain` whose state holds a target account and a couple of
/// neighbours.
#[derive(Debug)]
pub(crate) struct ShardFixture {
    pub(crate) block: Cell,
    pub(crate) block_id: BlockIdExt,
    pub(crate) state: Cell,
    pub(crate) account: Cell,
    pub(crate) balance: u128,
    account_id: [u8; 32],
    accounts_root: Cell,
}

impl ShardFixture {
    pub(crate) fn new(workchain: i32, account_id: [u8; 32]) -> Self {
        Self::with_custom(workchain, account_id, None)
    }

    fn with_custom(workchain: i32, account_id: [u8; 32], custom: Option<Cell>) -> Self {
        const SEQNO: u32 = 1_234;
        let balance = 2_500_000_000;

        let mut left = account_id;
        left[0] ^= 0x80;
        let mut right = account_id;
        right[31] ^= 0x01;

        let (accounts, accounts_root) =
            accounts_cell(&[(left, 10), (account_id, balance), (right, 20)]);
        let state = state_cell(workchain, SEQNO, accounts, custom);
        let block = block_cell(SEQNO, &state);

        Self {
            block_id: block_id(workchain, SEQNO, &block),
            block,
            state,
            account: account_cell(&account_id, balance),
            balance,
            account_id,
            accounts_root,
        }
    }

    fn block_proof(&self) -> Cell {
        create_proof(&self.block, &[&[BLOCK_STATE_UPDATE_REF]]).unwrap()
    }

    /// `[block proof, state proof]` down to the target account.
    pub(crate) fn account_proof(&self) -> Vec<Cell> {
        let mut path = vec![STATE_ACCOUNTS_REF, 0];
        path.extend(dict_path(
            &self.accounts_root,
            &BitString::from_bytes(&self.account_id),
        ));

        vec![
            self.block_proof(),
            create_proof(&self.state, &[&path]).unwrap(),
        ]
    }
}

/// A masterchain block listing two shard blocks of `workchain`.
#[derive(Debug)]
pub(crate) struct MasterFixture {
    pub(crate) chain: ShardFixture,
    pub(crate) block_id: BlockIdExt,
    shard_hashes: Cell,
    workchain: i32,
}

impl MasterFixture {
    pub(crate) fn new(workchain: i32, shards: [CellHash; 2]) -> Self {
        Self::with_account(workchain, shards, [0x42; 32])
    }

    fn with_account(workchain: i32, shards: [CellHash; 2], account_id: [u8; 32]) -> Self {
        let mut bin_tree = Builder::new();
        bin_tree
            .store_bit(true)
            .unwrap()
            .store_ref(shard_descr_cell(0xa, shards[0]))
            .unwrap()
            .store_ref(shard_descr_cell(0xb, shards[1]))
            .unwrap();

        let mut value = Builder::new();
        value.store_ref(bin_tree.build().unwrap()).unwrap();

        let key = BitString::from_bytes(&workchain.to_be_bytes());
        let shard_hashes = serialize_dict(vec![(key, value)], 32).unwrap().unwrap();

        let mut extra = Builder::new();
        extra
            .store_u16(0xcc26)
            .unwrap()
            .store_maybe_ref(Some(shard_hashes.clone()))
            .unwrap();

        let chain =
            ShardFixture::with_custom(MASTERCHAIN_ID, account_id, Some(extra.build().unwrap()));

        Self {
            block_id: chain.block_id,
            chain,
            shard_hashes,
            workchain,
        }
    }

    /// `[block proof, state proof]` down to both shard descriptions.
    pub(crate) fn shard_proof(&self) -> Vec<Cell> {
        let key = BitString::from_bytes(&self.workchain.to_be_bytes());

        let mut to_tree = vec![STATE_CUSTOM_REF, 0];
        to_tree.extend(dict_path(&self.shard_hashes, &key));
        to_tree.push(0);

        let left = [to_tree.as_slice(), &[0]].concat();
        let right = [to_tree.as_slice(), &[1]].concat();

        vec![
            self.chain.block_proof(),
            create_proof(&self.chain.state, &[&left, &right]).unwrap(),
        ]
    }
}

/// Everything a lite server returns for a verified get-method call.
#[derive(Debug)]
pub(crate) struct AccountProofFixture {
    pub(crate) block_id: BlockIdExt,
    pub(crate) shard_block: Option<BlockIdExt>,
    pub(crate) shard_hash: Option<CellHash>,
    pub(crate) proof: Vec<Cell>,
    pub(crate) shard_proof: Vec<Cell>,
    pub(crate) account: Cell,
    pub(crate) balance: u128,
}

impl AccountProofFixture {
    pub(crate) fn masterchain(account_id: [u8; 32]) -> Self {
        let master = MasterFixture::with_account(0, [[0x01; 32], [0x02; 32]], account_id);

        Self {
            block_id: master.block_id,
            shard_block: None,
            shard_hash: None,
            proof: master.chain.account_proof(),
            shard_proof: Vec::new(),
            account: master.chain.account.clone(),
            balance: master.chain.balance,
        }
    }

    pub(crate) fn shard(workchain: i32, account_id: [u8; 32]) -> Self {
        let shard = ShardFixture::new(workchain, account_id);
        let master = MasterFixture::new(workchain, [[0x01; 32], *shard.block.hash()]);

        Self {
            block_id: master.block_id,
            shard_block: Some(shard.block_id),
            shard_hash: Some(*shard.block.hash()),
            proof: shard.account_proof(),
            shard_proof: master.shard_proof(),
            account: shard.account,
            balance: shard.balance,
        }
    }

    /// A full `runMethodResult` with `result` as the stack.
    pub(crate) fn run_method_result(&self, exit_code: i32, result: Vec<u8>) -> RunMethodResult {
        let shard_proof = match self.shard_proof.is_empty() {
            true => None,
            false => Some(to_boc_multi_root(&self.shard_proof, BocOptions::default())),
        };

        RunMethodResult {
            mode: RunMethodMode::RESULT | RunMethodMode::STATE_PROOF | RunMethodMode::SHARD_PROOF,
            id: self.block_id,
            shard_block: self.shard_block,
            shard_proof,
            proof: Some(to_boc_multi_root(&self.proof, BocOptions::default())),
            state_proof: Some(to_boc(&create_proof(&self.account, &[]).unwrap())),
            exit_code,
            result: Some(result),
            ..Default::default()
        }
    }
}

/// Answers every query with the same response.
#[derive(Debug)]
pub(crate) struct StaticTransport(Result<LiteResponse, TransportError>);

impl StaticTransport {
    pub(crate) fn new(response: Result<LiteResponse, TransportError>) -> Self {
        Self(response)
    }

    pub(crate) fn ok(res: RunMethodResult) -> Self {
        Self::new(Ok(LiteResponse::RunMethodResult(res)))
    }
}

impl LiteTransport for StaticTransport {
    async fn query(
        &self,
        _ctx: &QueryContext,
        _req: LiteRequest,
    ) -> Result<LiteResponse, TransportError> {
        self.0.clone()
    }
}

/// Keeps every request it is sent.
#[derive(Debug)]
pub(crate) struct RecordingTransport {
    response: LiteResponse,
    requests: Mutex<Vec<LiteRequest>>,
}

impl RecordingTransport {
    pub(crate) fn new(response: LiteResponse) -> Self {
        Self {
            response,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<LiteRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl LiteTransport for RecordingTransport {
    async fn query(
        &self,
        _ctx: &QueryContext,
        req: LiteRequest,
    ) -> Result<LiteResponse, TransportError> {
        self.requests.lock().unwrap().push(req);
        Ok(self.response.clone())
    }
}

/// Never answers.
#[derive(Debug)]
pub(crate) struct PendingTransport;

impl LiteTransport for PendingTransport {
    async fn query(
        &self,
        _ctx: &QueryContext,
        _req: LiteRequest,
    ) -> Result<LiteResponse, TransportError> {
        std::future::pending().await
    }
}

