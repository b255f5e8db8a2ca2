//! Synthetic token ledger used to exercise the block executor

use bach_core::{
    Address, BlockRoots, ConflictFootprint, ConflictKey, ContractCall, ParallelPolicy, Selector,
    StateCommitter, TransactionExecutor, TxId, WORD_SIZE,
};
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Token contract address
pub const TOKEN: Address = Address::new([0x7b; 20]);

/// Registered parallel function: `from` and `to` are critical
pub const TRANSFER: &str = "transfer(uint256,uint256,uint256)";

/// Touches every account, never registered
pub const AIRDROP: &str = "airdrop(uint256)";

/// Starting balance of every account
pub const INITIAL_BALANCE: u64 = 1_000_000;

/// Errors that abort a block
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Call the token contract does not implement
    #[error("unsupported call to {0:?}")]
    UnsupportedCall(Option<Address>),
    /// Argument word missing or out of range
    #[error("malformed argument {0}")]
    MalformedArgument(usize),
}

/// Per-transaction receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    /// False when the call reverted
    pub success: bool,
    /// Recipient balance for transfers, total supply for airdrops
    pub value: u64,
}

impl Receipt {
    fn encode(&self) -> [u8; 9] {
        let mut out = [0u8; 9];
        out[0] = u8::from(self.success);
        out[1..].copy_from_slice(&self.value.to_be_bytes());
        out
    }
}

/// In-memory token ledger
pub struct Ledger {
    policy: ParallelPolicy,
    transfer: Selector,
    airdrop: Selector,
    balances: DashMap<u64, u64>,
}

impl Ledger {
    /// Ledger with `accounts` funded accounts
    pub fn new(accounts: u64) -> Self {
        let policy = ParallelPolicy::new();
        let transfer = policy.register(TOKEN, TRANSFER, 2);
        let airdrop = policy.selector(AIRDROP);
        Self {
            policy,
            transfer,
            airdrop,
            balances: (0..accounts).map(|a| (a, INITIAL_BALANCE)).collect(),
        }
    }

    /// Balance of an account
    pub fn balance(&self, account: u64) -> u64 {
        self.balances.get(&account).map_or(0, |b| *b)
    }

    /// Total of all balances
    pub fn total_supply(&self) -> u64 {
        self.balances.iter().map(|e| *e.value()).sum()
    }

    /// Encode a transfer call
    pub fn transfer_call(&self, from: u64, to: u64, amount: u64) -> ContractCall {
        ContractCall::new(TOKEN, self.transfer, &[word(from), word(to), word(amount)])
    }

    /// Encode an airdrop call
    pub fn airdrop_call(&self, amount: u64) -> ContractCall {
        ContractCall::new(TOKEN, self.airdrop, &[word(amount)])
    }

    /// Random block of transfers with a share of airdrops
    pub fn generate_block(&self, rng: &mut StdRng, txs: usize, accounts: u64, unknown_ratio: f64) -> Vec<ContractCall> {
        let accounts = accounts.max(1);
        (0..txs)
            .map(|_| {
                if rng.gen_bool(unknown_ratio) {
                    self.airdrop_call(rng.gen_range(1..=10))
                } else {
                    self.transfer_call(
                        rng.gen_range(0..accounts),
                        rng.gen_range(0..accounts),
                        rng.gen_range(1..=1_000),
                    )
                }
            })
            .collect()
    }

    fn arg(call: &ContractCall, index: usize) -> Result<u64, LedgerError> {
        call.arg(index)
            .and_then(|w| word_to_u64(&w))
            .ok_or(LedgerError::MalformedArgument(index))
    }

    fn transfer(&self, call: &ContractCall) -> Result<Receipt, LedgerError> {
        let from = Self::arg(call, 0)?;
        let to = Self::arg(call, 1)?;
        let amount = Self::arg(call, 2)?;

        let balance = self.balance(from);
        if balance < amount {
            return Ok(Receipt {
                success: false,
                value: self.balance(to),
            });
        }
        self.balances.insert(from, balance - amount);
        let mut to_balance = self.balances.entry(to).or_insert(0);
        *to_balance = to_balance.saturating_add(amount);
        Ok(Receipt {
            success: true,
            value: *to_balance,
        })
    }

    fn airdrop(&self, call: &ContractCall) -> Result<Receipt, LedgerError> {
        let amount = Self::arg(call, 0)?;
        let mut supply = 0u64;
        for mut entry in self.balances.iter_mut() {
            let balance = entry.value_mut();
            *balance = balance.saturating_add(amount);
            supply = supply.saturating_add(*balance);
        }
        Ok(Receipt {
            success: true,
            value: supply,
        })
    }
}

impl TransactionExecutor for Ledger {
    type Transaction = ContractCall;
    type Key = ConflictKey;
    type Outcome = Receipt;
    type Error = LedgerError;

    fn criticals(&self, tx: &ContractCall) -> ConflictFootprint<ConflictKey> {
        self.policy.criticals(tx)
    }

    fn execute(&self, tx: &ContractCall, id: TxId) -> Result<Receipt, LedgerError> {
        tracing::trace!(%id, "token call");
        match (tx.to, tx.selector()) {
            (Some(TOKEN), Some(selector)) if selector == self.transfer => self.transfer(tx),
            (Some(TOKEN), Some(selector)) if selector == self.airdrop => self.airdrop(tx),
            (to, _) => Err(LedgerError::UnsupportedCall(to)),
        }
    }
}

/// Hashes the ledger and receipts into block roots
pub struct RootCommitter<'a> {
    ledger: &'a Ledger,
}

impl<'a> RootCommitter<'a> {
    /// Committer over a ledger
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }
}

impl StateCommitter<Receipt> for RootCommitter<'_> {
    type Error = std::convert::Infallible;

    fn commit(&mut self, receipts: &[Receipt]) -> Result<BlockRoots, Self::Error> {
        let mut accounts: Vec<(u64, u64)> = self
            .ledger
            .balances
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect();
        accounts.sort_unstable();

        let mut state = Keccak256::new();
        for (account, balance) in accounts {
            state.update(account.to_be_bytes());
            state.update(balance.to_be_bytes());
        }

        let mut receipts_hasher = Keccak256::new();
        for receipt in receipts {
            receipts_hasher.update(receipt.encode());
        }

        Ok(BlockRoots::new(
            state.finalize().into(),
            receipts_hasher.finalize().into(),
        ))
    }
}

/// Seeded rng for block generation
pub fn block_rng(seed: u64, block: usize) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_add(block as u64))
}

fn word(n: u64) -> [u8; WORD_SIZE] {
    let mut w = [0u8; WORD_SIZE];
    w[WORD_SIZE - 8..].copy_from_slice(&n.to_be_bytes());
    w
}

fn word_to_u64(w: &[u8; WORD_SIZE]) -> Option<u64> {
    if w[..WORD_SIZE - 8].iter().any(|b| *b != 0) {
        return None;
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&w[WORD_SIZE - 8..]);
    Some(u64::from_be_bytes(buf))
}
