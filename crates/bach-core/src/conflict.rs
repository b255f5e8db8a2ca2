//! Contract-level conflict policy
//!
//! Contracts register "parallel functions" by signature together with the
//! number of leading arguments that identify the state they touch. A call to
//! such a function conflicts only with calls sharing one of those argument
//! values on the same contract; any call the policy cannot decode conflicts
//! with everything.

use bach_scheduler::ConflictFootprint;
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use sha3::{Digest, Keccak256};
use std::fmt;

/// ABI argument word size
pub const WORD_SIZE: usize = 32;

/// Function selector size
pub const SELECTOR_SIZE: usize = 4;

/// Four byte function selector
pub type Selector = [u8; SELECTOR_SIZE];

/// 20 byte contract address
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    /// Create from raw bytes
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, `None` unless it is exactly 20 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 20]>::try_from(bytes).ok().map(Self)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

/// Conflict key of a parallel contract call: the contract plus one critical
/// argument word
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConflictKey {
    /// Called contract
    pub contract: Address,
    /// Critical argument
    pub word: [u8; WORD_SIZE],
}

impl fmt::Debug for ConflictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConflictKey({}:{})", self.contract, hex::encode(self.word))
    }
}

/// A contract call as seen by the conflict policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    /// Target contract, `None` for contract creation
    pub to: Option<Address>,
    /// Selector followed by ABI argument words
    pub input: Bytes,
}

impl ContractCall {
    /// Encode a call to `to` with a selector and argument words
    pub fn new(to: Address, selector: Selector, args: &[[u8; WORD_SIZE]]) -> Self {
        let mut input = BytesMut::with_capacity(SELECTOR_SIZE + args.len() * WORD_SIZE);
        input.put_slice(&selector);
        for arg in args {
            input.put_slice(arg);
        }
        Self {
            to: Some(to),
            input: input.freeze(),
        }
    }

    /// Contract creation with init code
    pub fn create(code: Bytes) -> Self {
        Self { to: None, input: code }
    }

    /// Selector, if the input is long enough to carry one
    pub fn selector(&self) -> Option<Selector> {
        self.input
            .get(..SELECTOR_SIZE)
            .and_then(|s| Selector::try_from(s).ok())
    }

    /// Argument word at `index`
    pub fn arg(&self, index: usize) -> Option<[u8; WORD_SIZE]> {
        let start = index.checked_mul(WORD_SIZE)?.checked_add(SELECTOR_SIZE)?;
        self.input
            .get(start..start.checked_add(WORD_SIZE)?)
            .and_then(|w| <[u8; WORD_SIZE]>::try_from(w).ok())
    }
}

#[derive(Debug, Clone)]
struct ParallelFunction {
    signature: String,
    critical_size: usize,
}

/// Registry of parallel contract functions
///
/// Selectors are computed through a cache owned by the policy.
#[derive(Debug, Default)]
pub struct ParallelPolicy {
    functions: DashMap<(Address, Selector), ParallelFunction>,
    selectors: DashMap<String, Selector>,
}

impl ParallelPolicy {
    /// Create an empty policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `signature` on `contract`; its first `critical_size`
    /// arguments become conflict keys. Returns the function selector.
    pub fn register(&self, contract: Address, signature: &str, critical_size: usize) -> Selector {
        let selector = self.selector(signature);
        tracing::debug!(%contract, signature, critical_size, "parallel function registered");
        self.functions.insert(
            (contract, selector),
            ParallelFunction {
                signature: signature.to_string(),
                critical_size,
            },
        );
        selector
    }

    /// Remove a registration; returns whether it existed
    pub fn unregister(&self, contract: Address, signature: &str) -> bool {
        let selector = self.selector(signature);
        self.functions.remove(&(contract, selector)).is_some()
    }

    /// Check if a function is registered
    pub fn is_registered(&self, contract: Address, selector: Selector) -> bool {
        self.functions.contains_key(&(contract, selector))
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// First four bytes of keccak256(signature)
    pub fn selector(&self, signature: &str) -> Selector {
        if let Some(selector) = self.selectors.get(signature) {
            return *selector;
        }
        let digest = Keccak256::digest(signature.as_bytes());
        let mut selector = [0u8; SELECTOR_SIZE];
        selector.copy_from_slice(&digest[..SELECTOR_SIZE]);
        self.selectors.insert(signature.to_string(), selector);
        selector
    }

    /// Conflict footprint of a call
    ///
    /// Anything that cannot be decoded falls back to an unknown footprint.
    pub fn criticals(&self, call: &ContractCall) -> ConflictFootprint<ConflictKey> {
        let Some(contract) = call.to else {
            tracing::debug!("contract creation, unknown footprint");
            return ConflictFootprint::Unknown;
        };
        let Some(selector) = call.selector() else {
            tracing::debug!(%contract, len = call.input.len(), "input too short for selector");
            return ConflictFootprint::Unknown;
        };
        let Some(function) = self.functions.get(&(contract, selector)) else {
            tracing::debug!(%contract, selector = %hex::encode(selector), "not a parallel function");
            return ConflictFootprint::Unknown;
        };

        let words = call.input.len().saturating_sub(SELECTOR_SIZE) / WORD_SIZE;
        if function.critical_size > words {
            tracing::debug!(
                %contract,
                signature = %function.signature,
                critical_size = function.critical_size,
                words,
                "missing critical arguments"
            );
            return ConflictFootprint::Unknown;
        }

        let mut keys = Vec::with_capacity(function.critical_size);
        for index in 0..function.critical_size {
            match call.arg(index) {
                Some(word) => keys.push(ConflictKey { contract, word }),
                None => {
                    tracing::debug!(
                        %contract,
                        signature = %function.signature,
                        index,
                        "missing critical argument"
                    );
                    return ConflictFootprint::Unknown;
                }
            }
        }
        ConflictFootprint::Known(keys)
    }
}
