use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

fn hash_leaf(bytes: &[u8]) -> Hash {
    *blake3::hash(bytes).as_bytes()
}

fn fold_hashes(mut leaves: Vec<Hash>) -> Hash {
    if leaves.is_empty() {
        return [0u8; 32];
    }
    leaves.sort();
    let mut hasher = blake3::Hasher::new();
    for leaf in leaves {
        hasher.update(&leaf);
    }
    *hasher.finalize().as_bytes()
}

pub type Address = [u8; 32];
pub type Hash = [u8; 32];

/// Parses an operator-facing address string. The grammar is 64 hex
/// characters; anything else is rejected before it can reach a store key.
pub fn parse_address(s: &str) -> anyhow::Result<Address> {
    let bytes = hex::decode(s).map_err(|e| anyhow::anyhow!("invalid address {s:?}: {e}"))?;
    let addr: Address = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("invalid address {s:?}: expected 32 bytes"))?;
    Ok(addr)
}

pub fn format_address(addr: &Address) -> String {
    hex::encode(addr)
}

pub fn address_from_pubkey(pubkey: &[u8]) -> Address {
    *blake3::hash(pubkey).as_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BondStatus {
    Bonded,
    Unbonding,
    Unbonded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validator {
    pub operator: Address,
    pub consensus_pubkey: Vec<u8>,
    pub stake: u128,
    pub status: BondStatus,
    pub jailed: bool,
    /// Height at which an in-progress unbonding started; 0 when none is
    /// pending relative to the current genesis.
    pub unbonding_height: u64,
    pub commission_rate: u8,
}

impl Validator {
    pub fn is_bonded(&self) -> bool {
        self.status == BondStatus::Bonded
    }

    /// Voting power as seen by consensus. Jailed validators carry none.
    pub fn consensus_power(&self) -> u128 {
        if self.jailed || !self.is_bonded() {
            0
        } else {
            self.stake
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegation {
    pub delegator: Address,
    pub validator: Address,
    pub stake: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnbondingEntry {
    pub creation_height: u64,
    pub completion_time: u64,
    pub balance: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnbondingDelegation {
    pub delegator: Address,
    pub validator: Address,
    pub entries: Vec<UnbondingEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedelegationEntry {
    pub creation_height: u64,
    pub completion_time: u64,
    pub balance: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Redelegation {
    pub delegator: Address,
    pub src_validator: Address,
    pub dst_validator: Address,
    pub entries: Vec<RedelegationEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningInfo {
    pub address: Address,
    pub start_height: u64,
    pub index_offset: u64,
    pub missed_blocks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalReward {
    pub height: u64,
    pub cumulative_reward: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlashEvent {
    pub height: u64,
    pub fraction_bps: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeePool {
    pub community_pool: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub nonce: u64,
    pub balance: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainParams {
    pub chain_id: String,
    pub block_time_ms: u64,
    pub max_gas_per_block: u64,
    pub base_fee: u128,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            chain_id: "meridian-devnet".into(),
            block_time_ms: 1_000,
            max_gas_per_block: 30_000_000,
            base_fee: 1,
        }
    }
}

/// A power change produced when the active set is re-derived from the
/// validator records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorUpdate {
    pub consensus_pubkey: Vec<u8>,
    pub power: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChainState {
    pub height: u64,
    pub total_supply: u128,
    pub params: ChainParams,
    pub accounts: BTreeMap<Address, Account>,
    pub validators: BTreeMap<Address, Validator>,
    pub delegations: Vec<Delegation>,
    pub redelegations: Vec<Redelegation>,
    pub unbonding_delegations: Vec<UnbondingDelegation>,
    pub signing_infos: BTreeMap<Address, SigningInfo>,
    /// Per-validator undistributed reward balance. Superset of the accrued
    /// commission and delegation rewards below; the difference is dust.
    pub outstanding_rewards: BTreeMap<Address, u128>,
    pub commissions: BTreeMap<Address, u128>,
    pub delegation_rewards: BTreeMap<(Address, Address), u128>,
    /// Height at which each delegation's reward accrual started.
    pub delegation_starting_heights: BTreeMap<(Address, Address), u64>,
    pub historical_rewards: BTreeMap<Address, Vec<HistoricalReward>>,
    pub slash_events: BTreeMap<Address, Vec<SlashEvent>>,
    pub fee_pool: FeePool,
    pub last_validator_powers: BTreeMap<Address, u128>,
}

impl ChainState {
    pub fn state_root(&self) -> Hash {
        let mut leaves = Vec::new();

        for account in self.accounts.values() {
            if let Ok(bytes) = bincode::serialize(account) {
                leaves.push(hash_leaf(&bytes));
            }
        }

        for validator in self.validators.values() {
            if let Ok(bytes) = bincode::serialize(validator) {
                leaves.push(hash_leaf(&bytes));
            }
        }

        for delegation in &self.delegations {
            if let Ok(bytes) = bincode::serialize(delegation) {
                leaves.push(hash_leaf(&bytes));
            }
        }

        for red in &self.redelegations {
            if let Ok(bytes) = bincode::serialize(red) {
                leaves.push(hash_leaf(&bytes));
            }
        }

        for ubd in &self.unbonding_delegations {
            if let Ok(bytes) = bincode::serialize(ubd) {
                leaves.push(hash_leaf(&bytes));
            }
        }

        for info in self.signing_infos.values() {
            if let Ok(bytes) = bincode::serialize(info) {
                leaves.push(hash_leaf(&bytes));
            }
        }

        if let Ok(bytes) = bincode::serialize(&self.outstanding_rewards) {
            leaves.push(hash_leaf(&bytes));
        }

        if let Ok(bytes) = bincode::serialize(&self.commissions) {
            leaves.push(hash_leaf(&bytes));
        }

        if let Ok(bytes) = bincode::serialize(&self.delegation_rewards) {
            leaves.push(hash_leaf(&bytes));
        }

        if let Ok(bytes) = bincode::serialize(&self.delegation_starting_heights) {
            leaves.push(hash_leaf(&bytes));
        }

        if let Ok(bytes) = bincode::serialize(&self.historical_rewards) {
            leaves.push(hash_leaf(&bytes));
        }

        if let Ok(bytes) = bincode::serialize(&self.slash_events) {
            leaves.push(hash_leaf(&bytes));
        }

        if let Ok(bytes) = bincode::serialize(&self.last_validator_powers) {
            leaves.push(hash_leaf(&bytes));
        }

        if let Ok(bytes) = bincode::serialize(&self.fee_pool) {
            leaves.push(hash_leaf(&bytes));
        }

        if let Ok(bytes) = bincode::serialize(&(self.height, self.total_supply)) {
            leaves.push(hash_leaf(&bytes));
        }

        fold_hashes(leaves)
    }

    /// Operator addresses of every registered validator, in key order.
    pub fn operator_addresses(&self) -> Vec<Address> {
        self.validators.keys().copied().collect()
    }

    pub fn account_mut(&mut self, address: Address) -> &mut Account {
        self.accounts.entry(address).or_insert(Account {
            address,
            nonce: 0,
            balance: 0,
        })
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_chain_state(&self) -> anyhow::Result<ChainState>;
    async fn put_chain_state(&self, state: ChainState) -> anyhow::Result<()>;
    async fn commit(&self) -> anyhow::Result<Hash>;
}

#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    inner: Arc<Mutex<ChainState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChainState::default())),
        }
    }

    pub fn with_state(state: ChainState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get_chain_state(&self) -> anyhow::Result<ChainState> {
        let guard = self.inner.lock().unwrap();
        Ok(guard.clone())
    }

    async fn put_chain_state(&self, state: ChainState) -> anyhow::Result<()> {
        let mut guard = self.inner.lock().unwrap();
        *guard = state;
        Ok(())
    }

    async fn commit(&self) -> anyhow::Result<Hash> {
        let guard = self.inner.lock().unwrap();
        Ok(guard.state_root())
    }
}
