//! Genesis export for a running chain, including the zero-height rewrite
//! that re-anchors all height-bearing state so the snapshot can seed a new
//! chain instance starting from height 0.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use state::{
    format_address, parse_address, Address, BondStatus, ChainParams, ChainState, Delegation,
    Redelegation, StateStore, UnbondingDelegation, Validator, ValidatorUpdate,
};

pub const GENESIS_SCHEMA_VERSION: u32 = 1;

/// Checks the global supply invariant: every token is accounted for by an
/// account balance, staked or unbonding tokens, an undistributed reward, or
/// the community pool. Run once before any bulk rewrite; a snapshot taken
/// from a state that fails this is not fixable downstream.
pub fn assert_invariants(chain: &ChainState) -> anyhow::Result<()> {
    let mut total: u128 = 0;
    let mut add = |amount: u128| -> anyhow::Result<()> {
        total = total
            .checked_add(amount)
            .ok_or_else(|| anyhow::anyhow!("supply overflow while checking invariants"))?;
        Ok(())
    };

    for account in chain.accounts.values() {
        add(account.balance)?;
    }
    for validator in chain.validators.values() {
        add(validator.stake)?;
    }
    for ubd in &chain.unbonding_delegations {
        for entry in &ubd.entries {
            add(entry.balance)?;
        }
    }
    for reward in chain.outstanding_rewards.values() {
        add(*reward)?;
    }
    add(chain.fee_pool.community_pool)?;

    if total != chain.total_supply {
        anyhow::bail!(
            "supply invariant broken at height {}: accounted {} but supply is {}",
            chain.height,
            total,
            chain.total_supply
        );
    }
    Ok(())
}

/// Rewrites the chain state so it reads as if the chain had just started:
/// rewards drained, height-indexed history purged, unbonding and signing
/// records re-anchored to height 0, and optionally every bonded validator
/// outside `jail_whitelist` jailed.
///
/// Every failure is fatal for the whole pass. There is no partial-success
/// mode and no rollback; the operator re-runs the export from a clean state.
pub fn prep_for_zero_height(
    chain: &mut ChainState,
    jail_whitelist: &[String],
) -> anyhow::Result<()> {
    // Whitelist validation is front-loaded: a malformed address must fail
    // before any mutation is observable.
    let apply_whitelist = !jail_whitelist.is_empty();
    let mut whitelist: BTreeSet<Address> = BTreeSet::new();
    for raw in jail_whitelist {
        whitelist.insert(parse_address(raw)?);
    }

    assert_invariants(chain)?;

    tracing::info!(
        height = chain.height,
        validators = chain.validators.len(),
        delegations = chain.delegations.len(),
        "rewriting state for zero-height genesis"
    );

    for operator in chain.operator_addresses() {
        distribution::withdraw_validator_commission(chain, operator)?;
    }

    // Snapshot of the delegation pairs on record; reused below when their
    // bookkeeping is re-seeded.
    let delegations = chain.delegations.clone();
    for delegation in &delegations {
        distribution::withdraw_delegation_rewards(
            chain,
            delegation.delegator,
            delegation.validator,
        )?;
    }

    distribution::delete_all_slash_events(chain);
    distribution::delete_all_historical_rewards(chain);

    // Height-0 frame: residual rewards go to the community pool and every
    // validator's and delegation's distribution bookkeeping is re-seeded as
    // if it had just been created.
    for operator in chain.operator_addresses() {
        distribution::sweep_outstanding_to_community_pool(chain, operator);
        distribution::initialize_validator(chain, 0, operator);
    }
    for delegation in &delegations {
        distribution::initialize_delegation(chain, 0, delegation.delegator, delegation.validator);
    }

    for red in chain.redelegations.iter_mut() {
        for entry in red.entries.iter_mut() {
            entry.creation_height = 0;
        }
    }
    for ubd in chain.unbonding_delegations.iter_mut() {
        for entry in ubd.entries.iter_mut() {
            entry.creation_height = 0;
        }
    }

    for operator in chain.operator_addresses().into_iter().rev() {
        let Some(validator) = chain.validators.get_mut(&operator) else {
            anyhow::bail!(
                "validator {} present in index but missing from the record store",
                format_address(&operator)
            );
        };
        validator.unbonding_height = 0;
        if apply_whitelist && validator.is_bonded() && !whitelist.contains(&operator) {
            validator.jailed = true;
        }
    }

    // Only run to force the stored powers to be re-derived from the
    // rewritten records; the diff itself is not consensus output here.
    let _ = apply_validator_set_updates(chain);

    for info in chain.signing_infos.values_mut() {
        info.start_height = 0;
    }

    tracing::info!(
        community_pool = chain.fee_pool.community_pool,
        "zero-height rewrite complete"
    );
    Ok(())
}

/// Re-derives the active-set powers from the validator records and returns
/// the changes relative to the previously stored powers.
pub fn apply_validator_set_updates(chain: &mut ChainState) -> Vec<ValidatorUpdate> {
    let mut updates = Vec::new();
    let mut powers = std::collections::BTreeMap::new();

    for (operator, validator) in chain.validators.iter() {
        let power = validator.consensus_power();
        if power > 0 {
            powers.insert(*operator, power);
        }
        let previous = chain.last_validator_powers.get(operator).copied().unwrap_or(0);
        if power != previous {
            updates.push(ValidatorUpdate {
                consensus_pubkey: validator.consensus_pubkey.clone(),
                power,
            });
        }
    }

    chain.last_validator_powers = powers;
    updates
}

#[derive(Debug, Error)]
pub enum ExportError {
    /// The normalization pass (or reaching the store around it) failed.
    /// Nothing past the failed step was committed; the export must be re-run
    /// from a clean state.
    #[error("zero-height normalization failed: {0}")]
    Normalize(anyhow::Error),
    /// Rendering the genesis document failed after any requested
    /// normalization had already been committed. State is consistent; only
    /// the document is missing.
    #[error("genesis document rendering failed")]
    Render(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub consensus_pubkey: Vec<u8>,
    pub power: u128,
    pub commission_rate: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusParams {
    pub block_time_ms: u64,
    pub max_gas_per_block: u64,
    pub base_fee: u128,
}

#[derive(Debug, Clone)]
pub struct ExportedState {
    pub app_state: serde_json::Value,
    pub validators: Vec<GenesisValidator>,
    pub consensus_params: ConsensusParams,
}

/// Renders the chain's full state as a genesis snapshot. With
/// `for_zero_height` the state is normalized (and committed back to the
/// store) first, so the document can seed a fresh chain at height 0.
pub async fn export_app_state<S: StateStore>(
    store: &S,
    for_zero_height: bool,
    jail_whitelist: &[String],
) -> Result<ExportedState, ExportError> {
    let mut chain = store
        .get_chain_state()
        .await
        .map_err(ExportError::Normalize)?;

    if for_zero_height {
        prep_for_zero_height(&mut chain, jail_whitelist).map_err(ExportError::Normalize)?;
        store
            .put_chain_state(chain.clone())
            .await
            .map_err(ExportError::Normalize)?;
    }

    let app_state = render_genesis_document(&chain, for_zero_height)?;
    let validators = write_validators(&chain);
    let consensus_params = ConsensusParams {
        block_time_ms: chain.params.block_time_ms,
        max_gas_per_block: chain.params.max_gas_per_block,
        base_fee: chain.params.base_fee,
    };

    Ok(ExportedState {
        app_state,
        validators,
        consensus_params,
    })
}

/// The validator set the new chain boots with: bonded, unjailed validators
/// in descending power order.
pub fn write_validators(chain: &ChainState) -> Vec<GenesisValidator> {
    let mut validators: Vec<GenesisValidator> = chain
        .validators
        .values()
        .filter(|v| v.consensus_power() > 0)
        .map(|v| GenesisValidator {
            consensus_pubkey: v.consensus_pubkey.clone(),
            power: v.consensus_power(),
            commission_rate: v.commission_rate,
        })
        .collect();
    validators.sort_by(|a, b| b.power.cmp(&a.power));
    validators
}

// Portable genesis document. Addresses are rendered through the operator
// address grammar so the document survives tooling that only speaks JSON
// object keys.

#[derive(Debug, Serialize, Deserialize)]
struct AccountDoc {
    address: String,
    nonce: u64,
    balance: u128,
}

#[derive(Debug, Serialize, Deserialize)]
struct ValidatorDoc {
    operator: String,
    consensus_pubkey: String,
    stake: u128,
    status: BondStatus,
    jailed: bool,
    unbonding_height: u64,
    commission_rate: u8,
}

#[derive(Debug, Serialize, Deserialize)]
struct DelegationDoc {
    delegator: String,
    validator: String,
    stake: u128,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryDoc {
    creation_height: u64,
    completion_time: u64,
    balance: u128,
}

#[derive(Debug, Serialize, Deserialize)]
struct UnbondingDoc {
    delegator: String,
    validator: String,
    entries: Vec<EntryDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RedelegationDoc {
    delegator: String,
    src_validator: String,
    dst_validator: String,
    entries: Vec<EntryDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OutstandingRewardDoc {
    validator: String,
    amount: u128,
}

#[derive(Debug, Serialize, Deserialize)]
struct SigningInfoDoc {
    address: String,
    start_height: u64,
    index_offset: u64,
    missed_blocks: u64,
}

fn account_docs(chain: &ChainState) -> Vec<AccountDoc> {
    chain
        .accounts
        .values()
        .map(|a| AccountDoc {
            address: format_address(&a.address),
            nonce: a.nonce,
            balance: a.balance,
        })
        .collect()
}

fn validator_doc(v: &Validator) -> ValidatorDoc {
    ValidatorDoc {
        operator: format_address(&v.operator),
        consensus_pubkey: hex::encode(&v.consensus_pubkey),
        stake: v.stake,
        status: v.status,
        jailed: v.jailed,
        unbonding_height: v.unbonding_height,
        commission_rate: v.commission_rate,
    }
}

fn delegation_doc(d: &Delegation) -> DelegationDoc {
    DelegationDoc {
        delegator: format_address(&d.delegator),
        validator: format_address(&d.validator),
        stake: d.stake,
    }
}

fn unbonding_doc(u: &UnbondingDelegation) -> UnbondingDoc {
    UnbondingDoc {
        delegator: format_address(&u.delegator),
        validator: format_address(&u.validator),
        entries: u
            .entries
            .iter()
            .map(|e| EntryDoc {
                creation_height: e.creation_height,
                completion_time: e.completion_time,
                balance: e.balance,
            })
            .collect(),
    }
}

fn redelegation_doc(r: &Redelegation) -> RedelegationDoc {
    RedelegationDoc {
        delegator: format_address(&r.delegator),
        src_validator: format_address(&r.src_validator),
        dst_validator: format_address(&r.dst_validator),
        entries: r
            .entries
            .iter()
            .map(|e| EntryDoc {
                creation_height: e.creation_height,
                completion_time: e.completion_time,
                balance: e.balance,
            })
            .collect(),
    }
}

fn render_genesis_document(
    chain: &ChainState,
    for_zero_height: bool,
) -> Result<serde_json::Value, serde_json::Error> {
    let staking = serde_json::json!({
        "validators": serde_json::to_value(
            chain.validators.values().map(validator_doc).collect::<Vec<_>>()
        )?,
        "delegations": serde_json::to_value(
            chain.delegations.iter().map(delegation_doc).collect::<Vec<_>>()
        )?,
        "redelegations": serde_json::to_value(
            chain.redelegations.iter().map(redelegation_doc).collect::<Vec<_>>()
        )?,
        "unbonding_delegations": serde_json::to_value(
            chain.unbonding_delegations.iter().map(unbonding_doc).collect::<Vec<_>>()
        )?,
    });

    let distribution = serde_json::json!({
        "fee_pool": serde_json::to_value(&chain.fee_pool)?,
        "outstanding_rewards": serde_json::to_value(
            chain
                .outstanding_rewards
                .iter()
                .map(|(operator, amount)| OutstandingRewardDoc {
                    validator: format_address(operator),
                    amount: *amount,
                })
                .collect::<Vec<_>>()
        )?,
    });

    let slashing = serde_json::json!({
        "signing_infos": serde_json::to_value(
            chain
                .signing_infos
                .values()
                .map(|info| SigningInfoDoc {
                    address: format_address(&info.address),
                    start_height: info.start_height,
                    index_offset: info.index_offset,
                    missed_blocks: info.missed_blocks,
                })
                .collect::<Vec<_>>()
        )?,
    });

    let genesis_height = if for_zero_height { 0 } else { chain.height };

    Ok(serde_json::json!({
        "version": GENESIS_SCHEMA_VERSION,
        "chain_id": chain.params.chain_id,
        "genesis_height": genesis_height,
        "total_supply": chain.total_supply,
        "app_state": {
            "accounts": serde_json::to_value(account_docs(chain))?,
            "staking": staking,
            "distribution": distribution,
            "slashing": slashing,
        },
    }))
}

/// Seed for one validator in a genesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorGenesis {
    pub pubkey: Vec<u8>,
    pub stake: u128,
    pub commission_rate: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub params: ChainParams,
    pub initial_accounts: Vec<(Address, u128)>,
    pub initial_validators: Vec<ValidatorGenesis>,
}

/// Builds the starting state for a fresh chain from a genesis config.
pub fn from_genesis(config: GenesisConfig) -> anyhow::Result<ChainState> {
    let mut chain = ChainState {
        params: config.params,
        ..ChainState::default()
    };

    let mut supply: u128 = 0;
    for (address, balance) in config.initial_accounts {
        supply = supply
            .checked_add(balance)
            .ok_or_else(|| anyhow::anyhow!("genesis account balances overflow"))?;
        chain.accounts.insert(
            address,
            state::Account {
                address,
                nonce: 0,
                balance,
            },
        );
    }

    for seed in config.initial_validators {
        let operator = state::address_from_pubkey(&seed.pubkey);
        supply = supply
            .checked_add(seed.stake)
            .ok_or_else(|| anyhow::anyhow!("genesis validator stakes overflow"))?;
        chain.validators.insert(
            operator,
            Validator {
                operator,
                consensus_pubkey: seed.pubkey,
                stake: seed.stake,
                status: BondStatus::Bonded,
                jailed: false,
                unbonding_height: 0,
                commission_rate: seed.commission_rate,
            },
        );
        chain.signing_infos.insert(
            operator,
            state::SigningInfo {
                address: operator,
                start_height: 0,
                index_offset: 0,
                missed_blocks: 0,
            },
        );
        distribution::initialize_validator(&mut chain, 0, operator);
    }

    chain.total_supply = supply;
    let _ = apply_validator_set_updates(&mut chain);
    Ok(chain)
}
