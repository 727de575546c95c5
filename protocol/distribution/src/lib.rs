//! Reward accounting for validators and delegators: accrued commission,
//! pending delegation rewards, per-validator reward history, and the shared
//! community pool.
//!
//! All keepers operate on an exclusive `&mut ChainState` view; callers own
//! the store round-trip.

use state::{format_address, Address, ChainState};

/// Moves a validator's accrued commission to its operator account.
///
/// The commission record is a slice of the validator's outstanding reward
/// balance; a commission larger than the outstanding balance means the two
/// records have diverged and the caller must not continue.
pub fn withdraw_validator_commission(
    chain: &mut ChainState,
    operator: Address,
) -> anyhow::Result<u128> {
    let commission = chain.commissions.get(&operator).copied().unwrap_or(0);
    if commission == 0 {
        return Ok(0);
    }

    let outstanding = chain.outstanding_rewards.get(&operator).copied().unwrap_or(0);
    let remaining = outstanding.checked_sub(commission).ok_or_else(|| {
        anyhow::anyhow!(
            "commission {} exceeds outstanding rewards {} for validator {}",
            commission,
            outstanding,
            format_address(&operator)
        )
    })?;

    chain.outstanding_rewards.insert(operator, remaining);
    chain.commissions.insert(operator, 0);
    let account = chain.account_mut(operator);
    account.balance = account
        .balance
        .checked_add(commission)
        .ok_or_else(|| anyhow::anyhow!("balance overflow withdrawing commission"))?;

    Ok(commission)
}

/// Pays out a delegation's accrued rewards to the delegator account.
pub fn withdraw_delegation_rewards(
    chain: &mut ChainState,
    delegator: Address,
    validator: Address,
) -> anyhow::Result<u128> {
    let reward = chain
        .delegation_rewards
        .get(&(delegator, validator))
        .copied()
        .unwrap_or(0);
    if reward == 0 {
        return Ok(0);
    }

    let outstanding = chain.outstanding_rewards.get(&validator).copied().unwrap_or(0);
    let remaining = outstanding.checked_sub(reward).ok_or_else(|| {
        anyhow::anyhow!(
            "delegation reward {} exceeds outstanding rewards {} for validator {}",
            reward,
            outstanding,
            format_address(&validator)
        )
    })?;

    chain.outstanding_rewards.insert(validator, remaining);
    chain.delegation_rewards.insert((delegator, validator), 0);
    let account = chain.account_mut(delegator);
    account.balance = account
        .balance
        .checked_add(reward)
        .ok_or_else(|| anyhow::anyhow!("balance overflow withdrawing delegation rewards"))?;

    Ok(reward)
}

/// Drops every validator's reward history. The height axis those records
/// reference is meaningless after a re-genesis.
pub fn delete_all_historical_rewards(chain: &mut ChainState) {
    chain.historical_rewards.clear();
}

pub fn delete_all_slash_events(chain: &mut ChainState) {
    chain.slash_events.clear();
}

/// Drains whatever outstanding balance a validator still carries into the
/// community pool and clears its per-validator reward records. Covers dust
/// left behind by integer division and rewards whose owners never withdrew.
pub fn sweep_outstanding_to_community_pool(chain: &mut ChainState, operator: Address) -> u128 {
    let scraps = chain.outstanding_rewards.remove(&operator).unwrap_or(0);
    chain.commissions.remove(&operator);
    if scraps > 0 {
        tracing::debug!(
            validator = %format_address(&operator),
            amount = scraps,
            "sweeping residual rewards to community pool"
        );
        chain.fee_pool.community_pool = chain.fee_pool.community_pool.saturating_add(scraps);
    }
    scraps
}

/// Re-seeds a validator's distribution bookkeeping as if it had just been
/// created at `height`. Idempotent: an already-initialized validator ends up
/// in the same shape.
pub fn initialize_validator(chain: &mut ChainState, height: u64, operator: Address) {
    tracing::trace!(
        validator = %format_address(&operator),
        height,
        "initializing validator reward records"
    );
    chain.outstanding_rewards.entry(operator).or_insert(0);
    chain.commissions.entry(operator).or_insert(0);
    for ((_, validator), starting_height) in chain.delegation_starting_heights.iter_mut() {
        if *validator == operator {
            *starting_height = height;
        }
    }
}

/// Re-seeds a delegation's reward bookkeeping with accrual starting at
/// `height`. Tolerates delegations that already have a record.
pub fn initialize_delegation(
    chain: &mut ChainState,
    height: u64,
    delegator: Address,
    validator: Address,
) {
    chain.delegation_rewards.entry((delegator, validator)).or_insert(0);
    chain
        .delegation_starting_heights
        .insert((delegator, validator), height);
}
