use distribution::{
    initialize_delegation, initialize_validator, sweep_outstanding_to_community_pool,
    withdraw_delegation_rewards, withdraw_validator_commission,
};
use state::{Address, ChainState};

const VAL: Address = [1u8; 32];
const DEL: Address = [2u8; 32];

fn chain_with_rewards(outstanding: u128, commission: u128, delegation: u128) -> ChainState {
    let mut chain = ChainState::default();
    chain.outstanding_rewards.insert(VAL, outstanding);
    chain.commissions.insert(VAL, commission);
    chain.delegation_rewards.insert((DEL, VAL), delegation);
    chain
}

#[test]
fn draining_accounts_for_every_token_exactly_once() {
    let mut chain = chain_with_rewards(100, 40, 50);
    let pool_before = chain.fee_pool.community_pool;

    let commission = withdraw_validator_commission(&mut chain, VAL).unwrap();
    let reward = withdraw_delegation_rewards(&mut chain, DEL, VAL).unwrap();
    let scraps = sweep_outstanding_to_community_pool(&mut chain, VAL);

    assert_eq!(commission, 40);
    assert_eq!(reward, 50);
    assert_eq!(scraps, 10);
    // pool delta plus payouts equals the pre-drain outstanding balance
    assert_eq!(
        chain.fee_pool.community_pool - pool_before + commission + reward,
        100
    );
    assert_eq!(chain.accounts[&VAL].balance, 40);
    assert_eq!(chain.accounts[&DEL].balance, 50);
    assert_eq!(chain.outstanding_rewards.get(&VAL), None);
}

#[test]
fn zero_balances_withdraw_as_noops() {
    let mut chain = chain_with_rewards(0, 0, 0);
    assert_eq!(withdraw_validator_commission(&mut chain, VAL).unwrap(), 0);
    assert_eq!(withdraw_delegation_rewards(&mut chain, DEL, VAL).unwrap(), 0);
    assert_eq!(sweep_outstanding_to_community_pool(&mut chain, VAL), 0);
    assert!(chain.accounts.is_empty());
    assert_eq!(chain.fee_pool.community_pool, 0);
}

#[test]
fn commission_exceeding_outstanding_is_an_inconsistency() {
    let mut chain = chain_with_rewards(30, 40, 0);
    let err = withdraw_validator_commission(&mut chain, VAL).unwrap_err();
    assert!(err.to_string().contains("exceeds outstanding"));
}

#[test]
fn delegation_reward_exceeding_outstanding_is_an_inconsistency() {
    let mut chain = chain_with_rewards(30, 0, 40);
    assert!(withdraw_delegation_rewards(&mut chain, DEL, VAL).is_err());
}

#[test]
fn reinitialization_is_idempotent() {
    let mut chain = ChainState::default();

    initialize_validator(&mut chain, 0, VAL);
    initialize_delegation(&mut chain, 0, DEL, VAL);
    let once = chain.state_root();

    initialize_validator(&mut chain, 0, VAL);
    initialize_delegation(&mut chain, 0, DEL, VAL);
    assert_eq!(chain.state_root(), once);

    assert_eq!(chain.outstanding_rewards[&VAL], 0);
    assert_eq!(chain.delegation_rewards[&(DEL, VAL)], 0);
    assert_eq!(chain.delegation_starting_heights[&(DEL, VAL)], 0);
}

#[test]
fn initialize_validator_reanchors_its_delegations() {
    let mut chain = ChainState::default();
    chain.delegation_starting_heights.insert((DEL, VAL), 480);
    chain.delegation_starting_heights.insert(([3u8; 32], [4u8; 32]), 480);

    initialize_validator(&mut chain, 0, VAL);

    assert_eq!(chain.delegation_starting_heights[&(DEL, VAL)], 0);
    // Other validators' delegations are untouched.
    assert_eq!(chain.delegation_starting_heights[&([3u8; 32], [4u8; 32])], 480);
}
