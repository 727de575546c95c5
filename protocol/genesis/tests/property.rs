use ed25519_dalek::SigningKey;
use genesis::prep_for_zero_height;
use proptest::prelude::*;
use state::{
    address_from_pubkey, format_address, BondStatus, ChainState, UnbondingDelegation,
    UnbondingEntry, Validator,
};

fn make_validator(seed: u8, stake: u128, bonded: bool) -> Validator {
    let sk = SigningKey::from_bytes(&[seed; 32]);
    let pk = sk.verifying_key().to_bytes().to_vec();
    Validator {
        operator: address_from_pubkey(&pk),
        consensus_pubkey: pk,
        stake,
        status: if bonded {
            BondStatus::Bonded
        } else {
            BondStatus::Unbonded
        },
        jailed: false,
        unbonding_height: 0,
        commission_rate: 0,
    }
}

fn chain_with_validators(specs: &[(u8, u128, bool)]) -> ChainState {
    let mut chain = ChainState::default();
    let mut supply = 0u128;
    for (seed, stake, bonded) in specs {
        let v = make_validator(*seed, *stake, *bonded);
        supply += v.stake;
        chain.validators.insert(v.operator, v);
    }
    chain.total_supply = supply;
    chain
}

proptest! {
    #[test]
    fn unbonding_entry_heights_always_reanchor_to_zero(
        heights in prop::collection::vec(0u64..1_000_000, 1..8),
        export_height in 1u64..1_000_000,
    ) {
        let mut chain = chain_with_validators(&[(1, 10_000, true)]);
        chain.height = export_height;
        let operator = *chain.validators.keys().next().unwrap();
        let entries: Vec<UnbondingEntry> = heights
            .iter()
            .map(|h| UnbondingEntry {
                creation_height: *h,
                completion_time: h + 100,
                balance: 0,
            })
            .collect();
        chain.unbonding_delegations.push(UnbondingDelegation {
            delegator: [3u8; 32],
            validator: operator,
            entries,
        });

        prep_for_zero_height(&mut chain, &[]).unwrap();

        for ubd in &chain.unbonding_delegations {
            prop_assert!(ubd.entries.iter().all(|e| e.creation_height == 0));
        }
    }

    #[test]
    fn bonded_validators_are_jailed_exactly_when_outside_the_whitelist(
        stakes in prop::collection::vec((1u128..50_000, any::<bool>()), 1..6),
        whitelist_mask in prop::collection::vec(any::<bool>(), 6),
    ) {
        let specs: Vec<(u8, u128, bool)> = stakes
            .iter()
            .enumerate()
            .map(|(i, (stake, bonded))| (i as u8 + 1, *stake, *bonded))
            .collect();
        let mut chain = chain_with_validators(&specs);

        let whitelist: Vec<String> = chain
            .validators
            .keys()
            .zip(whitelist_mask.iter())
            .filter(|(_, keep)| **keep)
            .map(|(addr, _)| format_address(addr))
            .collect();
        let whitelisted: std::collections::BTreeSet<_> = whitelist
            .iter()
            .map(|s| s.clone())
            .collect();

        let bonded_before: Vec<_> = chain
            .validators
            .iter()
            .filter(|(_, v)| v.status == BondStatus::Bonded)
            .map(|(addr, _)| *addr)
            .collect();

        prep_for_zero_height(&mut chain, &whitelist).unwrap();

        for (addr, validator) in chain.validators.iter() {
            let was_bonded = bonded_before.contains(addr);
            let expected = !whitelist.is_empty()
                && was_bonded
                && !whitelisted.contains(&format_address(addr));
            prop_assert_eq!(validator.jailed, expected);
        }
    }
}
