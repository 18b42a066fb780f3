/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that store information about validator sets and rotate the proposer among them.

use std::slice;

use super::{
    crypto_primitives::{CryptoHasher, Digest, VerifyingKey, VerifyingKeyBytes},
    data_types::{CryptoHash, Power, TotalPower},
};

/// Maximum spread between the highest and lowest proposer priority, as a multiple of total power.
const PRIORITY_WINDOW_SIZE_FACTOR: i64 = 2;

/// A validator's identity, its voting power, and its current priority in the proposer rotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validator {
    pub verifying_key: VerifyingKey,
    pub power: Power,
    pub proposer_priority: i64,
}

impl Validator {
    pub fn new(verifying_key: VerifyingKey, power: Power) -> Validator {
        Validator {
            verifying_key,
            power,
            proposer_priority: 0,
        }
    }

    pub fn key_bytes(&self) -> VerifyingKeyBytes {
        self.verifying_key.to_bytes()
    }

    // Higher priority wins; ties go to the validator with the smaller key.
    fn compare_proposer_priority<'a>(&'a self, other: &'a Validator) -> &'a Validator {
        if self.proposer_priority > other.proposer_priority {
            self
        } else if self.proposer_priority < other.proposer_priority {
            other
        } else if self.key_bytes() <= other.key_bytes() {
            self
        } else {
            other
        }
    }
}

/// Stores the identities of validators, their voting powers, and their proposer priorities.
///
/// ## Ordering of validators
///
/// `ValidatorSet` internally maintains the list of validators in ascending order of their
/// `VerifyingKey`s. The position of a validator in this order is its *validator index*, which votes
/// carry so that the signer can be looked up without a search.
///
/// ## Proposer rotation
///
/// The proposer of a round is chosen by weighted round-robin. Every increment adds each validator's
/// power to its priority, picks the validator with the highest priority as proposer, and subtracts
/// the total power from the proposer's priority. Over `total_power` increments every validator is
/// picked a number of times equal to its power.
///
/// Rotation is copy-on-write from the point of view of the consensus state machine: see
/// [`copy_increment_proposer_priority`](Self::copy_increment_proposer_priority).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorSet {
    // Sorted in ascending order of verifying key bytes.
    validators: Vec<Validator>,
    proposer: Option<usize>,
}

impl ValidatorSet {
    /// Create a validator set from `validators` and select its first proposer.
    ///
    /// Validators with zero power are left out. If the same key appears more than once, the last
    /// power given for it wins.
    pub fn new(validators: Vec<(VerifyingKey, Power)>) -> ValidatorSet {
        let mut sorted: Vec<Validator> = Vec::with_capacity(validators.len());
        for (verifying_key, power) in validators {
            if power.int() == 0 {
                continue;
            }
            let key_bytes = verifying_key.to_bytes();
            match sorted.binary_search_by(|v| v.key_bytes().cmp(&key_bytes)) {
                Ok(pos) => sorted[pos].power = power,
                Err(pos) => sorted.insert(pos, Validator::new(verifying_key, power)),
            }
        }

        let mut validator_set = ValidatorSet {
            validators: sorted,
            proposer: None,
        };
        if !validator_set.is_empty() {
            validator_set.increment_proposer_priority(1);
        }
        validator_set
    }

    /// Get the number of validators in the validator set.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Get an iterator through the validators which walks through them in ascending key order.
    pub fn validators(&self) -> slice::Iter<Validator> {
        self.validators.iter()
    }

    /// Get the validator at `index`.
    pub fn get_by_index(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    /// Get the index of `verifying_key` in the validator set, if it is in the validator set.
    pub fn position(&self, verifying_key: &VerifyingKey) -> Option<usize> {
        let key_bytes = verifying_key.to_bytes();
        self.validators
            .binary_search_by(|v| v.key_bytes().cmp(&key_bytes))
            .ok()
    }

    pub fn contains(&self, verifying_key: &VerifyingKey) -> bool {
        self.position(verifying_key).is_some()
    }

    /// Get the power of `verifying_key` in the validator set.
    pub fn power(&self, verifying_key: &VerifyingKey) -> Option<Power> {
        self.position(verifying_key)
            .map(|index| self.validators[index].power)
    }

    /// Get the sum of the powers of all of the validators inside the validator set.
    pub fn total_power(&self) -> TotalPower {
        let mut total_power = TotalPower::new(0);
        for validator in &self.validators {
            total_power += validator.power
        }
        total_power
    }

    /// Compute the total power that a set of votes must match or exceed (`>=`) in order to count as
    /// a +2/3 quorum under the validator set.
    pub fn quorum(&self) -> TotalPower {
        TotalPower::new(self.total_power().int() * 2 / 3 + 1)
    }

    /// Get the proposer chosen by the most recent rotation.
    pub fn proposer(&self) -> Option<&Validator> {
        self.proposer.map(|index| &self.validators[index])
    }

    /// Advance the proposer rotation by `times` increments, in place.
    ///
    /// # Panics
    ///
    /// Panics if the validator set is empty or `times` is zero.
    pub fn increment_proposer_priority(&mut self, times: u32) {
        assert!(
            !self.is_empty(),
            "cannot rotate the proposer of an empty validator set"
        );
        assert!(times > 0, "proposer priority must be incremented at least once");

        let total_power = self.total_power_i64();
        self.rescale_priorities(PRIORITY_WINDOW_SIZE_FACTOR.saturating_mul(total_power));
        self.shift_by_average_priority();

        let mut proposer = 0;
        for _ in 0..times {
            proposer = self.increment_once(total_power);
        }
        self.proposer = Some(proposer);
    }

    /// Return a copy of this validator set with its proposer rotation advanced by `times`, leaving
    /// `self` untouched.
    pub fn copy_increment_proposer_priority(&self, times: u32) -> ValidatorSet {
        let mut copy = self.clone();
        copy.increment_proposer_priority(times);
        copy
    }

    /// Hash of the validator identities and powers, stored in block headers.
    pub fn hash(&self) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        for validator in &self.validators {
            hasher.update(validator.key_bytes());
            hasher.update(validator.power.int().to_le_bytes());
        }
        CryptoHash::new(hasher.finalize().into())
    }

    fn total_power_i64(&self) -> i64 {
        i64::try_from(self.total_power().int()).unwrap_or(i64::MAX)
    }

    fn increment_once(&mut self, total_power: i64) -> usize {
        for validator in self.validators.iter_mut() {
            validator.proposer_priority = validator
                .proposer_priority
                .saturating_add(validator.power.int() as i64);
        }

        let mut mostest = &self.validators[0];
        for validator in &self.validators[1..] {
            mostest = mostest.compare_proposer_priority(validator);
        }
        let index = self
            .validators
            .iter()
            .position(|v| v.verifying_key == mostest.verifying_key)
            .unwrap();

        let proposer = &mut self.validators[index];
        proposer.proposer_priority = proposer.proposer_priority.saturating_sub(total_power);
        index
    }

    // Keeps the distance between the highest and lowest priority within `diff_max`.
    fn rescale_priorities(&mut self, diff_max: i64) {
        if diff_max <= 0 {
            return;
        }
        let max = self
            .validators
            .iter()
            .map(|v| v.proposer_priority)
            .max()
            .unwrap_or(0);
        let min = self
            .validators
            .iter()
            .map(|v| v.proposer_priority)
            .min()
            .unwrap_or(0);
        let diff = max.saturating_sub(min);
        if diff > diff_max {
            let ratio = (diff + diff_max - 1) / diff_max;
            for validator in self.validators.iter_mut() {
                validator.proposer_priority /= ratio;
            }
        }
    }

    fn shift_by_average_priority(&mut self) {
        let len = self.validators.len() as i128;
        let sum: i128 = self
            .validators
            .iter()
            .map(|v| v.proposer_priority as i128)
            .sum();
        let average = (sum / len) as i64;
        for validator in self.validators.iter_mut() {
            validator.proposer_priority = validator.proposer_priority.saturating_sub(average);
        }
    }
}
