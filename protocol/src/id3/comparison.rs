//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use common::metrics::Metrics;
use common::timer;
use crypto::paillier;
use crypto::prelude::*;
use num_traits::Signed;
use num_traits::Zero;

use crate::id3::messages::*;
use crate::id3::traits::ComparisonParticipant;
use crate::id3::ProtocolError;
use crate::id3::RoundId;

/// `numerator / denominator` under encryption, the denominator is positive
#[derive(Clone, Debug, PartialEq)]
pub struct EncryptedFraction {
    pub numerator: Ciphertext,
    pub denominator: Ciphertext,
}

impl EncryptedFraction {
    pub fn new(numerator: Ciphertext, denominator: Ciphertext) -> EncryptedFraction {
        EncryptedFraction {
            numerator,
            denominator,
        }
    }
}

/// Key holder side of the two round blinding protocols.
///
/// Only values blinded by the participant are ever decrypted here: uniform
/// masks for products, a multiplicative mask plus noise for comparisons and
/// a uniform factor for zero tests.
pub struct SecureComparator<'a, P: ComparisonParticipant + ?Sized> {
    key_pair: &'a KeyPair,
    participant: &'a P,
    rounds: &'a AtomicU64,
    metrics: &'a Metrics,
}

impl<'a, P: ComparisonParticipant + ?Sized> SecureComparator<'a, P> {
    pub fn new(
        key_pair: &'a KeyPair,
        participant: &'a P,
        rounds: &'a AtomicU64,
        metrics: &'a Metrics,
    ) -> SecureComparator<'a, P> {
        SecureComparator {
            key_pair,
            participant,
            rounds,
            metrics,
        }
    }

    fn next_round(&self) -> RoundId {
        self.rounds.fetch_add(1, Ordering::SeqCst)
    }

    /// Fresh randomness on every ciphertext sent to the participant, so it
    /// cannot relate them to the statistics it encrypted itself
    fn refresh(&self, c: &Ciphertext) -> Ciphertext {
        paillier::rerandomize(self.key_pair.public_key(), c)
    }

    fn check_round(&self, expected: RoundId, got: RoundId) -> Result<(), ProtocolError> {
        if expected != got {
            return Err(ProtocolError::ProtocolAbort(format!(
                "reply for round {} while waiting for round {}",
                got, expected
            )));
        }
        Ok(())
    }

    /// First round: have the participant blind the factors, then return
    /// `Enc((a + r)(b + s) mod n)` for each pair
    fn blinded_products(
        &self,
        round: RoundId,
        factors: Vec<FactorPair>,
    ) -> Result<TPayload, ProtocolError> {
        let pairs = factors.len();
        let factors = factors
            .iter()
            .map(|p| FactorPair::new(self.refresh(&p.lhs), self.refresh(&p.rhs)))
            .collect();
        let response = self.participant.blind(BlindRequest { round, factors })?;
        self.check_round(round, response.round)?;
        if response.blinded.len() != pairs {
            return Err(ProtocolError::ProtocolAbort(format!(
                "round {}: {} blinded pairs for {} factors",
                round,
                response.blinded.len(),
                pairs
            )));
        }

        let pk = self.key_pair.public_key();
        let mut products = Vec::with_capacity(pairs);
        for pair in response.blinded.iter() {
            let a = self.key_pair.decrypt(&pair.lhs)?;
            let b = self.key_pair.decrypt(&pair.rhs)?;
            products.push(paillier::encrypt(pk, &((a * b) % &pk.n))?);
        }
        self.metrics.add_decryptions(2 * pairs);
        Ok(products)
    }

    /// Aborts the round on the participant side when `result` failed
    fn close<T>(&self, round: RoundId, result: Result<T, ProtocolError>) -> Result<T, ProtocolError> {
        if let Err(e) = &result {
            warn!("Round {} failed: {}", round, e);
            self.participant.abort(round);
        }
        result
    }

    /// `Enc(a_j * b_j)` for every pair, in one multiplication round
    pub fn multiply(&self, factors: Vec<FactorPair>) -> Result<TPayload, ProtocolError> {
        if factors.is_empty() {
            return Ok(Vec::new());
        }
        let pairs = factors.len();
        let round = self.next_round();
        let _t = timer::Builder::new()
            .label("multiply")
            .extra_label(&format!("round {}", round))
            .size(pairs)
            .build();

        let result = self.blinded_products(round, factors).and_then(|blinded| {
            let response = self.participant.unblind_products(ProductRequest {
                round,
                blinded_products: blinded,
            })?;
            self.check_round(round, response.round)?;
            if response.products.len() != pairs {
                return Err(ProtocolError::ProtocolAbort(format!(
                    "round {}: {} products for {} pairs",
                    round,
                    response.products.len(),
                    pairs
                )));
            }
            Ok(response.products)
        });
        let products = self.close(round, result)?;
        self.metrics.add_secure_products(pairs);
        Ok(products)
    }

    /// Whether `challenger > best`, i.e. `N_c D_b > N_b D_c`
    pub fn greater_than(
        &self,
        challenger: &EncryptedFraction,
        best: &EncryptedFraction,
    ) -> Result<bool, ProtocolError> {
        let round = self.next_round();
        let factors = vec![
            FactorPair::new(challenger.numerator.clone(), best.denominator.clone()),
            FactorPair::new(best.numerator.clone(), challenger.denominator.clone()),
        ];

        let result = self.blinded_products(round, factors).and_then(|blinded| {
            let response = self.participant.compare(CompareRequest {
                round,
                blinded_products: blinded,
            })?;
            self.check_round(round, response.round)?;
            Ok(self.key_pair.decrypt_signed(&response.blinded_difference)?)
        });
        let value = self.close(round, result)?;
        self.metrics.add_decryptions(1);
        self.metrics.add_comparison();
        debug!("Round {} compared, challenger wins: {}", round, value.is_positive());
        Ok(value.is_positive())
    }

    /// Index of the largest fraction after `k - 1` comparisons, the earliest
    /// one on ties
    pub fn argmax(&self, fractions: &[EncryptedFraction]) -> Result<usize, ProtocolError> {
        if fractions.is_empty() {
            return Err(ProtocolError::ProtocolAbort(String::from(
                "nothing to compare",
            )));
        }
        let _t = timer::Builder::new()
            .label("argmax")
            .size(fractions.len())
            .build();
        let mut best = 0;
        for i in 1..fractions.len() {
            if self.greater_than(&fractions[i], &fractions[best])? {
                best = i;
            }
        }
        Ok(best)
    }

    /// Which of the encrypted values are zero, nothing else is learned
    pub fn zero_test(&self, values: TPayload) -> Result<Vec<bool>, ProtocolError> {
        let expected = values.len();
        let values = values.iter().map(|v| self.refresh(v)).collect();
        let response = self.participant.zero_test(ZeroTestRequest { values })?;
        if response.blinded.len() != expected {
            return Err(ProtocolError::ProtocolAbort(format!(
                "{} zero test results for {} values",
                response.blinded.len(),
                expected
            )));
        }
        let plain = self.key_pair.decrypt_many(&response.blinded)?;
        self.metrics.add_zero_tests(expected);
        self.metrics.add_decryptions(expected);
        Ok(plain.iter().map(|v| v.is_zero()).collect())
    }
}
