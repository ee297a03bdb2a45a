//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;
use std::time::Instant;

use common::timer;
use crypto::paillier;
use crypto::prelude::*;
use num_bigint::RandBigInt;
use num_traits::One;
use num_traits::Zero;

use crate::config::Id3Config;
use crate::id3::messages::*;
use crate::id3::traits::ComparisonParticipant;
use crate::id3::traits::Statistics;
use crate::id3::Attribute;
use crate::id3::DataLayer;
use crate::id3::NodeValuePair;
use crate::id3::ProtocolError;
use crate::id3::RoundId;

struct RoundState {
    factors: Vec<FactorPair>,
    /// `(r_j, s_j)` added to `(lhs_j, rhs_j)`
    masks: Vec<(BigUint, BigUint)>,
    opened: Instant,
}

/// Round ids already blinded. Round ids are handed out in increasing order,
/// so everything below `floor` is used and only ids past the first gap are
/// kept.
#[derive(Default)]
struct SeenRounds {
    floor: RoundId,
    above: HashSet<RoundId>,
}

impl SeenRounds {
    /// False when `round` was used before
    fn insert(&mut self, round: RoundId) -> bool {
        if round < self.floor || !self.above.insert(round) {
            return false;
        }
        while self.above.remove(&self.floor) {
            self.floor += 1;
        }
        true
    }
}

/// The party without the private key.
///
/// Answers statistics queries with ciphertexts and performs the blinding
/// steps of the comparison protocol. It only ever sees ciphertexts under
/// the key holder's public key.
pub struct Follower {
    data_layer: Arc<dyn DataLayer>,
    public_key: PublicKey,
    statistical_security: u32,
    round_timeout: Duration,
    rounds: Arc<RwLock<HashMap<RoundId, RoundState>>>,
    seen_rounds: Arc<RwLock<SeenRounds>>,
}

fn poisoned<T>(_: T) -> ProtocolError {
    ProtocolError::ProtocolAbort(String::from("follower round state is poisoned"))
}

impl Follower {
    pub fn new(data_layer: Arc<dyn DataLayer>, public_key: PublicKey, config: &Id3Config) -> Follower {
        Follower {
            data_layer,
            public_key,
            statistical_security: config.statistical_security,
            round_timeout: config.round_timeout(),
            rounds: Arc::new(RwLock::default()),
            seen_rounds: Arc::new(RwLock::default()),
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Rounds blinded but not yet closed
    pub fn open_rounds(&self) -> usize {
        self.rounds.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn discard_rounds(&self) {
        if let Ok(mut rounds) = self.rounds.write() {
            if !rounds.is_empty() {
                warn!("Discarding {} open rounds", rounds.len());
            }
            rounds.clear();
        }
    }

    fn purge_expired(&self) -> Result<(), ProtocolError> {
        let mut rounds = self.rounds.write().map_err(poisoned)?;
        let timeout = self.round_timeout;
        let before = rounds.len();
        rounds.retain(|_, state| state.opened.elapsed() < timeout);
        if rounds.len() < before {
            warn!("Purged {} expired rounds", before - rounds.len());
        }
        Ok(())
    }

    fn take_round(&self, round: RoundId, expected: usize) -> Result<RoundState, ProtocolError> {
        self.purge_expired()?;
        let state = self
            .rounds
            .write()
            .map_err(poisoned)?
            .remove(&round)
            .ok_or_else(|| {
                ProtocolError::ProtocolAbort(format!("round {} is unknown or expired", round))
            })?;
        if state.factors.len() != expected {
            return Err(ProtocolError::ProtocolAbort(format!(
                "round {} holds {} pairs, got {} products",
                round,
                state.factors.len(),
                expected
            )));
        }
        Ok(state)
    }

    /// `Enc(ab) = Enc((a + r)(b + s)) - s Enc(a) - r Enc(b) - rs`
    fn unblind(&self, state: &RoundState, blinded_products: &[Ciphertext]) -> Vec<Ciphertext> {
        let pk = &self.public_key;
        blinded_products
            .iter()
            .zip(state.factors.iter().zip(state.masks.iter()))
            .map(|(p, (pair, (r, s)))| {
                let p = paillier::sub(pk, p, &paillier::scalar_mul(pk, &pair.lhs, s));
                let p = paillier::sub(pk, &p, &paillier::scalar_mul(pk, &pair.rhs, r));
                paillier::sub_plain(pk, &p, &(r * s))
            })
            .collect()
    }

    fn encrypt_counts(&self, counts: &[u64]) -> Result<TPayload, ProtocolError> {
        Ok(paillier::encrypt_many(&self.public_key, counts)?)
    }
}

impl Drop for Follower {
    fn drop(&mut self) {
        self.discard_rounds();
    }
}

impl Statistics for Follower {
    fn check_schema(
        &self,
        attributes: &[Attribute],
        path: &[NodeValuePair],
    ) -> Result<(), ProtocolError> {
        if let Some(a) = attributes
            .iter()
            .find(|a| !self.data_layer.has_attribute(a.name()))
        {
            return Err(ProtocolError::Schema(format!(
                "follower has no attribute {}",
                a.name()
            )));
        }
        self.data_layer.check_path(path)
    }

    fn class_counts(&self, path: &[NodeValuePair]) -> Result<EncryptedClassCounts, ProtocolError> {
        let counts = self.data_layer.class_counts(path)?;
        let counts = self.encrypt_counts(&counts)?;
        Ok(EncryptedClassCounts { counts })
    }

    fn attribute_counts(
        &self,
        path: &[NodeValuePair],
        attribute: &Attribute,
    ) -> Result<EncryptedAttributeCounts, ProtocolError> {
        let _t = timer::Builder::new()
            .label("follower")
            .extra_label(&format!("attribute counts {}", attribute.name()))
            .size(attribute.len())
            .build();
        let value_counts = self.data_layer.attribute_class_counts(path, attribute)?;

        let values = value_counts
            .iter()
            .map(|counts| {
                let squares = counts
                    .iter()
                    .map(|c| {
                        c.checked_mul(*c).ok_or_else(|| {
                            ProtocolError::CapacityExceeded(format!("count {} squared", c))
                        })
                    })
                    .collect::<Result<Vec<u64>, ProtocolError>>()?;
                let empty = u64::from(counts.iter().all(|c| *c == 0));
                Ok(EncryptedValueCounts {
                    counts: self.encrypt_counts(counts)?,
                    squares: self.encrypt_counts(&squares)?,
                    empty: paillier::encrypt_u64(&self.public_key, empty)?,
                })
            })
            .collect::<Result<Vec<EncryptedValueCounts>, ProtocolError>>()?;

        Ok(EncryptedAttributeCounts {
            attribute: String::from(attribute.name()),
            values,
        })
    }
}

impl ComparisonParticipant for Follower {
    fn blind(&self, request: BlindRequest) -> Result<BlindResponse, ProtocolError> {
        self.purge_expired()?;
        if !self.seen_rounds.write().map_err(poisoned)?.insert(request.round) {
            return Err(ProtocolError::ProtocolAbort(format!(
                "round {} was already used",
                request.round
            )));
        }

        let pk = &self.public_key;
        let mut rng = rand::thread_rng();
        let masks: Vec<(BigUint, BigUint)> = request
            .factors
            .iter()
            .map(|_| (rng.gen_biguint_below(&pk.n), rng.gen_biguint_below(&pk.n)))
            .collect();
        let blinded = request
            .factors
            .iter()
            .zip(masks.iter())
            .map(|(pair, (r, s))| {
                FactorPair::new(
                    paillier::rerandomize(pk, &paillier::add_plain(pk, &pair.lhs, r)),
                    paillier::rerandomize(pk, &paillier::add_plain(pk, &pair.rhs, s)),
                )
            })
            .collect();

        debug!("Blinded {} pairs for round {}", masks.len(), request.round);
        self.rounds.write().map_err(poisoned)?.insert(
            request.round,
            RoundState {
                factors: request.factors,
                masks,
                opened: Instant::now(),
            },
        );
        Ok(BlindResponse {
            round: request.round,
            blinded,
        })
    }

    fn unblind_products(&self, request: ProductRequest) -> Result<ProductResponse, ProtocolError> {
        let state = self.take_round(request.round, request.blinded_products.len())?;
        let pk = &self.public_key;
        let products = self
            .unblind(&state, &request.blinded_products)
            .iter()
            .map(|p| paillier::rerandomize(pk, p))
            .collect();
        Ok(ProductResponse {
            round: request.round,
            products,
        })
    }

    fn compare(&self, request: CompareRequest) -> Result<CompareResponse, ProtocolError> {
        if request.blinded_products.len() != 2 {
            self.abort(request.round);
            return Err(ProtocolError::ProtocolAbort(format!(
                "compare expects 2 products, got {}",
                request.blinded_products.len()
            )));
        }
        let state = self.take_round(request.round, 2)?;
        let pk = &self.public_key;
        let products = self.unblind(&state, &request.blinded_products);

        // 2 (P0 - P1) - 1 is positive iff P0 > P1 and never zero
        let diff = paillier::sub(pk, &products[0], &products[1]);
        let diff = paillier::sub_plain(
            pk,
            &paillier::scalar_mul(pk, &diff, &BigUint::from(2_u32)),
            &BigUint::one(),
        );

        // the key holder learns the sign and, through rho < 2^kappa, the
        // magnitude of the difference up to a factor of 2^kappa
        let mut rng = rand::thread_rng();
        let bound = BigUint::one() << self.statistical_security;
        let rho = rng.gen_biguint_range(&BigUint::one(), &bound);
        let rho_prime = rng.gen_biguint_range(&BigUint::zero(), &rho);
        let blinded = paillier::add_plain(pk, &paillier::scalar_mul(pk, &diff, &rho), &rho_prime);

        Ok(CompareResponse {
            round: request.round,
            blinded_difference: paillier::rerandomize(pk, &blinded),
        })
    }

    fn zero_test(&self, request: ZeroTestRequest) -> Result<ZeroTestResponse, ProtocolError> {
        let pk = &self.public_key;
        let mut rng = rand::thread_rng();
        let blinded = request
            .values
            .iter()
            .map(|v| {
                let rho = rng.gen_biguint_range(&BigUint::one(), &pk.n);
                paillier::rerandomize(pk, &paillier::scalar_mul(pk, v, &rho))
            })
            .collect();
        Ok(ZeroTestResponse { blinded })
    }

    fn abort(&self, round: RoundId) {
        if let Ok(mut rounds) = self.rounds.write() {
            if rounds.remove(&round).is_some() {
                warn!("Round {} aborted", round);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use num_traits::Signed;

    use super::*;
    use crate::id3::attribute::make_row;
    use crate::id3::ListDataLayer;

    fn setup(timeout_ms: u64) -> (KeyPair, Follower) {
        let key_pair = KeyPair::generate(512).unwrap();
        let class = Attribute::from_values("class", &["Yes", "No"]).unwrap();
        let rows = vec![
            make_row(&[("a", "x"), ("class", "Yes")]),
            make_row(&[("a", "x"), ("class", "Yes")]),
            make_row(&[("a", "y"), ("class", "No")]),
        ];
        let dl = ListDataLayer::new(&["a"], class, rows).unwrap();
        let config = Id3Config {
            key_bits: 512,
            round_timeout_ms: timeout_ms,
            ..Id3Config::default()
        };
        let follower = Follower::new(Arc::new(dl), key_pair.public_key().clone(), &config);
        (key_pair, follower)
    }

    fn enc(kp: &KeyPair, m: u64) -> Ciphertext {
        paillier::encrypt_u64(kp.public_key(), m).unwrap()
    }

    fn dec(kp: &KeyPair, c: &Ciphertext) -> u64 {
        kp.decrypt(c).unwrap().to_u64_digits().first().copied().unwrap_or(0)
    }

    /// Plays the key holder's half of a multiplication round
    fn reencrypted_products(kp: &KeyPair, blinded: &[FactorPair]) -> TPayload {
        let pk = kp.public_key();
        blinded
            .iter()
            .map(|pair| {
                let a = kp.decrypt(&pair.lhs).unwrap();
                let b = kp.decrypt(&pair.rhs).unwrap();
                paillier::encrypt(pk, &((a * b) % &pk.n)).unwrap()
            })
            .collect()
    }

    #[test]
    fn statistics_are_encrypted_counts() {
        let (kp, follower) = setup(30_000);
        let counts = follower.class_counts(&[]).unwrap();
        let plain: Vec<u64> = counts.counts.iter().map(|c| dec(&kp, c)).collect();
        assert_eq!(plain, vec![2, 1]);

        let a = Attribute::from_values("a", &["x", "y", "z"]).unwrap();
        let stats = follower.attribute_counts(&[], &a).unwrap();
        assert_eq!(stats.attribute, "a");
        assert_eq!(stats.values.len(), 3);
        let x = &stats.values[0];
        assert_eq!(dec(&kp, &x.counts[0]), 2);
        assert_eq!(dec(&kp, &x.squares[0]), 4);
        assert_eq!(dec(&kp, &x.empty), 0);
        assert_eq!(dec(&kp, &stats.values[2].empty), 1);

        let unknown = Attribute::from_values("b", &["x"]).unwrap();
        assert!(matches!(
            follower.attribute_counts(&[], &unknown),
            Err(ProtocolError::Schema(_))
        ));
    }

    #[test]
    fn schema_check_names_unknown_attributes() {
        let (_, follower) = setup(30_000);
        let a = Attribute::from_values("a", &["x", "y"]).unwrap();
        let b = Attribute::from_values("b", &["x"]).unwrap();
        assert!(follower.check_schema(&[a.clone()], &[]).is_ok());
        assert!(follower
            .check_schema(&[a.clone()], &[NodeValuePair::new("a", "x")])
            .is_ok());
        assert_eq!(
            follower.check_schema(&[a.clone(), b], &[]),
            Err(ProtocolError::Schema(String::from("follower has no attribute b")))
        );
        assert!(matches!(
            follower.check_schema(&[a], &[NodeValuePair::new("b", "x")]),
            Err(ProtocolError::Schema(_))
        ));
    }

    #[test]
    fn multiplication_round() {
        let (kp, follower) = setup(30_000);
        let factors = vec![
            FactorPair::new(enc(&kp, 6), enc(&kp, 7)),
            FactorPair::new(enc(&kp, 0), enc(&kp, 9)),
        ];
        let blinded = follower
            .blind(BlindRequest { round: 1, factors })
            .unwrap();
        assert_eq!(follower.open_rounds(), 1);
        let products = follower
            .unblind_products(ProductRequest {
                round: 1,
                blinded_products: reencrypted_products(&kp, &blinded.blinded),
            })
            .unwrap();
        assert_eq!(dec(&kp, &products.products[0]), 42);
        assert_eq!(dec(&kp, &products.products[1]), 0);
        assert_eq!(follower.open_rounds(), 0);
    }

    #[test]
    fn compare_round_sign() {
        let (kp, follower) = setup(30_000);
        for (round, (n_i, d_b, n_b, d_i, wins)) in
            [(3, 2, 1, 1, true), (1, 2, 2, 1, false), (2, 2, 4, 1, false)]
                .iter()
                .enumerate()
        {
            let round = round as RoundId;
            let factors = vec![
                FactorPair::new(enc(&kp, *n_i), enc(&kp, *d_b)),
                FactorPair::new(enc(&kp, *n_b), enc(&kp, *d_i)),
            ];
            let blinded = follower.blind(BlindRequest { round, factors }).unwrap();
            let response = follower
                .compare(CompareRequest {
                    round,
                    blinded_products: reencrypted_products(&kp, &blinded.blinded),
                })
                .unwrap();
            let value = kp.decrypt_signed(&response.blinded_difference).unwrap();
            assert_eq!(value > BigInt::zero(), *wins);
        }
    }

    #[test]
    fn zero_test_keeps_only_zero() {
        let (kp, follower) = setup(30_000);
        let values = vec![enc(&kp, 0), enc(&kp, 5)];
        let blinded = follower.zero_test(ZeroTestRequest { values }).unwrap();
        assert!(kp.decrypt(&blinded.blinded[0]).unwrap().is_zero());
        assert!(!kp.decrypt(&blinded.blinded[1]).unwrap().is_zero());
    }

    #[test]
    fn reused_and_unknown_rounds_abort() {
        let (kp, follower) = setup(30_000);
        let request = BlindRequest {
            round: 9,
            factors: vec![FactorPair::new(enc(&kp, 1), enc(&kp, 1))],
        };
        follower.blind(request.clone()).unwrap();
        assert!(matches!(
            follower.blind(request),
            Err(ProtocolError::ProtocolAbort(_))
        ));

        let unknown = follower.unblind_products(ProductRequest {
            round: 10,
            blinded_products: vec![enc(&kp, 1)],
        });
        assert!(matches!(unknown, Err(ProtocolError::ProtocolAbort(_))));

        follower.abort(9);
        assert_eq!(follower.open_rounds(), 0);

        follower
            .blind(BlindRequest {
                round: 11,
                factors: vec![FactorPair::new(enc(&kp, 1), enc(&kp, 1))],
            })
            .unwrap();
        assert_eq!(follower.open_rounds(), 1);
        follower.discard_rounds();
        assert_eq!(follower.open_rounds(), 0);
    }

    #[test]
    fn seen_rounds_keep_only_ids_past_the_first_gap() {
        let mut seen = SeenRounds::default();
        for round in [0, 2, 1, 3, 5] {
            assert!(seen.insert(round));
        }
        assert_eq!(seen.floor, 4);
        assert_eq!(seen.above, HashSet::from([5]));
        assert!(!seen.insert(1));
        assert!(!seen.insert(5));
        assert!(seen.insert(4));
        assert_eq!(seen.floor, 6);
        assert!(seen.above.is_empty());

        let (kp, follower) = setup(30_000);
        for round in 0..40 {
            follower
                .blind(BlindRequest {
                    round,
                    factors: vec![FactorPair::new(enc(&kp, 1), enc(&kp, 1))],
                })
                .unwrap();
            follower.abort(round);
        }
        let seen = follower.seen_rounds.read().unwrap();
        assert_eq!(seen.floor, 40);
        assert!(seen.above.is_empty());
    }

    #[test]
    fn compare_reveals_sign_within_mask_bound() {
        let (kp, follower) = setup(30_000);
        let kappa = follower.statistical_security;
        // P0 - P1 for each pair of products
        for (round, (p0, p1)) in [(50_u64, 3_u64), (3, 50), (7, 7), (1000, 1)].iter().enumerate() {
            let round = round as RoundId;
            let factors = vec![
                FactorPair::new(enc(&kp, *p0), enc(&kp, 1)),
                FactorPair::new(enc(&kp, *p1), enc(&kp, 1)),
            ];
            let blinded = follower.blind(BlindRequest { round, factors }).unwrap();
            let response = follower
                .compare(CompareRequest {
                    round,
                    blinded_products: reencrypted_products(&kp, &blinded.blinded),
                })
                .unwrap();
            let value = kp.decrypt_signed(&response.blinded_difference).unwrap();
            let delta = 2 * (*p0 as i64 - *p1 as i64) - 1;
            assert_eq!(value > BigInt::zero(), delta > 0);
            // |rho delta + rho'| < 2^kappa (|delta| + 1)
            let bound = (BigInt::one() << kappa) * BigInt::from(delta.abs() + 1);
            assert!(value.abs() < bound);
        }
    }

    #[test]
    fn expired_rounds_are_purged() {
        let (kp, follower) = setup(1);
        follower
            .blind(BlindRequest {
                round: 1,
                factors: vec![FactorPair::new(enc(&kp, 1), enc(&kp, 1))],
            })
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let late = follower.unblind_products(ProductRequest {
            round: 1,
            blinded_products: vec![enc(&kp, 1)],
        });
        assert!(matches!(late, Err(ProtocolError::ProtocolAbort(_))));
        assert_eq!(follower.open_rounds(), 0);
    }
}
