//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::sync::Mutex;

use common::metrics::Metrics;
use common::timer;
use crypto::paillier;
use crypto::prelude::*;
use num_traits::ToPrimitive;
use rayon::prelude::*;

use crate::config::Id3Config;
use crate::id3::comparison::EncryptedFraction;
use crate::id3::comparison::SecureComparator;
use crate::id3::gain::required_plaintext_bits;
use crate::id3::messages::FactorPair;
use crate::id3::traits::Participant;
use crate::id3::Attribute;
use crate::id3::DataLayer;
use crate::id3::Id3Node;
use crate::id3::NodeValuePair;
use crate::id3::ProtocolError;

/// Majority class of an internal node, only resolved when a child is empty
struct NodeMajority {
    class_counts: TPayload,
    label: Mutex<Option<String>>,
}

impl NodeMajority {
    fn new(class_counts: TPayload) -> NodeMajority {
        NodeMajority {
            class_counts,
            label: Mutex::new(None),
        }
    }
}

/// The key holder. Drives the recursive construction and owns the only
/// private key.
pub struct SecureId3<P: Participant> {
    data_layer: Arc<dyn DataLayer>,
    key_pair: KeyPair,
    participant: P,
    config: Id3Config,
    rounds: AtomicU64,
    metrics: Metrics,
}

impl<P: Participant> SecureId3<P> {
    pub fn new(
        data_layer: Arc<dyn DataLayer>,
        key_pair: KeyPair,
        participant: P,
        config: Id3Config,
    ) -> SecureId3<P> {
        SecureId3 {
            data_layer,
            key_pair,
            participant,
            config,
            rounds: AtomicU64::new(0),
            metrics: Metrics::new("secure_id3"),
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        self.key_pair.public_key()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn participant(&self) -> &P {
        &self.participant
    }

    /// Learns the tree over the joint rows matching `path`, splitting on
    /// `attributes` only.
    pub fn run(
        &self,
        attributes: &[Attribute],
        path: &[NodeValuePair],
    ) -> Result<Id3Node, ProtocolError> {
        let mut names = HashSet::new();
        for a in attributes.iter() {
            if !self.data_layer.has_attribute(a.name()) {
                return Err(ProtocolError::Schema(format!(
                    "unknown attribute {}",
                    a.name()
                )));
            }
            if !names.insert(a.name()) {
                return Err(ProtocolError::Schema(format!(
                    "attribute {} listed twice",
                    a.name()
                )));
            }
        }
        self.data_layer.check_path(path)?;
        self.participant.check_schema(attributes, path)?;

        info!(
            "Building secure ID3 over {} attributes with a {} bit key",
            attributes.len(),
            self.public_key().bits()
        );
        let t = timer::Timer::new_silent("secure_id3");
        let tree = self.build_node(attributes, path, None)?;
        t.elapsed_log(Some("tree"));
        info!(
            "Secure ID3 finished, depth {} with {} leaves",
            tree.depth(),
            tree.leaves()
        );
        Ok(tree)
    }

    fn comparator(&self) -> SecureComparator<'_, P> {
        SecureComparator::new(&self.key_pair, &self.participant, &self.rounds, &self.metrics)
    }

    fn class_values(&self) -> &[String] {
        self.data_layer.class_attribute().values()
    }

    fn leaf(&self, class: String) -> Id3Node {
        self.metrics.add_leaf();
        Id3Node::leaf(class)
    }

    fn build_node(
        &self,
        candidates: &[Attribute],
        path: &[NodeValuePair],
        parent: Option<&NodeMajority>,
    ) -> Result<Id3Node, ProtocolError> {
        self.metrics.add_node();
        let pk = self.public_key();

        let class_counts = self.joint_class_counts(path)?;
        let total = self.decrypt_count(&paillier::sum(pk, &class_counts))?;
        debug!("Node at depth {} covers {} rows", path.len(), total);

        if total == 0 {
            return match parent {
                Some(majority) => Ok(self.leaf(self.majority_class(majority)?)),
                None => Err(ProtocolError::EmptyTrainingSet),
            };
        }

        // pure iff x_c == total for some class
        let shifted = class_counts
            .iter()
            .map(|c| paillier::sub_plain(pk, c, &BigUint::from(total)))
            .collect();
        let pure = self.comparator().zero_test(shifted)?;
        if let Some(i) = pure.iter().position(|z| *z) {
            return Ok(self.leaf(self.class_values()[i].clone()));
        }

        let majority = NodeMajority::new(class_counts);
        if candidates.is_empty() {
            return Ok(self.leaf(self.majority_class(&majority)?));
        }

        let winner = &candidates[self.select_attribute(candidates, path, total)?];
        info!("Splitting on {} at depth {}", winner.name(), path.len());
        let remaining: Vec<Attribute> = candidates
            .iter()
            .filter(|a| a.name() != winner.name())
            .cloned()
            .collect();

        let build_child = |value: &String| -> Result<(String, Id3Node), ProtocolError> {
            let mut child_path = path.to_vec();
            child_path.push(NodeValuePair::new(winner.name(), value.as_str()));
            let child = self.build_node(&remaining, &child_path, Some(&majority))?;
            Ok((value.clone(), child))
        };
        let children = if self.config.parallel_branches {
            winner
                .values()
                .par_iter()
                .map(&build_child)
                .collect::<Result<Vec<_>, ProtocolError>>()?
        } else {
            winner
                .values()
                .iter()
                .map(&build_child)
                .collect::<Result<Vec<_>, ProtocolError>>()?
        };
        Ok(Id3Node::internal(winner.name(), children))
    }

    fn decrypt_count(&self, c: &Ciphertext) -> Result<u64, ProtocolError> {
        self.metrics.add_decryptions(1);
        self.key_pair
            .decrypt(c)?
            .to_u64()
            .ok_or_else(|| ProtocolError::CapacityExceeded(String::from("row count above 2^64")))
    }

    /// `Enc(x_c) = Enc(f_c) + m_c` per class
    fn joint_class_counts(&self, path: &[NodeValuePair]) -> Result<TPayload, ProtocolError> {
        let own = self.data_layer.class_counts(path)?;
        let theirs = self.participant.class_counts(path)?;
        self.metrics.add_stat_requests(1);
        if theirs.counts.len() != own.len() {
            return Err(ProtocolError::ProtocolAbort(format!(
                "{} class counts for {} classes",
                theirs.counts.len(),
                own.len()
            )));
        }
        let pk = self.public_key();
        Ok(theirs
            .counts
            .iter()
            .zip(own.iter())
            .map(|(f, m)| paillier::add_plain(pk, f, &BigUint::from(*m)))
            .collect())
    }

    /// `(Enc(S_v), Enc(d_v))` for every value of `attribute`
    fn joint_value_terms(
        &self,
        path: &[NodeValuePair],
        attribute: &Attribute,
    ) -> Result<Vec<EncryptedFraction>, ProtocolError> {
        let own = self.data_layer.attribute_class_counts(path, attribute)?;
        let theirs = self.participant.attribute_counts(path, attribute)?;
        self.metrics.add_stat_requests(1);

        let classes = self.class_values().len();
        let malformed = theirs.attribute != attribute.name()
            || theirs.values.len() != attribute.len()
            || theirs
                .values
                .iter()
                .any(|v| v.counts.len() != classes || v.squares.len() != classes);
        if malformed {
            return Err(ProtocolError::ProtocolAbort(format!(
                "malformed statistics for attribute {}",
                attribute.name()
            )));
        }

        let pk = self.public_key();
        let two = BigUint::from(2_u32);
        let mut terms = Vec::with_capacity(attribute.len());
        for (m_v, f_v) in own.iter().zip(theirs.values.iter()) {
            let mut counts = Vec::with_capacity(classes);
            let mut squares = Vec::with_capacity(classes);
            for (c, m) in m_v.iter().enumerate() {
                let m = BigUint::from(*m);
                counts.push(paillier::add_plain(pk, &f_v.counts[c], &m));
                // (f + m)^2 = f^2 + 2mf + m^2
                let cross = paillier::scalar_mul(pk, &f_v.counts[c], &(&two * &m));
                squares.push(paillier::add_plain(
                    pk,
                    &paillier::add(pk, &f_v.squares[c], &cross),
                    &(&m * &m),
                ));
            }
            let x_v = paillier::sum(pk, &counts);
            // z_v = [m_v == 0] * [f_v == 0]
            let z_v = if m_v.iter().all(|m| *m == 0) {
                paillier::rerandomize(pk, &f_v.empty)
            } else {
                paillier::encrypt_u64(pk, 0)?
            };
            terms.push(EncryptedFraction::new(
                paillier::sum(pk, &squares),
                paillier::add(pk, &x_v, &z_v),
            ));
        }
        Ok(terms)
    }

    fn check_capacity(&self, total: u64, max_values: usize) -> Result<(), ProtocolError> {
        let needed = required_plaintext_bits(total, max_values, self.config.statistical_security);
        let available = self.public_key().bits() - 1;
        if needed >= available {
            return Err(ProtocolError::CapacityExceeded(format!(
                "{} rows over {} values need {} bits, the key offers {}",
                total, max_values, needed, available
            )));
        }
        Ok(())
    }

    /// Sums each candidate's value terms without division. Every step
    /// multiplies once per candidate that still has terms left, all in one
    /// batch: `(N, D) := (N d_v + S_v D, D d_v)`.
    fn combine_terms(
        &self,
        terms: Vec<Vec<EncryptedFraction>>,
    ) -> Result<Vec<EncryptedFraction>, ProtocolError> {
        let pk = self.public_key();
        let steps = terms.iter().map(|t| t.len()).max().unwrap_or(0);
        let mut scores: Vec<EncryptedFraction> = terms
            .iter()
            .map(|t| {
                t.first().cloned().ok_or_else(|| {
                    ProtocolError::Schema(String::from("attribute without values"))
                })
            })
            .collect::<Result<_, _>>()?;

        let comparator = self.comparator();
        for step in 1..steps {
            let mut factors = Vec::new();
            let mut owners = Vec::new();
            for (i, t) in terms.iter().enumerate() {
                if let Some(term) = t.get(step) {
                    let acc = &scores[i];
                    factors.push(FactorPair::new(acc.numerator.clone(), term.denominator.clone()));
                    factors.push(FactorPair::new(term.numerator.clone(), acc.denominator.clone()));
                    factors.push(FactorPair::new(acc.denominator.clone(), term.denominator.clone()));
                    owners.push(i);
                }
            }
            let products = comparator.multiply(factors)?;
            for (p, i) in products.chunks(3).zip(owners) {
                scores[i] = EncryptedFraction::new(paillier::add(pk, &p[0], &p[1]), p[2].clone());
            }
        }
        Ok(scores)
    }

    fn select_attribute(
        &self,
        candidates: &[Attribute],
        path: &[NodeValuePair],
        total: u64,
    ) -> Result<usize, ProtocolError> {
        if candidates.len() == 1 {
            return Ok(0);
        }
        let max_values = candidates.iter().map(|a| a.len()).max().unwrap_or(1);
        self.check_capacity(total, max_values)?;

        let _t = timer::Builder::new()
            .label("select_attribute")
            .extra_label(&format!("depth {}", path.len()))
            .size(candidates.len())
            .build();
        let terms = candidates
            .iter()
            .map(|a| self.joint_value_terms(path, a))
            .collect::<Result<Vec<_>, ProtocolError>>()?;
        let scores = self.combine_terms(terms)?;
        self.comparator().argmax(&scores)
    }

    fn majority_class(&self, majority: &NodeMajority) -> Result<String, ProtocolError> {
        let mut label = majority.label.lock().map_err(|_| {
            ProtocolError::ProtocolAbort(String::from("majority state is poisoned"))
        })?;
        if let Some(class) = label.as_ref() {
            return Ok(class.clone());
        }
        let pk = self.public_key();
        let one = paillier::encrypt_u64(pk, 1)?;
        let fractions: Vec<EncryptedFraction> = majority
            .class_counts
            .iter()
            .map(|c| EncryptedFraction::new(c.clone(), one.clone()))
            .collect();
        let class = self.class_values()[self.comparator().argmax(&fractions)?].clone();
        debug!("Majority class {}", class);
        *label = Some(class.clone());
        Ok(class)
    }
}

#[cfg(test)]
mod tests {
    use mockall::mock;

    use super::*;
    use crate::id3::attribute::make_row;
    use crate::id3::messages::*;
    use crate::id3::traits::ComparisonParticipant;
    use crate::id3::traits::Statistics;
    use crate::id3::Follower;
    use crate::id3::ListDataLayer;
    use crate::id3::RoundId;
    use crate::id3::Row;

    mock! {
        pub Party {}
        impl Statistics for Party {
            fn check_schema(&self, attributes: &[Attribute], path: &[NodeValuePair]) -> Result<(), ProtocolError>;
            fn class_counts(&self, path: &[NodeValuePair]) -> Result<EncryptedClassCounts, ProtocolError>;
            fn attribute_counts(
                &self,
                path: &[NodeValuePair],
                attribute: &Attribute,
            ) -> Result<EncryptedAttributeCounts, ProtocolError>;
        }
        impl ComparisonParticipant for Party {
            fn blind(&self, request: BlindRequest) -> Result<BlindResponse, ProtocolError>;
            fn unblind_products(&self, request: ProductRequest) -> Result<ProductResponse, ProtocolError>;
            fn compare(&self, request: CompareRequest) -> Result<CompareResponse, ProtocolError>;
            fn zero_test(&self, request: ZeroTestRequest) -> Result<ZeroTestResponse, ProtocolError>;
            fn abort(&self, round: RoundId);
        }
    }

    fn config() -> Id3Config {
        Id3Config {
            key_bits: 512,
            ..Id3Config::default()
        }
    }

    fn layer(rows: Vec<Row>) -> Arc<dyn DataLayer> {
        let class = Attribute::from_values("class", &["Yes", "No"]).unwrap();
        Arc::new(ListDataLayer::new(&["a", "b"], class, rows).unwrap())
    }

    fn master_rows() -> Vec<Row> {
        vec![
            make_row(&[("a", "x"), ("b", "p"), ("class", "Yes")]),
            make_row(&[("a", "y"), ("b", "p"), ("class", "No")]),
        ]
    }

    fn follower_rows() -> Vec<Row> {
        vec![
            make_row(&[("a", "x"), ("b", "q"), ("class", "Yes")]),
            make_row(&[("a", "y"), ("b", "q"), ("class", "No")]),
            make_row(&[("a", "y"), ("b", "p"), ("class", "No")]),
        ]
    }

    fn secure_pair() -> SecureId3<Follower> {
        let kp = KeyPair::generate(512).unwrap();
        let follower = Follower::new(layer(follower_rows()), kp.public_key().clone(), &config());
        SecureId3::new(layer(master_rows()), kp, follower, config())
    }

    #[test]
    fn joint_counts_are_sums_of_local_counts() {
        let id3 = secure_pair();
        let joint = id3.joint_class_counts(&[]).unwrap();
        let plain = id3.key_pair.decrypt_many(&joint).unwrap();
        assert_eq!(plain, vec![BigUint::from(2_u32), BigUint::from(3_u32)]);

        let path = vec![NodeValuePair::new("b", "p")];
        let joint = id3.joint_class_counts(&path).unwrap();
        let plain = id3.key_pair.decrypt_many(&joint).unwrap();
        assert_eq!(plain, vec![BigUint::from(1_u32), BigUint::from(2_u32)]);
    }

    #[test]
    fn joint_value_terms_match_clear_text() {
        let id3 = secure_pair();
        let b = Attribute::from_values("b", &["p", "q", "r"]).unwrap();
        let terms = id3.joint_value_terms(&[], &b).unwrap();
        let opened: Vec<(BigUint, BigUint)> = terms
            .iter()
            .map(|t| {
                (
                    id3.key_pair.decrypt(&t.numerator).unwrap(),
                    id3.key_pair.decrypt(&t.denominator).unwrap(),
                )
            })
            .collect();
        // p: Yes 1, No 2; q: Yes 1, No 1; r: empty on both sides
        assert_eq!(
            opened,
            vec![
                (BigUint::from(5_u32), BigUint::from(3_u32)),
                (BigUint::from(2_u32), BigUint::from(2_u32)),
                (BigUint::from(0_u32), BigUint::from(1_u32)),
            ]
        );
    }

    #[test]
    fn splits_on_the_separating_attribute() {
        let _ = env_logger::builder().is_test(true).try_init();
        let id3 = secure_pair();
        let attributes = vec![
            Attribute::from_values("b", &["p", "q"]).unwrap(),
            Attribute::from_values("a", &["x", "y"]).unwrap(),
        ];
        let tree = id3.run(&attributes, &[]).unwrap();
        assert_eq!(
            tree,
            Id3Node::internal(
                "a",
                vec![
                    (String::from("x"), Id3Node::leaf("Yes")),
                    (String::from("y"), Id3Node::leaf("No")),
                ]
            )
        );
        let metrics = id3.metrics().snapshot();
        assert_eq!(metrics.nodes, 3);
        assert_eq!(metrics.leaves, 2);
        assert_eq!(metrics.comparisons, 1);
        assert_eq!(id3.participant().open_rounds(), 0);
    }

    #[test]
    fn unknown_attributes_are_rejected() {
        let id3 = secure_pair();
        let colour = vec![Attribute::from_values("colour", &["red"]).unwrap()];
        assert!(matches!(id3.run(&colour, &[]), Err(ProtocolError::Schema(_))));

        let twice = vec![
            Attribute::from_values("a", &["x", "y"]).unwrap(),
            Attribute::from_values("a", &["x", "y"]).unwrap(),
        ];
        assert!(matches!(id3.run(&twice, &[]), Err(ProtocolError::Schema(_))));

        let path = vec![NodeValuePair::new("colour", "red")];
        assert!(matches!(id3.run(&[], &path), Err(ProtocolError::Schema(_))));
    }

    #[test]
    fn follower_schema_is_checked_before_any_statistics() {
        let kp = KeyPair::generate(512).unwrap();
        let mut party = MockParty::new();
        party
            .expect_check_schema()
            .withf(|attributes, path| attributes.len() == 2 && path.is_empty())
            .times(1)
            .returning(|_, _| Err(ProtocolError::Schema(String::from("follower has no attribute b"))));
        party.expect_class_counts().times(0);
        let id3 = SecureId3::new(layer(master_rows()), kp, party, config());
        let attributes = vec![
            Attribute::from_values("a", &["x", "y"]).unwrap(),
            Attribute::from_values("b", &["p", "q"]).unwrap(),
        ];
        assert_eq!(
            id3.run(&attributes, &[]),
            Err(ProtocolError::Schema(String::from("follower has no attribute b")))
        );
    }

    #[test]
    fn empty_root_is_an_error() {
        let id3 = secure_pair();
        let path = vec![NodeValuePair::new("a", "z")];
        assert!(matches!(
            id3.run(&[], &path),
            Err(ProtocolError::EmptyTrainingSet)
        ));
    }

    #[test]
    fn capacity_is_checked_before_comparing() {
        let id3 = secure_pair();
        assert!(id3.check_capacity(5, 3).is_ok());
        // 2^40 rows over 8 values cannot fit a 512 bit key
        assert!(matches!(
            id3.check_capacity(1 << 40, 8),
            Err(ProtocolError::CapacityExceeded(_))
        ));
    }

    #[test]
    fn participant_errors_abort_the_run() {
        let kp = KeyPair::generate(512).unwrap();
        let mut party = MockParty::new();
        party.expect_check_schema().returning(|_, _| Ok(()));
        party
            .expect_class_counts()
            .returning(|_| Err(ProtocolError::ProtocolAbort(String::from("timed out"))));
        party.expect_abort().return_const(());
        let id3 = SecureId3::new(layer(master_rows()), kp, party, config());
        let attributes = vec![Attribute::from_values("a", &["x", "y"]).unwrap()];
        assert!(matches!(
            id3.run(&attributes, &[]),
            Err(ProtocolError::ProtocolAbort(_))
        ));
    }

    #[test]
    fn malformed_statistics_abort_the_run() {
        let kp = KeyPair::generate(512).unwrap();
        let pk = kp.public_key().clone();
        let mut party = MockParty::new();
        party.expect_check_schema().returning(|_, _| Ok(()));
        party.expect_class_counts().returning(move |_| {
            Ok(EncryptedClassCounts {
                counts: paillier::encrypt_many(&pk, &[1]).unwrap(),
            })
        });
        let id3 = SecureId3::new(layer(master_rows()), kp, party, config());
        assert!(matches!(
            id3.run(&[], &[]),
            Err(ProtocolError::ProtocolAbort(_))
        ));
    }
}
