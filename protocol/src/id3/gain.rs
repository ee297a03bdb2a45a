//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

//! Clear-text form of the split criterion.
//!
//! An attribute scores `sum_v S_v / d_v` where `S_v` is the sum of squared
//! class counts under value `v` and `d_v` the number of rows under `v`
//! (one for empty values). Maximising it minimises the weighted Gini
//! impurity. Sums of fractions are combined without division so that the
//! encrypted protocol can follow the same steps.

use num_bigint::BigUint;
use num_traits::One;
use num_traits::Zero;

use crate::shared::TCounts;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fraction {
    pub numerator: BigUint,
    pub denominator: BigUint,
}

impl Fraction {
    pub fn new(numerator: BigUint, denominator: BigUint) -> Fraction {
        Fraction {
            numerator,
            denominator,
        }
    }

    /// `self > other`, both denominators positive
    pub fn greater_than(&self, other: &Fraction) -> bool {
        &self.numerator * &other.denominator > &other.numerator * &self.denominator
    }

    /// `a/b + c/d = (a*d + c*b) / (b*d)`
    pub fn add(&self, other: &Fraction) -> Fraction {
        Fraction {
            numerator: &self.numerator * &other.denominator + &other.numerator * &self.denominator,
            denominator: &self.denominator * &other.denominator,
        }
    }
}

/// `(S_v, d_v)` for one attribute value
pub fn value_term(class_counts: &[u64]) -> Fraction {
    let total: u64 = class_counts.iter().sum();
    let squares = class_counts
        .iter()
        .fold(BigUint::zero(), |acc, x| acc + BigUint::from(*x) * BigUint::from(*x));
    let denominator = if total == 0 {
        BigUint::one()
    } else {
        BigUint::from(total)
    };
    Fraction::new(squares, denominator)
}

/// Score of an attribute given its per value, per class counts
pub fn split_score(value_counts: &[TCounts]) -> Fraction {
    let mut terms = value_counts.iter().map(|c| value_term(c));
    let first = terms
        .next()
        .unwrap_or_else(|| Fraction::new(BigUint::zero(), BigUint::one()));
    terms.fold(first, |acc, t| acc.add(&t))
}

/// Index of the largest fraction, the earliest one on ties
pub fn argmax(fractions: &[Fraction]) -> Option<usize> {
    if fractions.is_empty() {
        return None;
    }
    let mut best = 0;
    for (i, f) in fractions.iter().enumerate().skip(1) {
        if f.greater_than(&fractions[best]) {
            best = i;
        }
    }
    Some(best)
}

/// Bits needed by the largest plaintext of the encrypted protocol: the
/// combined numerator and denominator of an attribute with `max_values`
/// values over `total` rows, blinded by a `statistical_security` bit factor.
pub fn required_plaintext_bits(total: u64, max_values: usize, statistical_security: u32) -> u64 {
    let count_bits = 64 - u64::from(total.leading_zeros());
    let value_bits = 64 - u64::from((max_values as u64).leading_zeros());
    (2 * max_values as u64 + 1) * count_bits + value_bits + u64::from(statistical_security) + 3
}
