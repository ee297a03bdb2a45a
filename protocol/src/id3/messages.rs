//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

//! Payloads exchanged between the key holder and the follower. Apart from
//! round ids and public attribute names everything here is a ciphertext.

use crypto::prelude::Ciphertext;
use crypto::prelude::TPayload;
use serde::Deserialize;
use serde::Serialize;

use crate::id3::RoundId;

/// `Enc(f_c)` per class value, in class order
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncryptedClassCounts {
    pub counts: TPayload,
}

/// Follower statistics for one attribute value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncryptedValueCounts {
    /// `Enc(f_vc)` per class
    pub counts: TPayload,
    /// `Enc(f_vc^2)` per class
    pub squares: TPayload,
    /// `Enc(1)` when the follower has no row with this value, `Enc(0)` otherwise
    pub empty: Ciphertext,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncryptedAttributeCounts {
    pub attribute: String,
    pub values: Vec<EncryptedValueCounts>,
}

/// Two encrypted factors to be multiplied
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactorPair {
    pub lhs: Ciphertext,
    pub rhs: Ciphertext,
}

impl FactorPair {
    pub fn new(lhs: Ciphertext, rhs: Ciphertext) -> FactorPair {
        FactorPair { lhs, rhs }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlindRequest {
    pub round: RoundId,
    pub factors: Vec<FactorPair>,
}

/// Factors shifted by fresh masks, `(Enc(a + r), Enc(b + s))`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlindResponse {
    pub round: RoundId,
    pub blinded: Vec<FactorPair>,
}

/// `Enc((a + r)(b + s) mod n)` per pair of the round
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductRequest {
    pub round: RoundId,
    pub blinded_products: TPayload,
}

/// `Enc(a * b)` per pair of the round
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductResponse {
    pub round: RoundId,
    pub products: TPayload,
}

/// Closes a two pair round `[(N_i, D_b), (N_b, D_i)]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompareRequest {
    pub round: RoundId,
    pub blinded_products: TPayload,
}

/// `Enc(rho * (2 * (N_i D_b - N_b D_i) - 1) + rho')`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompareResponse {
    pub round: RoundId,
    pub blinded_difference: Ciphertext,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZeroTestRequest {
    pub values: TPayload,
}

/// `Enc(rho_j * v_j)` per value, zero iff `v_j` was zero
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZeroTestResponse {
    pub blinded: TPayload,
}
