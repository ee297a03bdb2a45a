//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

pub use num_bigint::BigInt;
pub use num_bigint::BigUint;

pub use crate::paillier::Ciphertext;
pub use crate::paillier::CryptoError;
pub use crate::paillier::KeyPair;
pub use crate::paillier::PrivateKey;
pub use crate::paillier::PublicKey;
pub use crate::paillier::MIN_KEY_BITS;

pub type TPayload = Vec<Ciphertext>;

pub const PAILLIER_PUBLIC_KEY_SIZE: u64 = 2048;
