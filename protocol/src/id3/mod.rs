//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use crypto::prelude::CryptoError;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Identifies one blinding round of the comparison sub-protocol
pub type RoundId = u64;

#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("decryption failed: {0}")]
    Decryption(String),
    #[error("protocol aborted: {0}")]
    ProtocolAbort(String),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("joint training set is empty")]
    EmptyTrainingSet,
    #[error("plaintext capacity exceeded: {0}")]
    CapacityExceeded(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<CryptoError> for ProtocolError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::KeyGeneration(msg) => ProtocolError::KeyGeneration(msg),
            CryptoError::Decryption(msg) => ProtocolError::Decryption(msg),
            CryptoError::PlaintextOutOfRange => {
                ProtocolError::CapacityExceeded(String::from("plaintext does not fit below n"))
            }
        }
    }
}

pub mod attribute;
pub mod comparison;
pub mod data_layer;
pub mod follower;
pub mod gain;
pub mod master;
pub mod messages;
pub mod plain;
pub mod traits;
pub mod transport;
pub mod tree;

pub use attribute::Attribute;
pub use attribute::NodeValuePair;
pub use attribute::Row;
pub use data_layer::DataLayer;
pub use data_layer::ListDataLayer;
pub use follower::Follower;
pub use master::SecureId3;
pub use plain::PlainId3;
pub use tree::Id3Node;
