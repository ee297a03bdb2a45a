//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

#[cfg(test)]
use mockall::automock;

use crate::id3::messages::BlindRequest;
use crate::id3::messages::BlindResponse;
use crate::id3::messages::CompareRequest;
use crate::id3::messages::CompareResponse;
use crate::id3::messages::EncryptedAttributeCounts;
use crate::id3::messages::EncryptedClassCounts;
use crate::id3::messages::ProductRequest;
use crate::id3::messages::ProductResponse;
use crate::id3::messages::ZeroTestRequest;
use crate::id3::messages::ZeroTestResponse;
use crate::id3::Attribute;
use crate::id3::NodeValuePair;
use crate::id3::ProtocolError;
use crate::id3::RoundId;

/// Encrypted local statistics of the party without the private key
#[cfg_attr(test, automock)]
pub trait Statistics {
    /// Fails with `ProtocolError::Schema` when any of `attributes` or of the
    /// path attributes is unknown to this party
    fn check_schema(
        &self,
        attributes: &[Attribute],
        path: &[NodeValuePair],
    ) -> Result<(), ProtocolError>;

    fn class_counts(&self, path: &[NodeValuePair]) -> Result<EncryptedClassCounts, ProtocolError>;

    fn attribute_counts(
        &self,
        path: &[NodeValuePair],
        attribute: &Attribute,
    ) -> Result<EncryptedAttributeCounts, ProtocolError>;
}

/// Blinding side of secure multiplication, comparison and zero testing
#[cfg_attr(test, automock)]
pub trait ComparisonParticipant {
    fn blind(&self, request: BlindRequest) -> Result<BlindResponse, ProtocolError>;

    fn unblind_products(&self, request: ProductRequest) -> Result<ProductResponse, ProtocolError>;

    fn compare(&self, request: CompareRequest) -> Result<CompareResponse, ProtocolError>;

    fn zero_test(&self, request: ZeroTestRequest) -> Result<ZeroTestResponse, ProtocolError>;

    /// Drops any state kept for `round`, best effort
    fn abort(&self, round: RoundId);
}

/// Everything the key holder needs from the other party
pub trait Participant: Statistics + ComparisonParticipant + Send + Sync {}

impl<T> Participant for T where T: Statistics + ComparisonParticipant + Send + Sync {}
