//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use crypto::prelude::KeyPair;
use crypto::prelude::MIN_KEY_BITS;
use crypto::prelude::PAILLIER_PUBLIC_KEY_SIZE;
use serde::Deserialize;
use serde::Serialize;

use crate::id3::ProtocolError;

/// Runtime parameters shared by both parties
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Id3Config {
    /// Paillier modulus size
    pub key_bits: u64,
    /// Bit length of the multiplicative comparison mask
    pub statistical_security: u32,
    /// How long a blinding round may stay open, and how long the key holder
    /// waits for any reply
    pub round_timeout_ms: u64,
    /// Build sibling branches on the rayon pool
    pub parallel_branches: bool,
}

impl Default for Id3Config {
    fn default() -> Self {
        Id3Config {
            key_bits: PAILLIER_PUBLIC_KEY_SIZE,
            statistical_security: 40,
            round_timeout_ms: 30_000,
            parallel_branches: false,
        }
    }
}

impl Id3Config {
    pub fn from_json_str(json: &str) -> Result<Id3Config, ProtocolError> {
        let config: Id3Config =
            serde_json::from_str(json).map_err(|e| ProtocolError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<T: AsRef<Path>>(path: T) -> Result<Id3Config, ProtocolError> {
        let file = File::open(path.as_ref()).map_err(|e| {
            ProtocolError::Config(format!("cannot open {}: {}", path.as_ref().display(), e))
        })?;
        let config: Id3Config = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| ProtocolError::Config(e.to_string()))?;
        config.validate()?;
        info!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.key_bits < MIN_KEY_BITS || self.key_bits % 2 != 0 {
            return Err(ProtocolError::Config(format!(
                "key_bits must be even and at least {}, got {}",
                MIN_KEY_BITS, self.key_bits
            )));
        }
        if !(16..=128).contains(&self.statistical_security) {
            return Err(ProtocolError::Config(format!(
                "statistical_security must be within 16..=128, got {}",
                self.statistical_security
            )));
        }
        if self.round_timeout_ms == 0 {
            return Err(ProtocolError::Config(String::from(
                "round_timeout_ms must be positive",
            )));
        }
        Ok(())
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    pub fn generate_key_pair(&self) -> Result<KeyPair, ProtocolError> {
        self.validate()?;
        let _t = common::timer::Builder::new()
            .label("keygen")
            .extra_label(&format!("{} bits", self.key_bits))
            .build();
        Ok(KeyPair::generate(self.key_bits)?)
    }
}
