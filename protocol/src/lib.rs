//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![crate_name = "protocol"]

#[macro_use]
extern crate log;

pub mod config;
pub mod id3;

pub mod shared {
    /// Local class counts, indexed like the class attribute values
    pub type TCounts = Vec<u64>;

    /// Local counts per attribute value, then per class value
    pub type TValueCounts = Vec<TCounts>;
}
