//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use std::sync::Arc;

use crypto::prelude::KeyPair;
use protocol::config::Id3Config;
use protocol::id3::attribute::make_row;
use protocol::id3::transport::spawn_follower;
use protocol::id3::Attribute;
use protocol::id3::DataLayer;
use protocol::id3::Follower;
use protocol::id3::Id3Node;
use protocol::id3::ListDataLayer;
use protocol::id3::PlainId3;
use protocol::id3::ProtocolError;
use protocol::id3::Row;
use protocol::id3::SecureId3;

pub const FEATURES: [&str; 4] = ["outlook", "temperature", "humidity", "wind"];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn config() -> Id3Config {
    Id3Config {
        key_bits: 512,
        round_timeout_ms: 10_000,
        ..Id3Config::default()
    }
}

/// The 14 day play-ball table
pub fn weather_rows() -> Vec<Row> {
    [
        ["Sunny", "Hot", "High", "Weak", "No"],
        ["Sunny", "Hot", "High", "Strong", "No"],
        ["Overcast", "Hot", "High", "Weak", "Yes"],
        ["Rain", "Mild", "High", "Weak", "Yes"],
        ["Rain", "Cool", "Normal", "Weak", "Yes"],
        ["Rain", "Cool", "Normal", "Strong", "No"],
        ["Overcast", "Cool", "Normal", "Strong", "Yes"],
        ["Sunny", "Mild", "High", "Weak", "No"],
        ["Sunny", "Cool", "Normal", "Weak", "Yes"],
        ["Rain", "Mild", "Normal", "Weak", "Yes"],
        ["Sunny", "Mild", "Normal", "Strong", "Yes"],
        ["Overcast", "Mild", "High", "Strong", "Yes"],
        ["Overcast", "Hot", "Normal", "Weak", "Yes"],
        ["Rain", "Mild", "High", "Strong", "No"],
    ]
    .iter()
    .map(|r| {
        make_row(&[
            ("outlook", r[0]),
            ("temperature", r[1]),
            ("humidity", r[2]),
            ("wind", r[3]),
            ("playBall", r[4]),
        ])
    })
    .collect()
}

pub fn attributes(names: &[&str], rows: &[Row]) -> Vec<Attribute> {
    names
        .iter()
        .map(|n| Attribute::from_rows(*n, rows).unwrap())
        .collect()
}

pub fn layer(features: &[&str], class: &Attribute, rows: Vec<Row>) -> Arc<dyn DataLayer> {
    Arc::new(ListDataLayer::new(features, class.clone(), rows).unwrap())
}

pub fn leaf(class: &str) -> Id3Node {
    Id3Node::leaf(class)
}

pub fn split(attribute: &str, children: Vec<(&str, Id3Node)>) -> Id3Node {
    Id3Node::internal(
        attribute,
        children
            .into_iter()
            .map(|(v, n)| (String::from(v), n))
            .collect(),
    )
}

pub fn secure_party(
    features: &[&str],
    class: &Attribute,
    master_rows: Vec<Row>,
    follower_rows: Vec<Row>,
    config: &Id3Config,
) -> SecureId3<Follower> {
    let key_pair = KeyPair::generate(config.key_bits).unwrap();
    let follower = Follower::new(
        layer(features, class, follower_rows),
        key_pair.public_key().clone(),
        config,
    );
    SecureId3::new(
        layer(features, class, master_rows),
        key_pair,
        follower,
        config.clone(),
    )
}

/// Secure tree with the follower behind the channel transport
pub fn secure_run_over_channel(
    features: &[&str],
    class: &Attribute,
    master_rows: Vec<Row>,
    follower_rows: Vec<Row>,
    candidates: &[Attribute],
    config: &Id3Config,
) -> Result<Id3Node, ProtocolError> {
    let key_pair = config.generate_key_pair()?;
    let follower = Follower::new(
        layer(features, class, follower_rows),
        key_pair.public_key().clone(),
        config,
    );
    let handle = spawn_follower(follower, config)?;
    let id3 = SecureId3::new(
        layer(features, class, master_rows),
        key_pair,
        handle,
        config.clone(),
    );
    id3.run(candidates, &[])
}

pub fn plain_run(
    features: &[&str],
    class: &Attribute,
    rows: Vec<Row>,
    candidates: &[Attribute],
) -> Result<Id3Node, ProtocolError> {
    let dl = ListDataLayer::new(features, class.clone(), rows).unwrap();
    PlainId3::new(&dl).run(candidates, &[])
}
