//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use std::fs::File;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMetrics {
    pub protocol_name: String,
    pub nodes: usize,
    pub leaves: usize,
    pub stat_requests: usize,
    pub secure_products: usize,
    pub comparisons: usize,
    pub zero_tests: usize,
    pub decryptions: usize,
}

/// Protocol counters, safe to update from concurrent branch builders
#[derive(Debug)]
pub struct Metrics {
    protocol_name: String,
    nodes: AtomicUsize,
    leaves: AtomicUsize,
    stat_requests: AtomicUsize,
    secure_products: AtomicUsize,
    comparisons: AtomicUsize,
    zero_tests: AtomicUsize,
    decryptions: AtomicUsize,
}

impl Metrics {
    pub fn new(protocol_name: &str) -> Metrics {
        Metrics {
            protocol_name: String::from(protocol_name),
            nodes: AtomicUsize::default(),
            leaves: AtomicUsize::default(),
            stat_requests: AtomicUsize::default(),
            secure_products: AtomicUsize::default(),
            comparisons: AtomicUsize::default(),
            zero_tests: AtomicUsize::default(),
            decryptions: AtomicUsize::default(),
        }
    }

    pub fn add_node(&self) {
        self.nodes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_leaf(&self) {
        self.leaves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_stat_requests(&self, n: usize) {
        self.stat_requests.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_secure_products(&self, n: usize) {
        self.secure_products.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_comparison(&self) {
        self.comparisons.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_zero_tests(&self, n: usize) {
        self.zero_tests.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_decryptions(&self, n: usize) {
        self.decryptions.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RawMetrics {
        RawMetrics {
            protocol_name: self.protocol_name.clone(),
            nodes: self.nodes.load(Ordering::Relaxed),
            leaves: self.leaves.load(Ordering::Relaxed),
            stat_requests: self.stat_requests.load(Ordering::Relaxed),
            secure_products: self.secure_products.load(Ordering::Relaxed),
            comparisons: self.comparisons.load(Ordering::Relaxed),
            zero_tests: self.zero_tests.load(Ordering::Relaxed),
            decryptions: self.decryptions.load(Ordering::Relaxed),
        }
    }

    pub fn print_metrics(&self) {
        match serde_json::to_string(&self.snapshot()) {
            Ok(json) => {
                println!("-----BEGIN METRIC VIEW-----");
                println!("{}", json);
                println!("-----END METRIC VIEW-----");
            }
            Err(e) => error!("Unable to serialise metrics: {}", e),
        }
    }

    pub fn save_metrics(&self, path: &str) -> Result<(), std::io::Error> {
        let f = File::create(path)?;
        serde_json::to_writer(f, &self.snapshot()).map_err(std::io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_counters() {
        let m = Metrics::new("secure_id3");
        m.add_node();
        m.add_node();
        m.add_leaf();
        m.add_stat_requests(3);
        m.add_secure_products(4);
        m.add_comparison();
        m.add_zero_tests(2);
        m.add_decryptions(7);

        let raw = m.snapshot();
        assert_eq!(raw.protocol_name, "secure_id3");
        assert_eq!(raw.nodes, 2);
        assert_eq!(raw.leaves, 1);
        assert_eq!(raw.stat_requests, 3);
        assert_eq!(raw.secure_products, 4);
        assert_eq!(raw.comparisons, 1);
        assert_eq!(raw.zero_tests, 2);
        assert_eq!(raw.decryptions, 7);
        m.print_metrics();
    }

    #[test]
    fn test_save_metrics() {
        let m = Metrics::new("secure_id3");
        m.add_leaf();
        let mut file = NamedTempFile::new().unwrap();
        let p = file.path().to_str().unwrap().to_string();
        m.save_metrics(&p).unwrap();

        let mut actual = String::new();
        file.read_to_string(&mut actual).unwrap();
        let parsed: RawMetrics = serde_json::from_str(&actual).unwrap();
        assert_eq!(parsed, m.snapshot());
    }
}
