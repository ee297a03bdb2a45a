//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::id3::ProtocolError;

/// One transaction: attribute name to discrete value
pub type Row = HashMap<String, String>;

/// Builds a row from `(attribute, value)` pairs
pub fn make_row(fields: &[(&str, &str)]) -> Row {
    fields
        .iter()
        .map(|(k, v)| (String::from(*k), String::from(*v)))
        .collect()
}

/// A discrete attribute with an ordered list of values.
///
/// The value order is significant: children of a split follow it and ties
/// between classes are broken in favour of the earlier value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    name: String,
    values: Vec<String>,
}

impl Attribute {
    pub fn new<S: Into<String>>(name: S, values: Vec<String>) -> Result<Attribute, ProtocolError> {
        let name = name.into();
        if values.is_empty() {
            return Err(ProtocolError::Schema(format!(
                "attribute {} has no values",
                name
            )));
        }
        let mut seen = HashSet::with_capacity(values.len());
        for v in values.iter() {
            if !seen.insert(v.as_str()) {
                return Err(ProtocolError::Schema(format!(
                    "attribute {} lists value {} twice",
                    name, v
                )));
            }
        }
        Ok(Attribute { name, values })
    }

    pub fn from_values<S: Into<String>>(name: S, values: &[&str]) -> Result<Attribute, ProtocolError> {
        Attribute::new(name, values.iter().map(|v| String::from(*v)).collect())
    }

    /// Collects the distinct values of field `name` in first-seen order
    pub fn from_rows<S: Into<String>>(name: S, rows: &[Row]) -> Result<Attribute, ProtocolError> {
        let name = name.into();
        let mut seen = HashSet::new();
        let mut values = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            let v = row.get(&name).ok_or_else(|| {
                ProtocolError::Schema(format!("row {} has no field {}", i, name))
            })?;
            if seen.insert(v.clone()) {
                values.push(v.clone());
            }
        }
        Attribute::new(name, values)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn position(&self, value: &str) -> Option<usize> {
        self.values.iter().position(|v| v == value)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.values.join(", "))
    }
}

/// One public constraint on the path from the root to a node
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeValuePair {
    pub attribute: String,
    pub value: String,
}

impl NodeValuePair {
    pub fn new<A: Into<String>, V: Into<String>>(attribute: A, value: V) -> NodeValuePair {
        NodeValuePair {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.attribute)
            .map(|v| v == &self.value)
            .unwrap_or(false)
    }
}

impl fmt::Display for NodeValuePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attribute, self.value)
    }
}

pub fn matches_path(row: &Row, path: &[NodeValuePair]) -> bool {
    path.iter().all(|p| p.matches(row))
}
