//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use crate::id3::attribute::matches_path;
use crate::id3::Attribute;
use crate::id3::NodeValuePair;
use crate::id3::ProtocolError;
use crate::id3::Row;
use crate::shared::TCounts;
use crate::shared::TValueCounts;

/// Read-only statistics over one party's partition.
///
/// Implementations answer counting queries restricted to a path. They are
/// shared between concurrently built branches, hence `Send + Sync`.
pub trait DataLayer: Send + Sync {
    fn class_attribute(&self) -> &Attribute;

    fn has_attribute(&self, name: &str) -> bool;

    fn count_path(&self, path: &[NodeValuePair]) -> Result<u64, ProtocolError>;

    fn count_class(&self, path: &[NodeValuePair], class_value: &str) -> Result<u64, ProtocolError>;

    fn count_attribute_class(
        &self,
        path: &[NodeValuePair],
        attribute: &str,
        value: &str,
        class_value: &str,
    ) -> Result<u64, ProtocolError>;

    fn check_path(&self, path: &[NodeValuePair]) -> Result<(), ProtocolError> {
        match path.iter().find(|p| !self.has_attribute(&p.attribute)) {
            Some(p) => Err(ProtocolError::Schema(format!(
                "unknown path attribute {}",
                p.attribute
            ))),
            None => Ok(()),
        }
    }

    /// Counts per class value, in class attribute order
    fn class_counts(&self, path: &[NodeValuePair]) -> Result<TCounts, ProtocolError> {
        self.check_path(path)?;
        self.class_attribute()
            .values()
            .iter()
            .map(|c| self.count_class(path, c))
            .collect()
    }

    /// Counts per value of `attribute`, then per class value
    fn attribute_class_counts(
        &self,
        path: &[NodeValuePair],
        attribute: &Attribute,
    ) -> Result<TValueCounts, ProtocolError> {
        if !self.has_attribute(attribute.name()) {
            return Err(ProtocolError::Schema(format!(
                "unknown attribute {}",
                attribute.name()
            )));
        }
        self.check_path(path)?;
        let classes = self.class_attribute().values();
        attribute
            .values()
            .iter()
            .map(|v| {
                classes
                    .iter()
                    .map(|c| self.count_attribute_class(path, attribute.name(), v, c))
                    .collect()
            })
            .collect()
    }
}

/// In-memory partition with an explicit schema
#[derive(Debug)]
pub struct ListDataLayer {
    schema: HashSet<String>,
    class_attribute: Attribute,
    rows: Vec<Row>,
}

impl ListDataLayer {
    /// `schema` lists the non-class attribute names. Every row must carry
    /// all of them plus the class field with a known class value.
    pub fn new(
        schema: &[&str],
        class_attribute: Attribute,
        rows: Vec<Row>,
    ) -> Result<ListDataLayer, ProtocolError> {
        let schema: HashSet<String> = schema.iter().map(|s| String::from(*s)).collect();
        if schema.contains(class_attribute.name()) {
            return Err(ProtocolError::Schema(format!(
                "class attribute {} is also listed as a feature",
                class_attribute.name()
            )));
        }
        for (i, row) in rows.iter().enumerate() {
            if let Some(missing) = schema.iter().find(|a| !row.contains_key(*a)) {
                return Err(ProtocolError::Schema(format!(
                    "row {} has no field {}",
                    i, missing
                )));
            }
            match row.get(class_attribute.name()) {
                Some(c) if class_attribute.position(c).is_some() => {}
                Some(c) => {
                    return Err(ProtocolError::Schema(format!(
                        "row {} has unknown class value {}",
                        i, c
                    )))
                }
                None => {
                    return Err(ProtocolError::Schema(format!(
                        "row {} has no class field {}",
                        i,
                        class_attribute.name()
                    )))
                }
            }
        }
        debug!(
            "Loaded partition with {} rows and {} attributes",
            rows.len(),
            schema.len()
        );
        Ok(ListDataLayer {
            schema,
            class_attribute,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn count_where<F>(&self, path: &[NodeValuePair], filter: F) -> Result<u64, ProtocolError>
    where
        F: Fn(&Row) -> bool,
    {
        self.check_path(path)?;
        Ok(self
            .rows
            .iter()
            .filter(|r| matches_path(r, path) && filter(r))
            .count() as u64)
    }

    fn is_class(&self, row: &Row, class_value: &str) -> bool {
        row.get(self.class_attribute.name())
            .map(|c| c == class_value)
            .unwrap_or(false)
    }
}

impl DataLayer for ListDataLayer {
    fn class_attribute(&self) -> &Attribute {
        &self.class_attribute
    }

    fn has_attribute(&self, name: &str) -> bool {
        self.schema.contains(name)
    }

    fn count_path(&self, path: &[NodeValuePair]) -> Result<u64, ProtocolError> {
        self.count_where(path, |_| true)
    }

    fn count_class(&self, path: &[NodeValuePair], class_value: &str) -> Result<u64, ProtocolError> {
        self.count_where(path, |r| self.is_class(r, class_value))
    }

    fn count_attribute_class(
        &self,
        path: &[NodeValuePair],
        attribute: &str,
        value: &str,
        class_value: &str,
    ) -> Result<u64, ProtocolError> {
        if !self.has_attribute(attribute) {
            return Err(ProtocolError::Schema(format!(
                "unknown attribute {}",
                attribute
            )));
        }
        self.count_where(path, |r| {
            self.is_class(r, class_value) && r.get(attribute).map(|v| v == value).unwrap_or(false)
        })
    }
}
