//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use num_bigint::BigUint;
use num_traits::One;

use crate::id3::gain::argmax;
use crate::id3::gain::split_score;
use crate::id3::gain::Fraction;
use crate::id3::Attribute;
use crate::id3::DataLayer;
use crate::id3::Id3Node;
use crate::id3::NodeValuePair;
use crate::id3::ProtocolError;

/// ID3 over a single data layer in the clear.
///
/// Uses the same split criterion, tie breaking and stopping rules as
/// [`SecureId3`](crate::id3::SecureId3), so both produce the same tree on
/// the same joint rows.
pub struct PlainId3<'a> {
    data_layer: &'a dyn DataLayer,
}

impl<'a> PlainId3<'a> {
    pub fn new(data_layer: &'a dyn DataLayer) -> PlainId3<'a> {
        PlainId3 { data_layer }
    }

    pub fn run(
        &self,
        attributes: &[Attribute],
        path: &[NodeValuePair],
    ) -> Result<Id3Node, ProtocolError> {
        if let Some(a) = attributes
            .iter()
            .find(|a| !self.data_layer.has_attribute(a.name()))
        {
            return Err(ProtocolError::Schema(format!(
                "unknown attribute {}",
                a.name()
            )));
        }
        self.data_layer.check_path(path)?;
        self.build(attributes, path, None)
    }

    fn majority(&self, counts: &[u64]) -> String {
        let fractions: Vec<Fraction> = counts
            .iter()
            .map(|c| Fraction::new(BigUint::from(*c), BigUint::one()))
            .collect();
        let classes = self.data_layer.class_attribute().values();
        classes[argmax(&fractions).unwrap_or(0)].clone()
    }

    fn build(
        &self,
        candidates: &[Attribute],
        path: &[NodeValuePair],
        parent_majority: Option<&str>,
    ) -> Result<Id3Node, ProtocolError> {
        let counts = self.data_layer.class_counts(path)?;
        let total: u64 = counts.iter().sum();
        if total == 0 {
            return parent_majority
                .map(Id3Node::leaf)
                .ok_or(ProtocolError::EmptyTrainingSet);
        }

        let classes = self.data_layer.class_attribute().values();
        if let Some(i) = counts.iter().position(|c| *c == total) {
            return Ok(Id3Node::leaf(classes[i].clone()));
        }

        let majority = self.majority(&counts);
        if candidates.is_empty() {
            return Ok(Id3Node::leaf(majority));
        }

        let scores = candidates
            .iter()
            .map(|a| {
                self.data_layer
                    .attribute_class_counts(path, a)
                    .map(|counts| split_score(&counts))
            })
            .collect::<Result<Vec<Fraction>, ProtocolError>>()?;
        let winner = &candidates[argmax(&scores).unwrap_or(0)];
        let remaining: Vec<Attribute> = candidates
            .iter()
            .filter(|a| a.name() != winner.name())
            .cloned()
            .collect();

        let children = winner
            .values()
            .iter()
            .map(|v| {
                let mut child_path = path.to_vec();
                child_path.push(NodeValuePair::new(winner.name(), v.as_str()));
                self.build(&remaining, &child_path, Some(majority.as_str()))
                    .map(|n| (v.clone(), n))
            })
            .collect::<Result<Vec<_>, ProtocolError>>()?;
        Ok(Id3Node::internal(winner.name(), children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id3::attribute::make_row;
    use crate::id3::ListDataLayer;

    #[test]
    fn empty_branch_takes_parent_majority() {
        let class = Attribute::from_values("class", &["Yes", "No"]).unwrap();
        let rows = vec![
            make_row(&[("a", "x"), ("class", "No")]),
            make_row(&[("a", "x"), ("class", "No")]),
            make_row(&[("a", "y"), ("class", "Yes")]),
        ];
        let dl = ListDataLayer::new(&["a"], class, rows).unwrap();
        let a = Attribute::from_values("a", &["x", "y", "z"]).unwrap();
        let tree = PlainId3::new(&dl).run(&[a], &[]).unwrap();
        assert_eq!(
            tree,
            Id3Node::internal(
                "a",
                vec![
                    (String::from("x"), Id3Node::leaf("No")),
                    (String::from("y"), Id3Node::leaf("Yes")),
                    (String::from("z"), Id3Node::leaf("No")),
                ]
            )
        );
    }

    #[test]
    fn exhausted_attributes_take_majority() {
        let class = Attribute::from_values("class", &["Yes", "No"]).unwrap();
        let rows = vec![
            make_row(&[("a", "x"), ("class", "No")]),
            make_row(&[("a", "x"), ("class", "Yes")]),
        ];
        let dl = ListDataLayer::new(&["a"], class, rows).unwrap();
        // tie between classes goes to the first class value
        assert_eq!(PlainId3::new(&dl).run(&[], &[]).unwrap(), Id3Node::leaf("Yes"));

        let empty = PlainId3::new(&dl).run(&[], &[NodeValuePair::new("a", "y")]);
        assert!(matches!(empty, Err(ProtocolError::EmptyTrainingSet)));
    }
}
