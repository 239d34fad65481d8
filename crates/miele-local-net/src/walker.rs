//! Error-tolerant enumeration of the DOP2 attribute tree.
//!
//! The walk starts at the exploration root, follows the (unit, attribute)
//! tuples each exploration node advertises, and reads every reachable
//! leaf once. A failing leaf is recorded under its coordinate and the
//! walk continues; only a failure to read the root aborts.

use crate::dop2::{Dop2Client, Dop2Coordinate};
use miele_local_core::dop2::{Dop2Record, Dop2Value};
use miele_local_core::error::Result;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

/// Unit of the exploration root
pub const EXPLORATION_UNIT: u16 = 2;
/// Attribute of the exploration-tree leaves. Firmware-defined; override
/// with [`walk_from`] for devices that place the root elsewhere.
pub const EXPLORATION_ATTRIBUTE: u16 = 100;

/// Result of visiting one coordinate.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkOutcome {
    /// The leaf was read and parsed
    Records(Vec<Dop2Record>),
    /// The leaf failed; the walk continued
    Failed { code: &'static str, message: String },
}

/// One visited coordinate, in traversal order.
#[derive(Clone, Debug, Serialize)]
pub struct WalkEntry {
    pub coordinate: String,
    #[serde(flatten)]
    pub outcome: WalkOutcome,
}

/// The complete walk: depth-first, children in the order their parent
/// declared them.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(transparent)]
pub struct WalkReport {
    pub entries: Vec<WalkEntry>,
}

impl WalkReport {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, coordinate: &str) -> Option<&WalkOutcome> {
        self.entries
            .iter()
            .find(|entry| entry.coordinate == coordinate)
            .map(|entry| &entry.outcome)
    }
}

/// Walk the tree from the default exploration root.
pub async fn walk(client: &Dop2Client<'_>) -> Result<WalkReport> {
    walk_from(
        client,
        Dop2Coordinate::new(EXPLORATION_UNIT, EXPLORATION_ATTRIBUTE),
    )
    .await
}

/// Walk the tree from an explicit root coordinate.
pub async fn walk_from(client: &Dop2Client<'_>, root: Dop2Coordinate) -> Result<WalkReport> {
    let (root_records, _) = client.read_leaf(root).await?;

    let mut visited: HashSet<(u16, u16)> = HashSet::new();
    visited.insert((root.unit, root.attribute));

    // explicit stack keeps the traversal iterative and cancellation clean;
    // children are pushed reversed so they pop in declaration order
    let mut stack: Vec<(u16, u16)> = Vec::new();
    push_children(&mut stack, &root_records);

    let mut report = WalkReport::default();
    while let Some((unit, attribute)) = stack.pop() {
        if !visited.insert((unit, attribute)) {
            continue;
        }
        let coordinate = Dop2Coordinate::new(unit, attribute);
        match client.read_leaf(coordinate).await {
            Ok((records, _)) => {
                if attribute == root.attribute {
                    // a nested exploration node advertises its own subtree
                    push_children(&mut stack, &records);
                }
                report.entries.push(WalkEntry {
                    coordinate: coordinate.to_string(),
                    outcome: WalkOutcome::Records(records),
                });
            }
            Err(error) => {
                debug!(%coordinate, %error, "leaf read failed, continuing walk");
                report.entries.push(WalkEntry {
                    coordinate: coordinate.to_string(),
                    outcome: WalkOutcome::Failed {
                        code: error.code(),
                        message: error.to_string(),
                    },
                });
            }
        }
    }
    Ok(report)
}

/// Collect the (unit, attribute) tuples an exploration record sequence
/// advertises: every u16 value in declaration order, taken pairwise.
/// Pushed reversed so a stack pop yields declaration order.
fn push_children(stack: &mut Vec<(u16, u16)>, records: &[Dop2Record]) {
    let mut words = Vec::new();
    collect_words(records, &mut words);
    let pairs: Vec<(u16, u16)> = words
        .chunks_exact(2)
        .map(|pair| (pair[0], pair[1]))
        .collect();
    for pair in pairs.into_iter().rev() {
        stack.push(pair);
    }
}

fn collect_words(records: &[Dop2Record], out: &mut Vec<u16>) {
    for record in records {
        match &record.value {
            Dop2Value::Words(words) => out.extend_from_slice(words),
            Dop2Value::Nested(children) => collect_words(children, out),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_in_declaration_order() {
        let records = vec![Dop2Record::words(vec![2, 105, 2, 106, 14, 1570])];
        let mut stack = Vec::new();
        push_children(&mut stack, &records);
        assert_eq!(stack.pop(), Some((2, 105)));
        assert_eq!(stack.pop(), Some((2, 106)));
        assert_eq!(stack.pop(), Some((14, 1570)));
    }

    #[test]
    fn test_children_found_in_nested_records() {
        let records = vec![Dop2Record::nested(vec![
            Dop2Record::words(vec![2, 105]),
            Dop2Record::bytes(vec![0xFF]),
            Dop2Record::words(vec![2, 106]),
        ])];
        let mut stack = Vec::new();
        push_children(&mut stack, &records);
        assert_eq!(stack, vec![(2, 106), (2, 105)]);
    }

    #[test]
    fn test_odd_word_tail_ignored() {
        let records = vec![Dop2Record::words(vec![2, 105, 7])];
        let mut stack = Vec::new();
        push_children(&mut stack, &records);
        assert_eq!(stack, vec![(2, 105)]);
    }
}
