//! Flat records to a validated tree
//!
//! Records are filtered, indexed by identifier, linked to their parents and
//! then checked for cycles. Nodes whose parent is missing or who sit on a
//! cycle are reattached under the synthetic root. All passes are iterative,
//! so arbitrarily long parent chains cannot exhaust the stack.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use super::node::TreeNode;
use super::record::{FieldMapping, FlatRecord};
use crate::api::PageFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    BlankId,
    InvalidIdFormat,
    DuplicateId,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::BlankId => write!(f, "blank identifier"),
            RejectionReason::InvalidIdFormat => write!(f, "identifier format not accepted"),
            RejectionReason::DuplicateId => write!(f, "duplicate identifier"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    /// Position in the input
    pub index: usize,
    pub id: Option<String>,
    pub reason: RejectionReason,
}

/// How the record fetch behind a tree went
#[derive(Debug, Clone, Serialize)]
pub struct FetchSummary {
    pub pages_fetched: usize,
    pub failed_pages: Vec<PageFailure>,
}

impl FetchSummary {
    pub fn is_partial(&self) -> bool {
        !self.failed_pages.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub total: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub rejections: Vec<Rejection>,
    /// Each cycle as the chain of ids from the first member reached, in walk order
    pub cycles: Vec<Vec<String>>,
    /// Ids whose parent reference matched no accepted record
    pub orphans: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch: Option<FetchSummary>,
}

impl BuildReport {
    pub fn is_clean(&self) -> bool {
        self.rejected == 0
            && self.cycles.is_empty()
            && self.orphans.is_empty()
            && !self.fetch.as_ref().is_some_and(FetchSummary::is_partial)
    }

    pub fn count_by_reason(&self, reason: RejectionReason) -> usize {
        self.rejections.iter().filter(|r| r.reason == reason).count()
    }
}

struct Accepted<'a> {
    id: String,
    parent_ref: Option<String>,
    record: &'a FlatRecord,
}

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    New,
    OnPath,
    Done,
}

pub struct TreeBuilder {
    mapping: FieldMapping,
}

impl TreeBuilder {
    pub fn new(mapping: FieldMapping) -> Self {
        Self { mapping }
    }

    pub fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    /// Build a tree from `records`.
    ///
    /// Never fails: bad input is reported, not raised. Output is a pure
    /// function of the input order and contents.
    pub fn build(&self, records: &[FlatRecord]) -> (TreeNode, BuildReport) {
        let mut report = BuildReport {
            total: records.len(),
            ..Default::default()
        };

        let accepted = self.filter(records, &mut report);
        let index: HashMap<&str, usize> = accepted
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id.as_str(), i))
            .collect();

        let mut parent = self.link(&accepted, &index, &mut report);
        break_cycles(&accepted, &mut parent, &mut report);
        let root = self.assemble(&accepted, &parent);

        report.accepted = accepted.len();
        if !report.cycles.is_empty() {
            warn!(cycles = report.cycles.len(), "Parent cycles broken at the root");
        }
        if !report.orphans.is_empty() {
            warn!(orphans = report.orphans.len(), "Records with missing parents attached to the root");
        }
        info!(
            total = report.total,
            accepted = report.accepted,
            rejected = report.rejected,
            "Tree built"
        );

        (root, report)
    }

    fn filter<'a>(&self, records: &'a [FlatRecord], report: &mut BuildReport) -> Vec<Accepted<'a>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut accepted = Vec::with_capacity(records.len());

        for (index, record) in records.iter().enumerate() {
            // Ids are checked as stored; padding is a format error, not trimmed away
            let id = record
                .text(&self.mapping.id_field)
                .filter(|s| !s.trim().is_empty());

            let reason = match &id {
                None => Some(RejectionReason::BlankId),
                Some(id) if id.trim() != id || !self.mapping.id_format.accepts(id) => {
                    Some(RejectionReason::InvalidIdFormat)
                }
                Some(id) if seen.contains(id) => Some(RejectionReason::DuplicateId),
                Some(_) => None,
            };

            match (reason, id) {
                (Some(reason), id) => {
                    debug!(index, id = id.as_deref().unwrap_or(""), %reason, "Record rejected");
                    report.rejections.push(Rejection { index, id, reason });
                    report.rejected += 1;
                }
                (None, Some(id)) => {
                    seen.insert(id.clone());
                    accepted.push(Accepted {
                        parent_ref: record.parent_reference(&self.mapping),
                        id,
                        record,
                    });
                }
                (None, None) => {}
            }
        }

        accepted
    }

    fn link(
        &self,
        accepted: &[Accepted<'_>],
        index: &HashMap<&str, usize>,
        report: &mut BuildReport,
    ) -> Vec<Option<usize>> {
        accepted
            .iter()
            .map(|a| match a.parent_ref.as_deref() {
                None => None,
                Some(parent_id) => match index.get(parent_id) {
                    Some(&p) => Some(p),
                    None => {
                        debug!(id = %a.id, parent = parent_id, "Parent not found");
                        report.orphans.push(a.id.clone());
                        None
                    }
                },
            })
            .collect()
    }

    fn assemble(&self, accepted: &[Accepted<'_>], parent: &[Option<usize>]) -> TreeNode {
        let n = accepted.len();
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut top_level = Vec::new();
        for (i, p) in parent.iter().enumerate() {
            match p {
                Some(p) => children[*p].push(i),
                None => top_level.push(i),
            }
        }

        // Pre-order with depths; children always follow their parent
        let mut order = Vec::with_capacity(n);
        let mut depth = vec![0usize; n];
        let mut stack: Vec<(usize, usize)> = top_level.iter().rev().map(|&i| (i, 1)).collect();
        while let Some((i, d)) = stack.pop() {
            depth[i] = d;
            order.push(i);
            stack.extend(children[i].iter().rev().map(|&c| (c, d + 1)));
        }

        let mut slots: Vec<Option<TreeNode>> = vec![None; n];
        for &i in order.iter().rev() {
            let kids = children[i]
                .iter()
                .filter_map(|&c| slots[c].take())
                .collect();
            let a = &accepted[i];
            slots[i] = Some(TreeNode {
                id: a.id.clone(),
                label: self
                    .mapping
                    .label_field
                    .as_deref()
                    .and_then(|field| a.record.text(field)),
                parent_id: parent[i].map(|p| accepted[p].id.clone()),
                depth: depth[i],
                fields: self.mapping.payload(a.record),
                children: kids,
            });
        }

        TreeNode::synthetic_root(top_level.iter().filter_map(|&i| slots[i].take()).collect())
    }
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new(FieldMapping::default())
    }
}

/// Walk parent chains in input order; every cycle found is recorded once and
/// its members detached from their parents.
fn break_cycles(accepted: &[Accepted<'_>], parent: &mut [Option<usize>], report: &mut BuildReport) {
    let mut state = vec![Visit::New; parent.len()];

    for start in 0..parent.len() {
        if state[start] != Visit::New {
            continue;
        }

        let mut path = Vec::new();
        let mut current = Some(start);
        while let Some(c) = current {
            match state[c] {
                Visit::New => {
                    state[c] = Visit::OnPath;
                    path.push(c);
                    current = parent[c];
                }
                Visit::OnPath => {
                    if let Some(pos) = path.iter().position(|&p| p == c) {
                        let members = &path[pos..];
                        let ids: Vec<String> =
                            members.iter().map(|&m| accepted[m].id.clone()).collect();
                        debug!(cycle = ?ids, "Cycle detected");
                        for &m in members {
                            parent[m] = None;
                        }
                        report.cycles.push(ids);
                    }
                    break;
                }
                Visit::Done => break,
            }
        }

        for p in path {
            state[p] = Visit::Done;
        }
    }
}
