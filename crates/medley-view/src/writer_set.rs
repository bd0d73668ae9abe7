//! Derived set of authorized writers.
//!
//! Never mutated directly: the builder folds `AddWriter`/`RemoveWriter`
//! entries into it in global order. Besides the current state it keeps each
//! writer's transition history so that activity at any past order position
//! can be answered.

use std::collections::BTreeMap;

use medley_types::WriterId;

use crate::order::OrderKey;

/// Membership record of one writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterInfo {
    /// Position of the grant (`None` for the root writer).
    pub added_at: Option<OrderKey>,
    /// Writer that granted access (`None` for the root writer).
    pub added_by: Option<WriterId>,
    /// Whether the writer is currently authorized.
    pub active: bool,
}

/// Authorized writers, derived from membership entries.
#[derive(Debug, Clone, Default)]
pub struct WriterSet {
    root: Option<WriterId>,
    members: BTreeMap<WriterId, WriterInfo>,
    /// `(position, active)` transitions per writer, in global order.
    history: BTreeMap<WriterId, Vec<(OrderKey, bool)>>,
}

impl WriterSet {
    /// A set containing only the root writer (if known).
    pub fn new(root: Option<WriterId>) -> Self {
        let mut members = BTreeMap::new();
        if let Some(root) = root {
            members.insert(
                root,
                WriterInfo {
                    added_at: None,
                    added_by: None,
                    active: true,
                },
            );
        }
        Self {
            root,
            members,
            history: BTreeMap::new(),
        }
    }

    /// The root writer.
    pub fn root(&self) -> Option<WriterId> {
        self.root
    }

    /// Whether `writer` is active after every folded entry.
    pub fn is_active(&self, writer: &WriterId) -> bool {
        self.members.get(writer).is_some_and(|m| m.active)
    }

    /// Whether `writer` was active just before position `at`.
    pub fn is_active_at(&self, writer: &WriterId, at: &OrderKey) -> bool {
        if self.root.as_ref() == Some(writer) {
            return true;
        }
        let Some(transitions) = self.history.get(writer) else {
            return false;
        };
        let idx = transitions.partition_point(|(key, _)| key < at);
        idx > 0 && transitions[idx - 1].1
    }

    /// Membership record of `writer`.
    pub fn get(&self, writer: &WriterId) -> Option<&WriterInfo> {
        self.members.get(writer)
    }

    /// Every writer ever granted, active or not.
    pub fn writers(&self) -> impl Iterator<Item = (&WriterId, &WriterInfo)> {
        self.members.iter()
    }

    /// Number of currently active writers.
    pub fn active_count(&self) -> usize {
        self.members.values().filter(|m| m.active).count()
    }

    /// Fold an `AddWriter` whose author was checked to be active at `at`.
    ///
    /// Returns `false` if the writer was already active.
    pub(crate) fn grant(&mut self, writer: WriterId, granted_by: WriterId, at: OrderKey) -> bool {
        if self.is_active(&writer) {
            return false;
        }
        self.members.insert(
            writer,
            WriterInfo {
                added_at: Some(at),
                added_by: Some(granted_by),
                active: true,
            },
        );
        self.push_transition(writer, at, true);
        true
    }

    /// Fold a `RemoveWriter` whose author was checked to be active at `at`.
    ///
    /// The root cannot be revoked. Returns `false` if nothing changed.
    pub(crate) fn revoke(&mut self, writer: WriterId, at: OrderKey) -> bool {
        if self.root == Some(writer) {
            return false;
        }
        match self.members.get_mut(&writer) {
            Some(info) if info.active => {
                info.active = false;
                self.push_transition(writer, at, false);
                true
            }
            _ => false,
        }
    }

    fn push_transition(&mut self, writer: WriterId, at: OrderKey, active: bool) {
        let transitions = self.history.entry(writer).or_default();
        let idx = transitions.partition_point(|(key, _)| *key < at);
        transitions.insert(idx, (at, active));
    }
}
