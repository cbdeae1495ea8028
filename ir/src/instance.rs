//! Sets of statement instances.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;
use tessera_poly::{Polyhedron, Set};

use crate::scop::{Statement, StmtId};

/// Statement instances keyed by statement. Each entry is a set over the
/// statement's iterators and the parameters.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct InstanceSet {
    parts: BTreeMap<StmtId, Set>,
}

impl InstanceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full domain of every statement.
    pub fn from_statements(stmts: &[Statement]) -> Self {
        let mut set = Self::new();
        for stmt in stmts {
            set.insert(stmt.id.clone(), Set::from_poly(stmt.domain.clone()));
        }
        set
    }

    /// Every instance of the listed statements.
    pub fn universe_of(stmts: impl IntoIterator<Item = StmtId>) -> Self {
        Self { parts: stmts.into_iter().map(|s| (s, Set::universe())).collect() }
    }

    pub fn insert(&mut self, stmt: StmtId, instances: Set) {
        let merged = match self.parts.remove(&stmt) {
            Some(prev) => prev.union(&instances),
            None => instances,
        };
        self.parts.insert(stmt, merged);
    }

    pub fn with(mut self, stmt: StmtId, instances: Polyhedron) -> Self {
        self.insert(stmt, Set::from_poly(instances));
        self
    }

    pub fn get(&self, stmt: &StmtId) -> Option<&Set> {
        self.parts.get(stmt)
    }

    pub fn contains_stmt(&self, stmt: &StmtId) -> bool {
        self.parts.contains_key(stmt)
    }

    pub fn statements(&self) -> impl Iterator<Item = &StmtId> {
        self.parts.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StmtId, &Set)> {
        self.parts.iter()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.values().all(Set::is_empty)
    }

    pub fn union(&self, other: &InstanceSet) -> InstanceSet {
        let mut out = self.clone();
        for (stmt, set) in &other.parts {
            out.insert(stmt.clone(), set.clone());
        }
        out
    }

    /// Statement-wise intersection; statements missing from either side
    /// are dropped.
    pub fn intersect(&self, other: &InstanceSet) -> InstanceSet {
        let parts = self
            .parts
            .iter()
            .filter_map(|(stmt, set)| other.parts.get(stmt).map(|o| (stmt.clone(), set.intersect(o))))
            .filter(|(_, set)| !set.parts().is_empty())
            .collect();
        InstanceSet { parts }
    }
}

impl fmt::Display for InstanceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ {} }}", self.parts.iter().map(|(stmt, set)| format!("{stmt}: {set}")).join("; "))
    }
}

impl fmt::Debug for InstanceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
