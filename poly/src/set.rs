//! Finite unions of polyhedra.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use itertools::Itertools;

use crate::bound::{BoundKind, SymBound};
use crate::constraint::Constraint;
use crate::polyhedron::Polyhedron;
use crate::var::Var;

/// A union of polyhedra over the same variables.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Set {
    parts: Vec<Polyhedron>,
}

impl Set {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn universe() -> Self {
        Self { parts: vec![Polyhedron::universe()] }
    }

    pub fn from_poly(poly: Polyhedron) -> Self {
        let mut set = Self::empty();
        set.add_part(poly);
        set
    }

    pub fn parts(&self) -> &[Polyhedron] {
        &self.parts
    }

    pub fn into_parts(self) -> Vec<Polyhedron> {
        self.parts
    }

    pub fn add_part(&mut self, poly: Polyhedron) {
        if !poly.is_obviously_empty() && !self.parts.contains(&poly) {
            self.parts.push(poly);
        }
    }

    pub fn union(&self, other: &Set) -> Set {
        let mut out = self.clone();
        for part in &other.parts {
            out.add_part(part.clone());
        }
        out
    }

    pub fn intersect(&self, other: &Set) -> Set {
        let mut out = Set::empty();
        for (a, b) in self.parts.iter().cartesian_product(other.parts.iter()) {
            out.add_part(a.intersect(b));
        }
        out
    }

    pub fn intersect_poly(&self, poly: &Polyhedron) -> Set {
        Self { parts: self.parts.iter().map(|p| p.intersect(poly)).filter(|p| !p.is_obviously_empty()).collect() }
    }

    pub fn with(&self, constraint: &Constraint) -> Set {
        self.intersect_poly(&Polyhedron::universe().with(constraint.clone()))
    }

    /// Every part proved empty.
    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(Polyhedron::is_empty)
    }

    pub fn is_universe(&self) -> bool {
        self.parts.iter().any(Polyhedron::is_universe)
    }

    /// Remove parts proved empty.
    pub fn coalesce(&self) -> Set {
        Self { parts: self.parts.iter().filter(|p| !p.is_empty()).cloned().collect() }
    }

    /// `self \ other`.
    ///
    /// Exact when every variable of `other` is a set dimension or parameter
    /// of `self`; an existential variable in `other` would be negated as if
    /// it were free.
    pub fn subtract_poly(&self, other: &Polyhedron) -> Set {
        if other.is_obviously_empty() {
            return self.clone();
        }
        let mut out = Set::empty();
        for part in &self.parts {
            // part \ (c1 and c2 ...) = (part and not c1) or (part and c1 and not c2) or ...
            let mut prefix = part.clone();
            for c in other.constraints() {
                for neg in c.negate() {
                    let piece = prefix.clone().with(neg);
                    if !piece.is_empty() {
                        out.add_part(piece);
                    }
                }
                prefix = prefix.with(c.clone());
                if prefix.is_obviously_empty() {
                    break;
                }
            }
        }
        out
    }

    pub fn subtract(&self, other: &Set) -> Set {
        other.parts.iter().fold(self.clone(), |acc, part| acc.subtract_poly(part))
    }

    /// `self` is contained in `other` (proved).
    pub fn is_subset(&self, other: &Set) -> bool {
        self.subtract(other).is_empty()
    }

    pub fn project_out<'a>(&self, vars: impl IntoIterator<Item = &'a Var> + Clone) -> Set {
        let mut out = Set::empty();
        for part in &self.parts {
            out.add_part(part.project_out(vars.clone()));
        }
        out
    }

    pub fn project_onto(&self, keep: &BTreeSet<Var>) -> Set {
        let mut out = Set::empty();
        for part in &self.parts {
            out.add_part(part.project_onto(keep));
        }
        out
    }

    pub fn gist(&self, context: &Polyhedron) -> Set {
        let mut out = Set::empty();
        for part in &self.parts {
            if part.intersect(context).is_empty() {
                continue;
            }
            out.add_part(part.gist(context));
        }
        out
    }

    pub fn vars(&self) -> BTreeSet<Var> {
        self.parts.iter().flat_map(Polyhedron::vars).collect()
    }

    /// Extremum of `var` over the union in terms of `keep`.
    pub fn extremum(&self, kind: BoundKind, var: &Var, keep: &BTreeSet<Var>) -> SymBound {
        let pieces = self
            .parts
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| {
                let bounds = p.bounds(var, keep);
                match kind {
                    BoundKind::Lower => bounds.lower,
                    BoundKind::Upper => bounds.upper,
                }
            })
            .collect();
        SymBound::new(kind, pieces)
    }

    pub fn contains(&self, point: &BTreeMap<Var, i64>) -> bool {
        self.parts.iter().any(|p| p.contains(point))
    }
}

impl From<Polyhedron> for Set {
    fn from(poly: Polyhedron) -> Self {
        Self::from_poly(poly)
    }
}

impl fmt::Display for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parts.is_empty() {
            return f.write_str("{ false }");
        }
        write!(f, "{}", self.parts.iter().join(" or "))
    }
}

impl fmt::Debug for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
