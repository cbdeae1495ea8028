//! Variable names.

use std::sync::Arc;

use derive_more::Display;

/// A named integer variable.
///
/// Parameters, statement iterators, generated loop iterators and internal
/// coordinates are all plain variables; their role is decided by the set
/// they appear in. Names containing a `.` are reserved for internal
/// coordinates and never collide with source identifiers.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("{_0}")]
pub struct Var(Arc<str>);

impl Var {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Internal coordinate `prefix.index`.
    pub fn coord(prefix: &str, index: usize) -> Self {
        Self::new(format!("{prefix}.{index}"))
    }

    /// Whether this is an internal coordinate created by [`Var::coord`].
    pub fn is_internal(&self) -> bool {
        self.0.contains('.')
    }

    /// Copy of this variable used for the second instance in a pair relation.
    pub fn primed(&self) -> Self {
        Self::new(format!("{}'", self.0))
    }
}

impl std::fmt::Debug for Var {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Var {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Var {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<&Var> for Var {
    fn from(var: &Var) -> Self {
        var.clone()
    }
}

/// Deterministic generator of internal variables sharing one prefix.
#[derive(Debug, Clone)]
pub struct VarGen {
    prefix: &'static str,
    next: usize,
}

impl VarGen {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix, next: 0 }
    }

    pub fn fresh(&mut self) -> Var {
        let var = Var::coord(self.prefix, self.next);
        self.next += 1;
        var
    }
}
