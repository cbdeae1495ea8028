//! Front-end model of a static control part.
//!
//! A [`Scop`] is what the extraction front end hands to the GPU backend:
//! the parameters and their context, the array catalogue, every statement
//! with its iteration domain and references, the dependence relations and
//! a dependence-validated schedule tree.
//!
//! Access relations are kept in affine form: a reference of statement `S`
//! maps an instance `i` of `S` to the array element `a` with
//! `a.d = index[d](i)`. The tagged relation is the same map paired with the
//! `(statement, reference)` tag; the untagged projection forgets the tag.

use std::collections::BTreeMap;
use std::sync::Arc;

use bon::bon;
use itertools::Itertools;
use snafu::{OptionExt, ensure};
use tessera_poly::{Constraint, LinExpr, Polyhedron, Set, Var};

use crate::error::*;
use crate::instance::InstanceSet;
use crate::schedule_tree::ScheduleNode;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Statement identifier.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display, derive_more::Debug)]
#[display("{_0}")]
#[debug("{_0}")]
pub struct StmtId(Arc<str>);

impl StmtId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StmtId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Reference identifier, unique within the scop.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display, derive_more::Debug)]
#[display("{_0}")]
#[debug("{_0}")]
pub struct RefId(Arc<str>);

impl RefId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }
}

impl From<&str> for RefId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A reference tagged with the statement it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("{stmt}[{reference}]")]
pub struct RefTag {
    pub stmt: StmtId,
    pub reference: RefId,
}

impl RefTag {
    pub fn new(stmt: impl Into<StmtId>, reference: impl Into<RefId>) -> Self {
        Self { stmt: stmt.into(), reference: reference.into() }
    }
}

// ============================================================================
// ARRAYS
// ============================================================================

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ElementType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl ElementType {
    /// Size in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }
}

/// An array as declared by the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayDecl {
    pub name: String,
    pub element: ElementType,
    pub n_index: usize,
    /// Declared extent over [`ArrayDecl::dim`] variables and parameters.
    pub extent: Polyhedron,
    /// Declared inside the scop.
    pub declared_local: bool,
    /// Visible outside the scop even though declared inside it.
    pub exposed: bool,
    /// Elements are structures.
    pub is_record: bool,
    /// Must be placed in private memory whenever it is promoted.
    pub force_private: bool,
}

#[bon]
impl ArrayDecl {
    #[builder]
    pub fn builder(
        #[builder(into)] name: String,
        #[builder(default = ElementType::F32)] element: ElementType,
        #[builder(default)] n_index: usize,
        #[builder(default)] extent: Polyhedron,
        #[builder(default = false)] declared_local: bool,
        #[builder(default = false)] exposed: bool,
        #[builder(default = false)] is_record: bool,
        #[builder(default = false)] force_private: bool,
    ) -> Self {
        Self { name, element, n_index, extent, declared_local, exposed, is_record, force_private }
    }
}

impl ArrayDecl {
    /// Variable naming index dimension `d` of any array.
    pub fn dim(d: usize) -> Var {
        Var::coord("a", d)
    }

    /// Extent `0 <= a.d < sizes[d]` for every dimension.
    pub fn box_extent(sizes: &[LinExpr]) -> Polyhedron {
        Polyhedron::from_constraints(sizes.iter().enumerate().flat_map(|(d, size)| {
            [Constraint::ge(Self::dim(d), 0), Constraint::lt(Self::dim(d), size.clone())]
        }))
    }

    pub fn is_scalar(&self) -> bool {
        self.n_index == 0
    }

    pub fn dims(&self) -> Vec<Var> {
        (0..self.n_index).map(Self::dim).collect()
    }
}

// ============================================================================
// STATEMENTS AND REFERENCES
// ============================================================================

/// One array access of a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub id: RefId,
    pub array: String,
    pub read: bool,
    pub write: bool,
    /// Every instance in the domain certainly writes the accessed element.
    pub exact_write: bool,
    /// One affine index per array dimension over iterators and parameters.
    pub index: Vec<LinExpr>,
}

impl Reference {
    pub fn read(id: impl Into<RefId>, array: impl Into<String>, index: Vec<LinExpr>) -> Self {
        Self { id: id.into(), array: array.into(), read: true, write: false, exact_write: true, index }
    }

    pub fn write(id: impl Into<RefId>, array: impl Into<String>, index: Vec<LinExpr>) -> Self {
        Self { id: id.into(), array: array.into(), read: false, write: true, exact_write: true, index }
    }

    pub fn inexact(mut self) -> Self {
        self.exact_write = false;
        self
    }

    /// `a.d = index[d]` for every dimension.
    pub fn access_constraints(&self) -> impl Iterator<Item = Constraint> + '_ {
        self.index.iter().enumerate().map(|(d, e)| Constraint::eq(ArrayDecl::dim(d), e.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub id: StmtId,
    pub iterators: Vec<Var>,
    /// Iteration domain over the iterators and parameters.
    pub domain: Polyhedron,
    pub refs: Vec<Reference>,
}

impl Statement {
    pub fn new(id: impl Into<StmtId>, iterators: Vec<Var>, domain: Polyhedron) -> Self {
        Self { id: id.into(), iterators, domain, refs: Vec::new() }
    }

    pub fn with_ref(mut self, reference: Reference) -> Self {
        self.refs.push(reference);
        self
    }

    pub fn reference(&self, id: &RefId) -> Option<&Reference> {
        self.refs.iter().find(|r| &r.id == id)
    }

    pub fn tag(&self, reference: &Reference) -> RefTag {
        RefTag { stmt: self.id.clone(), reference: reference.id.clone() }
    }

    /// Renaming that primes every iterator, used for the sink side of a
    /// dependence.
    pub fn primed(&self, var: &Var) -> Option<Var> {
        self.iterators.contains(var).then(|| var.primed())
    }
}

// ============================================================================
// DEPENDENCES
// ============================================================================

/// A tagged dependence between two references.
///
/// `relation` ranges over the source iterators and the primed sink
/// iterators (see [`Var::primed`]), plus parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependence {
    pub source: RefTag,
    pub sink: RefTag,
    pub relation: Polyhedron,
}

impl Dependence {
    pub fn new(source: RefTag, sink: RefTag, relation: Polyhedron) -> Self {
        Self { source, sink, relation }
    }
}

/// Instances of one reference, over the statement's iterators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedInstances {
    pub tag: RefTag,
    pub instances: Polyhedron,
}

impl TaggedInstances {
    pub fn new(tag: RefTag, instances: Polyhedron) -> Self {
        Self { tag, instances }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependences {
    /// Value-based dataflow from writes to reads.
    pub flow: Vec<Dependence>,
    /// Anti and output dependences.
    pub false_deps: Vec<Dependence>,
    /// Order dependences used for live-range reordering.
    pub order: Vec<Dependence>,
    /// Pairs whose relative order does not matter.
    pub independences: Vec<Dependence>,
    /// Reads that may observe a value from before the scop.
    pub live_in: Vec<TaggedInstances>,
    /// Writes whose value may be observed after the scop.
    pub live_out: Vec<TaggedInstances>,
}

impl Dependences {
    /// Order dependences with the declared independences removed.
    pub fn effective_order(&self) -> Vec<(RefTag, RefTag, Set)> {
        self.order
            .iter()
            .map(|dep| {
                let relation = self
                    .independences
                    .iter()
                    .filter(|ind| ind.source == dep.source && ind.sink == dep.sink)
                    .fold(Set::from_poly(dep.relation.clone()), |acc, ind| acc.subtract_poly(&ind.relation));
                (dep.source.clone(), dep.sink.clone(), relation)
            })
            .filter(|(_, _, relation)| !relation.is_empty())
            .collect()
    }

    /// Every dependence relation, for dumps.
    pub fn all(&self) -> impl Iterator<Item = (&'static str, &Dependence)> {
        self.flow
            .iter()
            .map(|d| ("flow", d))
            .chain(self.false_deps.iter().map(|d| ("false", d)))
            .chain(self.order.iter().map(|d| ("order", d)))
    }
}

// ============================================================================
// SCOP
// ============================================================================

#[derive(Debug, Clone)]
pub struct Scop {
    pub params: Vec<Var>,
    /// Constraints on the parameters.
    pub context: Polyhedron,
    pub arrays: Vec<ArrayDecl>,
    pub statements: Vec<Statement>,
    pub deps: Dependences,
    pub schedule: Arc<ScheduleNode>,
}

#[bon]
impl Scop {
    /// Build and validate a scop. Without an explicit schedule the
    /// statements execute in declaration order.
    #[builder]
    pub fn builder(
        #[builder(default)] params: Vec<Var>,
        #[builder(default)] context: Polyhedron,
        #[builder(default)] arrays: Vec<ArrayDecl>,
        #[builder(default)] statements: Vec<Statement>,
        #[builder(default)] deps: Dependences,
        schedule: Option<Arc<ScheduleNode>>,
    ) -> Result<Self> {
        let schedule = schedule.unwrap_or_else(|| {
            let domain = InstanceSet::from_statements(&statements);
            let children = statements
                .iter()
                .map(|s| ScheduleNode::filter_statements([s.id.clone()], ScheduleNode::leaf()))
                .collect();
            ScheduleNode::domain(domain, ScheduleNode::sequence(children))
        });
        let scop = Self { params, context, arrays, statements, deps, schedule };
        scop.validate()?;
        Ok(scop)
    }
}

impl Scop {
    fn validate(&self) -> Result<()> {
        for stmt in &self.statements {
            for r in &stmt.refs {
                let array = self.array(&r.array)?;
                ensure!(
                    r.index.len() == array.n_index,
                    IndexAritySnafu {
                        stmt: stmt.id.clone(),
                        reference: r.id.clone(),
                        array: array.name.clone(),
                        got: r.index.len(),
                        expected: array.n_index,
                    }
                );
            }
        }
        for (_, dep) in self.deps.all() {
            self.reference(&dep.source)?;
            self.reference(&dep.sink)?;
        }
        for tagged in self.deps.live_in.iter().chain(&self.deps.live_out) {
            self.reference(&tagged.tag)?;
        }
        Ok(())
    }

    pub fn statement(&self, id: &StmtId) -> Result<&Statement> {
        self.statements.iter().find(|s| &s.id == id).context(StatementNotFoundSnafu { stmt: id.clone() })
    }

    pub fn array(&self, name: &str) -> Result<&ArrayDecl> {
        self.arrays.iter().find(|a| a.name == name).context(ArrayNotFoundSnafu { name })
    }

    pub fn reference(&self, tag: &RefTag) -> Result<(&Statement, &Reference)> {
        let stmt = self.statement(&tag.stmt)?;
        let reference = stmt
            .reference(&tag.reference)
            .context(ReferenceNotFoundSnafu { stmt: tag.stmt.clone(), reference: tag.reference.clone() })?;
        Ok((stmt, reference))
    }

    /// Every tagged reference to `array`, in statement order.
    pub fn references_to<'a>(&'a self, array: &'a str) -> impl Iterator<Item = (&'a Statement, &'a Reference)> + 'a {
        self.statements.iter().flat_map(move |s| s.refs.iter().filter(move |r| r.array == array).map(move |r| (s, r)))
    }

    /// Domain of every statement.
    pub fn domain(&self) -> InstanceSet {
        InstanceSet::from_statements(&self.statements)
    }

    /// Elements of `array` accessed by `reference` over `instances`, as a
    /// polyhedron over the array dimensions and parameters.
    pub fn access_image(&self, stmt: &Statement, reference: &Reference, instances: &Polyhedron) -> Polyhedron {
        stmt.domain.intersect(instances).with_all(reference.access_constraints()).project_out(stmt.iterators.iter())
    }

    /// Parameters as a sorted set.
    pub fn param_set(&self) -> std::collections::BTreeSet<Var> {
        self.params.iter().cloned().collect()
    }

    /// Names of arrays accessed by the given statements, in catalogue order.
    pub fn arrays_accessed_by<'a>(&'a self, stmts: impl IntoIterator<Item = &'a StmtId>) -> Vec<&'a ArrayDecl> {
        let stmts: Vec<&StmtId> = stmts.into_iter().collect();
        let names: BTreeMap<&str, ()> = self
            .statements
            .iter()
            .filter(|s| stmts.contains(&&s.id))
            .flat_map(|s| s.refs.iter().map(|r| (r.array.as_str(), ())))
            .collect();
        self.arrays.iter().filter(|a| names.contains_key(a.name.as_str())).collect_vec()
    }
}
