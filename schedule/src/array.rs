//! Per-array information shared by every kernel.

use std::collections::BTreeSet;

use tessera_ir::{ArrayDecl, ElementType, RefTag, Scop};
use tessera_poly::{BoundKind, Constraint, Polyhedron, Set, SymBound, Var};
use tracing::{debug, instrument};

use crate::context::GenContext;
use crate::diagnostic::Diagnostic;

#[derive(Debug, Clone)]
pub struct ArrayInfo {
    pub name: String,
    pub element: ElementType,
    pub n_index: usize,
    /// Every reference to the array, in statement order.
    pub refs: Vec<RefTag>,
    /// Elements accessed anywhere in the scop, over `a.d` and parameters.
    pub extent: Set,
    /// Size of each dimension; `None` when it cannot be bounded.
    pub bounds: Vec<Option<SymBound>>,
    pub declared_local: bool,
    pub exposed: bool,
    pub is_record: bool,
    pub force_private: bool,
    pub read_only_scalar: bool,
    pub linearize: bool,
}

impl ArrayInfo {
    pub fn is_scalar(&self) -> bool {
        self.n_index == 0
    }

    pub fn accessed(&self) -> bool {
        !self.refs.is_empty()
    }

    /// The array may be observed after the scop.
    pub fn may_persist(&self) -> bool {
        self.exposed || !self.declared_local
    }

    pub fn element_size(&self) -> usize {
        self.element.size()
    }

    pub fn has_unbounded_dim(&self) -> bool {
        self.bounds.iter().any(Option::is_none)
    }

    /// Every dimension size is non-negative.
    pub fn positive_size_guard(&self) -> Polyhedron {
        let constraints = self
            .bounds
            .iter()
            .flatten()
            .filter_map(|bound| match bound.pieces() {
                [piece] => Some(piece.iter().map(|b| Constraint::ge(b.expr.clone(), 0)).collect::<Vec<_>>()),
                _ => None,
            })
            .flatten();
        Polyhedron::from_constraints(constraints)
    }

    /// Bounds simplified under a kernel context. A bound with no candidate
    /// left becomes zero.
    pub fn localized_bounds(&self, context: &Polyhedron) -> Vec<Option<SymBound>> {
        self.bounds
            .iter()
            .map(|bound| {
                bound.as_ref().map(|b| {
                    let gisted = b.gist(context);
                    if gisted.is_vacuous() { SymBound::constant(BoundKind::Upper, 0) } else { gisted }
                })
            })
            .collect()
    }
}

/// References of every statement targeting `array`.
pub fn collect_references(scop: &Scop, array: &str) -> Vec<RefTag> {
    scop.references_to(array).map(|(stmt, r)| stmt.tag(r)).collect()
}

/// A zero-dimensional, non-record array that is never written.
pub fn is_read_only_scalar(scop: &Scop, array: &ArrayDecl) -> bool {
    array.is_scalar() && !array.is_record && !scop.references_to(&array.name).any(|(_, r)| r.write)
}

/// Union of the access images of every reference to `array`.
fn accessed_extent(scop: &Scop, array: &str) -> Set {
    let mut extent = Set::empty();
    for (stmt, reference) in scop.references_to(array) {
        extent.add_part(scop.access_image(stmt, reference, &scop.context));
    }
    extent
}

/// Size of dimension `dim`: one more than the largest value in `extent`.
fn dim_size(extent: &Set, dim: usize, params: &BTreeSet<Var>) -> Option<SymBound> {
    let upper = extent.extremum(BoundKind::Upper, &ArrayDecl::dim(dim), params);
    (!upper.is_unbounded() && !upper.is_vacuous()).then(|| upper.add_constant(1))
}

#[instrument(skip_all, fields(arrays = ctx.scop.arrays.len()))]
pub fn extract_array_info(ctx: &mut GenContext<'_>) -> Vec<ArrayInfo> {
    let scop = ctx.scop;
    let params = scop.param_set();
    let mut infos = Vec::with_capacity(scop.arrays.len());

    for decl in &scop.arrays {
        let refs = collect_references(scop, &decl.name);
        let extent = accessed_extent(scop, &decl.name);
        let declared = Set::from_poly(decl.extent.intersect(&scop.context));

        // Dimension 0 follows the accessed elements; the others keep the
        // declared shape so that linearized offsets agree with the host.
        let bounds: Vec<Option<SymBound>> = (0..decl.n_index)
            .map(|dim| {
                let (first, second) = if dim == 0 && !refs.is_empty() { (&extent, &declared) } else { (&declared, &extent) };
                dim_size(first, dim, &params)
                    .or_else(|| dim_size(second, dim, &params))
                    .map(|b| b.gist(&scop.context))
            })
            .collect();

        for (dim, bound) in bounds.iter().enumerate() {
            if bound.is_none() {
                ctx.report(Diagnostic::UnboundedDimension { array: decl.name.clone(), dim });
            }
        }

        let linearize =
            ctx.options.linearize_device_arrays || bounds.iter().any(|b| b.as_ref().is_none_or(|b| b.as_constant().is_none()));

        let info = ArrayInfo {
            name: decl.name.clone(),
            element: decl.element,
            n_index: decl.n_index,
            refs,
            extent,
            bounds,
            declared_local: decl.declared_local,
            exposed: decl.exposed,
            is_record: decl.is_record,
            force_private: decl.force_private,
            read_only_scalar: is_read_only_scalar(scop, decl),
            linearize,
        };
        debug!(
            array = %info.name,
            refs = info.refs.len(),
            bounds = ?info.bounds,
            linearize = info.linearize,
            read_only_scalar = info.read_only_scalar,
            "array info"
        );
        infos.push(info);
    }
    infos
}
