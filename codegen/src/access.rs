//! Access expressions of statement references inside a kernel.

use std::collections::BTreeMap;

use snafu::{OptionExt, ResultExt};
use tessera_ir::error::ArrayNotFoundSnafu;
use tessera_ir::{Annotation, AstExpr, Statement};
use tessera_poly::{LinExpr, SymBound, Var};
use tessera_schedule::{ArrayInfo, Kernel, LocalArrayInfo};

use crate::error::*;
use crate::scan::Scope;

/// Element `index` of global array `array`.
///
/// A linearized multi-dimensional array becomes a single row-major index
/// when every trailing dimension has a printable size. Scalars are passed
/// by pointer unless they are read-only.
pub fn global_access(array: &ArrayInfo, bounds: &[Option<SymBound>], index: Vec<AstExpr>, scope: &Scope) -> AstExpr {
    if array.is_scalar() {
        let id = AstExpr::id(array.name.as_str());
        return if array.read_only_scalar { id } else { AstExpr::deref(id) };
    }
    if array.linearize && index.len() > 1 && bounds.len() == index.len() {
        let sizes: Option<Vec<AstExpr>> =
            bounds.iter().skip(1).map(|b| b.as_ref().and_then(|b| scope.bound_expr(b))).collect();
        if let Some(sizes) = sizes {
            let mut dims = index.into_iter();
            let first = dims.next().unwrap_or(AstExpr::Int(0));
            let flat = dims.zip(sizes).fold(first, |acc, (i, size)| AstExpr::add(AstExpr::mul(acc, size), i));
            return AstExpr::access(&array.name, vec![flat]);
        }
    }
    AstExpr::access(&array.name, index)
}

/// Per-kernel and global view of the array a reference targets.
pub fn lookup<'k>(
    kernel: &'k Kernel,
    arrays: &'k [ArrayInfo],
    name: &str,
) -> Result<(&'k LocalArrayInfo, &'k ArrayInfo)> {
    let local = kernel
        .arrays
        .iter()
        .find(|a| a.name == name)
        .context(ArrayNotFoundSnafu { name })
        .context(IrSnafu)?;
    let info = arrays.get(local.array).context(ArrayNotFoundSnafu { name }).context(IrSnafu)?;
    Ok((local, info))
}

/// Annotation of a statement instance whose iterators take the values in
/// `iterators`: promoted references read their on-chip tile, the others
/// global memory.
pub fn statement_annotation(
    kernel: &Kernel,
    arrays: &[ArrayInfo],
    stmt: &Statement,
    iterators: &BTreeMap<Var, LinExpr>,
    scope: &Scope,
) -> Result<Annotation> {
    let mut ref2expr = BTreeMap::new();
    for reference in &stmt.refs {
        let tag = stmt.tag(reference);
        let (local, info) = lookup(kernel, arrays, &reference.array)?;
        let group = local.group_of(&tag);

        let expr = match group.and_then(|g| Some((g.tile()?, g.var_name(local.groups.len())?))) {
            Some((tile, name)) => {
                let mut index = Vec::with_capacity(tile.bounds.len());
                for (bound, global) in tile.bounds.iter().zip(&reference.index) {
                    let offset = bound
                        .localize(global)
                        .context(UnalignedAccessSnafu { stmt: stmt.id.clone(), reference: reference.id.clone() })?;
                    index.push(scope.expr(&offset.substitute_all(iterators)));
                }
                AstExpr::access(name, index)
            }
            None => {
                let index = reference.index.iter().map(|e| scope.expr(&e.substitute_all(iterators))).collect();
                global_access(info, &local.bounds, index, scope)
            }
        };
        ref2expr.insert(reference.id.clone(), expr);
    }
    Ok(Annotation::Statement { stmt: stmt.id.clone(), ref2expr })
}

/// The statement applied to its iterator values.
pub fn statement_call(stmt: &Statement, iterators: &BTreeMap<Var, LinExpr>, scope: &Scope) -> AstExpr {
    let args = stmt.iterators.iter().filter_map(|v| iterators.get(v)).map(|e| scope.expr(e)).collect();
    AstExpr::access(stmt.id.name(), args)
}
