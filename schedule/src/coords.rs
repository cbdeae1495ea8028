//! Names of the internal coordinates used inside kernels.
//!
//! For a kernel with tile sizes `T`, grid sizes `G` and block sizes `B`,
//! every statement instance `i` relates to
//!
//! - host coordinates `h.j = host_j(i)`
//! - tile coordinates `s.k` with `T s.k <= e_k(i) <= T s.k + T - 1`
//! - point coordinates `p.k = e_k(i) - T s.k`
//! - block ids `b.k` with `s.k = G g.k + b.k`
//! - thread ids `t.k` with `p.k = B r.k + t.k` (`p.k = t.k` when `T <= B`)
//! - deeper band values `d.j`
//!
//! Array elements use `a.d`, local tile positions `l.d`.

use tessera_poly::Var;

pub fn host(j: usize) -> Var {
    Var::coord("h", j)
}

pub fn tile(k: usize) -> Var {
    Var::coord("s", k)
}

pub fn point(k: usize) -> Var {
    Var::coord("p", k)
}

pub fn block(k: usize) -> Var {
    Var::coord("b", k)
}

/// Quotient of a tile coordinate by the grid size.
pub fn block_quotient(k: usize) -> Var {
    Var::coord("g", k)
}

pub fn thread(k: usize) -> Var {
    Var::coord("t", k)
}

/// Quotient of a point coordinate by the block size.
pub fn thread_quotient(k: usize) -> Var {
    Var::coord("r", k)
}

pub fn deeper(j: usize) -> Var {
    Var::coord("d", j)
}

pub fn local(d: usize) -> Var {
    Var::coord("l", d)
}

/// Second copy of `var` used in pair relations.
pub fn other(var: &Var) -> Var {
    var.primed()
}
