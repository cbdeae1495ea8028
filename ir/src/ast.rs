//! Annotated abstract syntax trees handed to a printer.
//!
//! The tree is target neutral: loops, conditionals, blocks, kernel
//! launches and user nodes. Every user node carries an [`Annotation`]
//! telling the printer whether it stands for a source statement, a copy
//! between global and on-chip memory, or a barrier.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use itertools::Itertools;
use tessera_poly::arith::{floor_div, pmod};
use tessera_poly::{Bound, BoundKind, LinExpr, SymBound, Var};

use crate::scop::{RefId, StmtId};
use crate::schedule_tree::{KernelId, LoopType};

// ============================================================================
// EXPRESSIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum AstOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    /// Unary negation.
    #[strum(serialize = "neg")]
    Minus,
    /// Division rounding towards negative infinity.
    #[strum(serialize = "floord")]
    FDivQ,
    /// Division of a non-negative dividend.
    #[strum(serialize = "/")]
    PDivQ,
    /// Remainder of a non-negative dividend.
    #[strum(serialize = "%")]
    PDivR,
    /// Exact division.
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "min")]
    Min,
    #[strum(serialize = "max")]
    Max,
    /// `cond ? a : b`
    #[strum(serialize = "?:")]
    Select,
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = "&")]
    AddressOf,
    #[strum(serialize = "*")]
    Deref,
}

impl AstOp {
    fn is_infix(self) -> bool {
        matches!(
            self,
            Self::Add
                | Self::Sub
                | Self::Mul
                | Self::PDivQ
                | Self::PDivR
                | Self::Div
                | Self::And
                | Self::Or
                | Self::Eq
                | Self::Le
                | Self::Lt
                | Self::Ge
                | Self::Gt
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AstExpr {
    Int(i64),
    Id(Var),
    Op { op: AstOp, args: Vec<AstExpr> },
    /// `array[index[0]][index[1]]...`
    Access { array: String, index: Vec<AstExpr> },
}

impl AstExpr {
    pub fn id(var: impl Into<Var>) -> Self {
        Self::Id(var.into())
    }

    pub fn op(op: AstOp, args: Vec<AstExpr>) -> Self {
        Self::Op { op, args }
    }

    pub fn access(array: impl Into<String>, index: Vec<AstExpr>) -> Self {
        Self::Access { array: array.into(), index }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn add(a: AstExpr, b: AstExpr) -> Self {
        match (a.as_int(), b.as_int()) {
            (Some(x), Some(y)) => Self::Int(x + y),
            (Some(0), _) => b,
            (_, Some(0)) => a,
            (_, Some(y)) if y < 0 => Self::op(AstOp::Sub, vec![a, Self::Int(-y)]),
            _ => Self::op(AstOp::Add, vec![a, b]),
        }
    }

    pub fn sub(a: AstExpr, b: AstExpr) -> Self {
        match (a.as_int(), b.as_int()) {
            (Some(x), Some(y)) => Self::Int(x - y),
            (_, Some(0)) => a,
            (Some(0), _) => Self::neg(b),
            (_, Some(y)) if y < 0 => Self::op(AstOp::Add, vec![a, Self::Int(-y)]),
            _ => Self::op(AstOp::Sub, vec![a, b]),
        }
    }

    pub fn mul(a: AstExpr, b: AstExpr) -> Self {
        match (a.as_int(), b.as_int()) {
            (Some(x), Some(y)) => Self::Int(x * y),
            (Some(0), _) | (_, Some(0)) => Self::Int(0),
            (Some(1), _) => b,
            (_, Some(1)) => a,
            (Some(-1), _) => Self::neg(b),
            (_, Some(-1)) => Self::neg(a),
            _ => Self::op(AstOp::Mul, vec![a, b]),
        }
    }

    pub fn neg(a: AstExpr) -> Self {
        match a {
            Self::Int(v) => Self::Int(-v),
            Self::Op { op: AstOp::Minus, mut args } if args.len() == 1 => args.remove(0),
            a => Self::op(AstOp::Minus, vec![a]),
        }
    }

    /// `floor(a / d)` for a positive constant `d`.
    pub fn fdiv_q(a: AstExpr, d: i64) -> Self {
        match (a.as_int(), d) {
            (_, 1) => a,
            (Some(x), d) => Self::Int(floor_div(x, d)),
            _ => Self::op(AstOp::FDivQ, vec![a, Self::Int(d)]),
        }
    }

    /// `ceil(a / d)` for a positive constant `d`, as `floor((a + d - 1) / d)`.
    pub fn cdiv_q(a: AstExpr, d: i64) -> Self {
        if d == 1 {
            return a;
        }
        Self::fdiv_q(Self::add(a, Self::Int(d - 1)), d)
    }

    /// Non-negative remainder of `a` by a positive constant `d`.
    pub fn pdiv_r(a: AstExpr, d: i64) -> Self {
        match (a.as_int(), d) {
            (_, 1) => Self::Int(0),
            (Some(x), d) => Self::Int(pmod(x, d)),
            _ => Self::op(AstOp::PDivR, vec![a, Self::Int(d)]),
        }
    }

    pub fn min(args: Vec<AstExpr>) -> Self {
        Self::fold_extremum(AstOp::Min, args)
    }

    pub fn max(args: Vec<AstExpr>) -> Self {
        Self::fold_extremum(AstOp::Max, args)
    }

    fn fold_extremum(op: AstOp, args: Vec<AstExpr>) -> Self {
        let mut args: Vec<AstExpr> = args.into_iter().unique().collect();
        let consts: Vec<i64> = args.iter().filter_map(AstExpr::as_int).collect();
        if consts.len() > 1 {
            let folded = match op {
                AstOp::Min => consts.iter().copied().min(),
                _ => consts.iter().copied().max(),
            };
            args.retain(|a| a.as_int().is_none());
            args.extend(folded.map(Self::Int));
        }
        match args.len() {
            0 => Self::Int(0),
            1 => args.remove(0),
            _ => Self::op(op, args),
        }
    }

    pub fn cmp(op: AstOp, a: AstExpr, b: AstExpr) -> Self {
        Self::op(op, vec![a, b])
    }

    /// Conjunction; `None` when `conds` is empty.
    pub fn and_all(conds: impl IntoIterator<Item = AstExpr>) -> Option<Self> {
        conds.into_iter().reduce(|a, b| Self::op(AstOp::And, vec![a, b]))
    }

    pub fn address_of(a: AstExpr) -> Self {
        Self::op(AstOp::AddressOf, vec![a])
    }

    pub fn deref(a: AstExpr) -> Self {
        Self::op(AstOp::Deref, vec![a])
    }

    /// Affine expression with variables replaced through `map`; variables
    /// missing from the map are emitted as identifiers.
    pub fn from_lin(expr: &LinExpr, map: &BTreeMap<Var, AstExpr>) -> Self {
        let mut out: Option<AstExpr> = None;
        for (var, coeff) in expr.terms() {
            let value = map.get(var).cloned().unwrap_or_else(|| Self::Id(var.clone()));
            out = Some(match out {
                None => Self::mul(Self::Int(coeff), value),
                Some(acc) if coeff < 0 => Self::sub(acc, Self::mul(Self::Int(-coeff), value)),
                Some(acc) => Self::add(acc, Self::mul(Self::Int(coeff), value)),
            });
        }
        match out {
            None => Self::Int(expr.constant_term()),
            Some(acc) => Self::add(acc, Self::Int(expr.constant_term())),
        }
    }

    /// A lower bound rounds up, an upper bound rounds down.
    pub fn from_bound(bound: &Bound, kind: BoundKind, map: &BTreeMap<Var, AstExpr>) -> Self {
        let expr = Self::from_lin(&bound.expr, map);
        match kind {
            BoundKind::Lower => Self::cdiv_q(expr, bound.denom),
            BoundKind::Upper => Self::fdiv_q(expr, bound.denom),
        }
    }

    /// `None` when some piece is unbounded or the bound is vacuous.
    pub fn from_sym_bound(bound: &SymBound, map: &BTreeMap<Var, AstExpr>) -> Option<Self> {
        if bound.is_unbounded() || bound.is_vacuous() {
            return None;
        }
        let kind = bound.kind();
        let pieces = bound
            .pieces()
            .iter()
            .map(|piece| {
                let candidates = piece.iter().map(|b| Self::from_bound(b, kind, map)).collect();
                match kind {
                    BoundKind::Upper => Self::min(candidates),
                    BoundKind::Lower => Self::max(candidates),
                }
            })
            .collect();
        Some(match kind {
            BoundKind::Upper => Self::max(pieces),
            BoundKind::Lower => Self::min(pieces),
        })
    }

    /// Value under `env`; comparisons and conjunctions yield 0 or 1.
    /// Array accesses and address operations have no value.
    pub fn eval(&self, env: &BTreeMap<Var, i64>) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Id(var) => env.get(var).copied(),
            Self::Access { .. } => None,
            Self::Op { op, args } => {
                let vals: Option<Vec<i64>> = args.iter().map(|a| a.eval(env)).collect();
                let vals = vals?;
                let arg = |i: usize| vals.get(i).copied();
                let flag = |b: bool| Some(i64::from(b));
                match op {
                    AstOp::Add => Some(arg(0)? + arg(1)?),
                    AstOp::Sub => Some(arg(0)? - arg(1)?),
                    AstOp::Mul => Some(arg(0)? * arg(1)?),
                    AstOp::Minus => Some(-arg(0)?),
                    AstOp::FDivQ | AstOp::PDivQ | AstOp::Div => {
                        let d = arg(1)?;
                        (d > 0).then(|| floor_div(vals[0], d))
                    }
                    AstOp::PDivR => {
                        let d = arg(1)?;
                        (d > 0).then(|| pmod(vals[0], d))
                    }
                    AstOp::Min => vals.iter().copied().min(),
                    AstOp::Max => vals.iter().copied().max(),
                    AstOp::Select => Some(if arg(0)? != 0 { arg(1)? } else { arg(2)? }),
                    AstOp::And => flag(arg(0)? != 0 && arg(1)? != 0),
                    AstOp::Or => flag(arg(0)? != 0 || arg(1)? != 0),
                    AstOp::Eq => flag(arg(0)? == arg(1)?),
                    AstOp::Le => flag(arg(0)? <= arg(1)?),
                    AstOp::Lt => flag(arg(0)? < arg(1)?),
                    AstOp::Ge => flag(arg(0)? >= arg(1)?),
                    AstOp::Gt => flag(arg(0)? > arg(1)?),
                    AstOp::AddressOf | AstOp::Deref => None,
                }
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Int(v) if *v < 0 => 6,
            Self::Int(_) | Self::Id(_) | Self::Access { .. } => 7,
            Self::Op { op, .. } => match op {
                AstOp::Select => 0,
                AstOp::Or => 1,
                AstOp::And => 2,
                AstOp::Eq | AstOp::Le | AstOp::Lt | AstOp::Ge | AstOp::Gt => 3,
                AstOp::Add | AstOp::Sub => 4,
                AstOp::Mul | AstOp::PDivQ | AstOp::PDivR | AstOp::Div => 5,
                AstOp::Minus | AstOp::AddressOf | AstOp::Deref => 6,
                AstOp::FDivQ | AstOp::Min | AstOp::Max => 7,
            },
        }
    }

    /// Operand of an operator binding at `min`: parenthesized when it binds
    /// looser.
    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min { write!(f, "({self})") } else { write!(f, "{self}") }
    }
}

impl From<i64> for AstExpr {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<Var> for AstExpr {
    fn from(var: Var) -> Self {
        Self::Id(var)
    }
}

impl fmt::Display for AstExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Id(var) => write!(f, "{var}"),
            Self::Access { array, index } => {
                write!(f, "{array}")?;
                for i in index {
                    write!(f, "[{i}]")?;
                }
                Ok(())
            }
            Self::Op { op, args } => match (op, args.as_slice()) {
                (AstOp::Minus | AstOp::AddressOf | AstOp::Deref, [a]) => {
                    let sign = if *op == AstOp::Minus { "-".to_string() } else { op.to_string() };
                    f.write_str(&sign)?;
                    a.fmt_operand(f, 7)
                }
                (AstOp::Select, [c, a, b]) => {
                    c.fmt_operand(f, 1)?;
                    f.write_str(" ? ")?;
                    a.fmt_operand(f, 1)?;
                    f.write_str(" : ")?;
                    b.fmt_operand(f, 0)
                }
                (op, [a, b]) if op.is_infix() => {
                    let prec = self.precedence();
                    a.fmt_operand(f, prec)?;
                    write!(f, " {op} ")?;
                    b.fmt_operand(f, prec + 1)
                }
                (op, args) => write!(f, "{op}({})", args.iter().join(", ")),
            },
        }
    }
}

// ============================================================================
// NODES
// ============================================================================

/// Printer payload of a user node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    /// A source statement with every reference rewritten to its final
    /// access expression.
    Statement { stmt: StmtId, ref2expr: BTreeMap<RefId, AstExpr> },
    /// Copy of one element between global and on-chip memory. `read`
    /// copies global to local.
    Copy { read: bool, array: String, local: String, global_index: AstExpr, local_index: AstExpr },
    /// Block-wide barrier.
    Sync,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AstNode {
    For { iterator: Var, init: AstExpr, cond: AstExpr, stride: i64, body: Box<AstNode>, loop_type: LoopType },
    If { cond: AstExpr, then: Box<AstNode>, otherwise: Option<Box<AstNode>> },
    Block(Vec<AstNode>),
    User { expr: AstExpr, annotation: Annotation },
    /// Device kernel launch with its grid and block sizes.
    Kernel { id: KernelId, grid: Vec<AstExpr>, block: Vec<AstExpr>, body: Box<AstNode> },
}

impl AstNode {
    /// Block of `nodes`, flattening nested blocks; a single node is
    /// returned as is.
    pub fn block(nodes: Vec<AstNode>) -> Self {
        let mut flat = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                Self::Block(inner) => flat.extend(inner),
                node => flat.push(node),
            }
        }
        if flat.len() == 1 {
            return flat.remove(0);
        }
        Self::Block(flat)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Block(nodes) if nodes.is_empty())
    }

    /// `body` under `cond`, or `body` itself when there is no condition.
    pub fn guarded(cond: Option<AstExpr>, body: AstNode) -> Self {
        match cond {
            Some(cond) if cond.as_int() != Some(1) => Self::If { cond, then: Box::new(body), otherwise: None },
            _ => body,
        }
    }

    pub fn sync() -> Self {
        Self::User { expr: AstExpr::id("sync"), annotation: Annotation::Sync }
    }

    /// Pre-order visit.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a AstNode)) {
        f(self);
        match self {
            Self::For { body, .. } | Self::Kernel { body, .. } => body.visit(f),
            Self::If { then, otherwise, .. } => {
                then.visit(f);
                if let Some(otherwise) = otherwise {
                    otherwise.visit(f);
                }
            }
            Self::Block(nodes) => nodes.iter().for_each(|n| n.visit(f)),
            Self::User { .. } => {}
        }
    }

    /// Annotations of every user node in program order.
    pub fn annotations(&self) -> Vec<&Annotation> {
        let mut out = Vec::new();
        self.visit(&mut |node| {
            if let Self::User { annotation, .. } = node {
                out.push(annotation);
            }
        });
        out
    }

    pub fn kernels(&self) -> Vec<&AstNode> {
        let mut out = Vec::new();
        self.visit(&mut |node| {
            if matches!(node, Self::Kernel { .. }) {
                out.push(node);
            }
        });
        out
    }

    fn dump(&self, depth: usize, out: &mut String) -> fmt::Result {
        let pad = "  ".repeat(depth);
        match self {
            Self::For { iterator, init, cond, stride, body, loop_type } => {
                let hint = match loop_type {
                    LoopType::Default => String::new(),
                    other => format!(" // {other}"),
                };
                writeln!(out, "{pad}for ({iterator} = {init}; {cond}; {iterator} += {stride}) {{{hint}")?;
                body.dump(depth + 1, out)?;
                writeln!(out, "{pad}}}")
            }
            Self::If { cond, then, otherwise } => {
                writeln!(out, "{pad}if ({cond}) {{")?;
                then.dump(depth + 1, out)?;
                if let Some(otherwise) = otherwise {
                    writeln!(out, "{pad}}} else {{")?;
                    otherwise.dump(depth + 1, out)?;
                }
                writeln!(out, "{pad}}}")
            }
            Self::Block(nodes) => nodes.iter().try_for_each(|n| n.dump(depth, out)),
            Self::User { annotation, .. } => match annotation {
                Annotation::Statement { stmt, ref2expr } => {
                    writeln!(out, "{pad}{stmt}({});", ref2expr.iter().map(|(r, e)| format!("{r}: {e}")).join(", "))
                }
                Annotation::Copy { read: true, global_index, local_index, .. } => {
                    writeln!(out, "{pad}{local_index} = {global_index};")
                }
                Annotation::Copy { read: false, global_index, local_index, .. } => {
                    writeln!(out, "{pad}{global_index} = {local_index};")
                }
                Annotation::Sync => writeln!(out, "{pad}sync();"),
            },
            Self::Kernel { id, grid, block, body } => {
                writeln!(out, "{pad}launch {id} grid({}) block({}) {{", grid.iter().join(", "), block.iter().join(", "))?;
                body.dump(depth + 1, out)?;
                writeln!(out, "{pad}}}")
            }
        }
    }
}

impl fmt::Display for AstNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.dump(0, &mut out)?;
        f.write_str(&out)
    }
}
