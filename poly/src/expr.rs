//! Affine expressions over named variables.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

use crate::arith::gcd;
use crate::var::Var;

/// Integer affine expression `sum(c_i * v_i) + constant`.
///
/// Zero coefficients are never stored, so structural equality is semantic
/// equality.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinExpr {
    terms: BTreeMap<Var, i64>,
    constant: i64,
}

impl LinExpr {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn constant(value: i64) -> Self {
        Self { terms: BTreeMap::new(), constant: value }
    }

    pub fn var(var: impl Into<Var>) -> Self {
        Self::term(var, 1)
    }

    pub fn term(var: impl Into<Var>, coeff: i64) -> Self {
        let mut expr = Self::zero();
        expr.add_term(var.into(), coeff);
        expr
    }

    /// Build from `(variable, coefficient)` pairs and a constant.
    pub fn from_terms<V: Into<Var>>(terms: impl IntoIterator<Item = (V, i64)>, constant: i64) -> Self {
        let mut expr = Self::constant(constant);
        for (var, coeff) in terms {
            expr.add_term(var.into(), coeff);
        }
        expr
    }

    pub fn coeff(&self, var: &Var) -> i64 {
        self.terms.get(var).copied().unwrap_or(0)
    }

    pub fn constant_term(&self) -> i64 {
        self.constant
    }

    pub fn terms(&self) -> impl Iterator<Item = (&Var, i64)> {
        self.terms.iter().map(|(v, c)| (v, *c))
    }

    pub fn vars(&self) -> impl Iterator<Item = &Var> {
        self.terms.keys()
    }

    pub fn involves(&self, var: &Var) -> bool {
        self.terms.contains_key(var)
    }

    pub fn involves_any(&self, vars: &BTreeSet<Var>) -> bool {
        self.terms.keys().any(|v| vars.contains(v))
    }

    /// Whether every variable is in `allowed`.
    pub fn only_involves(&self, allowed: &BTreeSet<Var>) -> bool {
        self.terms.keys().all(|v| allowed.contains(v))
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn as_constant(&self) -> Option<i64> {
        self.is_constant().then_some(self.constant)
    }

    pub fn is_zero(&self) -> bool {
        self.terms.is_empty() && self.constant == 0
    }

    fn add_term(&mut self, var: Var, coeff: i64) {
        if coeff == 0 {
            return;
        }
        let entry = self.terms.entry(var).or_insert(0);
        *entry += coeff;
        if *entry == 0 {
            self.terms.retain(|_, c| *c != 0);
        }
    }

    pub fn add_constant(mut self, value: i64) -> Self {
        self.constant += value;
        self
    }

    pub fn scale(&self, factor: i64) -> Self {
        if factor == 0 {
            return Self::zero();
        }
        Self { terms: self.terms.iter().map(|(v, c)| (v.clone(), c * factor)).collect(), constant: self.constant * factor }
    }

    /// Exact division of every coefficient and the constant by `divisor`.
    pub fn exact_div(&self, divisor: i64) -> Option<Self> {
        if divisor == 0 || self.constant % divisor != 0 || self.terms.values().any(|c| c % divisor != 0) {
            return None;
        }
        Some(Self {
            terms: self.terms.iter().map(|(v, c)| (v.clone(), c / divisor)).collect(),
            constant: self.constant / divisor,
        })
    }

    /// Same expression with `var` dropped.
    pub fn without(&self, var: &Var) -> Self {
        let mut expr = self.clone();
        expr.terms.remove(var);
        expr
    }

    /// Same expression with the constant dropped.
    pub fn linear_part(&self) -> Self {
        Self { terms: self.terms.clone(), constant: 0 }
    }

    /// Replace `var` by `by`.
    pub fn substitute(&self, var: &Var, by: &LinExpr) -> Self {
        let coeff = self.coeff(var);
        if coeff == 0 {
            return self.clone();
        }
        self.without(var) + by.scale(coeff)
    }

    /// Replace every variable that has an entry in `map`.
    pub fn substitute_all(&self, map: &BTreeMap<Var, LinExpr>) -> Self {
        let mut out = Self::constant(self.constant);
        for (var, coeff) in &self.terms {
            match map.get(var) {
                Some(by) => out = out + by.scale(*coeff),
                None => out.add_term(var.clone(), *coeff),
            }
        }
        out
    }

    /// Rename variables; variables mapped to `None` keep their name.
    pub fn rename(&self, f: impl Fn(&Var) -> Option<Var>) -> Self {
        let mut out = Self::constant(self.constant);
        for (var, coeff) in &self.terms {
            out.add_term(f(var).unwrap_or_else(|| var.clone()), *coeff);
        }
        out
    }

    /// Gcd of the variable coefficients, `0` for a constant expression.
    pub fn coeff_gcd(&self) -> i64 {
        self.terms.values().fold(0, |g, c| gcd(g, *c))
    }

    /// Gcd of the coefficients of the given variables only.
    pub fn coeff_gcd_over(&self, vars: &BTreeSet<Var>) -> i64 {
        self.terms.iter().filter(|(v, _)| vars.contains(*v)).fold(0, |g, (_, c)| gcd(g, *c))
    }

    /// Evaluate under a full assignment; `None` if a variable is unassigned.
    pub fn eval(&self, env: &BTreeMap<Var, i64>) -> Option<i64> {
        self.terms.iter().try_fold(self.constant, |acc, (var, coeff)| env.get(var).map(|value| acc + coeff * value))
    }

    /// Evaluate the variables that are assigned, keeping the rest symbolic.
    pub fn partial_eval(&self, env: &BTreeMap<Var, i64>) -> Self {
        let mut out = Self::constant(self.constant);
        for (var, coeff) in &self.terms {
            match env.get(var) {
                Some(value) => out.constant += coeff * value,
                None => out.add_term(var.clone(), *coeff),
            }
        }
        out
    }
}

impl From<i64> for LinExpr {
    fn from(value: i64) -> Self {
        Self::constant(value)
    }
}

impl From<i32> for LinExpr {
    fn from(value: i32) -> Self {
        Self::constant(i64::from(value))
    }
}

impl From<Var> for LinExpr {
    fn from(var: Var) -> Self {
        Self::var(var)
    }
}

impl From<&Var> for LinExpr {
    fn from(var: &Var) -> Self {
        Self::var(var.clone())
    }
}

impl Add<&LinExpr> for &LinExpr {
    type Output = LinExpr;

    fn add(self, rhs: &LinExpr) -> LinExpr {
        let mut out = self.clone();
        for (var, coeff) in &rhs.terms {
            out.add_term(var.clone(), *coeff);
        }
        out.constant += rhs.constant;
        out
    }
}

impl Add for LinExpr {
    type Output = LinExpr;

    fn add(self, rhs: LinExpr) -> LinExpr {
        &self + &rhs
    }
}

impl Add<i64> for LinExpr {
    type Output = LinExpr;

    fn add(self, rhs: i64) -> LinExpr {
        self.add_constant(rhs)
    }
}

impl Sub<&LinExpr> for &LinExpr {
    type Output = LinExpr;

    fn sub(self, rhs: &LinExpr) -> LinExpr {
        self + &rhs.scale(-1)
    }
}

impl Sub for LinExpr {
    type Output = LinExpr;

    fn sub(self, rhs: LinExpr) -> LinExpr {
        &self - &rhs
    }
}

impl Sub<i64> for LinExpr {
    type Output = LinExpr;

    fn sub(self, rhs: i64) -> LinExpr {
        self.add_constant(-rhs)
    }
}

impl Mul<i64> for LinExpr {
    type Output = LinExpr;

    fn mul(self, rhs: i64) -> LinExpr {
        self.scale(rhs)
    }
}

impl Mul<i64> for &LinExpr {
    type Output = LinExpr;

    fn mul(self, rhs: i64) -> LinExpr {
        self.scale(rhs)
    }
}

/// `i32` twins of the integer operators so unsuffixed literals resolve.
macro_rules! impl_i32_ops {
    ($($ty:ty),*) => {$(
        impl Add<i32> for $ty {
            type Output = LinExpr;

            fn add(self, rhs: i32) -> LinExpr {
                self + i64::from(rhs)
            }
        }

        impl Sub<i32> for $ty {
            type Output = LinExpr;

            fn sub(self, rhs: i32) -> LinExpr {
                self - i64::from(rhs)
            }
        }

        impl Mul<i32> for $ty {
            type Output = LinExpr;

            fn mul(self, rhs: i32) -> LinExpr {
                self * i64::from(rhs)
            }
        }
    )*};
}

impl_i32_ops!(LinExpr);

impl Neg for LinExpr {
    type Output = LinExpr;

    fn neg(self) -> LinExpr {
        self.scale(-1)
    }
}

impl Neg for &LinExpr {
    type Output = LinExpr;

    fn neg(self) -> LinExpr {
        self.scale(-1)
    }
}

impl fmt::Display for LinExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (var, coeff) in &self.terms {
            let magnitude = coeff.abs();
            match (first, *coeff < 0) {
                (true, true) => f.write_str("-")?,
                (true, false) => {}
                (false, true) => f.write_str(" - ")?,
                (false, false) => f.write_str(" + ")?,
            }
            if magnitude == 1 {
                write!(f, "{var}")?;
            } else {
                write!(f, "{magnitude}*{var}")?;
            }
            first = false;
        }
        match (first, self.constant) {
            (true, c) => write!(f, "{c}"),
            (false, 0) => Ok(()),
            (false, c) if c < 0 => write!(f, " - {}", -c),
            (false, c) => write!(f, " + {c}"),
        }
    }
}

impl fmt::Debug for LinExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
