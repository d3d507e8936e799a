//! The math function registry.
//!
//! `name(arg)` in an expression is a function call only when `name` is
//! registered here; otherwise the parenthesized token is a unit
//! annotation. The engine's evaluator uses the same tables, so the parse
//! decision and the runtime meaning cannot drift apart.

use once_cell::sync::Lazy;
use std::collections::HashMap;

type Fn1 = fn(f64) -> f64;
type Fn2 = fn(f64, f64) -> f64;

static FUNCTIONS_1: Lazy<HashMap<&'static str, Fn1>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, Fn1> = HashMap::new();
    m.insert("abs", f64::abs);
    m.insert("sqrt", f64::sqrt);
    m.insert("cbrt", f64::cbrt);
    m.insert("sin", f64::sin);
    m.insert("cos", f64::cos);
    m.insert("tan", f64::tan);
    m.insert("asin", f64::asin);
    m.insert("acos", f64::acos);
    m.insert("atan", f64::atan);
    m.insert("sinh", f64::sinh);
    m.insert("cosh", f64::cosh);
    m.insert("tanh", f64::tanh);
    m.insert("exp", f64::exp);
    m.insert("log", f64::ln);
    m.insert("ln", f64::ln);
    m.insert("log10", f64::log10);
    m.insert("log2", f64::log2);
    m.insert("floor", f64::floor);
    m.insert("ceil", f64::ceil);
    m.insert("round", f64::round);
    m.insert("trunc", f64::trunc);
    m.insert("sign", f64::signum);
    m
});

static FUNCTIONS_2: Lazy<HashMap<&'static str, Fn2>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, Fn2> = HashMap::new();
    m.insert("hypot", f64::hypot);
    m.insert("atan2", f64::atan2);
    m.insert("pow", f64::powf);
    m.insert("min", f64::min);
    m.insert("max", f64::max);
    m.insert("mod", |a, b| a % b);
    m
});

/// Look up a one-argument function.
pub fn function1(name: &str) -> Option<Fn1> {
    FUNCTIONS_1.get(name).copied()
}

/// Look up a two-argument function.
pub fn function2(name: &str) -> Option<Fn2> {
    FUNCTIONS_2.get(name).copied()
}

/// Is `name` a registered function of either arity?
pub fn is_function(name: &str) -> bool {
    FUNCTIONS_1.contains_key(name) || FUNCTIONS_2.contains_key(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lookup() {
        assert!(is_function("sqrt"));
        assert!(is_function("hypot"));
        assert!(!is_function("voltage"));
        assert!(!is_function("kV"));
    }

    #[test]
    fn evaluation() {
        assert_eq!(function1("sqrt").unwrap()(9.0), 3.0);
        assert_eq!(function2("hypot").unwrap()(3.0, 4.0), 5.0);
        assert_eq!(function2("mod").unwrap()(7.0, 3.0), 1.0);
    }
}
