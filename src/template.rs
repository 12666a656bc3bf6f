//! `$VAR` / `${VAR}` substitution shared by the config loader and the
//! plugin configuration setup.
//!
//! References are resolved depth-first with an explicit stack, so a true
//! cycle is reported by name instead of looping until a depth limit.

use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Maximum nesting of references before giving up.
pub const MAX_DEPTH: usize = 15;

fn var_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$(?:(\$)|\{([A-Za-z_][A-Za-z0-9_.]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
            .expect("variable pattern is valid")
    })
}

/// Replace every reference in `input` using `lookup`.
///
/// `$$` yields a literal `$`. Names for which `lookup` returns `None`
/// are left untouched.
pub fn substitute<F>(input: &str, mut lookup: F) -> Result<String>
where
    F: FnMut(&str) -> Result<Option<String>>,
{
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in var_regex().captures_iter(input) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&input[last..whole.start()]);
        last = whole.end();

        if caps.get(1).is_some() {
            out.push('$');
            continue;
        }
        let name = var_name(&caps);
        match lookup(name)? {
            Some(value) => out.push_str(&value),
            None => out.push_str(whole.as_str()),
        }
    }
    out.push_str(&input[last..]);
    Ok(out)
}

/// Names referenced by `input` (escaped `$$` excluded).
pub fn references(input: &str) -> Vec<String> {
    var_regex()
        .captures_iter(input)
        .filter(|c| c.get(1).is_none())
        .map(|c| var_name(&c).to_string())
        .collect()
}

fn var_name<'h>(caps: &Captures<'h>) -> &'h str {
    caps.get(2)
        .or_else(|| caps.get(3))
        .map(|m| m.as_str())
        .unwrap_or_default()
}

/// Resolves a set of mutually referencing values.
///
/// Names found in `values` are expanded recursively; anything else goes
/// through `fallback` (environment, special variables, ...).
pub struct Interpolation<'a> {
    values: &'a BTreeMap<String, String>,
    fallback: &'a dyn Fn(&str) -> Option<String>,
    resolved: HashMap<String, String>,
}

impl<'a> Interpolation<'a> {
    pub fn new(
        values: &'a BTreeMap<String, String>,
        fallback: &'a dyn Fn(&str) -> Option<String>,
    ) -> Self {
        Self {
            values,
            fallback,
            resolved: HashMap::new(),
        }
    }

    /// Fully expanded value of `key`.
    pub fn resolve(&mut self, key: &str) -> Result<String> {
        let mut stack = Vec::new();
        self.resolve_inner(key, &mut stack)
    }

    /// Expand references in an arbitrary string against this scope.
    pub fn expand(&mut self, input: &str) -> Result<String> {
        let mut stack = Vec::new();
        self.expand_inner(input, &mut stack)
    }

    fn resolve_inner(&mut self, key: &str, stack: &mut Vec<String>) -> Result<String> {
        if let Some(done) = self.resolved.get(key) {
            return Ok(done.clone());
        }
        if let Some(pos) = stack.iter().position(|k| k == key) {
            let mut chain: Vec<&str> = stack[pos..].iter().map(String::as_str).collect();
            chain.push(key);
            return Err(Error::Configuration(format!(
                "cyclic reference: {}",
                chain.join(" -> ")
            )));
        }
        if stack.len() >= MAX_DEPTH {
            return Err(Error::Configuration(format!(
                "reference depth of {} exceeded while resolving '{}'",
                MAX_DEPTH, key
            )));
        }

        let values = self.values;
        let raw = match values.get(key) {
            Some(raw) => raw.as_str(),
            None => return Ok((self.fallback)(key).unwrap_or_default()),
        };

        stack.push(key.to_string());
        let expanded = self.expand_inner(raw, stack)?;
        stack.pop();

        self.resolved.insert(key.to_string(), expanded.clone());
        Ok(expanded)
    }

    fn expand_inner(&mut self, input: &str, stack: &mut Vec<String>) -> Result<String> {
        let values = self.values;
        substitute(input, |name| {
            if values.contains_key(name) {
                self.resolve_inner(name, stack).map(Some)
            } else {
                Ok((self.fallback)(name))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_fallback(_: &str) -> Option<String> {
        None
    }

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_both_syntaxes_and_escapes() {
        let out = substitute("$a/${b.c}/$$x/$unknown", |n| {
            Ok(match n {
                "a" => Some("1".to_string()),
                "b.c" => Some("2".to_string()),
                _ => None,
            })
        })
        .unwrap();
        assert_eq!(out, "1/2/$x/$unknown");
    }

    #[test]
    fn resolves_nested_references() {
        let values = map(&[("base", "/tmp"), ("out", "$base/out"), ("plots", "${out}/plots")]);
        let mut interp = Interpolation::new(&values, &no_fallback);
        assert_eq!(interp.resolve("plots").unwrap(), "/tmp/out/plots");
    }

    #[test]
    fn reports_cycles_by_name() {
        let values = map(&[("a", "$b"), ("b", "x$a")]);
        let mut interp = Interpolation::new(&values, &no_fallback);
        let err = interp.resolve("a").unwrap_err().to_string();
        assert!(err.contains("cyclic reference: a -> b -> a"), "{}", err);
    }

    #[test]
    fn uses_fallback_for_foreign_names() {
        let values = map(&[("a", "$HOME_DIR/x")]);
        let fallback = |n: &str| (n == "HOME_DIR").then(|| "/home/u".to_string());
        let mut interp = Interpolation::new(&values, &fallback);
        assert_eq!(interp.resolve("a").unwrap(), "/home/u/x");
    }

    #[test]
    fn lists_references() {
        assert_eq!(references("$a ${b} $$c"), vec!["a".to_string(), "b".to_string()]);
    }
}
