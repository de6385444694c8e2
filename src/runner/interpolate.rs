//! Variable interpolation for strings
//!
//! This module replaces `${path}` references with values from a variable bag.

use crate::error::{InterpolationError, InterpolationResult};
use crate::runner::value::{Value, Variables};
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Maximum number of nested expansion passes
const MAX_DEPTH: usize = 16;

static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}]+)\}").expect("variable pattern is valid")
});

/// A dotted variable path: identifiers, with list indexes after the first segment
static PATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[A-Za-z_][\w-]*(\.([A-Za-z_][\w-]*|\d+))*\s*$")
        .expect("path pattern is valid")
});

/// Render a template against a variable bag
///
/// Supports:
/// - `${name}` - top-level variable
/// - `${outputs.build.version}` - dotted lookup through maps and lists
///
/// Anything else between `${` and `}` is not a variable path and is kept as
/// written, as are paths that do not resolve, so shell expansions such as
/// `${HOME}` or `${DIR:-.}` pass through untouched. Values that themselves
/// contain references are expanded again, up to a fixed depth.
pub fn render(template: &str, vars: &Variables) -> InterpolationResult<String> {
    let mut result = template.to_string();

    for _ in 0..MAX_DEPTH {
        let mut changed = false;

        let next = VAR_PATTERN
            .replace_all(&result, |caps: &Captures| match resolve(&caps[1], vars) {
                Some(value) => {
                    let rendered = value.to_string();
                    if rendered != caps[0] {
                        changed = true;
                    }
                    rendered
                }
                None => caps[0].to_string(),
            })
            .into_owned();

        if !changed {
            return Ok(next);
        }
        result = next;
    }

    Err(InterpolationError::RecursiveInterpolation(template.to_string()))
}

/// Resolve a dotted path against the variable bag
fn resolve<'a>(expr: &str, vars: &'a Variables) -> Option<&'a Value> {
    if !PATH_PATTERN.is_match(expr) {
        return None;
    }

    let mut segments = expr.trim().split('.');
    let root = vars.get(segments.next()?)?;
    root.lookup(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, Value)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_simple_interpolation() {
        let vars = vars(&[("name", Value::from("world"))]);
        assert_eq!(render("Hello, ${name}!", &vars).unwrap(), "Hello, world!");
    }

    #[test]
    fn test_repeated_variable() {
        let vars = vars(&[("a", Value::from("x"))]);
        assert_eq!(render("${a} ${a}", &vars).unwrap(), "x x");
    }

    #[test]
    fn test_dotted_lookup() {
        let mut build = Variables::new();
        build.insert("version".to_string(), Value::from("1.2.0"));
        let mut outputs = Variables::new();
        outputs.insert("build".to_string(), Value::Map(build));
        let vars = vars(&[("outputs", Value::Map(outputs))]);

        let result = render("release ${ outputs.build.version }", &vars).unwrap();
        assert_eq!(result, "release 1.2.0");
    }

    #[test]
    fn test_unknown_reference_left_alone() {
        let vars = Variables::new();
        assert_eq!(render("echo ${HOME}", &vars).unwrap(), "echo ${HOME}");
    }

    #[test]
    fn test_null_renders_empty() {
        let vars = vars(&[("empty", Value::Null)]);
        assert_eq!(render("[${empty}]", &vars).unwrap(), "[]");
    }

    #[test]
    fn test_nested_interpolation() {
        let vars = vars(&[
            ("inner", Value::from("value")),
            ("outer", Value::from("${inner}")),
        ]);
        assert_eq!(render("Result: ${outer}", &vars).unwrap(), "Result: value");
    }

    #[test]
    fn test_recursive_interpolation() {
        let vars = vars(&[("a", Value::from("${b}")), ("b", Value::from("${a}x"))]);
        assert!(matches!(
            render("${a}", &vars),
            Err(InterpolationError::RecursiveInterpolation(_))
        ));
    }

    #[test]
    fn test_shell_expansions_left_alone() {
        let vars = vars(&[("DIR", Value::from("/srv")), ("v", Value::from("x"))]);
        for template in ["cd ${DIR:-.}", "${v%.}", "${v#x.}", "${outputs..x}", "${#v}"] {
            assert_eq!(render(template, &vars).unwrap(), template);
        }
    }

    #[test]
    fn test_list_index_lookup() {
        let vars = vars(&[("deps", Value::from(vec!["a", "b"]))]);
        assert_eq!(render("${deps.1}", &vars).unwrap(), "b");
    }

    #[test]
    fn test_render_is_stable() {
        let vars = vars(&[("name", Value::from("plank"))]);
        let first = render("echo ${name} ${HOME}", &vars).unwrap();
        let second = render("echo ${name} ${HOME}", &vars).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_no_interpolation() {
        let vars = Variables::new();
        assert_eq!(render("No variables here", &vars).unwrap(), "No variables here");
    }
}
