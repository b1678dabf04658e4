//! Project-file properties for rod simulations.
//!
//! A project is a tree of named values. Two surface syntaxes are accepted:
//!
//! - the property format (`key = value;`, nested `{ ... }` blocks, `[ ... ]`
//!   arrays, dotted keys, `//` and `/* */` comments), and
//! - TOML.
//!
//! Layers are merged in order (defaults, project file, command-line
//! overrides `key.path=value`), the last assignment of a key wins.

mod convert;
mod parser;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use convert::{from_toml_str, to_json};
pub use parser::parse_value;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Vec<Value>),
    Table(Props),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Props> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Table(_) => "table",
        }
    }
}

/// A table of properties. Keys are kept sorted so iteration is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Props {
    entries: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Error)]
pub enum PropsError {
    #[error("{path}: {source}")]
    Parse { path: String, source: ParseError },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("TOML error: {0}")]
    Toml(String),

    #[error("invalid override '{0}': expected key.path=value")]
    Override(String),

    #[error("property '{key}' is a {found}, expected a table")]
    NotATable { key: String, found: &'static str },
}

pub type Result<T> = std::result::Result<T, PropsError>;

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_str(raw: &str) -> std::result::Result<Self, ParseError> {
        parser::parse_props(raw)
    }

    /// Reads a project file; `.toml` files use TOML syntax, anything else the
    /// property syntax.
    pub fn parse_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| PropsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            from_toml_str(&raw)
        } else {
            Self::parse_str(&raw).map_err(|source| PropsError::Parse {
                path: path.display().to_string(),
                source,
            })
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Looks up a dotted path such as `model.rods.arm.elements`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.entries.get(first)?;
        for part in parts {
            current = current.as_table()?.entries.get(part)?;
        }
        Some(current)
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn get_table(&self, path: &str) -> Option<&Props> {
        self.get(path).and_then(Value::as_table)
    }

    /// Assigns `value` at a dotted path, creating intermediate tables.
    /// Tables assigned onto tables are merged key by key.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        match rest {
            None => {
                if let Value::Table(incoming) = value {
                    if let Some(Value::Table(existing)) = self.entries.get_mut(head) {
                        return existing.merge(incoming);
                    }
                    self.entries
                        .insert(head.to_string(), Value::Table(incoming));
                } else {
                    self.entries.insert(head.to_string(), value);
                }
                Ok(())
            }
            Some(rest) => {
                let slot = self
                    .entries
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Table(Props::new()));
                match slot {
                    Value::Table(table) => table.set(rest, value),
                    other => Err(PropsError::NotATable {
                        key: head.to_string(),
                        found: other.type_name(),
                    }),
                }
            }
        }
    }

    /// Merges another layer on top of this one.
    pub fn merge(&mut self, other: Props) -> Result<()> {
        for (key, value) in other.entries {
            self.set(&key, value)?;
        }
        Ok(())
    }

    /// Applies one `key.path=value` override. Values that do not parse as a
    /// property value are taken as bare strings, so `output.dir=out/run1`
    /// works without quoting.
    pub fn apply_override(&mut self, assignment: &str) -> Result<()> {
        let (key, raw) = assignment
            .split_once('=')
            .ok_or_else(|| PropsError::Override(assignment.to_string()))?;
        let key = key.trim();
        if key.is_empty() || key.starts_with('.') || key.ends_with('.') {
            return Err(PropsError::Override(assignment.to_string()));
        }
        let raw = raw.trim();
        let value = parse_value(raw).unwrap_or_else(|_| Value::Str(raw.to_string()));
        self.set(key, value)
    }

    /// Builds the run properties: `defaults`, then the project file, then
    /// the overrides in order.
    pub fn layered(
        defaults: Props,
        project: Option<&Path>,
        overrides: &[String],
    ) -> Result<Self> {
        let mut props = defaults;
        if let Some(path) = project {
            props.merge(Self::parse_file(path)?)?;
        }
        for assignment in overrides {
            props.apply_override(assignment)?;
        }
        Ok(props)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_blocks_and_arrays() {
        let src = r#"
// rod with an end moment
model = {
  rods.arm = { start = [0., 0., 0.]; end = [0., 0., 1.]; elements = 10; };
  material = "steel";
};
solver.mode = "force";
"#;
        let props = Props::parse_str(src).expect("parser should succeed");
        assert_eq!(props.get_f64("model.rods.arm.elements"), Some(10.0));
        assert_eq!(props.get_str("model.material"), Some("steel"));
        assert_eq!(props.get_str("solver.mode"), Some("force"));
        let end = props
            .get("model.rods.arm.end")
            .and_then(Value::as_array)
            .expect("end should be an array");
        assert_eq!(end.len(), 3);
        assert_eq!(end[2], Value::Number(1.0));
    }

    #[test]
    fn overrides_apply_in_order_last_wins() {
        let mut props = Props::parse_str("solver = { tolerance = 1e-6; steps = 10; };")
            .expect("parser should succeed");
        props
            .apply_override("solver.tolerance=1e-8")
            .expect("override should apply");
        props
            .apply_override("solver.tolerance=1e-9")
            .expect("override should apply");
        props
            .apply_override("output.dir=out/run1")
            .expect("override should apply");
        assert_eq!(props.get_f64("solver.tolerance"), Some(1e-9));
        assert_eq!(props.get_f64("solver.steps"), Some(10.0));
        assert_eq!(props.get_str("output.dir"), Some("out/run1"));
    }

    #[test]
    fn override_with_array_value() {
        let mut props = Props::new();
        props
            .apply_override("model.rods.arm.material_ey=[0.,1.,0.]")
            .expect("override should apply");
        let ey = props
            .get("model.rods.arm.material_ey")
            .and_then(Value::as_array)
            .expect("array expected");
        assert_eq!(ey[1], Value::Number(1.0));
    }

    #[test]
    fn table_assignment_merges_instead_of_replacing() {
        let mut props = Props::parse_str("a = { x = 1; y = 2; };").expect("parse");
        let layer = Props::parse_str("a = { y = 3; z = 4; };").expect("parse");
        props.merge(layer).expect("merge");
        assert_eq!(props.get_f64("a.x"), Some(1.0));
        assert_eq!(props.get_f64("a.y"), Some(3.0));
        assert_eq!(props.get_f64("a.z"), Some(4.0));
    }

    #[test]
    fn rejects_override_without_equals() {
        let mut props = Props::new();
        let err = props
            .apply_override("solver.tolerance")
            .expect_err("should fail");
        assert!(matches!(err, PropsError::Override(_)));
    }

    #[test]
    fn rejects_nesting_below_a_leaf() {
        let mut props = Props::parse_str("a = 1;").expect("parse");
        let err = props
            .set("a.b", Value::Number(2.0))
            .expect_err("should fail");
        assert!(matches!(err, PropsError::NotATable { .. }));
    }
}
