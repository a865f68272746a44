//! Data value access: structural reflection over one canonical JSON
//! shape, implemented without runtime type-switching.
//!
//! Any `T: serde::Serialize` can be rendered. `Generate` converts the
//! value to a [`serde_json::Value`] once per call and every boundary's
//! field/condition access walks that tree, instead of reflecting over
//! host-language runtime types directly.

use serde::Serialize;
use serde_json::Value;

/// Marker for values this crate can render. Blanket-implemented for any
/// serializable, owned data.
pub trait TemplateData: Serialize {}
impl<T: Serialize> TemplateData for T {}

/// Convert a template data value into its canonical JSON representation.
pub fn to_value<T: TemplateData>(data: &T) -> crate::error::Result<Value> {
    serde_json::to_value(data).map_err(Into::into)
}

/// The variable/scope stack threaded through generation (`ctx`). `root`
/// never changes for the duration of one `Generate` call;
/// `current` is the value `If`/`Range`/`With` push and pop as they
/// descend into nested boundary lists.
#[derive(Debug, Clone)]
pub struct Scope {
    root: Value,
    current: Value,
    vars: Vec<(String, Value)>,
}

impl Scope {
    pub fn new(root: Value) -> Self {
        Self {
            current: root.clone(),
            root,
            vars: Vec::new(),
        }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn current(&self) -> &Value {
        &self.current
    }

    /// Push a new "dot" context, returning a guard value that restores
    /// the previous context when the caller is done with it. Used by
    /// `With` and by each `Range` item.
    pub fn with_current(&self, next: Value) -> Scope {
        Scope {
            root: self.root.clone(),
            current: next,
            vars: self.vars.clone(),
        }
    }

    /// Bind a named variable for the lexical extent of a `Var` boundary.
    /// Shadows any outer binding with the same name.
    pub fn with_var(&self, name: &str, value: Value) -> Scope {
        let mut vars = self.vars.clone();
        vars.push((name.to_string(), value));
        Scope {
            root: self.root.clone(),
            current: self.current.clone(),
            vars,
        }
    }

    fn lookup_var(&self, name: &str) -> Option<&Value> {
        self.vars.iter().rev().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Resolve a dot-delimited path against this scope.
    ///
    /// - `""` or `"."` resolves to the current context itself.
    /// - `"$"` (optionally followed by `.rest`) resolves against the
    ///   root data value.
    /// - `"$name"` (optionally followed by `.rest`) resolves against a
    ///   bound variable.
    /// - anything else resolves relative to the current context.
    ///
    /// Each subsequent `.segment` indexes a JSON object by key, or a
    /// JSON array by parsing the segment as a `usize` index. A missing
    /// path yields `None` (the caller decides whether that is a soft
    /// failure or a strict error).
    pub fn resolve(&self, path: &str) -> Option<Value> {
        if path.is_empty() || path == "." {
            return Some(self.current.clone());
        }

        let (mut base, rest) = if let Some(rest) = path.strip_prefix('$') {
            if let Some(rest) = rest.strip_prefix('.') {
                (self.root.clone(), rest)
            } else if rest.is_empty() {
                (self.root.clone(), "")
            } else {
                // "$name[.rest]" bound variable lookup.
                let (name, tail) = split_first_segment(rest);
                let value = self.lookup_var(name)?.clone();
                (value, tail)
            }
        } else {
            (self.current.clone(), path)
        };

        if rest.is_empty() {
            return Some(base);
        }

        for segment in rest.split('.') {
            if segment.is_empty() {
                continue;
            }
            base = index_into(&base, segment)?;
        }
        Some(base)
    }
}

fn split_first_segment(path: &str) -> (&str, &str) {
    match path.split_once('.') {
        Some((head, tail)) => (head, tail),
        None => (path, ""),
    }
}

fn index_into(value: &Value, segment: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(segment).cloned(),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
        _ => None,
    }
}

/// Standard truthiness: non-empty string, non-zero number, non-null,
/// non-empty array/object, bool as-is.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Render a value to its string form: HTML-escape by default, numbers
/// via their shortest decimal form, booleans as `"true"`/`"false"`,
/// missing/null as `""`.
pub fn render_to_string(value: &Value, escape_html: bool) -> String {
    let raw = match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    };
    if escape_html {
        html_escape(&raw)
    } else {
        raw
    }
}

fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_simple_field() {
        let scope = Scope::new(json!({"Name": "Alice"}));
        assert_eq!(scope.resolve("Name"), Some(json!("Alice")));
    }

    #[test]
    fn resolves_index_and_nested_field() {
        let scope = Scope::new(json!({"Items": [{"Text": "X"}, {"Text": "Y"}]}));
        assert_eq!(scope.resolve("Items.1.Text"), Some(json!("Y")));
    }

    #[test]
    fn missing_path_is_none() {
        let scope = Scope::new(json!({"Name": "Alice"}));
        assert_eq!(scope.resolve("Missing.Deep"), None);
    }

    #[test]
    fn root_access_survives_nested_scope() {
        let scope = Scope::new(json!({"Title": "Home", "Items": [1, 2]}));
        let inner = scope.with_current(json!(1));
        assert_eq!(inner.resolve("$.Title"), Some(json!("Home")));
        assert_eq!(inner.resolve(""), Some(json!(1)));
    }

    #[test]
    fn variable_bind_is_scoped() {
        let scope = Scope::new(json!({}));
        let bound = scope.with_var("item", json!({"Text": "hi"}));
        assert_eq!(bound.resolve("$item.Text"), Some(json!("hi")));
    }

    #[test]
    fn truthiness_follows_standard_rules() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!(1)));
    }

    #[test]
    fn render_escapes_html_by_default() {
        assert_eq!(render_to_string(&json!("<b>"), true), "&lt;b&gt;");
        assert_eq!(render_to_string(&json!(null), true), "");
        assert_eq!(render_to_string(&json!(true), true), "true");
    }
}
