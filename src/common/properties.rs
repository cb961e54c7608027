//! Build property substitution
//!
//! Tunnel arguments may reference build properties as `%(name)s`, or
//! `%(name:-default)s` to fall back when the property is unset. Unknown
//! properties without a default are left verbatim so that literal `%(`
//! sequences in credentials survive rendering.

use std::collections::BTreeMap;

use super::{Error, Result};

/// Properties of the running build
#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Parse `name=value` assignments as given on the command line
    pub fn from_assignments<S: AsRef<str>>(assignments: &[S]) -> Result<Self> {
        let mut props = Self::new();
        for raw in assignments {
            let raw = raw.as_ref();
            let (name, value) = raw.split_once('=').ok_or_else(|| {
                Error::Config(format!("Invalid property '{}': expected name=value", raw))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::Config(format!("Invalid property '{}': empty name", raw)));
            }
            props.set(name, value);
        }
        Ok(props)
    }

    /// Substitute property references in `template`
    pub fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("%(") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find(")s") else {
                out.push_str(&rest[start..]);
                return out;
            };

            let reference = &after[..end];
            let (name, default) = match reference.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (reference, None),
            };

            match (self.get(name), default) {
                (Some(value), _) => out.push_str(value),
                (None, Some(default)) => out.push_str(default),
                (None, None) => {
                    tracing::debug!(property = name, "Unknown build property left unrendered");
                    out.push_str(&rest[start..start + 2 + end + 2]);
                }
            }
            rest = &after[end + 2..];
        }

        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> Properties {
        Properties::from_assignments(&["branch=main", "buildnumber=42"]).unwrap()
    }

    #[test]
    fn test_render_plain_text_unchanged() {
        assert_eq!(props().render("localhost"), "localhost");
    }

    #[test]
    fn test_render_substitutes_known_properties() {
        assert_eq!(
            props().render("%(branch)s-%(buildnumber)s.example.com"),
            "main-42.example.com"
        );
    }

    #[test]
    fn test_render_default_for_missing_property() {
        assert_eq!(props().render("%(slave:-localhost)s"), "localhost");
        assert_eq!(props().render("%(branch:-other)s"), "main");
    }

    #[test]
    fn test_render_leaves_unknown_and_unterminated_references() {
        assert_eq!(props().render("k%(nope)sy"), "k%(nope)sy");
        assert_eq!(props().render("abc%(branch"), "abc%(branch");
    }

    #[test]
    fn test_invalid_assignment() {
        assert!(Properties::from_assignments(&["novalue"]).is_err());
        assert!(Properties::from_assignments(&["=x"]).is_err());
        let p = Properties::from_assignments(&["url=a=b"]).unwrap();
        assert_eq!(p.get("url"), Some("a=b"));
    }
}
