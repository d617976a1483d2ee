//! `${...}` template rendering for step parameters
//!
//! A template is literal text with references such as `${run.number}` or
//! `${steps.Build.artifact}`. References resolve against a flat
//! [`TemplateScope`]; anything unknown is an error rather than an empty string.

use std::collections::BTreeMap;

use crate::error::{KeelError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    Reference(&'a str),
}

/// Split a template into literal and reference segments
pub fn parse(template: &str) -> Result<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        if start > 0 {
            segments.push(Segment::Literal(&rest[..start]));
        }
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            KeelError::Template(format!("unterminated reference in '{}'", template))
        })?;
        let key = after[..end].trim();
        if key.is_empty() {
            return Err(KeelError::Template(format!(
                "empty reference in '{}'",
                template
            )));
        }
        segments.push(Segment::Reference(key));
        rest = &after[end + 1..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    Ok(segments)
}

/// References used by a template, in order of appearance
pub fn references(template: &str) -> Result<Vec<&str>> {
    Ok(parse(template)?
        .into_iter()
        .filter_map(|s| match s {
            Segment::Reference(key) => Some(key),
            Segment::Literal(_) => None,
        })
        .collect())
}

/// Values available to templates, keyed by dotted path
#[derive(Debug, Clone, Default)]
pub struct TemplateScope {
    values: BTreeMap<String, String>,
}

impl TemplateScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Insert every entry of `values` under `prefix.`
    pub fn extend_prefixed<'a, I>(&mut self, prefix: &str, values: I)
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, value) in values {
            self.values
                .insert(format!("{}.{}", prefix, key), value.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn render(&self, template: &str) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        for segment in parse(template)? {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Reference(key) => {
                    let value = self.get(key).ok_or_else(|| {
                        KeelError::Template(format!("unresolved reference '${{{}}}'", key))
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    pub fn render_all(&self, params: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>> {
        params
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.render(value)?)))
            .collect()
    }
}
