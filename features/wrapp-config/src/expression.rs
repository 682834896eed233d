use serde_json::Value;

use crate::{errors::ConfigError, store::ConfigStore};

/// A parsed `${key}` template
///
/// Literal text is kept as is, every placeholder is replaced by the stringified
/// config value on [`Expression::render`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let malformed = |reason| ConfigError::MalformedExpression {
            expression: source.to_string(),
            reason,
        };

        let mut segments = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find("${") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }

            let after_open = &rest[start + 2..];
            let Some(end) = after_open.find('}') else {
                return Err(malformed("unterminated placeholder"));
            };

            let key = after_open[..end].trim();
            if key.is_empty() {
                return Err(malformed("empty placeholder"));
            }

            segments.push(Segment::Placeholder(key.to_string()));
            rest = &after_open[end + 1..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Keys referenced by the expression, in order of appearance
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Placeholder(key) => Some(key.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn render(&self, store: &ConfigStore) -> Result<String, ConfigError> {
        let mut rendered = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Placeholder(key) => {
                    let value = store
                        .get(key)
                        .ok_or_else(|| ConfigError::Missing(key.clone()))?;
                    rendered.push_str(&stringify(value));
                }
            }
        }
        Ok(rendered)
    }
}

/// Strings are inserted verbatim, anything else as compact JSON
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
