//! Front matter splitting.
//!
//! A document may open with a YAML block fenced by two `---` lines:
//!
//! ```text
//! ---
//! title: Robótica nas Escolas
//! date: 2024-03-15
//! ---
//! # Body
//! ```
//!
//! [`split`] never fails: when the fence is missing, or the enclosed block is
//! not a YAML mapping, the metadata is empty and the whole input is the body.

use std::fmt;

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_yml::{Mapping, Value};

/// The fence line.
pub const MARKER: &str = "---";

/// Open-ended metadata mapping as written by the author.
pub type FrontMatter = Mapping;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub front_matter: FrontMatter,
    pub body: String,
}

impl Document {
    fn unstructured(text: &str) -> Self {
        Self {
            front_matter: Mapping::new(),
            body: text.to_owned(),
        }
    }
}

/// Split `text` into its front matter mapping and body.
pub fn split(text: &str) -> Document {
    let Some((yaml, body)) = locate_block(text) else {
        return Document::unstructured(text);
    };
    match serde_yml::from_str::<Value>(yaml) {
        Ok(Value::Mapping(front_matter)) => Document {
            front_matter,
            body: body.to_owned(),
        },
        Ok(Value::Null) => Document {
            front_matter: Mapping::new(),
            body: body.to_owned(),
        },
        Ok(other) => {
            tracing::warn!(kind = yaml_kind(&other), "front matter is not a mapping, ignoring");
            Document::unstructured(text)
        }
        Err(e) => {
            tracing::warn!(error = %e, "front matter unparsable, ignoring");
            Document::unstructured(text)
        }
    }
}

/// Find the fenced block. Returns `(yaml, body)` slices of `text`.
///
/// The opening fence must be the first line. The closing fence is the first
/// later line equal to `---`, ended by a newline or by end of input.
fn locate_block(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix("---\n")?;
    if let Some(body) = rest.strip_prefix("---\n") {
        return Some(("", body));
    }
    if rest == MARKER {
        return Some(("", ""));
    }
    if let Some(idx) = rest.find("\n---\n") {
        return Some((&rest[..idx], &rest[idx + "\n---\n".len()..]));
    }
    rest.strip_suffix("\n---").map(|yaml| (yaml, ""))
}

fn yaml_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged",
    }
}

// ---------------------------------------------------------------------------
// Typed view
// ---------------------------------------------------------------------------

/// A scalar metadata value. Authors write years as numbers and names as
/// strings interchangeably, so every displayed field accepts any scalar.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Text(s) => f.write_str(s),
            Scalar::Integer(n) => write!(f, "{n}"),
            Scalar::Float(n) => write!(f, "{n}"),
            Scalar::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl Scalar {
    /// The display text, or `None` for an empty string.
    pub fn non_empty(&self) -> Option<String> {
        let text = self.to_string();
        (!text.trim().is_empty()).then_some(text)
    }
}

/// Metadata of an initiative article.
///
/// Every field is decoded on its own: a field of the wrong shape becomes
/// absent without affecting the rest.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InitiativeMeta {
    #[serde(deserialize_with = "lenient")]
    pub title: Option<Scalar>,
    #[serde(deserialize_with = "lenient")]
    pub date: Option<Scalar>,
    #[serde(deserialize_with = "lenient")]
    pub category: Option<Scalar>,
    #[serde(deserialize_with = "lenient")]
    pub images: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub project_info: Option<ProjectInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProjectInfo {
    #[serde(deserialize_with = "lenient")]
    pub nome: Option<Scalar>,
    #[serde(deserialize_with = "lenient")]
    pub ano: Option<Scalar>,
    #[serde(deserialize_with = "lenient")]
    pub local: Option<Scalar>,
    #[serde(deserialize_with = "lenient")]
    pub coordenador: Option<Scalar>,
    #[serde(deserialize_with = "lenient")]
    pub estudantes: Vec<Student>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Student {
    #[serde(deserialize_with = "lenient")]
    pub nome: Option<Scalar>,
    #[serde(deserialize_with = "lenient")]
    pub papel: Option<Scalar>,
}

impl InitiativeMeta {
    pub fn from_front_matter(front_matter: &FrontMatter) -> Self {
        serde_yml::from_value(Value::Mapping(front_matter.clone())).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "initiative metadata undecodable, using defaults");
            Self::default()
        })
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_yml::from_value(value).unwrap_or_default())
}
