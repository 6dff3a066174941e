//! Typed command and callback arguments.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Collected argument values keyed by argument name.
pub type Args = Map<String, Value>;

/// Declared type of an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    /// Free text, passed through.
    Text,
    /// `true`/`false`, answered with `/yes` or `/no`.
    Boolean,
    /// Whole number.
    Number,
    /// Document attachment, stored as a local path.
    File,
}

impl ArgKind {
    /// Coerce raw text into a value of this kind.
    ///
    /// Booleans are `true` only for the literal `"true"`. Numbers must parse as
    /// `i64`. Files cannot be given as text.
    #[must_use]
    pub fn coerce(self, raw: &str) -> Option<Value> {
        match self {
            Self::Text => Some(Value::String(raw.to_string())),
            Self::Boolean => Some(Value::Bool(raw.trim() == "true")),
            Self::Number => raw.trim().parse::<i64>().ok().map(Value::from),
            Self::File => None,
        }
    }
}

/// Declaration of one argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentSpec {
    /// Argument name, also its key in [`Args`].
    pub name: String,
    /// Declared type.
    pub kind: ArgKind,
    /// Whether `/skip` is refused.
    pub required: bool,
    /// Shown in the prompt.
    pub description: String,
    /// Template document sent with the prompt of a file argument.
    pub template: Option<String>,
    /// Expected content type of a file argument.
    pub accept: Option<String>,
}

impl ArgumentSpec {
    fn new(name: impl Into<String>, kind: ArgKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: description.into(),
            template: None,
            accept: None,
        }
    }

    /// Required text argument.
    pub fn text(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ArgKind::Text, description)
    }

    /// Required yes/no argument.
    pub fn boolean(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ArgKind::Boolean, description)
    }

    /// Required whole-number argument.
    pub fn number(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ArgKind::Number, description)
    }

    /// Required document argument; needs a [`template`](Self::template).
    pub fn file(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ArgKind::File, description)
    }

    /// Allow `/skip`.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Template document sent with the prompt.
    #[must_use]
    pub fn template(mut self, path: impl Into<String>) -> Self {
        self.template = Some(path.into());
        self
    }

    /// Expected content type, shown in the prompt.
    #[must_use]
    pub fn accept(mut self, content_type: impl Into<String>) -> Self {
        self.accept = Some(content_type.into());
        self
    }

    /// Prompt asking the user for this argument.
    #[must_use]
    pub fn prompt(&self) -> String {
        let subject = if self.description.is_empty() {
            &self.name
        } else {
            &self.description
        };
        let mut prompt = match self.kind {
            ArgKind::Text => format!("Please send *{subject}*."),
            ArgKind::Boolean => format!("*{subject}*?\nReply /yes or /no."),
            ArgKind::Number => format!("Please send *{subject}* as a whole number."),
            ArgKind::File => match &self.accept {
                Some(accept) => format!(
                    "Please fill in the attached template and send back *{subject}* as a document.\nExpected format: `{accept}`."
                ),
                None => format!(
                    "Please fill in the attached template and send back *{subject}* as a document."
                ),
            },
        };
        if !self.required {
            prompt.push_str("\nSend /skip to leave it empty.");
        }
        prompt
    }
}

/// Parse an inline query string (`from=2024-01-01&limit=5`) against `specs`.
///
/// Only declared non-file arguments are taken. Values that fail coercion are
/// dropped so the argument is asked for instead.
#[must_use]
pub fn parse_inline_args(query: &str, specs: &[ArgumentSpec]) -> Args {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut args = Args::new();
    for (key, raw) in url::form_urlencoded::parse(query.as_bytes()) {
        let Some(spec) = specs.iter().find(|s| s.name == key) else {
            continue;
        };
        if let Some(value) = spec.kind.coerce(&raw) {
            args.insert(spec.name.clone(), value);
        }
    }
    args
}
