//! Text helpers: Telegram HTML formatting, message splitting and template
//! substitution.
//!
//! Patterns are compiled once through `lazy_regex!`, which validates them at
//! compile time.

// lazy_regex! builds on once_cell statics
#![allow(clippy::non_std_lazy_statics)]

use lazy_regex::lazy_regex;
use serde_json::Value;
use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

/// Telegram's limit is 4096 characters; the margin leaves room for markup.
pub const MESSAGE_LIMIT: usize = 4000;

static RE_CODE_BLOCK: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"```[\s\S]*?```");

static RE_CODE_FENCE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"```(\w+)?\n([\s\S]*?)```");

static RE_BULLET: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?m)^\* ");

static RE_BOLD: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\*\*(.*?)\*\*");

static RE_ITALIC: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\*(.*?)\*");

static RE_INLINE_CODE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"`(.*?)`");

static RE_MULTI_NEWLINE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\n{3,}");

/// `{{ name }}` or `{{ nested.path }}` in template documents.
static RE_TEMPLATE_VAR: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"\{\{\s*([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)*)\s*\}\}");

/// `{name}` in button labels.
static RE_PLACEHOLDER: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\{([A-Za-z0-9_]+)\}");

/// Tags Telegram's HTML parse mode accepts.
const ALLOWED_TAGS: &[&str] = &[
    "b", "i", "u", "s", "code", "pre", "a", "/b", "/i", "/u", "/s", "/code", "/pre", "/a",
];

/// Template rendering failure.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TemplateError {
    /// The template references a variable the data object does not have.
    #[error("template variable '{0}' is not defined")]
    UnknownVariable(String),
}

fn escape_angle_brackets(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut inside_tag = false;

    while let Some(c) = chars.next() {
        match c {
            '<' => {
                let mut name = String::new();
                if let Some(slash) = chars.next_if_eq(&'/') {
                    name.push(slash);
                }
                while let Some(next) = chars.next_if(char::is_ascii_alphanumeric) {
                    name.push(next);
                }

                if ALLOWED_TAGS.contains(&name.as_str()) {
                    result.push('<');
                    inside_tag = true;
                } else {
                    result.push_str("&lt;");
                }
                result.push_str(&name);
            }
            '>' if inside_tag => {
                result.push('>');
                inside_tag = false;
            }
            '>' => result.push_str("&gt;"),
            _ => result.push(c),
        }
    }
    result
}

/// Escapes angle brackets that do not belong to a supported HTML tag.
///
/// Fenced code blocks are left untouched.
///
/// ```
/// use chatflow::utils::clean_html;
/// assert_eq!(clean_html("1 < 2 but <b>bold</b>"), "1 &lt; 2 but <b>bold</b>");
/// ```
#[must_use]
pub fn clean_html(text: &str) -> String {
    let mut protected: Vec<(String, &str)> = Vec::new();
    let mut masked = String::with_capacity(text.len());
    let mut last_end = 0;

    for block in RE_CODE_BLOCK.find_iter(text) {
        masked.push_str(&text[last_end..block.start()]);
        // random marker so user text can never collide with it
        let marker = format!("__CODE_BLOCK_{}__", Uuid::new_v4().as_simple());
        masked.push_str(&marker);
        protected.push((marker, block.as_str()));
        last_end = block.end();
    }
    masked.push_str(&text[last_end..]);

    let mut escaped = escape_angle_brackets(&masked);
    for (marker, block) in protected {
        escaped = escaped.replace(&marker, block);
    }
    escaped
}

/// Converts lightweight markdown into Telegram HTML.
///
/// This is the formatter every outbound text goes through.
///
/// ```
/// use chatflow::utils::format_text;
/// assert_eq!(format_text("**Total**: `42`"), "<b>Total</b>: <code>42</code>");
/// ```
#[must_use]
pub fn format_text(text: &str) -> String {
    let cleaned = clean_html(text);

    let fenced = RE_CODE_FENCE.replace_all(&cleaned, |caps: &regex::Captures| {
        let lang = caps.get(1).map_or("", |m| m.as_str());
        let code = caps.get(2).map_or("", |m| m.as_str()).trim();
        format!(
            "<pre><code class=\"{lang}\">{}</code></pre>",
            html_escape::encode_text(code)
        )
    });
    let bulleted = RE_BULLET.replace_all(&fenced, "• ");
    let bold = RE_BOLD.replace_all(&bulleted, "<b>$1</b>");
    let italic = RE_ITALIC.replace_all(&bold, "<i>$1</i>");
    let inline = RE_INLINE_CODE.replace_all(&italic, |caps: &regex::Captures| {
        let code = caps.get(1).map_or("", |m| m.as_str());
        format!("<code>{}</code>", html_escape::encode_text(code))
    });

    RE_MULTI_NEWLINE
        .replace_all(&inline, "\n\n")
        .trim()
        .to_string()
}

/// Splits a message into parts no longer than `max_length` bytes.
///
/// Code fences cut by a boundary are closed at the end of one part and
/// reopened at the start of the next. Lines longer than the limit are split on
/// grapheme boundaries.
#[must_use]
pub fn split_long_message(message: &str, max_length: usize) -> Vec<String> {
    const FENCE: &str = "```";

    if message.is_empty() {
        return Vec::new();
    }
    if message.len() <= max_length {
        return vec![message.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_code = false;

    let flush = |current: &mut String, parts: &mut Vec<String>, in_code: bool| {
        if in_code {
            current.push_str(FENCE);
        }
        parts.push(current.trim_end().to_string());
        current.clear();
        if in_code {
            current.push_str(FENCE);
            current.push('\n');
        }
    };

    for line in message.lines() {
        if line.len() > max_length {
            if !current.is_empty() {
                flush(&mut current, &mut parts, in_code);
            }
            let mut chunk = String::new();
            for grapheme in line.graphemes(true) {
                if chunk.len() + grapheme.len() > max_length {
                    parts.push(std::mem::take(&mut chunk));
                }
                chunk.push_str(grapheme);
            }
            current.push_str(&chunk);
            current.push('\n');
            continue;
        }

        let opens_or_closes = line.starts_with(FENCE);
        if current.len() + line.len() + 1 > max_length && !current.is_empty() {
            flush(&mut current, &mut parts, in_code);
        }
        if opens_or_closes {
            in_code = !in_code;
        }
        current.push_str(line);
        current.push('\n');
    }

    if !current.trim().is_empty() {
        parts.push(current.trim_end().to_string());
    }
    parts
}

/// Truncates to at most `max_chars` characters without splitting a code point.
///
/// ```
/// use chatflow::utils::truncate_str;
/// assert_eq!(truncate_str("Привет, мир!", 6), "Привет");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Renders `{{ var }}` placeholders against a JSON object.
///
/// Dotted names walk nested objects. Referencing a missing variable is an
/// error so a broken template never reaches the user half-filled.
///
/// # Errors
///
/// Returns [`TemplateError::UnknownVariable`] for the first unresolved name.
pub fn render_template(template: &str, data: &Value) -> Result<String, TemplateError> {
    let mut rendered = String::with_capacity(template.len());
    let mut last_end = 0;

    for caps in RE_TEMPLATE_VAR.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let pointer = format!("/{}", name.as_str().replace('.', "/"));
        let value = data
            .pointer(&pointer)
            .ok_or_else(|| TemplateError::UnknownVariable(name.as_str().to_string()))?;

        rendered.push_str(&template[last_end..whole.start()]);
        rendered.push_str(&value_to_text(value));
        last_end = whole.end();
    }
    rendered.push_str(&template[last_end..]);
    Ok(rendered)
}

/// Replaces `{name}` placeholders with argument values; unknown names stay as written.
#[must_use]
pub fn substitute_placeholders(template: &str, args: &serde_json::Map<String, Value>) -> String {
    RE_PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            let whole = caps.get(0).map_or("", |m| m.as_str());
            caps.get(1)
                .and_then(|name| args.get(name.as_str()))
                .map_or_else(|| whole.to_string(), value_to_text)
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_html_keeps_code_blocks() {
        let input = "See\n```\nif a < b {}\n```\nthen 3 > 2";
        assert_eq!(clean_html(input), "See\n```\nif a < b {}\n```\nthen 3 &gt; 2");
    }

    #[test]
    fn test_clean_html_escapes_unknown_tags() {
        assert_eq!(
            clean_html("<row>1</row> and <i>ok</i>"),
            "&lt;row&gt;1&lt;/row&gt; and <i>ok</i>"
        );
    }

    #[test]
    fn test_clean_html_is_idempotent() {
        let once = clean_html("a <tag> b");
        assert_eq!(clean_html(&once), once);
    }

    #[test]
    fn test_format_text_markdown() {
        let input = "* item\n**bold** and *soft* with `x + y`\n\n\n\nend";
        assert_eq!(
            format_text(input),
            "• item\n<b>bold</b> and <i>soft</i> with <code>x + y</code>\n\nend"
        );
    }

    #[test]
    fn test_format_text_fenced_code() {
        assert_eq!(
            format_text("```sql\nselect 1;\n```"),
            "<pre><code class=\"sql\">select 1;</code></pre>"
        );
    }

    #[test]
    fn test_split_respects_limit_and_fences() {
        let input = "intro\n```\nline one\nline two\n```\noutro";
        let parts = split_long_message(input, 18);
        assert!(parts.len() > 1);
        assert!(parts.iter().all(|p| p.len() <= 18 + 4));
        assert!(parts[0].ends_with("```") || !parts[0].contains("```"));
    }

    #[test]
    fn test_split_very_long_line() {
        let input = "ж".repeat(3000);
        let parts = split_long_message(&input, 1000);
        assert!(parts.len() >= 6);
        assert!(parts.iter().all(|p| p.len() <= 1000));
        assert_eq!(parts.concat(), input);
    }

    #[test]
    fn test_split_short_message_untouched() {
        assert_eq!(split_long_message("hi", 10), vec!["hi".to_string()]);
        assert!(split_long_message("", 10).is_empty());
    }

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("abc", 10), "abc");
        assert_eq!(truncate_str("Привет, мир!", 6), "Привет");
    }

    #[test]
    fn test_render_template_substitutes_nested_values() {
        let data = json!({"user": {"name": "Ada"}, "total": 3});
        assert_eq!(
            render_template("Hi {{ user.name }}, {{total}} items", &data),
            Ok("Hi Ada, 3 items".to_string())
        );
    }

    #[test]
    fn test_render_template_unknown_variable() {
        assert_eq!(
            render_template("{{ missing }}", &json!({})),
            Err(TemplateError::UnknownVariable("missing".into()))
        );
    }

    #[test]
    fn test_substitute_placeholders() {
        let args = json!({"name": "Ada", "count": 2});
        let Value::Object(map) = args else {
            panic!("expected object");
        };
        assert_eq!(
            substitute_placeholders("Pay {name} x{count} {unknown}", &map),
            "Pay Ada x2 {unknown}"
        );
    }
}
