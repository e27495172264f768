//! Extraction of tool invocations from raw assistant text.
//!
//! Accepted form (the `<function_calls>` wrapper is optional and ignored):
//!
//! ```text
//! <invoke name="bash">
//! <parameter name="command">echo hi</parameter>
//! <parameter name="timeout">5000</parameter>
//! </invoke>
//! ```
//!
//! Parsing is best-effort. Blocks with an empty name or without a closing tag
//! are skipped, and so is an opening tag that is followed by another opening
//! tag before any close.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use loom_core::tools::{ToolInput, ToolInvocation};

const INVOKE_CLOSE: &str = "</invoke>";

static INVOKE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<invoke\s+name\s*=\s*"([^"]*)"\s*>"#).unwrap());

static PARAMETER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<parameter\s+name\s*=\s*"([^"]*)"\s*>(.*?)</parameter>"#).unwrap()
});

static WRAPPER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</?function_calls\s*>").unwrap());

static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

struct Block<'a> {
    span: Range<usize>,
    name: &'a str,
    body: &'a str,
}

fn scan(text: &str) -> Vec<Block<'_>> {
    let opens: Vec<_> = INVOKE_OPEN.captures_iter(text).collect();
    let mut blocks = Vec::new();
    let mut consumed = 0;

    for (i, caps) in opens.iter().enumerate() {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() < consumed {
            continue;
        }
        let Some(close_rel) = text[whole.end()..].find(INVOKE_CLOSE) else {
            continue;
        };
        let close = whole.end() + close_rel;

        let next_open = opens
            .get(i + 1)
            .and_then(|c| c.get(0))
            .map(|m| m.start());
        if matches!(next_open, Some(n) if n < close) {
            continue;
        }

        let name = name.as_str().trim();
        let end = close + INVOKE_CLOSE.len();
        consumed = end;
        if name.is_empty() {
            continue;
        }
        blocks.push(Block {
            span: whole.start()..end,
            name,
            body: &text[whole.end()..close],
        });
    }
    blocks
}

/// JSON-decode a literal, falling back to the raw text as a string.
pub fn decode_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn parse_parameters(body: &str) -> ToolInput {
    let mut input = ToolInput::new();
    for caps in PARAMETER.captures_iter(body) {
        let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let key = key.as_str().trim();
        if key.is_empty() {
            continue;
        }
        input.insert(key.to_string(), decode_value(value.as_str()));
    }
    input
}

/// Invocations in document order, each with a fresh id. Never fails.
pub fn parse_invocations(text: &str) -> Vec<ToolInvocation> {
    scan(text)
        .into_iter()
        .map(|block| ToolInvocation::new(block.name, parse_parameters(block.body)))
        .collect()
}

/// The prose around the invocation blocks, with wrappers removed.
pub fn strip_invocations(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for block in scan(text) {
        out.push_str(&text[last..block.span.start]);
        last = block.span.end;
    }
    out.push_str(&text[last..]);

    let out = WRAPPER.replace_all(&out, "");
    let out = BLANK_RUNS.replace_all(&out, "\n\n");
    out.trim().to_string()
}
