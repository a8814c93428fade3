//! Layer 4: output validation, masking, and bounded truncation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Instant;

use agent_runtime_core::config::OutputLimits;
use agent_runtime_core::types::{codes, ToolResult, ValidationResult};

use crate::patterns::{first_match, SensitiveKind, MALWARE, SENSITIVE, SENSITIVE_KEY};

/// Marker field added to truncated output.
pub const TRUNCATED_MARKER: &str = "_truncated";

const MARKER_ONLY: &str = r#"{"_truncated":true}"#;

/// Replacement counts from one masking pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskReport {
    pub counts: BTreeMap<SensitiveKind, usize>,
}

impl MaskReport {
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn count(&self, kind: SensitiveKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    fn add(&mut self, kind: SensitiveKind, n: usize) {
        if n > 0 {
            *self.counts.entry(kind).or_insert(0) += n;
        }
    }

    fn absorb(&mut self, other: MaskReport) {
        for (kind, n) in other.counts {
            self.add(kind, n);
        }
    }
}

/// Replace every secret and PII match in `text` with its redaction tag.
///
/// Secrets are masked before PII so a token containing an email-like string
/// is reported once, as a token.
pub fn mask_sensitive(text: &str) -> (String, MaskReport) {
    let mut report = MaskReport::default();
    let mut current = text.to_string();
    for pattern in SENSITIVE.iter() {
        let mut hits = 0;
        let replaced = pattern.regex.replace_all(&current, |caps: &regex::Captures<'_>| {
            hits += 1;
            match pattern.value_group.and_then(|g| caps.get(g)) {
                Some(value) => {
                    let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                    let start = caps.get(0).map(|m| m.start()).unwrap_or_default();
                    let offset = value.start() - start;
                    format!("{}{}", &whole[..offset], pattern.kind.tag())
                }
                None => pattern.kind.tag().to_string(),
            }
        });
        let replaced = replaced.into_owned();
        report.add(pattern.kind, hits);
        current = replaced;
    }
    (current, report)
}

/// Mask every string in a JSON tree. String values under sensitive keys such
/// as `password` or `api_key` are replaced whole.
pub fn mask_value(value: &Value) -> (Value, MaskReport) {
    let mut report = MaskReport::default();
    let masked = mask_inner(value, None, &mut report);
    (masked, report)
}

fn mask_inner(value: &Value, key: Option<&str>, report: &mut MaskReport) -> Value {
    match value {
        Value::String(s) => {
            if key.is_some_and(|k| SENSITIVE_KEY.is_match(k)) && !s.is_empty() && !is_tag(s) {
                report.add(SensitiveKind::Secret, 1);
                return Value::String(SensitiveKind::Secret.tag().to_string());
            }
            let (masked, found) = mask_sensitive(s);
            report.absorb(found);
            Value::String(masked)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| mask_inner(v, key, report)).collect()),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), mask_inner(v, Some(k), report));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn is_tag(s: &str) -> bool {
    s.starts_with("[REDACTED_") && s.ends_with(']')
}

#[derive(Clone, Copy, PartialEq)]
enum Frame {
    Object,
    Array,
}

struct Scan {
    /// Last structural cut point and the open frames at that point.
    boundary: Option<(usize, Vec<Frame>)>,
    frames: Vec<Frame>,
    in_string: bool,
    /// Byte offset of an escape sequence still open at the end of the scan.
    open_escape: Option<usize>,
}

fn scan(text: &str) -> Scan {
    let bytes = text.as_bytes();
    let mut state = Scan {
        boundary: None,
        frames: Vec::new(),
        in_string: false,
        open_escape: None,
    };
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if state.in_string {
            match b {
                b'\\' => {
                    let len = if bytes.get(i + 1) == Some(&b'u') { 6 } else { 2 };
                    if i + len > bytes.len() {
                        state.open_escape = Some(i);
                        break;
                    }
                    i += len;
                    continue;
                }
                b'"' => state.in_string = false,
                _ => {}
            }
        } else {
            match b {
                b'"' => state.in_string = true,
                b'{' => state.frames.push(Frame::Object),
                b'[' => state.frames.push(Frame::Array),
                b',' => state.boundary = Some((i, state.frames.clone())),
                b'}' | b']' => {
                    state.frames.pop();
                    state.boundary = Some((i + 1, state.frames.clone()));
                }
                _ => {}
            }
        }
        i += 1;
    }
    state
}

fn close_frames(out: &mut String, frames: &[Frame]) {
    for frame in frames.iter().rev() {
        out.push(match frame {
            Frame::Object => '}',
            Frame::Array => ']',
        });
    }
}

/// Close `prefix` and attach the marker, either inside the root object or by
/// wrapping the value.
fn finish(prefix: &str, frames: &[Frame]) -> String {
    let trimmed = prefix.trim_end();
    if frames.first() == Some(&Frame::Object) {
        let mut out = trimmed.to_string();
        close_frames(&mut out, &frames[1..]);
        if !out.trim_start().ends_with('{') {
            out.push(',');
        }
        out.push_str(r#""_truncated":true}"#);
        out
    } else {
        let mut inner = trimmed.to_string();
        close_frames(&mut inner, frames);
        format!(r#"{{"_truncated":true,"value":{}}}"#, inner.trim_start())
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn candidate(text: &str, limit: usize) -> Option<String> {
    let cut = floor_char_boundary(text, limit);
    let head = &text[..cut];
    let state = scan(head);

    if let Some((pos, frames)) = state.boundary {
        if !frames.is_empty() {
            return Some(finish(&head[..pos], &frames));
        }
    }

    // Flat cut: close an open string, then the open frames.
    let mut flat = match state.open_escape {
        Some(at) => head[..at].to_string(),
        None => head.to_string(),
    };
    if state.in_string {
        flat.push('"');
    }
    let out = finish(&flat, &state.frames);
    serde_json::from_str::<Value>(&out).ok().map(|_| out)
}

/// Cut serialized JSON so the result is at most `max_bytes` and still parses.
///
/// The cut lands on the last `,` `}` or `]` outside a string, falling back to
/// a flat offset. A `"_truncated":true` marker is added and open braces and
/// brackets are closed. Input already within the budget is returned as is, so
/// truncating twice at the same budget yields the same string.
pub fn truncate_output(serialized: &str, max_bytes: usize) -> String {
    if serialized.len() <= max_bytes {
        return serialized.to_string();
    }
    let mut limit = max_bytes;
    while limit > 0 {
        match candidate(serialized, limit) {
            Some(out) if out.len() <= max_bytes => return out,
            Some(out) => limit = limit.saturating_sub((out.len() - max_bytes).max(1)),
            None => break,
        }
    }
    MARKER_ONLY.to_string()
}

/// Result of [`OutputValidator::sanitize`].
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedOutput {
    pub value: Value,
    pub masked: MaskReport,
    pub truncated: bool,
    pub original_size: usize,
}

/// Layer 4 validator.
#[derive(Debug, Clone, Default)]
pub struct OutputValidator {
    limits: OutputLimits,
}

impl OutputValidator {
    pub fn new(limits: OutputLimits) -> Self {
        Self { limits }
    }

    pub fn max_output_bytes(&self) -> usize {
        self.limits.max_output_bytes
    }

    /// Scan a tool result. Malware is critical; size, PII, and secrets warn.
    pub fn validate(&self, result: &ToolResult) -> ValidationResult {
        let started = Instant::now();
        let mut out = ValidationResult::new();
        let Some(ref output) = result.output else {
            return out.finish(started);
        };

        let serialized = output.to_string();
        let mut texts = Vec::new();
        collect_strings(output, &mut texts);

        let malware = texts
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(serialized.as_str()))
            .find_map(|t| first_match(&MALWARE, t));
        if let Some(re) = malware {
            out.critical(
                codes::MALWARE_DETECTED,
                format!("output matches malware signature {}", re.as_str()),
                Some("output"),
            );
        }

        if serialized.len() > self.limits.max_output_bytes {
            out.warn(
                codes::OUTPUT_TOO_LARGE,
                format!(
                    "output is {} bytes, limit {}",
                    serialized.len(),
                    self.limits.max_output_bytes
                ),
                Some("output"),
            );
        }

        let (_, report) = mask_value(output);
        let pii: Vec<_> = report.counts.keys().filter(|k| !k.is_secret()).collect();
        let secrets: Vec<_> = report.counts.keys().filter(|k| k.is_secret()).collect();
        if !pii.is_empty() {
            out.warn(codes::PII_DETECTED, format!("output contains PII: {:?}", pii), Some("output"));
        }
        if !secrets.is_empty() {
            out.warn(
                codes::SECRET_DETECTED,
                format!("output contains secrets: {:?}", secrets),
                Some("output"),
            );
        }

        out.finish(started)
    }

    /// Mask then truncate a value to the configured budget.
    pub fn sanitize(&self, value: &Value) -> SanitizedOutput {
        let original_size = value.to_string().len();
        let (masked_value, masked) = mask_value(value);
        let serialized = masked_value.to_string();
        if serialized.len() <= self.limits.max_output_bytes {
            return SanitizedOutput {
                value: masked_value,
                masked,
                truncated: false,
                original_size,
            };
        }
        let cut = truncate_output(&serialized, self.limits.max_output_bytes);
        let value = serde_json::from_str(&cut).unwrap_or_else(|_| json!({ "_truncated": true }));
        SanitizedOutput {
            value,
            masked,
            truncated: true,
            original_size,
        }
    }

    /// Apply [`sanitize`](Self::sanitize) to a result's output.
    pub fn sanitize_result(&self, mut result: ToolResult) -> (ToolResult, MaskReport) {
        let Some(output) = result.output.take() else {
            return (result, MaskReport::default());
        };
        let sanitized = self.sanitize(&output);
        result.output = Some(sanitized.value);
        if sanitized.truncated {
            result.truncated = true;
            result
                .metadata
                .insert("original_size".into(), json!(sanitized.original_size));
        }
        if sanitized.masked.total() > 0 {
            result
                .metadata
                .insert("masked".into(), json!(sanitized.masked.counts));
        }
        (result, sanitized.masked)
    }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}
