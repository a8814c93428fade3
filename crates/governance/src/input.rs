//! Layer 1: parameter validation before dispatch.

use serde_json::Value;
use std::time::Instant;

use agent_runtime_core::config::InputLimits;
use agent_runtime_core::types::{codes, ToolCategory, ToolDefinition, ValidationResult};

use crate::patterns::{
    first_match, BLOCKED_COMMANDS, BLOCKED_COMMAND_SUBSTRINGS, BLOCKED_URL_SCHEMES, COMMAND_CHAINING,
    CONTROL_CHARS, PATH_TRAVERSAL, SQL_INJECTION, SUSPICIOUS,
};

/// Chained operator runs tolerated in one command before warning.
const MAX_CHAIN_RUNS: usize = 5;

/// A string leaf of the parameter tree.
struct StringField<'a> {
    /// Dotted path, e.g. `files[2].path`.
    path: String,
    /// Nearest enclosing object key.
    key: Option<&'a str>,
    value: &'a str,
}

fn extract_strings<'a>(
    value: &'a Value,
    path: String,
    key: Option<&'a str>,
    out: &mut Vec<StringField<'a>>,
) {
    match value {
        Value::String(s) => out.push(StringField { path, key, value: s }),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                extract_strings(item, format!("{}[{}]", path, i), key, out);
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                let child = if path.is_empty() { k.clone() } else { format!("{}.{}", path, k) };
                extract_strings(v, child, Some(k.as_str()), out);
            }
        }
        _ => {}
    }
}

/// Layer 1 validator.
#[derive(Debug, Clone, Default)]
pub struct InputValidator {
    limits: InputLimits,
}

impl InputValidator {
    pub fn new(limits: InputLimits) -> Self {
        Self { limits }
    }

    pub fn validate(&self, definition: &ToolDefinition, params: &Value) -> ValidationResult {
        let started = Instant::now();
        let mut out = ValidationResult::new();

        if let Err(violations) = definition.schema.validate(params) {
            for v in violations {
                out.error(codes::SCHEMA_VIOLATION, v.message.clone(), Some(&v.field));
            }
        }

        let size = params.to_string().len();
        let max = self.limits.max_param_bytes;
        if size > max {
            out.error(
                codes::PARAMS_TOO_LARGE,
                format!("parameters are {} bytes, limit {}", size, max),
                None,
            );
        } else if size * 10 >= max * 8 {
            out.warn(
                codes::PARAMS_NEAR_LIMIT,
                format!("parameters are {} bytes, {}% of limit", size, size * 100 / max.max(1)),
                None,
            );
        }

        let mut fields = Vec::new();
        extract_strings(params, String::new(), None, &mut fields);
        for field in &fields {
            self.check_string(definition.category, field, &mut out);
        }

        self.check_tool_rules(definition, params, &mut out);
        out.finish(started)
    }

    fn check_string(&self, category: ToolCategory, field: &StringField<'_>, out: &mut ValidationResult) {
        let path = Some(field.path.as_str());

        if category == ToolCategory::Shell && field.key == Some("command") {
            let lower = field.value.to_lowercase();
            if let Some(hit) = BLOCKED_COMMAND_SUBSTRINGS.iter().find(|s| lower.contains(*s)) {
                out.critical(codes::BLOCKED_COMMAND, format!("command contains blocked sequence `{}`", hit), path);
            } else if let Some(re) = first_match(&BLOCKED_COMMANDS, field.value) {
                out.critical(codes::BLOCKED_COMMAND, format!("command matches blocked pattern `{}`", re.as_str()), path);
            }
        }

        if let Some(re) = first_match(&SQL_INJECTION, field.value) {
            out.error(codes::SQL_INJECTION, format!("value matches SQL injection pattern `{}`", re.as_str()), path);
        }

        if category == ToolCategory::File && matches!(field.key, Some("path") | Some("file")) {
            if let Some(re) = first_match(&PATH_TRAVERSAL, field.value) {
                out.error(codes::PATH_TRAVERSAL, format!("path matches traversal pattern `{}`", re.as_str()), path);
            }
        }

        if let Some(re) = first_match(&SUSPICIOUS, field.value) {
            out.warn(codes::SUSPICIOUS_PATTERN, format!("value contains `{}`", re.as_str()), path);
        }

        if CONTROL_CHARS.is_match(field.value) {
            out.warn(codes::CONTROL_CHARACTERS, "value contains control characters", path);
        }
    }

    fn check_tool_rules(&self, definition: &ToolDefinition, params: &Value, out: &mut ValidationResult) {
        match definition.name.as_str() {
            "shell.exec" => {
                let Some(command) = params.get("command").and_then(Value::as_str) else {
                    return;
                };
                let len = command.chars().count();
                if len > self.limits.max_command_length {
                    out.error(
                        codes::COMMAND_TOO_LONG,
                        format!("command is {} chars, limit {}", len, self.limits.max_command_length),
                        Some("command"),
                    );
                }
                let runs = COMMAND_CHAINING.find_iter(command).count();
                if runs > MAX_CHAIN_RUNS {
                    out.warn(
                        codes::EXCESSIVE_CHAINING,
                        format!("command chains {} operator runs", runs),
                        Some("command"),
                    );
                }
            }
            "file.write" | "file.edit" => {
                for field in ["content", "new_content"] {
                    let Some(content) = params.get(field).and_then(Value::as_str) else {
                        continue;
                    };
                    if content.len() > self.limits.max_file_content_bytes {
                        out.error(
                            codes::CONTENT_TOO_LARGE,
                            format!(
                                "{} is {} bytes, limit {}",
                                field,
                                content.len(),
                                self.limits.max_file_content_bytes
                            ),
                            Some(field),
                        );
                    }
                }
            }
            "browser.navigate" => {
                let Some(raw) = params.get("url").and_then(Value::as_str) else {
                    return;
                };
                match url::Url::parse(raw) {
                    Ok(parsed) => {
                        if BLOCKED_URL_SCHEMES.contains(&parsed.scheme()) {
                            out.critical(
                                codes::BLOCKED_URL_SCHEME,
                                format!("scheme `{}` is not allowed", parsed.scheme()),
                                Some("url"),
                            );
                        }
                    }
                    Err(e) => out.error(codes::INVALID_URL, format!("url does not parse: {}", e), Some("url")),
                }
            }
            _ => {}
        }
    }
}
