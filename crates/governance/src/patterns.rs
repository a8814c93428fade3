//! Shared detection patterns for the safety layers.
//!
//! Every regex is compiled once on first use.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("built-in pattern must compile"))
        .collect()
}

// =============================================================================
// Input patterns
// =============================================================================

/// Literal substrings that are never allowed in a shell command.
pub const BLOCKED_COMMAND_SUBSTRINGS: &[&str] = &[
    ":(){ :|:& };:",
    "rm -rf /*",
    "rm -rf ~",
    "> /dev/sda",
    "mv / /dev/null",
    "chmod -R 777 /",
    "kill -9 -1",
];

pub static BLOCKED_COMMANDS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)\brm\s+-[a-z]*(rf|fr)[a-z]*\s+(--no-preserve-root\s+)?/(\s|$)",
        r"(?i)\bmkfs(\.\w+)?\b",
        r"(?i)\bdd\s+if=/dev/(zero|random|urandom)\b",
        r"(?i)\b(curl|wget)\b[^|;&]*\|\s*(sudo\s+)?(ba|z|da)?sh\b",
        r"(?i)\b(shutdown|reboot|poweroff|halt)\b",
        r"(?i)\binit\s+[06]\b",
        r"(?i)>\s*/dev/(sd[a-z]|nvme\d)",
    ])
});

pub static SQL_INJECTION: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)\b(drop|truncate|alter)\s+(table|database|schema)\b",
        r"(?i)\bdelete\s+from\s+\w+",
        r"(?i)\binsert\s+into\s+\w+",
        r"(?i)\bupdate\s+\w+\s+set\s+\w+\s*=",
        r"(?i)\bselect\s+[\w\*,\s]+\s+from\s+\w+\s+where\b",
        r"(?i)\bunion\s+(all\s+)?select\b",
        r"(?i)\b(or|and)\s+'?(\d+)'?\s*=\s*'?\d+'?",
        r"(?i)'\s*(or|and)\s+'[^']*'\s*=\s*'",
        r"'\s*(--|#|/\*)",
        r";\s*--",
    ])
});

pub static PATH_TRAVERSAL: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\.\./",
        r"\.\.\\",
        r"(?i)%2e%2e(%2f|%5c|/|\\)",
        r"(?i)\.\.%2f",
        r"(?i)%252e%252e",
        r"%00",
    ])
});

/// Patterns that warn but never block.
pub static SUSPICIOUS: Lazy<Vec<Regex>> =
    Lazy::new(|| compile(&[r"\$\([^)]*\)", r"`[^`]*`", r"\$\{[^}]*\}"]));

/// Control characters other than tab, newline, and carriage return.
pub static CONTROL_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").expect("built-in pattern must compile"));

pub static COMMAND_CHAINING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[;&|]{2,}").expect("built-in pattern must compile"));

pub const BLOCKED_URL_SCHEMES: &[&str] = &["javascript", "data", "file", "about"];

// =============================================================================
// Output patterns
// =============================================================================

pub static MALWARE: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        // ELF and PE headers, raw or base64
        r"\x7FELF",
        r"MZ\x{90}\x00",
        r"TVqQAAMAAAAEAAAA",
        r"f0VMRg[EI]",
        // eval over a decoder
        r"(?i)\beval\s*\(\s*(atob|unescape|base64_decode|gzinflate|gzuncompress|str_rot13|String\.fromCharCode)\s*\(",
        r"(?i)\beval\s*\(\s*function\s*\(\s*p\s*,\s*a\s*,\s*c\s*,\s*k\s*,\s*e\s*,",
        // long hex escape runs
        r"(?i)(\\x[0-9a-f]{2}){20,}",
    ])
});

/// Category of sensitive content found in output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveKind {
    PrivateKey,
    Jwt,
    AwsKey,
    Token,
    Secret,
    Email,
    Ssn,
    Card,
    Phone,
    Ip,
}

impl SensitiveKind {
    pub fn is_secret(&self) -> bool {
        matches!(
            self,
            Self::PrivateKey | Self::Jwt | Self::AwsKey | Self::Token | Self::Secret
        )
    }

    /// Replacement written in place of a match.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::PrivateKey => "[REDACTED_PRIVATE_KEY]",
            Self::Jwt => "[REDACTED_JWT]",
            Self::AwsKey => "[REDACTED_AWS_KEY]",
            Self::Token => "[REDACTED_TOKEN]",
            Self::Secret => "[REDACTED_SECRET]",
            Self::Email => "[REDACTED_EMAIL]",
            Self::Ssn => "[REDACTED_SSN]",
            Self::Card => "[REDACTED_CARD]",
            Self::Phone => "[REDACTED_PHONE]",
            Self::Ip => "[REDACTED_IP]",
        }
    }
}

/// A sensitive pattern. When `value_group` is set only that capture group is
/// replaced, leaving the surrounding key in place.
pub struct SensitivePattern {
    pub kind: SensitiveKind,
    pub regex: Regex,
    pub value_group: Option<usize>,
}

/// Secrets first, then PII; masking applies them in this order.
pub static SENSITIVE: Lazy<Vec<SensitivePattern>> = Lazy::new(|| {
    let table: &[(SensitiveKind, &str, Option<usize>)] = &[
        (
            SensitiveKind::PrivateKey,
            r"-----BEGIN (?:[A-Z]+ )?PRIVATE KEY-----(?:[\s\S]*?-----END (?:[A-Z]+ )?PRIVATE KEY-----)?",
            None,
        ),
        (
            SensitiveKind::Jwt,
            r"\beyJ[A-Za-z0-9_-]{5,}\.[A-Za-z0-9_-]{5,}\.[A-Za-z0-9_-]{5,}",
            None,
        ),
        (SensitiveKind::AwsKey, r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b", None),
        (
            SensitiveKind::Token,
            r"\b(?:(?:ghp|gho|ghs|ghu|ghr)_[A-Za-z0-9]{20,}|github_pat_[A-Za-z0-9_]{20,}|sk-[A-Za-z0-9_-]{20,}|xox[abposr]-[A-Za-z0-9-]{10,})",
            None,
        ),
        (
            SensitiveKind::Secret,
            r#"(?i)\b(?:api[_-]?key|secret(?:[_-]?key)?|password|passwd|pwd|token|access[_-]?key|auth)["']?\s*[:=]\s*["']?([^\s"',;\[\]{}]{8,})"#,
            Some(1),
        ),
        (
            SensitiveKind::Email,
            r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
            None,
        ),
        (SensitiveKind::Ssn, r"\b\d{3}-\d{2}-\d{4}\b", None),
        (SensitiveKind::Card, r"\b(?:\d{4}[- ]?){3}\d{4}\b", None),
        (
            SensitiveKind::Phone,
            r"(?:\+1[-. ]?)?(?:\(\d{3}\)\s?|\b\d{3}[-. ])\d{3}[-. ]\d{4}\b",
            None,
        ),
        (
            SensitiveKind::Ip,
            r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b",
            None,
        ),
    ];
    table
        .iter()
        .map(|(kind, pattern, group)| SensitivePattern {
            kind: *kind,
            regex: Regex::new(pattern).expect("built-in pattern must compile"),
            value_group: *group,
        })
        .collect()
});

/// Object keys whose string values are always treated as secrets.
pub static SENSITIVE_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(password|passwd|secret|client[_-]?secret|api[_-]?key|access[_-]?key|private[_-]?key|token|auth[_-]?token)$")
        .expect("built-in pattern must compile")
});

/// First pattern in `set` matching `text`.
pub fn first_match<'a>(set: &'a [Regex], text: &str) -> Option<&'a Regex> {
    set.iter().find(|re| re.is_match(text))
}
