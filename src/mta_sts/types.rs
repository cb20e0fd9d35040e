#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "with-serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    Enforce,
    Testing,
    None,
}

impl PolicyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enforce => "enforce",
            Self::Testing => "testing",
            Self::None => "none",
        }
    }
}

/// An MTA-STS policy as produced by the external fetcher (RFC 8461 §3.2).
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub mode: PolicyMode,
    /// MX patterns; a leading `*.` label matches exactly one host label.
    pub mx: Vec<String>,
    pub id: Option<String>,
    pub max_age: Option<u64>,
}

/// Verdict for one MX host against a policy. Nothing is dropped at
/// validation time; the connection engine enforces.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyMatch {
    pub valid: bool,
    pub mode: PolicyMode,
    pub testing: bool,
}

/// Evaluates `exchange` against `policy`.
///
/// Mode `none` accepts every host. Otherwise the host must match one of the
/// policy's MX patterns; `testing` mode reports mismatches without making
/// them enforceable.
pub fn evaluate(exchange: &str, policy: &Policy) -> PolicyMatch {
    let testing = policy.mode == PolicyMode::Testing;
    if policy.mode == PolicyMode::None {
        return PolicyMatch {
            valid: true,
            mode: policy.mode,
            testing,
        };
    }

    let host = exchange.trim_end_matches('.').to_ascii_lowercase();
    let valid = policy
        .mx
        .iter()
        .any(|pattern| host_matches(&host, &pattern.trim_end_matches('.').to_ascii_lowercase()));

    PolicyMatch {
        valid,
        mode: policy.mode,
        testing,
    }
}

fn host_matches(host: &str, pattern: &str) -> bool {
    let Some(suffix) = pattern.strip_prefix("*.") else {
        return host == pattern;
    };
    // the wildcard covers exactly one leftmost label
    match host.strip_suffix(suffix).and_then(|head| head.strip_suffix('.')) {
        Some(label) => !label.is_empty() && !label.contains('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(mode: PolicyMode, mx: &[&str]) -> Policy {
        Policy {
            mode,
            mx: mx.iter().map(|s| s.to_string()).collect(),
            id: None,
            max_age: None,
        }
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let policy = policy(PolicyMode::Enforce, &["MX.Example.COM"]);
        let verdict = evaluate("mx.example.com.", &policy);
        assert!(verdict.valid);
        assert!(!verdict.testing);
    }

    #[test]
    fn wildcard_matches_exactly_one_label() {
        let policy = policy(PolicyMode::Enforce, &["*.example.com"]);
        assert!(evaluate("mx1.example.com", &policy).valid);
        assert!(!evaluate("example.com", &policy).valid);
        assert!(!evaluate("a.b.example.com", &policy).valid);
    }

    #[test]
    fn mode_none_accepts_everything() {
        let policy = policy(PolicyMode::None, &[]);
        assert!(evaluate("anything.example.net", &policy).valid);
    }

    #[test]
    fn testing_mode_flags_mismatch_without_enforcement() {
        let policy = policy(PolicyMode::Testing, &["mx.example.com"]);
        let verdict = evaluate("rogue.example.com", &policy);
        assert!(!verdict.valid);
        assert!(verdict.testing);
    }
}
