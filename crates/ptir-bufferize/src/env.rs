use std::env;

use crate::bufferize::DestinationPolicy;

const INPLACE_POLICY_VAR: &str = "PTIR_INPLACE_POLICY";
const DISABLE_INPLACE_VAR: &str = "PTIR_DISABLE_INPLACE";

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

pub(crate) fn inplace_disabled() -> bool {
    match env::var(DISABLE_INPLACE_VAR) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    }
}

/// Reads the destination policy override; unknown spellings are ignored.
pub(crate) fn destination_policy() -> Option<DestinationPolicy> {
    let value = env::var(INPLACE_POLICY_VAR).ok()?;
    let parsed = value.parse::<DestinationPolicy>();
    if parsed.is_err() {
        tracing::warn!(
            var = INPLACE_POLICY_VAR,
            value = value.as_str(),
            "ignoring unknown destination policy"
        );
    }
    parsed.ok()
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_bool(value), "{value}");
        }
        for value in ["0", "false", "off", ""] {
            assert!(!parse_bool(value), "{value}");
        }
    }
}
