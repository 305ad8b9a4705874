/// Expand `${VAR}` and `${VAR:-fallback}` placeholders in raw config text.
///
/// Unset variables without a fallback are left untouched so the parser or
/// validator can point at them.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: keep the remainder verbatim.
            out.push_str(&rest[start..]);
            return out;
        };

        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match (name.is_empty(), lookup(name).filter(|v| !v.is_empty()), fallback) {
            (false, Some(value), _) => out.push_str(&value),
            (false, None, Some(fallback)) => out.push_str(fallback),
            _ => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "WARDEN_TEST_DIR" => Some("/etc/warden".into()),
            "WARDEN_TEST_EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(
            substitute_env_with("policy_path = \"${WARDEN_TEST_DIR}/policy.toml\"", lookup),
            "policy_path = \"/etc/warden/policy.toml\""
        );
    }

    #[test]
    fn fallback_used_for_unset_or_empty() {
        assert_eq!(substitute_env_with("${WARDEN_MISSING:-/tmp}", lookup), "/tmp");
        assert_eq!(substitute_env_with("${WARDEN_TEST_EMPTY:-x}", lookup), "x");
        assert_eq!(substitute_env_with("${WARDEN_TEST_DIR:-x}", lookup), "/etc/warden");
    }

    #[test]
    fn unknown_and_malformed_are_kept() {
        assert_eq!(substitute_env_with("${WARDEN_MISSING}", lookup), "${WARDEN_MISSING}");
        assert_eq!(substitute_env_with("a ${} b", lookup), "a ${} b");
        assert_eq!(substitute_env_with("tail ${OPEN", lookup), "tail ${OPEN");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("debounce_ms = 500"), "debounce_ms = 500");
    }
}
