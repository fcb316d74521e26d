//! `${VAR}` placeholder expansion for config values and argument lists.

use std::collections::HashMap;

use tracing::warn;

/// Replace `${VAR}` placeholders in a string using the process environment.
///
/// Missing or empty variables expand to the empty string with a warning, so
/// a misconfigured server fails at startup with a clear subprocess error
/// rather than receiving a literal `${TOKEN}`.
pub fn expand_env(input: &str) -> String {
    expand_env_with(input, |name| std::env::var(name).ok())
}

/// Replace `${VAR}` placeholders using a custom lookup function.
///
/// This is the implementation used by [`expand_env`]; the separate signature
/// makes it testable without mutating the process environment, and lets the
/// lifecycle manager resolve placeholders against a composed environment
/// (process env layered with per-request extra vars).
pub fn expand_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if closed && !var_name.is_empty() {
                match lookup(&var_name).filter(|v| !v.is_empty()) {
                    Some(val) => result.push_str(&val),
                    None => {
                        warn!(var = %var_name, "environment variable not found or empty during expansion");
                    },
                }
            } else {
                // Malformed — emit literal.
                result.push_str("${");
                result.push_str(&var_name);
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Expand every value in an env map against the given lookup environment.
pub fn expand_env_map(
    env: &HashMap<String, String>,
    lookup_env: &HashMap<String, String>,
) -> HashMap<String, String> {
    env.iter()
        .map(|(k, v)| {
            (
                k.clone(),
                expand_env_with(v, |name| lookup_env.get(name).cloned()),
            )
        })
        .collect()
}

/// Expand every string in an argument list against the given lookup environment.
pub fn expand_args(args: &[String], lookup_env: &HashMap<String, String>) -> Vec<String> {
    args.iter()
        .map(|arg| expand_env_with(arg, |name| lookup_env.get(name).cloned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_var() {
        let lookup = |name: &str| match name {
            "AGENTRY_TEST_VAR" => Some("hello".to_string()),
            _ => None,
        };
        assert_eq!(
            expand_env_with("key=${AGENTRY_TEST_VAR}", lookup),
            "key=hello"
        );
    }

    #[test]
    fn missing_var_expands_to_empty() {
        let lookup = |_: &str| None;
        assert_eq!(expand_env_with("token=${AGENTRY_NONEXISTENT}", lookup), "token=");
    }

    #[test]
    fn empty_var_expands_to_empty() {
        let lookup = |_: &str| Some(String::new());
        assert_eq!(expand_env_with("${X}", lookup), "");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(expand_env("plain text"), "plain text");
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        let lookup = |_: &str| Some("v".to_string());
        assert_eq!(expand_env_with("${OOPS", lookup), "${OOPS");
    }

    #[test]
    fn multiple_placeholders() {
        let lookup = |name: &str| match name {
            "A" => Some("1".to_string()),
            "B" => Some("2".to_string()),
            _ => None,
        };
        assert_eq!(expand_env_with("${A}-${B}-${C}", lookup), "1-2-");
    }

    #[test]
    fn expand_map_and_args_use_lookup_env() {
        let lookup_env: HashMap<String, String> =
            HashMap::from([("GH".into(), "xyz".into()), ("B".into(), "2".into())]);

        let env = HashMap::from([("GITHUB_TOKEN".to_string(), "${GH}".to_string())]);
        let expanded = expand_env_map(&env, &lookup_env);
        assert_eq!(expanded["GITHUB_TOKEN"], "xyz");

        let args = vec!["--k".to_string(), "${B}".to_string()];
        assert_eq!(expand_args(&args, &lookup_env), vec!["--k", "2"]);
    }
}
