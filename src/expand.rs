//! Variable expansion language (§6), used by the Probe Runner and available
//! for Subscription Runner extension.
//!
//! Grounded on the single regex-substitution pass per token kind in the
//! original `app/routers/api_debug.py`. All `[timestmp.10]`/`[timestmp.13]`
//! substitutions in one pass share a single captured "now" (testable
//! property 6).

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static TIMESTMP_10: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[timestmp\.10\]").unwrap());
static TIMESTMP_13: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[timestmp\.13\]").unwrap());
static TIMESTMP_ALIAS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[timestmp\]").unwrap());
static RANDOM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[random\.(-?\d+)-(-?\d+)\]").unwrap());
static GETENV: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[getenv\.([^\]]+)\]").unwrap());

/// Expand all recognized tokens in `input` in a single pass, sharing one
/// captured "now" for every `[timestmp.*]` token.
pub fn expand(input: &str, env: &HashMap<String, String>, now_millis: i64) -> String {
    let now_secs = now_millis / 1000;

    let mut out = TIMESTMP_10
        .replace_all(input, now_secs.to_string().as_str())
        .into_owned();
    out = TIMESTMP_13
        .replace_all(&out, now_millis.to_string().as_str())
        .into_owned();
    out = TIMESTMP_ALIAS
        .replace_all(&out, now_millis.to_string().as_str())
        .into_owned();

    out = RANDOM
        .replace_all(&out, |caps: &regex::Captures| {
            let (Ok(a), Ok(b)) = (caps[1].parse::<i64>(), caps[2].parse::<i64>()) else {
                return caps[0].to_string();
            };
            if a > b {
                return caps[0].to_string();
            }
            let span = (b - a + 1) as u64;
            let offset = (random_u64() % span) as i64;
            (a + offset).to_string()
        })
        .into_owned();

    out = GETENV
        .replace_all(&out, |caps: &regex::Captures| {
            let name = &caps[1];
            env.get(name).cloned().unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned();

    out
}

/// Expand every value of a header map in place, using the same shared now.
pub fn expand_headers(
    headers: &HashMap<String, String>,
    env: &HashMap<String, String>,
    now_millis: i64,
) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), expand(v, env, now_millis)))
        .collect()
}

fn random_u64() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    // Non-cryptographic jitter source; the spec only requires a value drawn
    // uniformly from the requested integer range, not unpredictability.
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos).wrapping_mul(2_862_933_555_777_941_757).wrapping_add(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestmp_10_and_13_share_one_now() {
        let env = HashMap::new();
        let now_millis = 1_700_000_123_456;
        let out = expand("[timestmp.10] [timestmp.13] [timestmp]", &env, now_millis);
        let parts: Vec<&str> = out.split_whitespace().collect();
        let t10: i64 = parts[0].parse().unwrap();
        let t13: i64 = parts[1].parse().unwrap();
        let alias: i64 = parts[2].parse().unwrap();
        assert!(t13 / 1000 == t10 || t13 / 1000 == t10 + 1);
        assert_eq!(alias, t13);
    }

    #[test]
    fn random_range_is_bounded() {
        let env = HashMap::new();
        for _ in 0..20 {
            let out = expand("[random.5-5]", &env, 0);
            assert_eq!(out, "5");
        }
    }

    #[test]
    fn invalid_random_range_left_verbatim() {
        let env = HashMap::new();
        let out = expand("[random.9-1]", &env, 0);
        assert_eq!(out, "[random.9-1]");
    }

    #[test]
    fn getenv_substitutes_known_and_leaves_unknown_verbatim() {
        let mut env = HashMap::new();
        env.insert("NAME".to_string(), "世界".to_string());
        let out = expand(r#"{"n":"[getenv.NAME]"}"#, &env, 0);
        assert_eq!(out, r#"{"n":"世界"}"#);

        let out_missing = expand("[getenv.MISSING]", &env, 0);
        assert_eq!(out_missing, "[getenv.MISSING]");
    }
}
