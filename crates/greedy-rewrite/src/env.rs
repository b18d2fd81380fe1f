use std::env;
use std::sync::OnceLock;

static MAX_ITERS: OnceLock<usize> = OnceLock::new();
static MAX_REWRITES: OnceLock<usize> = OnceLock::new();
static PASS_STATS: OnceLock<bool> = OnceLock::new();

pub(crate) const DEFAULT_MAX_ITERS: usize = 10;
pub(crate) const DEFAULT_MAX_REWRITES: usize = 100_000;

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn parse_count(name: &str, default: usize) -> usize {
    match env::var(name) {
        Ok(value) => match value.trim().parse::<usize>() {
            Ok(parsed) if parsed > 0 => parsed,
            _ => {
                tracing::warn!(var = name, value = %value, default, "ignoring invalid count");
                default
            }
        },
        Err(_) => default,
    }
}

/// Sweep cap for the greedy driver (`GREEDY_REWRITE_MAX_ITERS`).
pub(crate) fn max_iterations() -> usize {
    *MAX_ITERS.get_or_init(|| parse_count("GREEDY_REWRITE_MAX_ITERS", DEFAULT_MAX_ITERS))
}

/// Rewrite cap for the greedy driver (`GREEDY_REWRITE_MAX_REWRITES`).
pub(crate) fn max_rewrites() -> usize {
    *MAX_REWRITES
        .get_or_init(|| parse_count("GREEDY_REWRITE_MAX_REWRITES", DEFAULT_MAX_REWRITES))
}

pub(crate) fn pass_stats_enabled() -> bool {
    *PASS_STATS.get_or_init(|| match env::var("GREEDY_REWRITE_PASS_STATS") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_flags_accept_common_spellings() {
        for value in ["1", "true", " Yes ", "ON"] {
            assert!(parse_bool(value), "{value}");
        }
        for value in ["0", "false", "off", "maybe"] {
            assert!(!parse_bool(value), "{value}");
        }
    }

    #[test]
    fn unset_counts_fall_back_to_default() {
        assert_eq!(parse_count("GREEDY_REWRITE_TEST_UNSET_COUNT", 7), 7);
    }
}
