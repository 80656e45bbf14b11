/// URL pattern matching for group definitions
use log::warn;
use regex::Regex;
use std::cell::RefCell;
use std::collections::HashMap;

/// Distinct patterns kept compiled before the cache starts over
const CACHE_LIMIT: usize = 1024;

thread_local! {
    // `None` marks a pattern that failed to compile
    static COMPILED: RefCell<HashMap<String, Option<Regex>>> = RefCell::new(HashMap::new());
}

/// Translate a glob-style pattern into an unanchored regular expression.
///
/// Every regex metacharacter is escaped except `*`, which becomes `.*`.
/// So `*.github.com*` matches `https://gist.github.com/x` but the dots
/// only ever match literal dots.
pub fn glob_to_regex(pattern: &str) -> String {
    pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*")
}

/// Does `url` match `pattern`? A pattern that fails to compile never matches.
pub fn matches(url: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }

    compiled(pattern).is_some_and(|regex| regex.is_match(url))
}

/// Compile `pattern` once; later calls reuse the cached regex
fn compiled(pattern: &str) -> Option<Regex> {
    COMPILED.with(|cache| {
        let mut cache = cache.borrow_mut();
        if let Some(entry) = cache.get(pattern) {
            return entry.clone();
        }
        if cache.len() >= CACHE_LIMIT {
            cache.clear();
        }

        let entry = match Regex::new(&glob_to_regex(pattern)) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Ignoring unusable pattern {:?}: {}", pattern, e);
                None
            }
        };
        cache.insert(pattern.to_string(), entry.clone());
        entry
    })
}

/// First-match short circuit over a definition's patterns
pub fn matches_any(url: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| matches(url, pattern))
}
