//! "Did you mean" suggestions for mistyped plugin and parameter names.

/// Maximum number of suggestions returned.
const MAX_SUGGESTIONS: usize = 3;

/// Return up to three candidates that look like `target`.
///
/// A candidate matches when its edit distance to `target` is small, or
/// when one of its `_`/`-` separated tokens is close to one of the
/// target's tokens. Results are ordered by distance, then name.
pub fn similar_names<'a, I>(target: &str, candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let target_lower = target.to_lowercase();
    let target_tokens = tokens(&target_lower);

    let mut scored: Vec<(usize, String)> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let lower = candidate.to_lowercase();
            let whole = levenshtein_distance(&target_lower, &lower);
            if whole <= target_lower.len() / 3 + 1 {
                return Some((whole, candidate.to_string()));
            }
            let token_best = tokens(&lower)
                .iter()
                .flat_map(|ct| {
                    target_tokens
                        .iter()
                        .filter(|tt| tt.len() > 2)
                        .map(move |tt| levenshtein_distance(tt, ct))
                })
                .min()?;
            if token_best <= 1 {
                Some((whole, candidate.to_string()))
            } else {
                None
            }
        })
        .collect();

    scored.sort();
    scored.dedup_by(|a, b| a.1 == b.1);
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, name)| name)
        .collect()
}

fn tokens(s: &str) -> Vec<&str> {
    s.split(['_', '-', '.'])
        .filter(|t| !t.is_empty())
        .collect()
}

/// Classic Levenshtein distance over chars.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let m = a_chars.len();
    let n = b_chars.len();

    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a_chars[i - 1] != b_chars[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}
