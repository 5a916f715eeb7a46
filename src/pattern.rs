//! Glob patterns for key listing and subscriptions
//!
//! Supported syntax:
//! - `*` any run of bytes (including none)
//! - `?` exactly one byte
//! - `[abc]`, `[a-z]` one byte from a class; `[^a]` or `[!a]` negates it
//! - `\x` the literal byte `x`

use bytes::Bytes;

/// A compiled glob pattern over raw key bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    pattern: Bytes,
}

impl GlobPattern {
    pub fn new(pattern: impl AsRef<[u8]>) -> Self {
        Self {
            pattern: Bytes::copy_from_slice(pattern.as_ref()),
        }
    }

    /// Pattern matching every key
    pub fn any() -> Self {
        Self::new("*")
    }

    /// True when the pattern is a lone `*`
    pub fn matches_everything(&self) -> bool {
        self.pattern.as_ref() == b"*"
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pattern
    }

    /// Match `text` against the whole pattern.
    ///
    /// Iterative with single-star backtracking, so run time is
    /// O(pattern × text) in the worst case.
    pub fn matches(&self, text: &[u8]) -> bool {
        let pattern = self.pattern.as_ref();
        let (mut p, mut t) = (0usize, 0usize);
        let mut star: Option<(usize, usize)> = None;

        while t < text.len() {
            if p < pattern.len() {
                match pattern[p] {
                    b'*' => {
                        star = Some((p, t));
                        p += 1;
                        continue;
                    }
                    b'?' => {
                        p += 1;
                        t += 1;
                        continue;
                    }
                    b'[' => {
                        if let Some((matched, next)) = match_class(pattern, p, text[t]) {
                            if matched {
                                p = next;
                                t += 1;
                                continue;
                            }
                        } else if text[t] == b'[' {
                            // unterminated class: literal '['
                            p += 1;
                            t += 1;
                            continue;
                        }
                    }
                    b'\\' if p + 1 < pattern.len() => {
                        if pattern[p + 1] == text[t] {
                            p += 2;
                            t += 1;
                            continue;
                        }
                    }
                    c => {
                        if c == text[t] {
                            p += 1;
                            t += 1;
                            continue;
                        }
                    }
                }
            }

            // mismatch: let the last star swallow one more byte
            match star {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, star_t + 1));
                }
                None => return false,
            }
        }

        while p < pattern.len() && pattern[p] == b'*' {
            p += 1;
        }
        p == pattern.len()
    }
}

impl From<&str> for GlobPattern {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

/// Match one byte against the class starting at `pattern[start] == b'['`.
///
/// Returns `(matched, index after ']')`, or `None` if the class is unterminated.
fn match_class(pattern: &[u8], start: usize, byte: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = matches!(pattern.get(i), Some(b'^') | Some(b'!'));
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < pattern.len() && (pattern[i] != b']' || first) {
        first = false;
        let mut lo = pattern[i];
        if lo == b'\\' && i + 1 < pattern.len() {
            i += 1;
            lo = pattern[i];
        }

        if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let hi = pattern[i + 2];
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            if (lo..=hi).contains(&byte) {
                matched = true;
            }
            i += 3;
        } else {
            if lo == byte {
                matched = true;
            }
            i += 1;
        }
    }

    if i >= pattern.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}
