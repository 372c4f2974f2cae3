/// Redis-style glob matching over raw bytes.
///
/// Supports `*`, `?`, `[...]`, `[^...]`, ranges like `[a-z]` (in either
/// order) and `\` escapes both outside and inside character classes. An
/// unterminated `[` class runs to the end of the pattern.
pub fn glob_match(pattern: &[u8], string: &[u8]) -> bool {
    let mut p = 0;
    let mut s = 0;
    // (pattern index after the last `*`, string index it is currently matched up to)
    let mut backtrack: Option<(usize, usize)> = None;

    loop {
        let step = if s < string.len() {
            match_one(pattern, p, string[s])
        } else {
            Step::Mismatch
        };

        match step {
            Step::Consumed(next_p) => {
                p = next_p;
                s += 1;
                continue;
            }
            Step::Star => {
                // 连续的 * 等价于一个
                while p < pattern.len() && pattern[p] == b'*' {
                    p += 1;
                }
                backtrack = Some((p, s));
                continue;
            }
            Step::Mismatch => {}
        }

        if s == string.len() {
            while p < pattern.len() && pattern[p] == b'*' {
                p += 1;
            }
            if p == pattern.len() {
                return true;
            }
        }

        match backtrack {
            Some((star_p, star_s)) if star_s < string.len() => {
                p = star_p;
                s = star_s + 1;
                backtrack = Some((star_p, s));
            }
            _ => return false,
        }
    }
}

enum Step {
    Consumed(usize),
    Star,
    Mismatch,
}

fn match_one(pattern: &[u8], p: usize, c: u8) -> Step {
    let Some(&pc) = pattern.get(p) else {
        return Step::Mismatch;
    };
    match pc {
        b'*' => Step::Star,
        b'?' => Step::Consumed(p + 1),
        b'[' => match match_class(pattern, p + 1, c) {
            (true, next) => Step::Consumed(next),
            (false, _) => Step::Mismatch,
        },
        b'\\' if p + 1 < pattern.len() => {
            if pattern[p + 1] == c {
                Step::Consumed(p + 2)
            } else {
                Step::Mismatch
            }
        }
        _ if pc == c => Step::Consumed(p + 1),
        _ => Step::Mismatch,
    }
}

/// Matches `c` against the class starting right after `[`.
/// Returns whether it matched and the pattern index following the class.
fn match_class(pattern: &[u8], mut p: usize, c: u8) -> (bool, usize) {
    let negate = pattern.get(p) == Some(&b'^');
    if negate {
        p += 1;
    }
    let mut matched = false;
    while p < pattern.len() {
        let pc = pattern[p];
        if pc == b'\\' && p + 1 < pattern.len() {
            if pattern[p + 1] == c {
                matched = true;
            }
            p += 2;
        } else if pc == b']' {
            p += 1;
            return (matched != negate, p);
        } else if p + 2 < pattern.len() && pattern[p + 1] == b'-' {
            let (mut lo, mut hi) = (pc, pattern[p + 2]);
            if lo > hi {
                std::mem::swap(&mut lo, &mut hi);
            }
            if c >= lo && c <= hi {
                matched = true;
            }
            p += 3;
        } else {
            if pc == c {
                matched = true;
            }
            p += 1;
        }
    }
    (matched != negate, p)
}
