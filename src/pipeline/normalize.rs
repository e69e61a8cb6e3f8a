//! Text normalization shared by recorded text and page text.
//!
//! Recorded text comes from the device's own text extraction; page text
//! comes from the PDF's glyph stream. The two disagree in predictable ways,
//! and matching only works when both sides go through the exact same rules:
//!
//! | # | Rule | Example |
//! |---|------|---------|
//! | 1 | Expand ligature glyphs | `ﬁle` → `file` |
//! | 2 | Join end-of-line hyphenation | `hyphen-\nation` → `hyphenation` |
//! | 3 | Drop soft hyphens (a real hyphen before one survives) | `co\u{ad}op` → `coop` |
//! | 4 | Collapse whitespace runs to one space, trim | `a \n  b` → `a b` |
//! | 5 | Space after a period glued to a capital or digit | `ch.4` → `ch. 4` |
//!
//! The rules are idempotent: normalizing twice equals normalizing once.
//!
//! Page text is normalized with [`normalize_traced`], which remembers, for
//! every output character, the glyph it came from. That trace is what turns
//! a matched character range back into glyph boxes.

/// Normalized text plus, per character, the index of the source glyph it
/// came from (`None` for inserted characters).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TracedText {
    pub chars: Vec<char>,
    pub origins: Vec<Option<usize>>,
}

impl TracedText {
    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }
}

/// Normalize a string.
pub fn normalize(s: &str) -> String {
    normalize_traced(s.chars().map(|c| (c, None))).text()
}

/// Normalize a character stream, carrying each character's origin through
/// every rule.
pub fn normalize_traced(input: impl IntoIterator<Item = (char, Option<usize>)>) -> TracedText {
    let expanded = expand_ligatures(input);
    let joined = join_hyphenation(&expanded);
    let collapsed = collapse_whitespace(&joined);
    let spaced = space_after_period(&collapsed);
    let (chars, origins) = spaced.into_iter().unzip();
    TracedText { chars, origins }
}

type Traced = Vec<(char, Option<usize>)>;

const SOFT_HYPHEN: char = '\u{ad}';

/// Base letters for a ligature glyph.
fn ligature(c: char) -> Option<&'static str> {
    Some(match c {
        'ﬀ' => "ff",
        'ﬁ' => "fi",
        'ﬂ' => "fl",
        'ﬃ' => "ffi",
        'ﬄ' => "ffl",
        'ﬅ' | 'ﬆ' => "st",
        'æ' => "ae",
        'Æ' => "AE",
        'œ' => "oe",
        'Œ' => "OE",
        _ => return None,
    })
}

// ── Rule 1 ───────────────────────────────────────────────────────────────

fn expand_ligatures(input: impl IntoIterator<Item = (char, Option<usize>)>) -> Traced {
    let mut out = Traced::new();
    for (c, origin) in input {
        match ligature(c) {
            Some(base) => out.extend(base.chars().map(|b| (b, origin))),
            None => out.push((c, origin)),
        }
    }
    out
}

// ── Rules 2 + 3 ──────────────────────────────────────────────────────────

fn is_line_break(c: char) -> bool {
    c == '\n' || c == '\r'
}

/// If a line break (optionally preceded by blanks) starts at `i`, return the
/// index just past the break and any blanks that follow it.
fn skip_line_break(chars: &[(char, Option<usize>)], mut i: usize) -> Option<usize> {
    while i < chars.len() && chars[i].0.is_whitespace() && !is_line_break(chars[i].0) {
        i += 1;
    }
    if i >= chars.len() || !is_line_break(chars[i].0) {
        return None;
    }
    while i < chars.len() && chars[i].0.is_whitespace() {
        i += 1;
    }
    Some(i)
}

fn join_hyphenation(chars: &[(char, Option<usize>)]) -> Traced {
    let mut out = Traced::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        let (c, origin) = chars[i];
        match c {
            '-' => {
                let soft = chars.get(i + 1).is_some_and(|n| n.0 == SOFT_HYPHEN);
                let after = if soft { i + 2 } else { i + 1 };
                match skip_line_break(chars, after) {
                    // "-<soft>\n" keeps the real hyphen; "-\n" is a join.
                    Some(next) => {
                        if soft {
                            out.push((c, origin));
                        }
                        i = next;
                    }
                    None => {
                        out.push((c, origin));
                        i = after;
                    }
                }
            }
            SOFT_HYPHEN => {
                i = skip_line_break(chars, i + 1).unwrap_or(i + 1);
            }
            _ => {
                out.push((c, origin));
                i += 1;
            }
        }
    }
    out
}

// ── Rule 4 ───────────────────────────────────────────────────────────────

fn collapse_whitespace(chars: &[(char, Option<usize>)]) -> Traced {
    let mut out = Traced::with_capacity(chars.len());
    let mut pending: Option<Option<usize>> = None;
    for &(c, origin) in chars {
        if c.is_whitespace() {
            if pending.is_none() {
                pending = Some(origin);
            }
            continue;
        }
        if let Some(space_origin) = pending.take() {
            if !out.is_empty() {
                out.push((' ', space_origin));
            }
        }
        out.push((c, origin));
    }
    out
}

// ── Rule 5 ───────────────────────────────────────────────────────────────

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn space_after_period(chars: &[(char, Option<usize>)]) -> Traced {
    let mut out = Traced::with_capacity(chars.len() + 8);
    for (i, &(c, origin)) in chars.iter().enumerate() {
        out.push((c, origin));
        if c == '.' && i > 0 && is_word_char(chars[i - 1].0) {
            if let Some(&(next, _)) = chars.get(i + 1) {
                if next.is_uppercase() || next.is_ascii_digit() {
                    out.push((' ', None));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ligatures() {
        assert_eq!(normalize("ﬁle"), "file");
        assert_eq!(normalize("ﬂow ﬀ ﬃ ﬄ ﬅ ﬆ"), "flow ff ffi ffl st st");
        assert_eq!(normalize("Æsop's œuvre Œ æ"), "AEsop's oeuvre OE ae");
    }

    #[test]
    fn period_spacing() {
        assert_eq!(normalize("ch.4"), "ch. 4");
        assert_eq!(normalize("end.Next"), "end. Next");
        assert_eq!(normalize("end. Next"), "end. Next");
        assert_eq!(normalize("e.g. lower"), "e.g. lower");
        assert_eq!(normalize("... Next"), "... Next");
    }

    #[test]
    fn hyphen_joins() {
        assert_eq!(normalize("hyphen-\nation"), "hyphenation");
        assert_eq!(normalize("hyphen- \r\n  ation"), "hyphenation");
        assert_eq!(normalize("well-\u{ad}\nknown"), "well-known");
        assert_eq!(normalize("co\u{ad}op"), "coop");
        assert_eq!(normalize("co\u{ad}\nop"), "coop");
        assert_eq!(normalize("well-known"), "well-known");
        assert_eq!(normalize("a - b"), "a - b");
    }

    #[test]
    fn whitespace() {
        assert_eq!(normalize("  The\tquick \n\n brown  "), "The quick brown");
        assert_eq!(normalize("non\u{a0}breaking"), "non breaking");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn idempotent() {
        for s in [
            "ﬁle ch.4 The.End",
            "hyphen-\nation  x",
            "well-\u{ad}\nknown   A.B.C",
            "  \n ",
            "3.14.15",
        ] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "input {s:?}");
        }
    }

    #[test]
    fn origins_follow_glyphs() {
        // glyphs: 'ﬁ'(0) 'n'(1) '\n'(None) 'e'(2)
        let t = normalize_traced(vec![('ﬁ', Some(0)), ('n', Some(1)), ('\n', None), ('e', Some(2))]);
        assert_eq!(t.text(), "fin e");
        assert_eq!(t.origins, vec![Some(0), Some(0), Some(1), None, Some(2)]);
    }
}
