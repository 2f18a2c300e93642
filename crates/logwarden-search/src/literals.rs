/// Extraction of obligatory literal tokens from a regex pattern.
///
/// A token is obligatory when every string matching the pattern must contain
/// it, which makes it safe to use as an FTS prefilter before in-process
/// verification. The scan is conservative: anything it cannot prove stays
/// out, and a pattern with top-level alternation yields nothing.

/// Minimum literal length worth sending to the FTS index; shorter tokens
/// match too much to narrow anything.
const MIN_TOKEN_LEN: usize = 3;

pub fn obligatory_literals(pattern: &str) -> Vec<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::new();
    let (found, _) = scan_sequence(&chars, 0, &mut tokens);
    if !found {
        return Vec::new();
    }
    tokens
        .into_iter()
        .filter(|t| t.chars().filter(|c| c.is_alphanumeric()).count() >= MIN_TOKEN_LEN)
        .map(|t| {
            t.chars()
                .map(|c| if c.is_alphanumeric() { c } else { ' ' })
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .collect()
}

/// Scan one alternation-free sequence starting at `pos`; pushes completed
/// literal runs into `tokens`. Returns `(usable, end_pos)` where `usable`
/// is false when a top-level `|` poisons the sequence.
fn scan_sequence(chars: &[char], mut pos: usize, tokens: &mut Vec<String>) -> (bool, usize) {
    let mut run = String::new();
    let mut usable = true;

    macro_rules! flush {
        () => {
            if !run.is_empty() {
                tokens.push(std::mem::take(&mut run));
            }
        };
    }

    while pos < chars.len() {
        match chars[pos] {
            ')' => break,
            '|' => {
                // Alternation: neither branch is obligatory
                usable = false;
                // Consume the remainder of this group without collecting
                pos = skip_to_group_end(chars, pos);
                run.clear();
                continue;
            }
            '(' => {
                flush!();
                let inner_start = skip_group_prefix(chars, pos + 1);
                let mut inner_tokens = Vec::new();
                let (inner_usable, inner_end) = scan_sequence(chars, inner_start, &mut inner_tokens);
                pos = inner_end + 1; // past ')'
                let quantified = is_optional_quantifier(chars, pos);
                if let Some(q_end) = quantifier_end(chars, pos) {
                    pos = q_end;
                }
                if inner_usable && !quantified {
                    tokens.extend(inner_tokens);
                }
            }
            '[' => {
                flush!();
                pos = skip_char_class(chars, pos);
                if let Some(q_end) = quantifier_end(chars, pos) {
                    pos = q_end;
                }
            }
            '\\' => {
                pos += 1;
                if pos >= chars.len() {
                    break;
                }
                let c = chars[pos];
                pos += 1;
                if "dDwWsSbBAz".contains(c) {
                    // Character class escape: breaks the literal run
                    flush!();
                    if let Some(q_end) = quantifier_end(chars, pos) {
                        pos = q_end;
                    }
                } else {
                    push_literal(chars, &mut pos, c, &mut run, tokens);
                }
            }
            '.' | '^' | '$' => {
                flush!();
                pos += 1;
                if let Some(q_end) = quantifier_end(chars, pos) {
                    pos = q_end;
                }
            }
            c => {
                pos += 1;
                push_literal(chars, &mut pos, c, &mut run, tokens);
            }
        }
    }

    flush!();
    (usable, pos)
}

/// Append a literal char, honoring a following quantifier: optional
/// quantifiers remove the char, `+`/`{n,}` keep it but end the run.
fn push_literal(chars: &[char], pos: &mut usize, c: char, run: &mut String, tokens: &mut Vec<String>) {
    if is_optional_quantifier(chars, *pos) {
        // `x?`, `x*`, `x{0,n}`: x is not obligatory
        if !run.is_empty() {
            tokens.push(std::mem::take(run));
        }
        if let Some(q_end) = quantifier_end(chars, *pos) {
            *pos = q_end;
        }
        return;
    }
    if let Some(q_end) = quantifier_end(chars, *pos) {
        // `x+`, `x{2}`: at least one x, then the run must break
        run.push(c);
        tokens.push(std::mem::take(run));
        *pos = q_end;
        return;
    }
    run.push(c);
}

fn is_optional_quantifier(chars: &[char], pos: usize) -> bool {
    match chars.get(pos) {
        Some('?') | Some('*') => true,
        Some('{') => {
            let close = chars[pos..].iter().position(|&c| c == '}');
            match close {
                Some(close) => {
                    let body: String = chars[pos + 1..pos + close].iter().collect();
                    body.split(',').next().map(str::trim) == Some("0")
                }
                None => false,
            }
        }
        _ => false,
    }
}

fn quantifier_end(chars: &[char], pos: usize) -> Option<usize> {
    match chars.get(pos)? {
        '?' | '*' | '+' => {
            // Allow a lazy modifier
            if chars.get(pos + 1) == Some(&'?') {
                Some(pos + 2)
            } else {
                Some(pos + 1)
            }
        }
        '{' => {
            let close = chars[pos..].iter().position(|&c| c == '}')?;
            let end = pos + close + 1;
            if chars.get(end) == Some(&'?') {
                Some(end + 1)
            } else {
                Some(end)
            }
        }
        _ => None,
    }
}

fn skip_group_prefix(chars: &[char], pos: usize) -> usize {
    // Non-capturing and named groups: (?:, (?P<name>, (?<name>
    if chars.get(pos) == Some(&'?') {
        if chars.get(pos + 1) == Some(&':') {
            return pos + 2;
        }
        if let Some(close) = chars[pos..].iter().position(|&c| c == '>') {
            return pos + close + 1;
        }
    }
    pos
}

fn skip_char_class(chars: &[char], mut pos: usize) -> usize {
    pos += 1; // '['
    if chars.get(pos) == Some(&'^') {
        pos += 1;
    }
    if chars.get(pos) == Some(&']') {
        pos += 1; // literal ']' first
    }
    while pos < chars.len() {
        match chars[pos] {
            '\\' => pos += 2,
            ']' => return pos + 1,
            _ => pos += 1,
        }
    }
    pos
}

fn skip_to_group_end(chars: &[char], mut pos: usize) -> usize {
    let mut depth = 0usize;
    while pos < chars.len() {
        match chars[pos] {
            '\\' => pos += 1,
            '(' => depth += 1,
            ')' => {
                if depth == 0 {
                    return pos;
                }
                depth -= 1;
            }
            _ => {}
        }
        pos += 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_words_are_literal() {
        assert_eq!(obligatory_literals("disk failure"), vec!["disk failure"]);
    }

    #[test]
    fn wildcard_splits_tokens() {
        assert_eq!(obligatory_literals("error.*timeout"), vec!["error", "timeout"]);
    }

    #[test]
    fn alternation_in_group_is_skipped_but_rest_kept() {
        assert_eq!(
            obligatory_literals("disk (full|failing) now"),
            vec!["disk", "now"]
        );
    }

    #[test]
    fn top_level_alternation_yields_nothing() {
        assert!(obligatory_literals("error|warning").is_empty());
    }

    #[test]
    fn optional_char_is_dropped() {
        // "colou?r" obliges "colo" and "r"; only "colo" survives length filter
        assert_eq!(obligatory_literals("colou?r"), vec!["colo"]);
    }

    #[test]
    fn plus_keeps_one_occurrence() {
        // "ab" survives the scan but is below the token length floor
        assert_eq!(obligatory_literals("ab+cde"), vec!["cde"]);
        assert_eq!(obligatory_literals("abc+def"), vec!["abc", "def"]);
    }

    #[test]
    fn class_escapes_break_runs() {
        assert_eq!(obligatory_literals(r"user \d+ logged"), vec!["user", "logged"]);
    }

    #[test]
    fn anchors_are_ignored() {
        assert_eq!(obligatory_literals("^started$"), vec!["started"]);
    }

    #[test]
    fn char_class_breaks_runs() {
        assert_eq!(obligatory_literals("log[0-9]rotate"), vec!["log", "rotate"]);
    }

    #[test]
    fn pure_metachar_pattern_yields_nothing() {
        assert!(obligatory_literals(r"\d+\s\w*").is_empty());
        assert!(obligatory_literals(".*").is_empty());
    }

    #[test]
    fn escaped_literal_joins_run() {
        assert_eq!(obligatory_literals(r"a\.b\.com"), vec!["a b com"]);
    }

    #[test]
    fn non_capturing_group_contents_collected() {
        assert_eq!(obligatory_literals("(?:prefix)suffix"), vec!["prefix", "suffix"]);
    }

    #[test]
    fn optional_group_contents_dropped() {
        assert_eq!(obligatory_literals("(maybe)? sure"), vec!["sure"]);
    }
}
