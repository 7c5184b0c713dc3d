//! Reply-body cleanup.
//!
//! Mail clients quote the entire prior thread below a reply. Merged into a
//! personalization profile verbatim, that quoted text would feed the
//! assistant's own prior output back into itself, so quoted runs, their
//! attribution line, and trailing signature blocks are stripped before any
//! state changes. A result that is empty after cleaning is a no-op for the
//! caller, not a validation failure: retried deliveries of a blank reply
//! must look identical to "nothing to do".

use std::sync::OnceLock;

use regex::Regex;

/// `On Mon, 3 Feb 2026 at 09:12, Someone <a@x> wrote:` on a single line.
fn attribution_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^On\s.+wrote:$").expect("attribution regex"))
}

/// Clean a raw reply body down to the user's own words. Returns `None` when
/// nothing remains. Idempotent: cleaning already-clean text is a no-op.
pub fn normalize_feedback(raw: &str) -> Option<String> {
    let lines: Vec<&str> = raw.lines().collect();

    // A signature separator ends the usable body; everything after is the
    // client's boilerplate.
    let body_end = lines
        .iter()
        .position(|line| is_signature_separator(line))
        .unwrap_or(lines.len());
    let lines = &lines[..body_end];

    let mut drop = vec![false; lines.len()];
    for (index, line) in lines.iter().enumerate() {
        if is_quoted(line) {
            drop[index] = true;
        }
    }

    // Attribution lines directly above each quoted run go with the quote.
    let run_starts: Vec<usize> = (0..lines.len())
        .filter(|&index| drop[index] && (index == 0 || !drop[index - 1]))
        .collect();
    for start in run_starts {
        let mut above = start;
        let mut blanks = Vec::new();
        while above > 0 && lines[above - 1].trim().is_empty() {
            above -= 1;
            blanks.push(above);
        }
        if above == 0 {
            continue;
        }
        let candidate = lines[above - 1].trim();
        if !candidate.ends_with("wrote:") {
            continue;
        }
        drop[above - 1] = true;
        for blank in blanks {
            drop[blank] = true;
        }
        // Wrapped attribution: the `On ...` half may sit one line higher.
        if !attribution_regex().is_match(candidate)
            && above >= 2
            && lines[above - 2].trim_start().starts_with("On ")
        {
            drop[above - 2] = true;
        }
    }

    let kept: Vec<&str> = lines
        .iter()
        .enumerate()
        .filter(|(index, _)| !drop[*index])
        .map(|(_, line)| *line)
        .collect();
    let cleaned = kept.join("\n").trim().to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn is_quoted(line: &str) -> bool {
    line.trim_start().starts_with('>')
}

fn is_signature_separator(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= 2 && trimmed.chars().all(|ch| ch == '-')
}
