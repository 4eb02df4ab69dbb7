//! # Greedy CTC Collapse
//!
//! Turns a per-timestep symbol sequence (blanks included) into the final
//! predicted string.

/// Collapses a raw per-timestep symbol sequence.
///
/// A symbol is kept when it is not the blank and differs from its successor,
/// so every run contributes its last occurrence once and blanks vanish. The
/// final timestep has no successor and is therefore handled separately: it is
/// appended when it is not the blank and differs from the last kept symbol.
/// When the pair walk keeps nothing the result is empty, whatever the final
/// timestep holds.
pub fn collapse(raw: &[char], blank: char) -> String {
    let mut out: String = raw
        .windows(2)
        .filter(|pair| pair[0] != blank && pair[0] != pair[1])
        .map(|pair| pair[0])
        .collect();

    if out.is_empty() {
        return out;
    }

    if let Some(&last) = raw.last() {
        if last != blank && out.chars().last() != Some(last) {
            out.push(last);
        }
    }

    out
}
