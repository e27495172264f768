/// Single-line preview of at most `max_chars` characters, with an ellipsis when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        return flat.to_string();
    }
    let mut out: String = flat.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_flattens_and_cuts() {
        assert_eq!(preview("line one\nline two", 100), "line one line two");
        assert_eq!(preview("abcdef", 3), "abc…");
        assert_eq!(preview("  \n", 10), "");
    }
}
