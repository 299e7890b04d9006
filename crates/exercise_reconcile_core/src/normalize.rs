/// Comparison key for exercise names.
///
/// Lowercases, drops bracketed qualifiers such as `(v2 dupe)` or `[female]`,
/// collapses runs of whitespace and trims. Unbalanced closing brackets are
/// kept as text; an unclosed opening bracket drops the rest of the string.
pub fn normalize_name(value: &str) -> String {
    let mut stripped = String::with_capacity(value.len());
    let mut depth = 0usize;
    for ch in value.chars() {
        match ch {
            '(' | '[' | '{' => {
                depth += 1;
                stripped.push(' ');
            }
            ')' | ']' | '}' if depth > 0 => {
                depth -= 1;
                stripped.push(' ');
            }
            _ if depth > 0 => {}
            _ => stripped.extend(ch.to_lowercase()),
        }
    }

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::normalize_name;

    #[test]
    fn lowercases_and_collapses_whitespace() {
        assert_eq!(normalize_name("  Barbell   Glute\tBridge "), "barbell glute bridge");
    }

    #[test]
    fn strips_parenthetical_and_bracketed_qualifiers() {
        assert_eq!(normalize_name("Hip Thrust (v2 dupe)"), "hip thrust");
        assert_eq!(normalize_name("Squat [female] (alt)"), "squat");
        assert_eq!(normalize_name("Push (wide (very)) Up"), "push up");
    }

    #[test]
    fn qualifier_between_words_keeps_word_boundary() {
        assert_eq!(normalize_name("Cable(rope)Curl"), "cable curl");
    }

    #[test]
    fn unbalanced_brackets_are_total() {
        assert_eq!(normalize_name("Lunge)"), "lunge)");
        assert_eq!(normalize_name("Lunge (walking"), "lunge");
        assert_eq!(normalize_name(""), "");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_name("Dumbbell  Row (Single Arm)");
        assert_eq!(normalize_name(&once), once);
    }
}
