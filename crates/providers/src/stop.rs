//! Stop-sequence handling for backends that don't enforce it server-side.

/// Cut `text` at the earliest occurrence of any stop sequence.
///
/// Returns the kept prefix and whether a stop sequence was hit.
pub fn truncate_at_stop<'a>(text: &'a str, stop: &[String]) -> (&'a str, bool) {
    let cut = stop
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min();
    match cut {
        Some(idx) => (&text[..idx], true),
        None => (text, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cuts_at_earliest_stop() {
        let stops = vec!["\nObservation".to_string(), "\nQuestion".to_string()];
        let text = "Action: get_current_date\nAction Input: \nQuestion: x\nObservation: y";
        let (kept, hit) = truncate_at_stop(text, &stops);
        assert!(hit);
        assert_eq!(kept, "Action: get_current_date\nAction Input: ");
    }

    #[test]
    fn untouched_without_match() {
        let stops = vec!["\nObservation".to_string()];
        let (kept, hit) = truncate_at_stop("Final Answer: 42", &stops);
        assert!(!hit);
        assert_eq!(kept, "Final Answer: 42");
    }

    #[test]
    fn empty_stop_strings_are_ignored() {
        let (kept, hit) = truncate_at_stop("abc", &[String::new()]);
        assert!(!hit);
        assert_eq!(kept, "abc");
    }
}
