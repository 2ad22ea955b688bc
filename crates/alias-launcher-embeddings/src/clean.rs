//! Alias cleaning: recover a literal substring of the user's command from
//! noisy generated text.
//!
//! Generation is steered, not constrained: the model happily continues with
//! dialogue turns, punctuation, or a paraphrase. The cleaner trusts only
//! text that literally occurs in the original command:
//!
//! 1. first line only, truncated at the first dialogue-role marker
//! 2. verbatim hit: the whole line occurs in the command, done
//! 3. unsegmented scripts (Chinese, Korean, ...): longest command substring
//!    that also occurs in the line
//! 4. space-delimited scripts: longest whitespace-token span of the line
//!    that occurs verbatim in the command
//! 5. nothing survives: empty string ("no match", never an error)
//!
//! Pass 3 enumerates all `O(n²)` character substrings of the command. That
//! is fine precisely because commands are short utterances (tens of
//! characters); callers must not route documents through here.

/// Dialogue-role markers that truncate the generated line.
const ROLE_MARKERS: &[&str] = &[
    "Human:",
    "Assistant:",
    "User:",
    "AI:",
    "系统:",
    "用户:",
    "助手:",
];

/// Punctuation and separators stripped from both ends of a result.
const EDGE_TRIM: &[char] = &[' ', '：', ':', '，', ',', '。', '.', '!', '?'];

/// Extract a clean alias from `raw` (generated text after the template
/// marker) by aligning it against `input_text` (the original command).
///
/// Returns an empty string when no literal overlap exists.
pub fn clean_alias(raw: &str, input_text: &str) -> String {
    let mut line = raw.trim().lines().next().unwrap_or("").trim().to_string();

    for marker in ROLE_MARKERS {
        if let Some(pos) = line.find(marker) {
            line = line[..pos].trim().to_string();
        }
    }

    // Whole line already occurs in the command.
    if !line.is_empty() && input_text.contains(line.as_str()) {
        return line.trim_matches(EDGE_TRIM).to_string();
    }

    // Longest command substring that the generated line contains. Candidates
    // are collected in (start, end) order; a stable sort by length keeps the
    // earliest occurrence among equals.
    let chars: Vec<char> = input_text.chars().collect();
    let mut candidates: Vec<String> = Vec::new();
    for i in 0..chars.len() {
        for j in (i + 1)..=chars.len() {
            let phrase: String = chars[i..j].iter().collect();
            let phrase = phrase.trim();
            if !phrase.is_empty() && line.contains(phrase) {
                candidates.push(phrase.to_string());
            }
        }
    }
    if let Some(best) = longest(&candidates) {
        return best.trim_matches(EDGE_TRIM).to_string();
    }

    // Token-span fallback for space-delimited scripts.
    let tokens: Vec<&str> = line.split_whitespace().collect();
    for i in 0..tokens.len() {
        for j in (i + 1)..=tokens.len() {
            let phrase = tokens[i..j].join(" ");
            let phrase = phrase.trim();
            if !phrase.is_empty() && input_text.contains(phrase) {
                candidates.push(phrase.to_string());
            }
        }
    }
    if let Some(best) = longest(&candidates) {
        return best.trim_matches(EDGE_TRIM).to_string();
    }

    String::new()
}

/// Longest candidate by char count, first-collected among ties.
fn longest(candidates: &[String]) -> Option<&String> {
    candidates
        .iter()
        .min_by_key(|c| std::cmp::Reverse(c.chars().count()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsegmented_script_with_dialogue_noise() {
        assert_eq!(clean_alias("微信\nUser: ok", "打开微信"), "微信");
    }

    #[test]
    fn test_space_delimited_verbatim() {
        assert_eq!(clean_alias("kakao talk", "open kakao talk now"), "kakao talk");
    }

    #[test]
    fn test_no_overlap_returns_empty() {
        assert_eq!(clean_alias("notepad", "打开微信"), "");
    }

    #[test]
    fn test_role_marker_truncates_first_line() {
        assert_eq!(
            clean_alias("firefox Assistant: anything else?", "start firefox please"),
            "firefox"
        );
    }

    #[test]
    fn test_trailing_punctuation_stripped() {
        assert_eq!(clean_alias("微信。", "打开微信。"), "微信");
    }

    #[test]
    fn test_longest_overlap_wins() {
        // Both "微" and "微信" overlap; the longer one is kept.
        assert_eq!(clean_alias("帮你打开微信了", "打开微信"), "打开微信");
    }

    #[test]
    fn test_korean_alias() {
        assert_eq!(clean_alias("카카오톡", "카카오톡 열어줘"), "카카오톡");
    }

    #[test]
    fn test_empty_generation() {
        assert_eq!(clean_alias("", "open kakao talk"), "");
        assert_eq!(clean_alias("\n\n", "open kakao talk"), "");
    }

    #[test]
    fn test_multi_word_alias_recovered_from_sentence() {
        // The line is a full sentence, not a substring of the command, but
        // "visual studio code" occurs verbatim in both.
        assert_eq!(
            clean_alias(
                "I think you want visual studio code!",
                "please open visual studio code now"
            ),
            "visual studio code"
        );
    }
}
