/// Token estimate used for budgets and usage accounting: one token per
/// unicode scalar value.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count()
}

/// Keeps the first and last `budget / 2` runes joined by `...` when `text`
/// is longer than `budget`.
pub fn truncate_middle(text: &str, budget: usize) -> String {
    let runes: Vec<char> = text.chars().collect();
    if runes.len() <= budget {
        return text.to_string();
    }
    let half = budget / 2;
    let mut out: String = runes[..half].iter().collect();
    out.push_str("...");
    out.extend(&runes[runes.len() - half..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_runes_not_bytes() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("héllo"), 5);
        assert_eq!(estimate_tokens("你好世界"), 4);
    }

    #[test]
    fn truncates_to_head_and_tail() {
        let text = "abcdefghijklmnopqrstuvwxyz0123";
        assert_eq!(truncate_middle(text, 10), "abcde...z0123");
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_middle("short", 10), "short");
        assert_eq!(truncate_middle("你好世界", 4), "你好世界");
        assert_eq!(truncate_middle("你好世界啊", 4), "你好...界啊");
    }
}
