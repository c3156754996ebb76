//! 内容过滤
//!
//! 过滤器是注入的协作者，契约是纯函数 clean(text) -> text：
//! 改写命中的词而不是拒绝整条消息，消息照常投递。

use std::collections::HashSet;

/// 内容过滤接口
pub trait ContentFilter: Send + Sync {
    /// 返回清洗后的文本；不命中时原样返回。
    fn clean(&self, text: &str) -> String;
}

/// 基于词表的过滤器，命中的词整词替换为等长的星号。
/// 匹配不区分大小写，按字母数字边界分词。
pub struct WordListFilter {
    words: HashSet<String>,
}

impl WordListFilter {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            words: words
                .into_iter()
                .map(|w| w.into().to_lowercase())
                .collect(),
        }
    }

    /// 默认内置词表
    pub fn with_default_words() -> Self {
        Self::new(["damn", "hell", "crap", "ass", "bastard", "shit", "fuck"])
    }
}

impl ContentFilter for WordListFilter {
    fn clean(&self, text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        let mut word = String::new();

        for c in text.chars() {
            if c.is_alphanumeric() {
                word.push(c);
            } else {
                flush_word(&mut result, &mut word, &self.words);
                result.push(c);
            }
        }
        flush_word(&mut result, &mut word, &self.words);
        result
    }
}

fn flush_word(result: &mut String, word: &mut String, blocked: &HashSet<String>) {
    if word.is_empty() {
        return;
    }
    if blocked.contains(&word.to_lowercase()) {
        result.extend(std::iter::repeat('*').take(word.chars().count()));
    } else {
        result.push_str(word);
    }
    word.clear();
}

/// 空过滤器，测试里需要原文直达时使用。
pub struct NoopFilter;

impl ContentFilter for NoopFilter {
    fn clean(&self, text: &str) -> String {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_blocked_words() {
        let filter = WordListFilter::new(["damn"]);
        assert_eq!(filter.clean("damn it"), "**** it");
        assert_eq!(filter.clean("well DAMN!"), "well ****!");
    }

    #[test]
    fn whole_words_only() {
        let filter = WordListFilter::new(["ass"]);
        // 子串不命中
        assert_eq!(filter.clean("assassin class"), "assassin class");
        assert_eq!(filter.clean("you ass"), "you ***");
    }

    #[test]
    fn clean_text_passes_through() {
        let filter = WordListFilter::with_default_words();
        assert_eq!(filter.clean("hello world"), "hello world");
        assert_eq!(filter.clean(""), "");
    }

    #[test]
    fn preserves_punctuation_and_spacing() {
        let filter = WordListFilter::new(["crap"]);
        assert_eq!(filter.clean("crap, crap... crap"), "****, ****... ****");
    }
}
