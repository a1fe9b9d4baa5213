//! Reply segmentation and pacing.
//!
//! Long replies are cut at sentence and clause punctuation and delivered as
//! several short messages with a human-like pause between them. The split
//! marks themselves are dropped; `~` and `…` are kept.

use rand::Rng;
use std::time::Duration;

/// Replies up to this many characters are always sent whole.
pub const SEGMENT_THRESHOLD: usize = 30;

/// Punctuation that ends a segment. Newline also splits.
const SPLIT_MARKS: &[char] = &[
    '。', '！', '？', '!', '?', '，', ',', '；', ';', '：', ':', '、',
];

fn is_split_mark(c: char) -> bool {
    SPLIT_MARKS.contains(&c)
}

/// Split `text` at punctuation and newlines, dropping the marks and any
/// empty pieces.
pub fn split_into_segments(text: &str) -> Vec<String> {
    text.split(|c: char| is_split_mark(c) || c == '\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Remove split punctuation from `text`, keeping line breaks.
///
/// Falls back to the input when nothing but punctuation is left, so a reply
/// is never turned into an empty message.
pub fn strip_punctuation(text: &str) -> String {
    let stripped: String = text.chars().filter(|c| !is_split_mark(*c)).collect();
    let stripped = stripped.trim();
    if stripped.is_empty() {
        text.trim().to_string()
    } else {
        stripped.to_string()
    }
}

/// Messages to send for one reply, in order.
pub fn plan(reply: &str, enable_stream: bool) -> Vec<String> {
    if !enable_stream || reply.chars().count() <= SEGMENT_THRESHOLD {
        return vec![strip_punctuation(reply)];
    }

    let segments = split_into_segments(reply);
    if segments.len() <= 1 {
        vec![strip_punctuation(reply)]
    } else {
        segments
    }
}

/// Delay range between consecutive segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    min: Duration,
    max: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self::between(Duration::from_millis(800), Duration::from_millis(1200))
    }
}

impl Pacing {
    /// Uniform delay in `[min, max]`. Bounds are reordered if reversed.
    pub fn between(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// No delay.
    pub fn none() -> Self {
        Self::between(Duration::ZERO, Duration::ZERO)
    }

    /// Draw the next delay.
    pub fn next_delay(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_sentences_and_drops_marks() {
        assert_eq!(
            split_into_segments("今天天气很好。你吃饭了吗？太好了！"),
            ["今天天气很好", "你吃饭了吗", "太好了"]
        );
    }

    #[test]
    fn splits_on_newline_and_ascii_marks() {
        assert_eq!(
            split_into_segments("first line\nsecond, third; fourth:fifth"),
            ["first line", "second", "third", "fourth", "fifth"]
        );
    }

    #[test]
    fn keeps_tilde_and_ellipsis() {
        assert_eq!(
            split_into_segments("好呀~我想想……，嗯"),
            ["好呀~我想想……", "嗯"]
        );
    }

    #[test]
    fn ascii_period_does_not_split() {
        assert_eq!(
            split_into_segments("版本是3.5，文件叫a.html。好的"),
            ["版本是3.5", "文件叫a.html", "好的"]
        );
    }

    #[test]
    fn consecutive_marks_produce_no_empty_segments() {
        assert_eq!(split_into_segments("啊！！！？？真的吗"), ["啊", "真的吗"]);
        assert!(split_into_segments("。。。").is_empty());
    }

    #[test]
    fn short_reply_is_one_stripped_message() {
        for stream in [true, false] {
            assert_eq!(plan("好", stream), ["好"]);
            assert_eq!(plan("好的，我知道了！", stream), ["好的我知道了"]);
        }
    }

    #[test]
    fn long_reply_is_segmented_when_streaming() {
        let reply = "这是一个很长的回复，里面有好几个分句。第二句话也不算短吧！最后再补充一点内容？";
        assert!(reply.chars().count() > SEGMENT_THRESHOLD);

        assert_eq!(
            plan(reply, true),
            [
                "这是一个很长的回复",
                "里面有好几个分句",
                "第二句话也不算短吧",
                "最后再补充一点内容"
            ]
        );
        assert_eq!(
            plan(reply, false),
            ["这是一个很长的回复里面有好几个分句第二句话也不算短吧最后再补充一点内容"]
        );
    }

    #[test]
    fn long_reply_without_marks_is_sent_whole() {
        let reply = "没有任何标点的一段很长很长很长很长很长很长很长很长很长的文字内容";
        assert!(reply.chars().count() > SEGMENT_THRESHOLD);
        assert_eq!(plan(reply, true), [reply]);
    }

    #[test]
    fn threshold_counts_characters_not_bytes() {
        let reply = "一二三四五，六七八九十。".repeat(3);
        assert_eq!(reply.chars().count(), 36);
        assert_eq!(plan(&reply, true).len(), 6);

        // 66 bytes, 22 characters.
        let reply = "一二三四，五六七八九。".repeat(2);
        assert_eq!(plan(&reply, true).len(), 1);
    }

    #[test]
    fn punctuation_only_reply_is_not_emptied() {
        assert_eq!(strip_punctuation("？"), "？");
        assert_eq!(plan("！！", true), ["！！"]);
    }

    #[test]
    fn pacing_stays_in_range() {
        let pacing = Pacing::default();
        for _ in 0..100 {
            let delay = pacing.next_delay();
            assert!(delay >= Duration::from_millis(800));
            assert!(delay <= Duration::from_millis(1200));
        }
        assert_eq!(Pacing::none().next_delay(), Duration::ZERO);
    }
}
