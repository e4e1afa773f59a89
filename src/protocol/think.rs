use std::sync::LazyLock;

use memchr::{memmem, memrchr};

use crate::protocol::anthropic::ContentBlock;

pub(crate) const THINK_OPEN: &str = "<think>";
pub(crate) const THINK_CLOSE: &str = "</think>";

/// Lookback window for the safe-prefix rule. Must be at least as long as
/// the longest tag so a tag split across chunks is always held back.
const SAFE_PREFIX_WINDOW: usize = 20;

static OPEN_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(THINK_OPEN.as_bytes()));
static CLOSE_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(THINK_CLOSE.as_bytes()));

/// Position of the earliest think tag in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TagHit {
    Open(usize),
    Close(usize),
}

/// Find the earliest `<think>` or `</think>` occurrence.
pub(crate) fn find_first_tag(buf: &str) -> Option<TagHit> {
    let bytes = buf.as_bytes();
    match (OPEN_FINDER.find(bytes), CLOSE_FINDER.find(bytes)) {
        (Some(open), Some(close)) => {
            if open < close {
                Some(TagHit::Open(open))
            } else {
                Some(TagHit::Close(close))
            }
        }
        (Some(open), None) => Some(TagHit::Open(open)),
        (None, Some(close)) => Some(TagHit::Close(close)),
        (None, None) => None,
    }
}

/// Length of the longest prefix of `buf` that cannot be part of an
/// in-progress tag.
///
/// Within the trailing [`SAFE_PREFIX_WINDOW`] bytes, everything from the
/// last `<` on could still become `<think>` or `</think>` once more
/// bytes arrive, so it is held back. `<` is ASCII, so the returned
/// length always falls on a char boundary.
pub(crate) fn safe_prefix_len(buf: &str) -> usize {
    let bytes = buf.as_bytes();
    if bytes.len() > SAFE_PREFIX_WINDOW {
        let window_start = bytes.len() - SAFE_PREFIX_WINDOW;
        match memrchr(b'<', &bytes[window_start..]) {
            Some(pos) => window_start + pos,
            None => bytes.len(),
        }
    } else {
        memrchr(b'<', bytes).unwrap_or(bytes.len())
    }
}

/// Split text containing inline `<think>…</think>` spans into ordered
/// content blocks, for the non-streaming assembler.
///
/// The prefix before the first `<think>` becomes a text block; each
/// balanced span becomes a thinking block followed by a text block when
/// trailing text exists; an unclosed `<think>` turns the remainder into
/// a thinking block.
pub(crate) fn split_think_blocks(raw: &str) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();

    for (i, part) in raw.split(THINK_OPEN).enumerate() {
        if i == 0 {
            if !part.is_empty() {
                blocks.push(ContentBlock::Text {
                    text: part.to_string(),
                });
            }
            continue;
        }

        let mut segments = part.splitn(2, THINK_CLOSE);
        let thinking = segments.next().unwrap_or("");
        match segments.next() {
            Some(trailing) if !trailing.contains(THINK_CLOSE) => {
                blocks.push(ContentBlock::Thinking {
                    thinking: thinking.to_string(),
                });
                if !trailing.is_empty() {
                    blocks.push(ContentBlock::Text {
                        text: trailing.to_string(),
                    });
                }
            }
            // Unclosed span, or malformed nesting: keep the raw part as
            // thinking rather than dropping bytes.
            _ => {
                blocks.push(ContentBlock::Thinking {
                    thinking: part.to_string(),
                });
            }
        }
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_first_tag_orders_hits() {
        assert_eq!(find_first_tag("abc"), None);
        assert_eq!(find_first_tag("a<think>b"), Some(TagHit::Open(1)));
        assert_eq!(find_first_tag("a</think>b"), Some(TagHit::Close(1)));
        assert_eq!(
            find_first_tag("x</think>y<think>z"),
            Some(TagHit::Close(1))
        );
        assert_eq!(find_first_tag("<think></think>"), Some(TagHit::Open(0)));
    }

    #[test]
    fn test_safe_prefix_whole_buffer_without_angle() {
        assert_eq!(safe_prefix_len("hello world"), 11);
    }

    #[test]
    fn test_safe_prefix_holds_back_partial_tag() {
        assert_eq!(safe_prefix_len("hello <thi"), 6);
        assert_eq!(safe_prefix_len("<"), 0);
    }

    #[test]
    fn test_safe_prefix_ignores_angle_outside_window() {
        // The `<` sits more than 20 bytes from the end, so it can no
        // longer be a tag in progress.
        let buf = format!("<{}", "a".repeat(25));
        assert_eq!(safe_prefix_len(&buf), buf.len());
    }

    #[test]
    fn test_safe_prefix_finds_last_angle_in_window() {
        let buf = format!("{}<th", "a".repeat(30));
        assert_eq!(safe_prefix_len(&buf), 30);
    }

    #[test]
    fn test_split_plain_text() {
        assert_eq!(
            split_think_blocks("hello"),
            vec![ContentBlock::Text {
                text: "hello".into()
            }]
        );
    }

    #[test]
    fn test_split_balanced_span() {
        assert_eq!(
            split_think_blocks("pre<think>deep</think>post"),
            vec![
                ContentBlock::Text { text: "pre".into() },
                ContentBlock::Thinking {
                    thinking: "deep".into()
                },
                ContentBlock::Text {
                    text: "post".into()
                },
            ]
        );
    }

    #[test]
    fn test_split_leading_span_without_trailing_text() {
        assert_eq!(
            split_think_blocks("<think>only</think>"),
            vec![ContentBlock::Thinking {
                thinking: "only".into()
            }]
        );
    }

    #[test]
    fn test_split_unclosed_span_becomes_thinking() {
        assert_eq!(
            split_think_blocks("pre<think>unclosed"),
            vec![
                ContentBlock::Text { text: "pre".into() },
                ContentBlock::Thinking {
                    thinking: "unclosed".into()
                },
            ]
        );
    }

    #[test]
    fn test_split_multiple_spans() {
        assert_eq!(
            split_think_blocks("<think>a</think>mid<think>b</think>end"),
            vec![
                ContentBlock::Thinking {
                    thinking: "a".into()
                },
                ContentBlock::Text { text: "mid".into() },
                ContentBlock::Thinking {
                    thinking: "b".into()
                },
                ContentBlock::Text { text: "end".into() },
            ]
        );
    }

    #[test]
    fn test_split_empty_input_yields_nothing() {
        assert!(split_think_blocks("").is_empty());
    }
}
