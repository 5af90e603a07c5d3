//! Splits assistant content into plain and thinking segments.
//!
//! Thinking regions are delimited by literal `<think>` / `</think>` tags and
//! may not nest. The parser is pure and re-runs on every chunk of a growing
//! buffer; segments marked complete never change text or position when more
//! input arrives, so the rendered transcript stays visually stable mid-stream.

/// Kind of a content segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    Plain,
    Thinking,
}

/// One span of assistant content.
///
/// `complete` records whether the segment's terminator was observed: the
/// opening tag of the next region for plain text, the closing tag for a
/// thinking region. The final segment of a still-growing buffer is
/// incomplete; an incomplete thinking segment renders inline instead of
/// collapsibly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub text: String,
    pub complete: bool,
}

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

/// Parse content into an ordered list of segments. Empty segments are elided.
pub fn parse_think_segments(content: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = content;

    loop {
        match rest.find(THINK_OPEN) {
            Some(open) => {
                let plain = &rest[..open];
                if !plain.is_empty() {
                    segments.push(Segment {
                        kind: SegmentKind::Plain,
                        text: plain.to_string(),
                        complete: true,
                    });
                }
                let after_open = &rest[open + THINK_OPEN.len()..];
                match after_open.find(THINK_CLOSE) {
                    Some(close) => {
                        let inner = &after_open[..close];
                        if !inner.is_empty() {
                            segments.push(Segment {
                                kind: SegmentKind::Thinking,
                                text: inner.to_string(),
                                complete: true,
                            });
                        }
                        rest = &after_open[close + THINK_CLOSE.len()..];
                    }
                    None => {
                        // Opener seen, closer not yet: the stream ends inside
                        // a thinking region.
                        if !after_open.is_empty() {
                            segments.push(Segment {
                                kind: SegmentKind::Thinking,
                                text: after_open.to_string(),
                                complete: false,
                            });
                        }
                        return segments;
                    }
                }
            }
            None => {
                if !rest.is_empty() {
                    segments.push(Segment {
                        kind: SegmentKind::Plain,
                        text: rest.to_string(),
                        complete: false,
                    });
                }
                return segments;
            }
        }
    }
}
