pub mod think_parser;

pub use think_parser::{parse_think_segments, Segment, SegmentKind};
