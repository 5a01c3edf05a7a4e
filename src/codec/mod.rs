//! Wire-format codecs: yEnc article bodies and NZB XML documents.

pub mod nzb;
pub mod yenc;

pub use nzb::{Nzb, NzbFile, Segment};
pub use yenc::{decode, YencHeader};
