pub mod checker;
pub mod differ;
pub mod error;
pub mod fmp4;
pub mod loader;
pub mod looper;
pub mod metrics;
pub mod mpd;
pub mod recording;
pub mod replay;
pub mod report;
pub mod server;
pub mod splice;
pub mod storage;
pub mod timing;

pub use checker::{CheckerConfig, FetchMode, SegmentInfo, StreamChecker};
pub use error::{ReliveError, ReliveResult};
pub use looper::StreamLooper;
pub use replay::StreamReplay;
