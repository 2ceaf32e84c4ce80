use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReliveError {
    #[error("HTTP status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("no MediaUrl in session response")]
    MissingMediaUrl,

    #[error("segment fetch queue full")]
    QueueFull,

    #[error("timeline gap of {gap} ticks appending at {end}")]
    NonContiguous { gap: i64, end: i64 },

    #[error("manifest has no periods")]
    NoPeriods,

    #[error("no reference period with a segment template found")]
    NoReferencePeriod,

    #[error("multi-period recordings are not supported")]
    MultiPeriod,

    #[error("not enough manifests in archive: {0}")]
    NotEnoughManifests(usize),

    #[error("no manifest in history for the requested time")]
    NoHistory,

    #[error("cannot create dump directory below {0}")]
    DumpDir(PathBuf),

    #[error("invalid media segment: {0}")]
    SegmentParse(String),

    #[error("invalid xs:duration: {0}")]
    InvalidDuration(String),

    #[error("segment template without timeline is not supported")]
    NoTimeline,

    #[error("manifest parse error: {0}")]
    XmlParse(#[from] quick_xml::DeError),

    #[error("manifest serialize error: {0}")]
    XmlWrite(#[from] quick_xml::SeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    UrlParse(#[from] url::ParseError),

    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type ReliveResult<T> = Result<T, ReliveError>;
