//! Runtime log level control
//!
//! GET_LOGLEVEL and SET_LOGLEVEL carry the level as a little-endian u32:
//! 0 is off, then error, warn, info, debug and trace.

use tracing::level_filters::LevelFilter;
use vdisk_common::{OpResult, ResultCode};

const LEVELS: [LevelFilter; 6] = [
    LevelFilter::OFF,
    LevelFilter::ERROR,
    LevelFilter::WARN,
    LevelFilter::INFO,
    LevelFilter::DEBUG,
    LevelFilter::TRACE,
];

/// Handle on the node's log filter
pub trait LogLevelControl: Send + Sync {
    /// Most verbose level currently enabled
    fn level(&self) -> LevelFilter;

    /// Replace the filter with one enabling up to `level`
    fn set_level(&self, level: LevelFilter) -> OpResult;
}

/// Wire code of `level`
#[must_use]
pub fn level_code(level: LevelFilter) -> u32 {
    LEVELS.iter().position(|&l| l == level).unwrap_or(0) as u32
}

/// Level for a wire code
pub fn level_from_code(code: u32) -> OpResult<LevelFilter> {
    LEVELS
        .get(code as usize)
        .copied()
        .ok_or(ResultCode::InvalidParameters)
}
