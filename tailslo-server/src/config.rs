use std::time::Duration;

/// Port the stub binds when none is given, matching common inference servers.
pub const DEFAULT_PORT: u16 = 30000;

/// Number of content frames streamed per request.
pub const DEFAULT_CHUNKS: usize = 8;

pub const DEFAULT_FIRST_TOKEN_DELAY: Duration = Duration::from_millis(50);

pub const DEFAULT_INTER_CHUNK_DELAY: Duration = Duration::from_millis(10);

/// Comment line sent ahead of the first content frame; clients must ignore it.
pub const PREAMBLE_COMMENT: &str = ": tailslo-stub\n\n";
