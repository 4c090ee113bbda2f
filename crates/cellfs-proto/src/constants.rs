//! Protocol constants.

use std::time::Duration;

/// Largest payload carried by one `Read`/`ReadAt` response, and the most
/// bytes the server writes per `Write`/`WriteAt` request.
pub const CHUNK_SIZE: usize = 1024;

/// Upper bound on an encoded frame.
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// Most entries carried by one `Readdir`/`Readdirnames` response. A full
/// listing takes as many requests as it needs; at 255-byte names a batch
/// still fits well inside [`MAX_FRAME_LENGTH`].
pub const READDIR_BATCH: i32 = 1024;

/// Service name servers announce by default.
pub const DEFAULT_SERVICE: &str = "cellfs.FS";

/// TCP port servers listen on by default.
pub const DEFAULT_PORT: u16 = 8100;

/// Client bound on one request/response exchange.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Server bound on waiting for the next request of a session.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
