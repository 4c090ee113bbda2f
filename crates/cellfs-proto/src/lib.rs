//! cellfs remote filesystem protocol.
//!
//! Every connection is a TCP stream of length-delimited postcard frames.
//! A session connection is bound to one open file for its whole life and
//! processes requests strictly in order, one response per request. Closing
//! the client's send side closes the file. Path-keyed calls such as `mkdir`
//! use a separate unary connection.
//!
//! ```text
//! client                         server
//!   Hello::Session        ──▶
//!   Open{path,flags,mode} ──▶    fs.open_file(..)
//!                         ◀──    Opened{name}
//!   Read{len}             ──▶
//!                         ◀──    Read{content ≤ CHUNK_SIZE}
//!   <shutdown>            ──▶    handle.close()
//! ```

pub mod channel;
pub mod constants;
pub mod error;
pub mod messages;
pub mod status;

pub use channel::Channel;
pub use constants::*;
pub use error::{ProtoError, ProtoResult};
pub use messages::{
    Hello, SessionRequest, SessionResponse, Timestamp, UnaryRequest, UnaryResponse, Whence,
    seek_from_wire, seek_to_wire,
};
pub use status::{Status, StatusCode};
