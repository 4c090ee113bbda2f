//! cellfs service discovery.
//!
//! Servers periodically multicast small postcard-encoded announcements of
//! the services they export (and optionally their hostname). A listener,
//! one per process, folds these into a [`Registry`]; [`Resolver`]s turn a
//! logical target such as `cellfs://alpha@cellfs.FS` into socket addresses
//! and follow the registry as new addresses appear.
//!
//! ```text
//! Announcer ──udp 224.0.0.1:9999──▶ DiscoveryService ──▶ Registry ──▶ Resolver
//! ```

pub mod announcement;
pub mod announcer;
pub mod config;
pub mod constants;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod target;

pub use announcement::Announcement;
pub use announcer::{Announcer, local_hostname};
pub use config::DiscoveryConfig;
pub use error::{DiscoveryError, DiscoveryResult};
pub use registry::{Registry, RegistrySnapshot};
pub use resolver::Resolver;
pub use service::DiscoveryService;
pub use target::Target;
