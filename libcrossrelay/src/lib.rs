//! Crossrelay - mirror a social account's newest original post to another platform
//!
//! Each run relays at most one item: the newest non-repost post that
//! appeared after the stored cursor. The cursor only advances after the
//! destination confirms the post, so failed runs are retried by the next
//! scheduled invocation.

pub mod config;
pub mod cursor;
pub mod error;
pub mod filter;
pub mod logging;
pub mod platforms;
pub mod relay;
pub mod staging;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use cursor::CursorStore;
pub use error::{RelayError, Result};
pub use relay::RelayService;
pub use types::{FailureStage, MediaKind, MediaRef, RelayOutcome, SourceItem, StagedMedia};
