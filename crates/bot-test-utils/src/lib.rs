//! # Bot Test Utilities
//!
//! Scripted collaborators and fixtures for exercising the bot engine
//! without a homeserver, SFU or media backend.
//!
//! ## Modules
//!
//! - `mock_homeserver` - Scripted `HomeserverApi` that records every request
//! - `mock_sfu` - `SfuTokenApi` that succeeds or fails on demand
//! - `mock_media` - `MediaConnector` that counts sessions and frames
//! - `fixtures` - Identities, events and sync batches
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bot_test_utils::*;
//!
//! let homeserver = MockHomeserver::new()
//!     .with_sync(sync_batch("s1", vec![(room_id(), vec![message_event(ALICE, "!ping")])]));
//!
//! let calls = orchestrator(&homeserver, &MockSfu::new(), &RecordingMediaConnector::new());
//! ```

pub mod fixtures;
pub mod mock_homeserver;
pub mod mock_media;
pub mod mock_sfu;

pub use fixtures::*;
pub use mock_homeserver::*;
pub use mock_media::*;
pub use mock_sfu::*;
