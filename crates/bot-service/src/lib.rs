//! Call Bot Service Library
//!
//! A chat bot that listens for prefixed commands in rooms and, on command,
//! joins or leaves the room's real-time audio call.
//!
//! # Architecture
//!
//! ```text
//! discovery ──► session bootstrap ──► cursor load / catch-up
//!                                          │
//!                                          ▼
//!        ┌──────────── Bot (single task) ─────────────┐
//!        │ long-poll sync ─► dispatch ─► cursor save  │
//!        │                     │                      │
//!        │                     ▼                      │
//!        │  CommandRegistry ─► handler ─► CallOrchestrator
//!        └─────────────────────────────────────────────┘
//! ```
//!
//! - Collaborators sit behind traits (`HomeserverApi`, `SfuTokenApi`,
//!   `MediaConnector`) so the engine runs against scripted mocks in tests.
//! - Each active call owns an audio player task fed by a bounded queue; the
//!   sync loop itself stays single-task.
//!
//! # Modules
//!
//! - [`bot`] - Sync loop and event dispatcher
//! - [`calls`] - Call join/leave protocol and session ownership
//! - [`commands`] - Command parsing, registry and built-in commands
//! - [`config`] - Configuration from environment
//! - [`cursor`] - Persisted sync cursor
//! - [`discovery`] - Well-known client discovery
//! - [`homeserver`] - Chat-protocol client
//! - [`rtc`] - SFU credential exchange, media sessions, audio
//! - [`session`] - Identity resolution and focus selection

pub mod bot;
pub mod calls;
pub mod commands;
pub mod config;
pub mod cursor;
pub mod discovery;
pub mod errors;
pub mod homeserver;
pub mod observability;
pub mod room;
pub mod rtc;
pub mod session;
