//! Secret types for credentials that must never reach the logs.
//!
//! Re-exports the [`secrecy`] types the bot uses for its long-lived access
//! token, the short-lived OpenID assertion and the RTC signaling JWT.
//!
//! `SecretString` implements `Debug` with redaction, so deriving `Debug` on a
//! struct holding one is safe for `{:?}` and `tracing` fields. The value is
//! only reachable through [`ExposeSecret::expose_secret`], which keeps every
//! read site greppable.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Credentials {
//!     user: String,
//!     access_token: SecretString,
//! }
//!
//! let creds = Credentials {
//!     user: "@bot:example.org".to_string(),
//!     access_token: SecretString::from("syt_abc"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("syt_abc"));
//! assert_eq!(creds.access_token.expose_secret(), "syt_abc");
//! ```

pub use secrecy::{ExposeSecret, SecretString};
