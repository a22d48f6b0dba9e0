//! Security layer for the host side.
//!
//! Every command a client sends passes through [`CommandPolicy`] before the
//! host spawns anything.
//!
//! ## Example
//!
//! ```rust
//! use shell_relay::security::{CommandPolicy, PolicyConfig, Verdict};
//!
//! let policy = CommandPolicy::new(PolicyConfig::default().with_allow_list(["ls", "pwd"]));
//! assert_eq!(policy.evaluate("ls -la"), Verdict::Accept);
//! assert!(matches!(policy.evaluate("rm -rf /"), Verdict::Reject(_)));
//! ```

pub mod policy;

pub use policy::{sanitize_for_display, CommandPolicy, PolicyConfig, PolicyViolation, Verdict};
