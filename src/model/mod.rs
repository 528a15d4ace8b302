//! Core data model.
//!
//! A work item is a deferred unit of async work. It runs inside a scope,
//! and every scope belongs to exactly one session for the duration of
//! its execution.

pub mod scope;
pub mod session;
pub mod work;

pub use scope::Scope;
pub use session::Session;
pub use work::{WorkFn, WorkFuture, WorkItem};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                // Short display: first 8 chars of UUID
                write!(f, "{}", &self.0.to_string()[..8])
            }
        }
    };
}

uuid_id!(
    /// Identifies a submitted work item in logs and spans.
    WorkId
);
uuid_id!(
    /// Identifies one execution scope.
    ScopeId
);
uuid_id!(
    /// Identifies a session shared by one or more scopes.
    SessionId
);
