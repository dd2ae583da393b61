use std::fmt;

use serde::{Deserialize, Serialize};

/// Verified identity of the student making a request.
///
/// Only the auth collaborator produces these; tools and repositories scope
/// every read and write by it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
