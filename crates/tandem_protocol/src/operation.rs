//! Mutation kinds carried by change entries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of mutation recorded in a change entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Record was created.
    Create,
    /// Record was updated.
    Update,
    /// Record was deleted.
    Delete,
}

impl Operation {
    /// Converts to a numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            Operation::Create => 1,
            Operation::Update => 2,
            Operation::Delete => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Operation::Create),
            2 => Some(Operation::Update),
            3 => Some(Operation::Delete),
            _ => None,
        }
    }

    /// Returns true if the operation leaves a live record behind.
    pub fn writes_state(&self) -> bool {
        !matches!(self, Operation::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Kind of access an authorization check is asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Reading a record (serving a pull).
    Read,
    /// Writing a record (accepting a push).
    Write,
}
