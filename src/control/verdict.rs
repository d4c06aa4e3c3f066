//! Verdicts and their wire encoding.
//!
//! The tunnel server reads `{reject: true, reject_reason}` for a rejection
//! and `{reject: false, unchange: true}` for an acceptance. The gate never
//! rewrites event content, hence `unchange` is always set on accept.

use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Accept or reject decision for one control event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(String),
}

impl Verdict {
    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject(reason.into())
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept)
    }

    /// Rejection reason; `None` for an acceptance.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Accept => None,
            Self::Reject(reason) => Some(reason),
        }
    }
}

impl Serialize for Verdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut body = serializer.serialize_struct("Verdict", 2)?;
        match self {
            Self::Accept => {
                body.serialize_field("reject", &false)?;
                body.serialize_field("unchange", &true)?;
            }
            Self::Reject(reason) => {
                body.serialize_field("reject", &true)?;
                body.serialize_field("reject_reason", reason)?;
            }
        }
        body.end()
    }
}
