//! Core types for the Palaver session layer
//!
//! Topic names carry their type in a well-known prefix; this module defines
//! the classification rules used by the registry and the dispatcher.

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Topic Classification
// ----------------------------------------------------------------------------

/// Kind of a topic, derived from its name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicKind {
    /// The user's own account feed (`me`).
    Me,
    /// The search topic (`fnd`).
    Fnd,
    /// A group conversation (`grp...`), including not-yet-named ones (`new...`).
    Group,
    /// A peer-to-peer conversation (`usr...`).
    P2p,
    /// Anything else.
    Unknown,
}

impl TopicKind {
    /// Classify a topic name by its prefix.
    pub fn from_name(name: &str) -> Self {
        if name == "me" {
            TopicKind::Me
        } else if name == "fnd" {
            TopicKind::Fnd
        } else if name.starts_with("grp") || name.starts_with("new") {
            TopicKind::Group
        } else if name.starts_with("usr") {
            TopicKind::P2p
        } else {
            TopicKind::Unknown
        }
    }

    /// Topics whose metadata does not advance the registry's update watermark.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, TopicKind::Me | TopicKind::Fnd)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_prefix() {
        assert_eq!(TopicKind::from_name("me"), TopicKind::Me);
        assert_eq!(TopicKind::from_name("fnd"), TopicKind::Fnd);
        assert_eq!(TopicKind::from_name("grpAbc12"), TopicKind::Group);
        assert_eq!(TopicKind::from_name("newXyz"), TopicKind::Group);
        assert_eq!(TopicKind::from_name("usrAbc12"), TopicKind::P2p);
        assert_eq!(TopicKind::from_name("chn-something"), TopicKind::Unknown);
    }

    #[test]
    fn exact_match_required_for_me_and_fnd() {
        // A name merely starting with "me" is not the self topic.
        assert_eq!(TopicKind::from_name("messages"), TopicKind::Unknown);
        assert_eq!(TopicKind::from_name("fnd2"), TopicKind::Unknown);
    }

    #[test]
    fn ephemeral_kinds() {
        assert!(TopicKind::Me.is_ephemeral());
        assert!(TopicKind::Fnd.is_ephemeral());
        assert!(!TopicKind::Group.is_ephemeral());
        assert!(!TopicKind::P2p.is_ephemeral());
    }
}
