// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor path
//!
//! The `path` module provides the `ActorPath` type, the position of an actor in its supervision
//! tree. A root actor named `pool` lives at `/pool`; once registered as a child of `/pool`, an
//! actor named `worker` lives at `/pool/worker`. Paths identify actors in logs and errors, they
//! are not used to deliver anything.
//!

use serde::{Deserialize, Serialize};

use std::fmt::{Error, Formatter};

#[derive(Clone, Default, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorPath(Vec<String>);

impl ActorPath {
    /// Path of the supervising actor, `/` for a root.
    pub fn parent(&self) -> Self {
        match self.0.split_last() {
            Some((_, init)) => ActorPath(init.to_vec()),
            None => ActorPath::default(),
        }
    }

    /// Last segment of the path, the actor name.
    pub fn key(&self) -> String {
        self.0.last().cloned().unwrap_or_default()
    }

    /// Depth in the tree. Root actors are at level 1.
    pub fn level(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_child_of(&self, other: &ActorPath) -> bool {
        !self.is_empty() && self.parent() == *other
    }

    pub fn is_descendant_of(&self, other: &ActorPath) -> bool {
        self.level() > other.level() && self.0.starts_with(&other.0)
    }
}

fn segments(path: &str) -> impl Iterator<Item = String> + '_ {
    path.split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
}

impl From<&str> for ActorPath {
    fn from(str: &str) -> Self {
        ActorPath(segments(str).collect())
    }
}

impl From<String> for ActorPath {
    fn from(string: String) -> Self {
        ActorPath::from(string.as_str())
    }
}

impl std::ops::Div<&str> for ActorPath {
    type Output = ActorPath;

    fn div(mut self, rhs: &str) -> Self::Output {
        self.0.extend(segments(rhs));
        self
    }
}

impl std::fmt::Display for ActorPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "/{}", self.0.join("/"))
    }
}

impl std::fmt::Debug for ActorPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        std::fmt::Display::fmt(self, f)
    }
}
