//! Routing prefixes ("siglas") of external document ids.
//!
//! Ids are written `PREFIX-digits` (`QPE-000123`, `spb-88`). The prefix,
//! uppercased, decides which cross-source group an id is compared in.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoutingKey(String);

impl RoutingKey {
    pub fn new(key: &str) -> Self {
        Self(key.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Splits `PREFIX-rest` at the first `-`. Both sides must be non-empty and
/// the prefix alphabetic.
pub fn split_external_id(external_id: &str) -> Option<(&str, &str)> {
    let (prefix, rest) = external_id.trim().split_once('-')?;
    let prefix = prefix.trim();
    if prefix.is_empty()
        || rest.trim().is_empty()
        || !prefix.chars().all(|c| c.is_alphabetic())
    {
        return None;
    }
    Some((prefix, rest.trim()))
}

pub fn routing_key(external_id: &str) -> Option<RoutingKey> {
    split_external_id(external_id).map(|(prefix, _)| RoutingKey::new(prefix))
}

pub fn has_routing_key(external_id: &str, key: &RoutingKey) -> bool {
    routing_key(external_id).as_ref() == Some(key)
}
