//! Transactional property containers
//!
//! Every entity carries a [`PropsContainer`]: a string key/value store for
//! auxiliary settings that do not warrant their own typed field. Keys are
//! `/`-separated paths; mutations stage against the owning entity's
//! transaction context like any other field.

use crate::error::{Error, Result};
use crate::object::ObjectId;
use crate::transaction::{MapDriver, TransactionContext, TransactionalMap};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Longest accepted property key path
pub const KEY_MAX_LENGTH: usize = 256;

fn check_key(key: &str) -> Result<()> {
    let fail = |reason: &'static str| Error::InvalidName {
        kind: "property key",
        value: key.to_string(),
        reason,
    };
    if key.is_empty() {
        return Err(fail("empty"));
    }
    if key.len() > KEY_MAX_LENGTH {
        return Err(fail("too long"));
    }
    if key.starts_with('/') || key.ends_with('/') {
        return Err(fail("must not start or end with '/'"));
    }
    for segment in key.split('/') {
        if segment.is_empty() {
            return Err(fail("contains an empty path segment"));
        }
        if !segment
            .chars()
            .all(|chr| chr.is_ascii_alphanumeric() || matches!(chr, '_' | '-' | '.'))
        {
            return Err(fail("contains invalid characters"));
        }
    }
    Ok(())
}

/// Key/value properties of one entity
pub struct PropsContainer {
    map: Arc<TransactionalMap<String, String>>,
}

impl std::fmt::Debug for PropsContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropsContainer").finish_non_exhaustive()
    }
}

impl PropsContainer {
    pub fn new(owner: ObjectId, driver: Option<Arc<dyn MapDriver<String, String>>>) -> Self {
        Self {
            map: TransactionalMap::new(owner, driver),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.get(&key.to_string())
    }

    pub fn get_with_default(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Set a property, returning the previous value
    ///
    /// Crate-internal; entities expose access-gated wrappers.
    pub(crate) fn set(
        &self,
        tx: &TransactionContext,
        key: impl AsRef<str>,
        value: impl Into<String>,
    ) -> Result<Option<String>> {
        let key = key.as_ref();
        check_key(key)?;
        Ok(self.map.insert(tx, key.to_string(), value.into()))
    }

    /// Remove a property, returning the removed value
    pub(crate) fn remove(&self, tx: &TransactionContext, key: &str) -> Option<String> {
        self.map.remove(tx, &key.to_string())
    }

    pub(crate) fn clear(&self, tx: &TransactionContext) {
        self.map.clear(tx);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Snapshot copy of all properties
    pub fn map(&self) -> BTreeMap<String, String> {
        self.map.entries().into_iter().collect()
    }

    /// Snapshot copy of the properties under `namespace/`, with the
    /// namespace prefix stripped
    pub fn namespace(&self, namespace: &str) -> BTreeMap<String, String> {
        let prefix = format!("{namespace}/");
        self.map
            .entries()
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&prefix)
                    .map(|rest| (rest.to_string(), value))
            })
            .collect()
    }
}
