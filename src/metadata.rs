// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Descriptive key/value metadata grouped by domain.
//!
//! Decoders that don't produce georeferencing values publish text items here,
//! e.g. `TIMING/CLOCK_RESOLUTION = "100 ns"`. Domains keep their insertion
//! order so a dump reads in the same order the boxes were encountered.

use crate::{Result, TryVec};

/// Domain holding `taic` and `itai` timing fields.
pub const TIMING_DOMAIN: &str = "TIMING";
/// Domain holding the content identifier of the item.
pub const GIMI_DOMAIN: &str = "GIMI";
/// Domain holding the full ST0601 tag/value dump.
pub const ST0601_DOMAIN: &str = "GIMI ST0601";
/// Base name of the user description domains, see [`description_domain`].
pub const DESCRIPTION_DOMAIN: &str = "DESCRIPTION";

/// Domain name for a user description in `lang`.
///
/// Descriptions without a language go in `DESCRIPTION`, all others in
/// `DESCRIPTION_<lang>`.
#[must_use]
pub fn description_domain(lang: &str) -> String {
    if lang.is_empty() {
        DESCRIPTION_DOMAIN.into()
    } else {
        format!("{DESCRIPTION_DOMAIN}_{lang}")
    }
}

/// A single key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataItem {
    pub key: String,
    pub value: String,
}

/// An ordered list of items published under one name.
#[derive(Debug)]
pub struct MetadataDomain {
    name: String,
    items: TryVec<MetadataItem>,
}

impl MetadataDomain {
    fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            items: TryVec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of the first item named `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.iter().find(|item| item.key == key).map(|item| item.value.as_str())
    }

    pub fn items(&self) -> &[MetadataItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Replace the value of `key`, or add it if absent.
    fn set(&mut self, key: &str, value: String) -> Result<()> {
        if let Some(item) = self.items.iter_mut().find(|item| item.key == key) {
            item.value = value;
            return Ok(());
        }
        self.push(key, value)
    }

    /// Add an item even if one with the same key exists.
    fn push(&mut self, key: &str, value: String) -> Result<()> {
        self.items.push(MetadataItem {
            key: key.into(),
            value,
        })?;
        Ok(())
    }
}

/// All metadata domains published for one image item.
///
/// Not meant to be shared between concurrent extraction passes; the owning
/// [`GeoMetadata`](crate::GeoMetadata) is only mutated through `&mut`.
#[derive(Debug)]
pub struct MetadataStore {
    domains: TryVec<MetadataDomain>,
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataStore {
    pub fn new() -> Self {
        Self { domains: TryVec::new() }
    }

    pub fn domain(&self, name: &str) -> Option<&MetadataDomain> {
        self.domains.iter().find(|d| d.name == name)
    }

    pub fn domains(&self) -> impl Iterator<Item = &MetadataDomain> {
        self.domains.iter()
    }

    /// Shorthand for `domain(domain)?.get(key)`.
    pub fn get_item(&self, domain: &str, key: &str) -> Option<&str> {
        self.domain(domain)?.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub(crate) fn set_item(&mut self, domain: &str, key: &str, value: String) -> Result<()> {
        self.domain_mut(domain)?.set(key, value)
    }

    pub(crate) fn push_item(&mut self, domain: &str, key: &str, value: String) -> Result<()> {
        self.domain_mut(domain)?.push(key, value)
    }

    fn domain_mut(&mut self, name: &str) -> Result<&mut MetadataDomain> {
        let index = match self.domains.iter().position(|d| d.name == name) {
            Some(index) => index,
            None => {
                self.domains.push(MetadataDomain::new(name))?;
                self.domains.len() - 1
            },
        };
        Ok(&mut self.domains[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_item_overwrites_within_domain() {
        let mut store = MetadataStore::new();
        store.set_item(TIMING_DOMAIN, "TAI_TIMESTAMP", "1 ns".into()).unwrap();
        store.set_item(TIMING_DOMAIN, "TAI_TIMESTAMP", "2 ns".into()).unwrap();
        store.set_item(GIMI_DOMAIN, "TAI_TIMESTAMP", "3 ns".into()).unwrap();

        let timing = store.domain(TIMING_DOMAIN).unwrap();
        assert_eq!(timing.len(), 1);
        assert_eq!(timing.get("TAI_TIMESTAMP"), Some("2 ns"));
        assert_eq!(store.get_item(GIMI_DOMAIN, "TAI_TIMESTAMP"), Some("3 ns"));
    }

    #[test]
    fn push_item_keeps_duplicates_in_order() {
        let mut store = MetadataStore::new();
        store.push_item(ST0601_DOMAIN, "Unhandled", "Unhandled".into()).unwrap();
        store.push_item(ST0601_DOMAIN, "Unhandled", "Unhandled".into()).unwrap();
        store.push_item(ST0601_DOMAIN, "ST 0601 Version", "ST 0601.17".into()).unwrap();

        let keys: Vec<_> = store.domain(ST0601_DOMAIN).unwrap().items().iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, ["Unhandled", "Unhandled", "ST 0601 Version"]);
    }

    #[test]
    fn description_domain_name() {
        assert_eq!(description_domain(""), "DESCRIPTION");
        assert_eq!(description_domain("en-AU"), "DESCRIPTION_en-AU");
    }
}
