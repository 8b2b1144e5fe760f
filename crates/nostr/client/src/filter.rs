//! REQ filter objects.

use nostr::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Query filter sent as the third element of a `REQ` frame.
///
/// Generic tag filters are stored under their wire key (`#e`, `#p`, `#d`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Add a `#<name>` tag filter, e.g. `tag('d', ["slug"])`.
    pub fn tag<I, S>(mut self, name: char, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .entry(format!("#{name}"))
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Whether `event` satisfies every constraint a relay is expected to apply.
    ///
    /// `search` and `limit` are relay-side concerns and are not checked.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids
            && !ids.iter().any(|id| *id == event.id)
        {
            return false;
        }
        if let Some(authors) = &self.authors
            && !authors.iter().any(|author| *author == event.pubkey)
        {
            return false;
        }
        if let Some(kinds) = &self.kinds
            && !kinds.contains(&event.kind)
        {
            return false;
        }
        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }
        self.tags.iter().all(|(key, wanted)| {
            let name = key.trim_start_matches('#');
            event
                .tag_values(name)
                .iter()
                .any(|value| wanted.contains(value))
        })
    }
}

/// True when `event` matches at least one filter (REQ filters are OR-ed).
pub fn any_filter_matches(filters: &[Filter], event: &Event) -> bool {
    filters.is_empty() || filters.iter().any(|filter| filter.matches(event))
}
