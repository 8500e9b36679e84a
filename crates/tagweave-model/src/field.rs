//! Tag fields and the case-insensitive field multimap.

use serde::{Deserialize, Serialize};

use crate::value::TagValue;

/// A single metadata field: a format-specific identifier with a typed value.
///
/// Identifiers are strings in every supported format ("DATE" for Vorbis
/// comments, "TIT2" for ID3v2, "TITLE" for Matroska simple tags). Repeated
/// identifiers are legal; the multimap below preserves all of them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TagField {
    pub id: String,
    pub value: TagValue,
    /// Auxiliary type information, e.g. the language of a Matroska simple
    /// tag or an ID3v2 content descriptor.
    pub type_info: Option<String>,
    /// Nested fields (Matroska simple tags may contain sub-tags).
    pub nested: Vec<TagField>,
}

impl TagField {
    pub fn new(id: impl Into<String>, value: TagValue) -> Self {
        Self {
            id: id.into(),
            value,
            type_info: None,
            nested: Vec::new(),
        }
    }

    pub fn with_type_info(mut self, type_info: impl Into<String>) -> Self {
        self.type_info = Some(type_info.into());
        self
    }
}

/// Insertion-ordered multimap of tag fields keyed by ASCII-case-insensitive
/// identifier.
///
/// The original casing of every identifier is preserved for re-serialization;
/// only lookups fold case. Tag maps are small, so entries are kept in a plain
/// vector and matched linearly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMap {
    entries: Vec<TagField>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: TagField) {
        self.entries.push(field);
    }

    /// First field stored under `id`, if any.
    pub fn get(&self, id: &str) -> Option<&TagField> {
        self.entries.iter().find(|f| f.id.eq_ignore_ascii_case(id))
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TagField> {
        self.entries
            .iter_mut()
            .find(|f| f.id.eq_ignore_ascii_case(id))
    }

    /// All fields stored under `id`, in insertion order.
    pub fn values<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a TagField> {
        self.entries
            .iter()
            .filter(move |f| f.id.eq_ignore_ascii_case(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Removes and returns every field stored under `id`.
    pub fn remove(&mut self, id: &str) -> Vec<TagField> {
        let mut removed = Vec::new();
        self.entries.retain(|f| {
            if f.id.eq_ignore_ascii_case(id) {
                removed.push(f.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TagField> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, TagField> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<'a> IntoIterator for &'a FieldMap {
    type Item = &'a TagField;
    type IntoIter = std::slice::Iter<'a, TagField>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive_but_preserves_casing() {
        let mut map = FieldMap::new();
        map.insert(TagField::new("Artist", TagValue::text("A")));

        assert!(map.contains("ARTIST"));
        assert!(map.contains("artist"));
        assert_eq!(map.get("aRtIsT").unwrap().id, "Artist");
    }

    #[test]
    fn test_repeated_identifiers_are_kept_in_order() {
        let mut map = FieldMap::new();
        map.insert(TagField::new("PERFORMER", TagValue::text("one")));
        map.insert(TagField::new("performer", TagValue::text("two")));

        let values: Vec<_> = map
            .values("Performer")
            .map(|f| f.value.to_display_string().unwrap())
            .collect();
        assert_eq!(values, ["one", "two"]);
    }

    #[test]
    fn test_remove_returns_all_matches() {
        let mut map = FieldMap::new();
        map.insert(TagField::new("YEAR", TagValue::text("2021")));
        map.insert(TagField::new("Title", TagValue::text("t")));
        map.insert(TagField::new("year", TagValue::text("2022")));

        let removed = map.remove("Year");
        assert_eq!(removed.len(), 2);
        assert_eq!(map.len(), 1);
        assert!(!map.contains("YEAR"));
    }
}
