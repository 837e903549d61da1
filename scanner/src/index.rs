use member_scan_common::member_id::MemberId;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::registry::{Member, MemberRegistry, RegistryError};

/// One selectable entry of the member picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    pub member_id: MemberId,
    pub label: String,
}

/// Searchable index of every registered member, built from `list()`.
///
/// Entries keep the registry's name order. A scanned ID is only applied as a
/// selection once it is present here.
#[derive(Debug, Clone, Default)]
pub struct MemberIndex {
    entries: Vec<IndexEntry>,
    by_id: BTreeMap<MemberId, usize>,
}

impl MemberIndex {
    pub fn build(registry: &dyn MemberRegistry) -> Result<Self, RegistryError> {
        Ok(Self::from_members(&registry.list()?))
    }

    pub fn from_members(members: &[Member]) -> Self {
        let mut index = Self::default();
        for member in members {
            if index.by_id.contains_key(&member.member_id) {
                continue;
            }
            index
                .by_id
                .insert(member.member_id.clone(), index.entries.len());
            index.entries.push(IndexEntry {
                member_id: member.member_id.clone(),
                label: member.display_label(),
            });
        }
        index
    }

    pub fn contains(&self, id: &MemberId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &MemberId) -> Option<&IndexEntry> {
        self.by_id.get(id).map(|&i| &self.entries[i])
    }

    /// Case-insensitive substring match on `"<name> (<member_id>)"`.
    /// An empty query returns every entry.
    pub fn search(&self, query: &str) -> Vec<&IndexEntry> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.entries.iter().collect();
        }
        self.entries
            .iter()
            .filter(|e| e.label.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{member, seeded_db};

    #[test]
    fn builds_from_registry_in_name_order() {
        let index = MemberIndex::build(&seeded_db()).unwrap();
        let labels: Vec<_> = index.search("").into_iter().map(|e| e.label.clone()).collect();
        assert_eq!(
            labels,
            vec!["Adam Smith (MEM-ABCDEF12)", "Jane Doe (MEM-12AB34CD)"]
        );
    }

    #[test]
    fn search_matches_name_or_id_case_insensitively() {
        let index = MemberIndex::build(&seeded_db()).unwrap();
        let hits = index.search("jane");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].member_id.as_str(), "MEM-12AB34CD");

        let hits = index.search("mem-abcdef");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].label, "Adam Smith (MEM-ABCDEF12)");

        assert!(index.search("nobody").is_empty());
    }

    #[test]
    fn contains_and_get() {
        let index = MemberIndex::from_members(&[member("MEM-12AB34CD", "Jane Doe")]);
        let id = MemberId::parse("MEM-12AB34CD").unwrap();
        assert!(index.contains(&id));
        assert_eq!(index.get(&id).unwrap().label, "Jane Doe (MEM-12AB34CD)");
        assert!(!index.contains(&MemberId::parse("MEM-00000000").unwrap()));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn duplicate_ids_keep_first_entry() {
        let index = MemberIndex::from_members(&[
            member("MEM-12AB34CD", "Jane Doe"),
            member("MEM-12AB34CD", "Jane Duplicate"),
        ]);
        assert_eq!(index.len(), 1);
        assert!(!index.is_empty());
    }
}
