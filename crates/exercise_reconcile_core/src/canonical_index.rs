use std::collections::HashMap;

use serde::Serialize;

use crate::catalog::CanonicalExerciseRecord;
use crate::normalize::normalize_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexKind {
    Id,
    Name,
    DisplayName,
    LegacyNumericId,
}

impl IndexKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::DisplayName => "display-name",
            Self::LegacyNumericId => "legacy-numeric-id",
        }
    }
}

/// Two catalog records competing for one index key. Only `kept_id` stays reachable
/// through that index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexCollision {
    pub index: IndexKind,
    pub key: String,
    pub kept_id: String,
    pub discarded_id: String,
}

/// Lookup tables over one fetched catalog snapshot. Records are referenced by
/// position in the owned list.
#[derive(Debug, Default)]
pub struct CanonicalIndex {
    records: Vec<CanonicalExerciseRecord>,
    by_id: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
    by_display_name: HashMap<String, usize>,
    by_legacy_numeric_id: HashMap<u32, usize>,
    collisions: Vec<IndexCollision>,
}

impl CanonicalIndex {
    pub fn build(records: Vec<CanonicalExerciseRecord>) -> Self {
        let mut index = Self::default();
        for (position, record) in records.iter().enumerate() {
            let id_value = id_key(&record.id);
            if !id_value.is_empty() {
                insert_keyed(
                    &mut index.by_id,
                    &mut index.collisions,
                    &records,
                    IndexKind::Id,
                    id_value,
                    position,
                );
            }

            let name_key = normalize_name(&record.name);
            if !name_key.is_empty() {
                insert_keyed(
                    &mut index.by_name,
                    &mut index.collisions,
                    &records,
                    IndexKind::Name,
                    name_key,
                    position,
                );
            }

            if let Some(display_name) = record.display_name.as_deref() {
                let display_key = normalize_name(display_name);
                if !display_key.is_empty() {
                    insert_keyed(
                        &mut index.by_display_name,
                        &mut index.collisions,
                        &records,
                        IndexKind::DisplayName,
                        display_key,
                        position,
                    );
                }
            }

            if let Some(legacy_id) = record.legacy_numeric_id {
                insert_keyed(
                    &mut index.by_legacy_numeric_id,
                    &mut index.collisions,
                    &records,
                    IndexKind::LegacyNumericId,
                    legacy_id,
                    position,
                );
            }
        }
        index.records = records;
        index
    }

    pub fn by_id(&self, id: &str) -> Option<&CanonicalExerciseRecord> {
        self.resolve(self.by_id.get(&id_key(id)))
    }

    /// `name` is normalized before lookup.
    pub fn by_name(&self, name: &str) -> Option<&CanonicalExerciseRecord> {
        self.resolve(self.by_name.get(&normalize_name(name)))
    }

    /// `display_name` is normalized before lookup.
    pub fn by_display_name(&self, display_name: &str) -> Option<&CanonicalExerciseRecord> {
        self.resolve(self.by_display_name.get(&normalize_name(display_name)))
    }

    pub fn by_legacy_numeric_id(&self, legacy_id: u32) -> Option<&CanonicalExerciseRecord> {
        self.resolve(self.by_legacy_numeric_id.get(&legacy_id))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn collisions(&self) -> &[IndexCollision] {
        &self.collisions
    }

    fn resolve(&self, position: Option<&usize>) -> Option<&CanonicalExerciseRecord> {
        position.and_then(|position| self.records.get(*position))
    }
}

// A later record displaces the current holder only when it has media and the
// holder does not.
fn insert_keyed<K>(
    map: &mut HashMap<K, usize>,
    collisions: &mut Vec<IndexCollision>,
    records: &[CanonicalExerciseRecord],
    kind: IndexKind,
    key: K,
    position: usize,
) where
    K: std::hash::Hash + Eq + ToString,
{
    let Some(&existing) = map.get(&key) else {
        map.insert(key, position);
        return;
    };

    let incoming = &records[position];
    let holder = &records[existing];
    let replace = incoming.has_media() && !holder.has_media();
    let (kept, discarded) = if replace {
        (incoming, holder)
    } else {
        (holder, incoming)
    };
    collisions.push(IndexCollision {
        index: kind,
        key: key.to_string(),
        kept_id: kept.id.clone(),
        discarded_id: discarded.id.clone(),
    });
    if replace {
        map.insert(key, position);
    }
}

fn id_key(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{CanonicalIndex, IndexKind};
    use crate::catalog::CanonicalExerciseRecord;

    fn record(id: &str, name: &str, display: Option<&str>, media: Option<&str>) -> CanonicalExerciseRecord {
        CanonicalExerciseRecord::new(id, name, display, media, None)
    }

    #[test]
    fn lookups_resolve_each_key_kind() {
        let index = CanonicalIndex::build(vec![
            record(
                "0b9b6d1e-58d4-4a38-9b0e-8f4f1f3f2a11",
                "barbell glute bridge",
                Some("Hip Thrust"),
                Some("https://cdn.example.org/media/0042.mp4"),
            ),
            record("c3", "plank", None, None),
        ]);

        assert_eq!(index.len(), 2);
        assert_eq!(
            index
                .by_id("0B9B6D1E-58D4-4A38-9B0E-8F4F1F3F2A11")
                .map(|r| r.name.as_str()),
            Some("barbell glute bridge")
        );
        assert_eq!(index.by_name("Plank").map(|r| r.id.as_str()), Some("c3"));
        assert_eq!(
            index.by_display_name("hip thrust (female)").map(|r| r.id.as_str()),
            Some("0b9b6d1e-58d4-4a38-9b0e-8f4f1f3f2a11")
        );
        assert_eq!(
            index.by_legacy_numeric_id(42).map(|r| r.name.as_str()),
            Some("barbell glute bridge")
        );
        assert!(index.by_name("deadlift").is_none());
        assert!(index.collisions().is_empty());
    }

    #[test]
    fn name_collision_prefers_record_with_media() {
        let index = CanonicalIndex::build(vec![
            record("a", "push up", None, None),
            record("b", "push up", None, Some("https://cdn.example.org/0007.gif")),
        ]);

        assert_eq!(index.by_name("push up").map(|r| r.id.as_str()), Some("b"));
        assert_eq!(index.by_id("a").map(|r| r.id.as_str()), Some("a"));
        let collisions = index.collisions();
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].index, IndexKind::Name);
        assert_eq!(collisions[0].key, "push up");
        assert_eq!(collisions[0].kept_id, "b");
        assert_eq!(collisions[0].discarded_id, "a");
    }

    #[test]
    fn name_collision_keeps_earlier_record_when_media_does_not_decide() {
        let index = CanonicalIndex::build(vec![
            record("a", "squat", None, Some("https://cdn.example.org/0001.gif")),
            record("b", "squat", None, Some("https://cdn.example.org/0002.gif")),
            record("c", "squat", None, None),
        ]);

        assert_eq!(index.by_name("squat").map(|r| r.id.as_str()), Some("a"));
        let discarded: Vec<_> = index
            .collisions()
            .iter()
            .filter(|c| c.index == IndexKind::Name)
            .map(|c| c.discarded_id.as_str())
            .collect();
        assert_eq!(discarded, vec!["b", "c"]);
    }

    #[test]
    fn display_name_collision_only_affects_display_index() {
        let index = CanonicalIndex::build(vec![
            record("a", "dumbbell row", Some("Row"), None),
            record("b", "cable row", Some("Row"), Some("https://cdn.example.org/0300.gif")),
        ]);

        assert_eq!(index.by_display_name("row").map(|r| r.id.as_str()), Some("b"));
        assert_eq!(index.by_name("dumbbell row").map(|r| r.id.as_str()), Some("a"));
        assert_eq!(index.collisions().len(), 1);
        assert_eq!(index.collisions()[0].index, IndexKind::DisplayName);
    }

    #[test]
    fn empty_catalog_builds_empty_index() {
        let index = CanonicalIndex::build(Vec::new());
        assert!(index.is_empty());
        assert!(index.by_legacy_numeric_id(1).is_none());
    }
}
