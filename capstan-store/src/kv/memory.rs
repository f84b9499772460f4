//! In-memory key-value backend
//!
//! Backing store for tests and single-process embedding. Semantics mirror
//! an ordered key-value engine: absent keys read as empty values, emptied
//! collections disappear, and a type clash is an error rather than a silent
//! overwrite.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::kv::{KeyValueStore, ListPosition, WriteBatch, WriteCommand};

#[derive(Debug, Clone)]
enum Entry {
    Text(String),
    Hash(HashMap<String, String>),
    List(Vec<String>),
    Set(BTreeSet<String>),
    /// Kept sorted by (score, member).
    SortedSet(Vec<(i64, String)>),
}

fn wrong_type(key: &str, expected: &'static str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
    }
}

/// `RwLock`-guarded map of typed entries. Write batches apply copy-on-write
/// so a failing command leaves the store untouched.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply(data: &mut BTreeMap<String, Entry>, command: WriteCommand) -> StoreResult<()> {
    match command {
        WriteCommand::Set { key, value } => {
            match data.get(&key) {
                Some(Entry::Text(_)) | None => {}
                Some(_) => return Err(wrong_type(&key, "string")),
            }
            data.insert(key, Entry::Text(value));
        }
        WriteCommand::Delete { key } => {
            data.remove(&key);
        }
        WriteCommand::HashSet { key, fields } => {
            let entry = data.entry(key.clone()).or_insert_with(|| Entry::Hash(HashMap::new()));
            let Entry::Hash(hash) = entry else {
                return Err(wrong_type(&key, "hash"));
            };
            hash.extend(fields);
        }
        WriteCommand::HashDelete { key, fields } => {
            if let Some(entry) = data.get_mut(&key) {
                let Entry::Hash(hash) = entry else {
                    return Err(wrong_type(&key, "hash"));
                };
                for field in fields {
                    hash.remove(&field);
                }
                if hash.is_empty() {
                    data.remove(&key);
                }
            }
        }
        WriteCommand::SetAdd { key, member } => {
            let entry = data.entry(key.clone()).or_insert_with(|| Entry::Set(BTreeSet::new()));
            let Entry::Set(set) = entry else {
                return Err(wrong_type(&key, "set"));
            };
            set.insert(member);
        }
        WriteCommand::SetRemove { key, member } => {
            if let Some(entry) = data.get_mut(&key) {
                let Entry::Set(set) = entry else {
                    return Err(wrong_type(&key, "set"));
                };
                set.remove(&member);
                if set.is_empty() {
                    data.remove(&key);
                }
            }
        }
        WriteCommand::SortedSetAdd { key, member, score } => {
            let entry = data
                .entry(key.clone())
                .or_insert_with(|| Entry::SortedSet(Vec::new()));
            let Entry::SortedSet(zset) = entry else {
                return Err(wrong_type(&key, "sorted set"));
            };
            zset.retain(|(_, m)| m != &member);
            zset.push((score, member));
            zset.sort();
        }
        WriteCommand::SortedSetRemove { key, member } => {
            if let Some(entry) = data.get_mut(&key) {
                let Entry::SortedSet(zset) = entry else {
                    return Err(wrong_type(&key, "sorted set"));
                };
                zset.retain(|(_, m)| m != &member);
                if zset.is_empty() {
                    data.remove(&key);
                }
            }
        }
        WriteCommand::ListClear { key } => {
            if let Some(entry) = data.get(&key) {
                if !matches!(entry, Entry::List(_)) {
                    return Err(wrong_type(&key, "list"));
                }
                data.remove(&key);
            }
        }
        WriteCommand::ListPush { key, values } => {
            let entry = data.entry(key.clone()).or_insert_with(|| Entry::List(Vec::new()));
            let Entry::List(list) = entry else {
                return Err(wrong_type(&key, "list"));
            };
            list.extend(values);
        }
        WriteCommand::ListInsert {
            key,
            position,
            pivot,
            value,
        } => {
            if let Some(entry) = data.get_mut(&key) {
                let Entry::List(list) = entry else {
                    return Err(wrong_type(&key, "list"));
                };
                if let Some(index) = list.iter().position(|v| v == &pivot) {
                    let index = match position {
                        ListPosition::Before => index,
                        ListPosition::After => index + 1,
                    };
                    list.insert(index, value);
                }
            }
        }
        WriteCommand::ListRemove { key, value } => {
            if let Some(entry) = data.get_mut(&key) {
                let Entry::List(list) = entry else {
                    return Err(wrong_type(&key, "list"));
                };
                list.retain(|v| v != &value);
                if list.is_empty() {
                    data.remove(&key);
                }
            }
        }
    }
    Ok(())
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let mut rest = text;
    if !rest.starts_with(parts[0]) {
        return false;
    }
    rest = &rest[parts[0].len()..];

    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(index) => rest = &rest[index + part.len()..],
            None => return false,
        }
    }

    let last = parts[parts.len() - 1];
    last.is_empty() || rest.ends_with(last)
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.data.read().unwrap().contains_key(key))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.data.read().unwrap().get(key) {
            None => Ok(None),
            Some(Entry::Text(value)) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key, "string")),
        }
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        match self.data.read().unwrap().get(key) {
            None => Ok(None),
            Some(Entry::Hash(hash)) => Ok(hash.get(field).cloned()),
            Some(_) => Err(wrong_type(key, "hash")),
        }
    }

    async fn hash_get_many(
        &self,
        keys: &[String],
        field: &str,
    ) -> StoreResult<Vec<Option<String>>> {
        let data = self.data.read().unwrap();
        keys.iter()
            .map(|key| match data.get(key) {
                None => Ok(None),
                Some(Entry::Hash(hash)) => Ok(hash.get(field).cloned()),
                Some(_) => Err(wrong_type(key, "hash")),
            })
            .collect()
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        match self.data.read().unwrap().get(key) {
            None => Ok(HashMap::new()),
            Some(Entry::Hash(hash)) => Ok(hash.clone()),
            Some(_) => Err(wrong_type(key, "hash")),
        }
    }

    async fn hash_keys(&self, key: &str) -> StoreResult<Vec<String>> {
        match self.data.read().unwrap().get(key) {
            None => Ok(Vec::new()),
            Some(Entry::Hash(hash)) => Ok(hash.keys().cloned().collect()),
            Some(_) => Err(wrong_type(key, "hash")),
        }
    }

    async fn hash_with_list(
        &self,
        hash_key: &str,
        list_key: &str,
    ) -> StoreResult<(HashMap<String, String>, Vec<String>)> {
        let data = self.data.read().unwrap();
        let hash = match data.get(hash_key) {
            None => HashMap::new(),
            Some(Entry::Hash(hash)) => hash.clone(),
            Some(_) => return Err(wrong_type(hash_key, "hash")),
        };
        let list = match data.get(list_key) {
            None => Vec::new(),
            Some(Entry::List(list)) => list.clone(),
            Some(_) => return Err(wrong_type(list_key, "list")),
        };
        Ok((hash, list))
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        match self.data.read().unwrap().get(key) {
            None => Ok(Vec::new()),
            Some(Entry::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key, "set")),
        }
    }

    async fn set_size(&self, key: &str) -> StoreResult<u64> {
        match self.data.read().unwrap().get(key) {
            None => Ok(0),
            Some(Entry::Set(set)) => Ok(set.len() as u64),
            Some(_) => Err(wrong_type(key, "set")),
        }
    }

    async fn sorted_set_range_desc(
        &self,
        key: &str,
        limit: Option<usize>,
    ) -> StoreResult<Vec<String>> {
        match self.data.read().unwrap().get(key) {
            None => Ok(Vec::new()),
            Some(Entry::SortedSet(zset)) => {
                let iter = zset.iter().rev().map(|(_, m)| m.clone());
                Ok(match limit {
                    Some(limit) => iter.take(limit).collect(),
                    None => iter.collect(),
                })
            }
            Some(_) => Err(wrong_type(key, "sorted set")),
        }
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> StoreResult<Vec<String>> {
        match self.data.read().unwrap().get(key) {
            None => Ok(Vec::new()),
            Some(Entry::SortedSet(zset)) => Ok(zset
                .iter()
                .filter(|(score, _)| (min..=max).contains(score))
                .map(|(_, m)| m.clone())
                .collect()),
            Some(_) => Err(wrong_type(key, "sorted set")),
        }
    }

    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .data
            .read()
            .unwrap()
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect())
    }

    async fn write(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut data = self.data.write().unwrap();
        let mut next = data.clone();
        for command in batch.commands {
            apply(&mut next, command)?;
        }
        *data = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(commands: Vec<WriteCommand>) -> WriteBatch {
        WriteBatch { commands }
    }

    #[tokio::test]
    async fn test_hash_roundtrip() {
        let store = MemoryStore::new();
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), "RUNNING".to_string());
        fields.insert("application".to_string(), "myapp".to_string());

        store
            .write(batch(vec![WriteCommand::HashSet {
                key: "pipeline:1".to_string(),
                fields,
            }]))
            .await
            .unwrap();

        assert!(store.exists("pipeline:1").await.unwrap());
        assert_eq!(
            store.hash_get("pipeline:1", "status").await.unwrap(),
            Some("RUNNING".to_string())
        );
        assert_eq!(store.hash_get("pipeline:1", "missing").await.unwrap(), None);
        assert_eq!(store.hash_get_all("pipeline:1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_absent_keys_read_empty() {
        let store = MemoryStore::new();
        assert!(!store.exists("nope").await.unwrap());
        assert!(store.set_members("nope").await.unwrap().is_empty());
        assert!(store.hash_get_all("nope").await.unwrap().is_empty());
        assert_eq!(store.set_size("nope").await.unwrap(), 0);
        assert!(store
            .sorted_set_range_desc("nope", None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let store = MemoryStore::new();
        let mut b = WriteBatch::new();
        b.set("key", "value");
        store.write(b).await.unwrap();

        assert!(matches!(
            store.hash_get("key", "f").await,
            Err(StoreError::WrongType { .. })
        ));

        let mut b = WriteBatch::new();
        b.set_add("key", "member");
        assert!(store.write(b).await.is_err());
        // The failed batch left the original value in place.
        assert_eq!(store.get("key").await.unwrap(), Some("value".to_string()));
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let store = MemoryStore::new();
        let mut b = WriteBatch::new();
        b.set("a", "1");
        b.set_add("a", "oops"); // fails: "a" is a string
        assert!(store.write(b).await.is_err());
        assert!(!store.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_sorted_set_ordering() {
        let store = MemoryStore::new();
        let mut b = WriteBatch::new();
        b.sorted_set_add("z", "old", 100);
        b.sorted_set_add("z", "new", 300);
        b.sorted_set_add("z", "mid", 200);
        store.write(b).await.unwrap();

        assert_eq!(
            store.sorted_set_range_desc("z", None).await.unwrap(),
            vec!["new", "mid", "old"]
        );
        assert_eq!(
            store.sorted_set_range_desc("z", Some(2)).await.unwrap(),
            vec!["new", "mid"]
        );
        assert_eq!(
            store.sorted_set_range_by_score("z", 150, 250).await.unwrap(),
            vec!["mid"]
        );

        // Re-adding a member replaces its score.
        let mut b = WriteBatch::new();
        b.sorted_set_add("z", "old", 400);
        store.write(b).await.unwrap();
        assert_eq!(
            store.sorted_set_range_desc("z", Some(1)).await.unwrap(),
            vec!["old"]
        );
    }

    #[tokio::test]
    async fn test_list_insert_before_and_after() {
        let store = MemoryStore::new();
        let mut b = WriteBatch::new();
        b.list_push("index", vec!["s1".to_string(), "s2".to_string()]);
        b.list_insert("index", ListPosition::Before, "s2", "syn-before");
        b.list_insert("index", ListPosition::After, "s2", "syn-after");
        store.write(b).await.unwrap();

        let (_, list) = store.hash_with_list("none", "index").await.unwrap();
        assert_eq!(list, vec!["s1", "syn-before", "s2", "syn-after"]);
    }

    #[tokio::test]
    async fn test_emptied_collections_disappear() {
        let store = MemoryStore::new();
        let mut b = WriteBatch::new();
        b.set_add("s", "only");
        store.write(b).await.unwrap();
        assert!(store.exists("s").await.unwrap());

        let mut b = WriteBatch::new();
        b.set_remove("s", "only");
        store.write(b).await.unwrap();
        assert!(!store.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_keys_glob() {
        let store = MemoryStore::new();
        let mut b = WriteBatch::new();
        b.set_add("pipeline:app:foo", "1");
        b.set_add("pipeline:app:bar", "2");
        b.set_add("orchestration:app:foo", "3");
        b.set_add("pipeline:executions:cfg", "4");
        store.write(b).await.unwrap();

        let mut keys = store.scan_keys("pipeline:app:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["pipeline:app:bar", "pipeline:app:foo"]);

        let keys = store.scan_keys("*:app:*").await.unwrap();
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("a*c", "abc"));
        assert!(glob_match("a*c", "ac"));
        assert!(!glob_match("a*c", "ab"));
        assert!(glob_match("*:app:*", "pipeline:app:foo"));
        assert!(!glob_match("pipeline:app:*", "orchestration:app:foo"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }
}
