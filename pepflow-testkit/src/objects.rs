use async_trait::async_trait;
use parking_lot::Mutex;
use pepflow::object_store::{ObjectStore, ObjectStoreError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Object store held in memory. Puts under a configured prefix, and deletes,
/// can be made to fail.
#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    state: Arc<Mutex<ObjectState>>,
}

#[derive(Default)]
struct ObjectState {
    objects: BTreeMap<String, Vec<u8>>,
    failing_put_prefixes: Vec<String>,
    fail_deletes: bool,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.state.lock().objects.insert(key.into(), bytes.into());
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().objects.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().objects.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().objects.keys().cloned().collect()
    }

    /// Every subsequent put whose key starts with `prefix` fails with a
    /// backend error.
    pub fn fail_puts_under(&self, prefix: impl Into<String>) {
        self.state.lock().failing_put_prefixes.push(prefix.into());
    }

    /// Makes every subsequent `delete` and `delete_prefix` fail.
    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().fail_deletes = fail;
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing_put_prefixes.clear();
        state.fail_deletes = false;
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state
            .failing_put_prefixes
            .iter()
            .any(|prefix| key.starts_with(prefix.as_str()))
        {
            return Err(ObjectStoreError::Backend(format!("put rejected for {key}")).into());
        }
        state.objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        self.object(key)
            .ok_or_else(|| ObjectStoreError::NoSuchKey(key.to_string()).into())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.fail_deletes {
            return Err(ObjectStoreError::Backend(format!("delete rejected for {key}")).into());
        }
        state.objects.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> anyhow::Result<u64> {
        let mut state = self.state.lock();
        if state.fail_deletes {
            return Err(ObjectStoreError::Backend(format!("delete rejected under {prefix}")).into());
        }
        let before = state.objects.len();
        state.objects.retain(|key, _| !key.starts_with(prefix));
        Ok((before - state.objects.len()) as u64)
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
