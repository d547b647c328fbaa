use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Interned string id used for metric names, tag keys and tag values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(u32);

impl From<u32> for KeyId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

#[derive(Default, Debug)]
struct Strings {
    ids: HashMap<Arc<str>, u32>,
    names: Vec<Arc<str>>,
}

/// Append-only string interner. Ids are dense and never reused.
#[derive(Default, Debug)]
pub struct Interner {
    inner: RwLock<Strings>,
}

impl Interner {
    pub fn get_or_intern(&self, s: &str) -> KeyId {
        if let Some(&id) = self.inner.read().ids.get(s) {
            return KeyId(id);
        }

        let mut inner = self.inner.write();
        // Another writer may have won between the two locks.
        if let Some(&id) = inner.ids.get(s) {
            return KeyId(id);
        }

        let id = inner.names.len() as u32;
        let s: Arc<str> = Arc::from(s);
        inner.names.push(s.clone());
        inner.ids.insert(s, id);
        KeyId(id)
    }

    pub fn lookup(&self, s: &str) -> Option<KeyId> {
        self.inner.read().ids.get(s).copied().map(KeyId)
    }

    pub fn resolve(&self, id: KeyId) -> Option<Arc<str>> {
        self.inner.read().names.get(id.0 as usize).cloned()
    }
}
