use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

pub(crate) const NAME_TAG: &str = "Name";

/// A type-erased value stored alongside a request.
#[derive(Clone)]
pub struct TagValue(Arc<dyn Any + Send + Sync>);

impl TagValue {
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T>(&self) -> Option<&T>
    where
        T: Any,
    {
        self.0.downcast_ref::<T>()
    }

    pub fn is<T>(&self) -> bool
    where
        T: Any,
    {
        self.0.is::<T>()
    }
}

impl std::fmt::Debug for TagValue {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("TagValue(..)")
    }
}

/// Out-of-band metadata attached to a request.
///
/// Lookups never fail: a missing key or a value of another type yields
/// `T::default()`. Use [`Tags::get`] to tell a miss apart from a default.
#[derive(Clone, Debug, Default)]
pub struct Tags {
    entries: Arc<BTreeMap<String, TagValue>>,
}

impl Tags {
    pub(crate) fn with(&self, key: impl Into<String>, value: TagValue) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.entries).insert(key.into(), value);
        next
    }

    pub(crate) fn with_all<K, I>(&self, tags: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, TagValue)>,
    {
        let mut next = self.clone();
        let entries = Arc::make_mut(&mut next.entries);
        for (key, value) in tags {
            entries.insert(key.into(), value);
        }
        next
    }

    pub fn get<T>(&self, key: &str) -> Option<&T>
    where
        T: Any,
    {
        self.entries.get(key)?.downcast_ref::<T>()
    }

    pub fn get_or_default<T>(&self, key: &str) -> T
    where
        T: Any + Clone + Default,
    {
        self.get::<T>(key).cloned().unwrap_or_default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
