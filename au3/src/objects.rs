//! The handle table and object bridge capabilities
//!
//! `Handle` values are opaque ids into a process-wide table of
//! host-managed objects. Member and index access on those objects goes
//! through the [`HostObject`] capability trait; COM objects live in an
//! out-of-process table reached through [`ComConnector`].

use crate::value::Variant;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// Capability implemented by every host object stored in the handle
/// table: named member access, indexed access and member invocation.
pub trait HostObject: Send + Sync {
    fn type_name(&self) -> &str;

    fn get_member(&self, name: &str) -> Option<Variant> {
        let _ = name;
        None
    }

    fn set_member(&self, name: &str, value: Variant) -> bool {
        let _ = (name, value);
        false
    }

    fn invoke_member(&self, name: &str, args: &[Variant]) -> Option<Variant> {
        let _ = (name, args);
        None
    }

    fn get_index(&self, index: &Variant) -> Option<Variant> {
        let _ = index;
        None
    }

    fn set_index(&self, index: &Variant, value: Variant) -> bool {
        let _ = (index, value);
        false
    }

    /// Member names plus whether each one is invokable.
    fn enumerate_members(&self) -> Vec<(String, bool)> {
        Vec::new()
    }
}

/// Bridge to the out-of-process COM object table. The core only asks
/// yes/no-plus-value questions; transport is the host's concern.
pub trait ComConnector: Send + Sync {
    fn create(
        &self,
        classname: &str,
        server: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Option<u32>;

    fn get_index(&self, id: u32, index: &Variant) -> Option<Variant>;
    fn set_index(&self, id: u32, index: &Variant, value: Variant) -> bool;
    fn get_member(&self, id: u32, member: &str) -> Option<Variant>;
    fn set_member(&self, id: u32, member: &str, value: Variant) -> bool;
    fn invoke_member(&self, id: u32, member: &str, args: &[Variant]) -> Option<Variant>;
    fn delete(&self, id: u32) -> bool;
}

/// The process-wide handle table: opaque id → host object.
///
/// Ids start at 1 and fill gaps left by deleted entries. Allocation
/// claims a slot atomically per id, so concurrent stores from several
/// threads cannot race into the same id.
pub struct GlobalObjectStorage {
    objects: DashMap<i64, Arc<dyn HostObject>>,
}

impl GlobalObjectStorage {
    pub fn new() -> Self {
        GlobalObjectStorage {
            objects: DashMap::new(),
        }
    }

    /// Store an object under the lowest free id and return the id.
    pub fn store(&self, object: Arc<dyn HostObject>) -> i64 {
        let mut id = 1;
        loop {
            match self.objects.entry(id) {
                Entry::Vacant(entry) => {
                    entry.insert(object);
                    log::debug!("stored host object under handle 0x{id:08x}");
                    return id;
                }
                Entry::Occupied(_) => id += 1,
            }
        }
    }

    pub fn try_get(&self, id: i64) -> Option<Arc<dyn HostObject>> {
        self.objects.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: i64) -> bool {
        self.objects.contains_key(&id)
    }

    /// Replace the object stored under an id.
    pub fn update(&self, id: i64, object: Arc<dyn HostObject>) {
        self.objects.insert(id, object);
    }

    pub fn delete(&self, id: i64) -> bool {
        self.objects.remove(&id).is_some()
    }

    /// Delete the object a `Handle` value points at. Values of any
    /// other type report failure.
    pub fn delete_handle(&self, handle: &Variant) -> bool {
        match handle.as_handle() {
            Some(id) => self.delete(id),
            None => false,
        }
    }

    pub fn keys(&self) -> Vec<i64> {
        self.objects.iter().map(|entry| *entry.key()).collect()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Drop every stored object. Called at interpreter teardown.
    pub fn clear(&self) {
        self.objects.clear();
    }
}

impl Default for GlobalObjectStorage {
    fn default() -> Self {
        GlobalObjectStorage::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(&'static str);

    impl HostObject for Dummy {
        fn type_name(&self) -> &str {
            self.0
        }

        fn get_member(&self, name: &str) -> Option<Variant> {
            if name.eq_ignore_ascii_case("tag") {
                Some(Variant::from_string(self.0))
            } else {
                None
            }
        }
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let storage = GlobalObjectStorage::new();
        assert_eq!(storage.store(Arc::new(Dummy("a"))), 1);
        assert_eq!(storage.store(Arc::new(Dummy("b"))), 2);
        assert_eq!(storage.store(Arc::new(Dummy("c"))), 3);
        assert_eq!(storage.object_count(), 3);
    }

    #[test]
    fn test_deleted_ids_are_reused() {
        let storage = GlobalObjectStorage::new();
        storage.store(Arc::new(Dummy("a")));
        let second = storage.store(Arc::new(Dummy("b")));
        storage.store(Arc::new(Dummy("c")));
        assert!(storage.delete(second));
        assert_eq!(storage.store(Arc::new(Dummy("d"))), second);
    }

    #[test]
    fn test_delete_handle_requires_handle_value() {
        let storage = GlobalObjectStorage::new();
        let id = storage.store(Arc::new(Dummy("a")));
        assert!(!storage.delete_handle(&Variant::from_number(id as f64)));
        assert!(storage.delete_handle(&Variant::from_handle(id)));
        assert!(!storage.contains(id));
    }

    #[test]
    fn test_member_access_through_stored_object() {
        let storage = GlobalObjectStorage::new();
        let id = storage.store(Arc::new(Dummy("widget")));
        let object = storage.try_get(id).unwrap();
        assert_eq!(object.get_member("TAG"), Some(Variant::from_string("widget")));
        assert_eq!(object.get_member("other"), None);
    }

    #[test]
    fn test_concurrent_store_allocates_distinct_ids() {
        let storage = Arc::new(GlobalObjectStorage::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let storage = Arc::clone(&storage);
            handles.push(std::thread::spawn(move || {
                (0..50)
                    .map(|_| storage.store(Arc::new(Dummy("x"))))
                    .collect::<Vec<_>>()
            }));
        }
        let mut ids: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 400);
    }
}
