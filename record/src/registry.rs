use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::DbRecord;

/// `(Row, Arc<dyn RecordBackend>, Table) -> T`, boxed so the registry can
/// hold one per type behind a single `Any` slot.
type Factory<T> = Arc<dyn Fn(DbRecord) -> T + Send + Sync>;

fn registry() -> &'static RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Registers the process-wide factory for `T`. Call once,
/// typically from generated code, before any `queryTyped::<T>` surface runs.
pub fn register<T: 'static>(factory: impl Fn(DbRecord) -> T + Send + Sync + 'static) {
    let boxed: Factory<T> = Arc::new(factory);
    registry().write().unwrap().insert(TypeId::of::<T>(), Box::new(boxed));
}

/// Looks up the factory for `T` and applies it to `record`. Panics naming
/// the type if `T` was never registered — "fails loudly on first call"
///, since a missing registration is a programmer error, not
/// a recoverable runtime condition.
pub fn build<T: 'static>(record: DbRecord) -> T {
    let guard = registry().read().unwrap();
    let factory = guard
        .get(&TypeId::of::<T>())
        .unwrap_or_else(|| panic!("no typed-record factory registered for {}", std::any::type_name::<T>()))
        .downcast_ref::<Factory<T>>()
        .expect("factory registry entry had the wrong type for its own TypeId");
    factory(record)
}

/// Whether a factory has been registered for `T`, without panicking.
pub fn is_registered<T: 'static>() -> bool {
    registry().read().unwrap().contains_key(&TypeId::of::<T>())
}
