//! The contract for values that cross the store boundary.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::handle::Ref;

/// A value that can be placed in the store, either directly or inside a
/// map entry.
///
/// Plain data types only need the supertraits; the two methods drive the
/// managed-object protocol. When [`managed_handle`](Storable::managed_handle)
/// returns a handle, the value is a first-class store citizen: the map
/// records the handle directly and never takes responsibility for the
/// object's lifetime. Otherwise the map *boxes* the value - allocates a
/// store object holding it - and owns that box until the entry is removed
/// or overwritten.
///
/// [`from_managed`](Storable::from_managed) is the inverse: rebuild a
/// value of this type from the handle the map recorded. Any type whose
/// `managed_handle` can return `Some` must rebuild from that handle.
pub trait Storable: Serialize + DeserializeOwned + Clone {
    /// Handle of the store object backing this value, when the value is
    /// itself a store citizen.
    fn managed_handle(&self) -> Option<Ref> {
        None
    }

    /// Rebuilds a citizen value from its recorded handle.
    fn from_managed(handle: Ref) -> Option<Self> {
        let _ = handle;
        None
    }
}

macro_rules! plain_storable {
    ($($t:ty),* $(,)?) => {
        $(impl Storable for $t {})*
    };
}

plain_storable!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    usize,
    i8,
    i16,
    i32,
    i64,
    isize,
    f32,
    f64,
    String,
);

impl<T: Storable> Storable for Option<T> {}

impl<T: Storable> Storable for Vec<T> {}

impl<A: Storable, B: Storable> Storable for (A, B) {}

/// A value type mixing plain data with store citizens in one map.
///
/// `Inline` values are boxed by the map; `Citizen` values are recorded by
/// handle and their lifetime stays with whoever created them in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stored<T> {
    Inline(T),
    Citizen(Ref),
}

impl<T: Storable> Storable for Stored<T> {
    fn managed_handle(&self) -> Option<Ref> {
        match self {
            Stored::Inline(_) => None,
            Stored::Citizen(handle) => Some(*handle),
        }
    }

    fn from_managed(handle: Ref) -> Option<Self> {
        Some(Stored::Citizen(handle))
    }
}
