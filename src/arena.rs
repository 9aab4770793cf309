//! Arena-indexed storage for nodes, resources, actions and colocations.
//!
//! Cross-references between nodes, resources, actions, and colocations run
//! in every direction. Rather than back-pointers, every cross-reference
//! here is a stable, `Copy` index into a [`slab::Slab`]-backed arena rather than a
//! pointer or `Rc`/`Weak` pair. A "null" reference is `Option<Id>`, never a
//! sentinel baked into the index space itself.

use slab::Slab;
use std::fmt;
use std::marker::PhantomData;

macro_rules! arena_id {
    ($name:ident) => {
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

arena_id!(NodeId);
arena_id!(ResourceId);
arena_id!(ActionId);
arena_id!(ColocationId);
arena_id!(OrderingId);

/// A generic arena. Insertion returns a stable id; removal is supported but
/// unused in the scheduling core proper (the working set is built once per
/// pass and discarded whole rather than mutated incrementally).
pub struct Arena<T, Id> {
    slab: Slab<T>,
    _marker: PhantomData<Id>,
}

impl<T, Id> Default for Arena<T, Id> {
    fn default() -> Self {
        Arena {
            slab: Slab::new(),
            _marker: PhantomData,
        }
    }
}

pub trait ArenaId: Copy {
    fn from_index(index: usize) -> Self;
    fn to_index(self) -> usize;
}

macro_rules! impl_arena_id {
    ($name:ident) => {
        impl ArenaId for $name {
            fn from_index(index: usize) -> Self {
                $name(index)
            }
            fn to_index(self) -> usize {
                self.0
            }
        }
    };
}

impl_arena_id!(NodeId);
impl_arena_id!(ResourceId);
impl_arena_id!(ActionId);
impl_arena_id!(ColocationId);
impl_arena_id!(OrderingId);

impl<T, Id: ArenaId> Arena<T, Id> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: T) -> Id {
        Id::from_index(self.slab.insert(value))
    }

    /// Insert a value built from its own about-to-be-assigned id. Useful
    /// for arena-stored structs that carry a self-referential `id` field
    /// (`Action::id`, `Ordering::id`, ...).
    pub fn insert_with(&mut self, build: impl FnOnce(Id) -> T) -> Id {
        let entry = self.slab.vacant_entry();
        let id = Id::from_index(entry.key());
        entry.insert(build(id));
        id
    }

    pub fn get(&self, id: Id) -> Option<&T> {
        self.slab.get(id.to_index())
    }

    pub fn get_mut(&mut self, id: Id) -> Option<&mut T> {
        self.slab.get_mut(id.to_index())
    }

    pub fn len(&self) -> usize {
        self.slab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }

    /// Iterate in insertion order. Callers that need a deterministic
    /// *output* order must still sort by
    /// a documented key (typically lexicographic id) rather than relying on
    /// this order alone, since arena indices are an artifact of insertion
    /// sequence, not a semantic key.
    pub fn iter(&self) -> impl Iterator<Item = (Id, &T)> {
        self.slab.iter().map(|(i, v)| (Id::from_index(i), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Id, &mut T)> {
        self.slab.iter_mut().map(|(i, v)| (Id::from_index(i), v))
    }

    pub fn ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.slab.iter().map(|(i, _)| Id::from_index(i))
    }
}
