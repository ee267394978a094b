//! Per-request state shared between pipeline members.
//!
//! One slot per member name, created empty when the stack starts a
//! request. A member writes its own slot with [`SharedState::set_for`]
//! and reads any slot by name, downcasting to the type it expects.
//! The state lives for one request and is only touched by the sequential
//! traversal, so it has no locking.

use std::any::Any;

use indexmap::IndexMap;

use crate::member::{ChannelMember, HttpMember};

type Slot = Option<Box<dyn Any + Send + Sync>>;

/// Name-keyed, type-erased state of one request.
#[derive(Default)]
pub struct SharedState {
    slots: IndexMap<String, Slot>,
}

impl SharedState {
    /// Creates a state with an empty slot for each name.
    #[must_use]
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            slots: names.into_iter().map(|n| (n.to_string(), None)).collect(),
        }
    }

    /// Returns the value in `name`'s slot if it holds a `T`.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<&T> {
        self.slots.get(name)?.as_ref()?.downcast_ref::<T>()
    }

    /// Returns the value in `name`'s slot mutably if it holds a `T`.
    pub fn get_mut<T: Any + Send + Sync>(&mut self, name: &str) -> Option<&mut T> {
        self.slots.get_mut(name)?.as_mut()?.downcast_mut::<T>()
    }

    /// Writes `value` into `name`'s slot, creating the slot if needed.
    pub fn set<T: Any + Send + Sync>(&mut self, name: &str, value: T) {
        self.slots.insert(name.to_string(), Some(Box::new(value)));
    }

    /// Writes `value` into the slot of an HTTP member.
    pub fn set_for<M, T>(&mut self, member: &M, value: T)
    where
        M: HttpMember + ?Sized,
        T: Any + Send + Sync,
    {
        self.set(member.name(), value);
    }

    /// Writes `value` into the slot of a channel member.
    pub fn set_for_channel<M, T>(&mut self, member: &M, value: T)
    where
        M: ChannelMember + ?Sized,
        T: Any + Send + Sync,
    {
        self.set(member.name(), value);
    }

    /// Returns true if a slot exists for `name`, empty or not.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Returns true if `name`'s slot holds a value.
    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.slots.get(name).is_some_and(Option::is_some)
    }

    /// Returns the slot names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.slots.iter().map(|(k, v)| (k, v.is_some())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_start_empty() {
        let state = SharedState::new(["auth", "logger"]);
        assert!(state.contains("auth"));
        assert!(!state.is_set("auth"));
        assert!(state.get::<u32>("auth").is_none());
        assert_eq!(state.names().collect::<Vec<_>>(), vec!["auth", "logger"]);
    }

    #[test]
    fn test_set_and_downcast() {
        let mut state = SharedState::new(["auth"]);
        state.set("auth", "user-1".to_string());
        assert_eq!(state.get::<String>("auth").map(String::as_str), Some("user-1"));
        assert!(state.get::<u32>("auth").is_none());

        state.get_mut::<String>("auth").unwrap().push_str("-x");
        assert_eq!(state.get::<String>("auth").unwrap(), "user-1-x");
    }

    #[test]
    fn test_duplicate_names_share_a_slot() {
        let mut state = SharedState::new(["a", "a"]);
        assert_eq!(state.names().count(), 1);
        state.set("a", 1_u8);
        assert_eq!(state.get::<u8>("a"), Some(&1));
    }
}
