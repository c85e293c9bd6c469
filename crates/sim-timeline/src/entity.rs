//! The entity contract and the per-worker entity arena.

use crate::scheduler::Context;
use crate::SimError;
use serde_json::Value;
use sim_events::EntityId;
use std::collections::HashMap;

/// The executed half of a `Process`: the method selector and arguments the
/// target entity dispatches on.
pub struct Call<'a> {
    pub method: &'a str,
    pub args: &'a [Value],
}

/// Base contract of every simulated object.
///
/// Entities hold no timeline back-reference; all kernel access (scheduling,
/// the clock, randomness, the quantum manager) flows through the [`Context`]
/// passed into each invocation. `init` runs exactly once per entity, in
/// registration order, before the first event executes. Handlers are
/// strictly synchronous: anything that "waits" does so by scheduling a
/// future event.
pub trait Entity: Send {
    /// Globally unique name. Uniqueness must hold across the whole worker
    /// group, not just this worker, because cross-worker routing keys on it.
    fn name(&self) -> &str;

    fn init(&mut self, _ctx: &mut Context<'_>) -> Result<(), SimError> {
        Ok(())
    }

    fn handle(&mut self, call: &Call<'_>, ctx: &mut Context<'_>) -> Result<(), SimError>;
}

/// Anything entities can be registered on. Lets component constructors work
/// against sequential and parallel timelines alike.
pub trait EntityRegistry {
    fn add_entity(&mut self, entity: Box<dyn Entity>) -> Result<EntityId, SimError>;

    fn lookup_entity(&self, name: &str) -> Option<EntityId>;
}

/// Flat entity storage plus the name index used to resolve name-owned
/// events at execution. Entities live here for the whole run; handles are
/// plain indices and never dangle.
#[derive(Default)]
pub(crate) struct EntityArena {
    slots: Vec<Box<dyn Entity>>,
    by_name: HashMap<String, EntityId>,
}

impl EntityArena {
    pub fn register(&mut self, entity: Box<dyn Entity>) -> Result<EntityId, SimError> {
        let name = entity.name().to_owned();
        if self.by_name.contains_key(&name) {
            return Err(SimError::DuplicateEntity(name));
        }
        let id = EntityId::from_index(self.slots.len());
        self.by_name.insert(name, id);
        self.slots.push(entity);
        Ok(id)
    }

    pub fn id_of(&self, name: &str) -> Option<EntityId> {
        self.by_name.get(name).copied()
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut (dyn Entity + '_)> {
        match self.slots.get_mut(id.index()) {
            Some(boxed) => Some(boxed.as_mut()),
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Ids in registration order.
    pub fn ids(&self) -> Vec<EntityId> {
        (0..self.slots.len()).map(EntityId::from_index).collect()
    }
}
