//! Ladder registry
//!
//! Owns every open ladder session and hands out opaque [`LadderId`]
//! handles. Slots are reused, but each reuse bumps the slot's generation,
//! so a handle to a closed ladder never resolves to its successor.

use std::fmt;

use ladder_types::errors::LadderError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::session::LadderSession;

/// Handle to one ladder in a [`LadderRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LadderId {
    index: u32,
    generation: u32,
}

impl fmt::Display for LadderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ladder-{}v{}", self.index, self.generation)
    }
}

struct Slot {
    generation: u32,
    session: Option<LadderSession>,
}

/// Sessions by handle.
#[derive(Default)]
pub struct LadderRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl LadderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a session.
    pub fn insert(&mut self, session: LadderSession) -> LadderId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.session = Some(session);
            return LadderId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            session: Some(session),
        });
        LadderId {
            index,
            generation: 0,
        }
    }

    /// Remove and return a session. Its handle stops resolving.
    pub fn remove(&mut self, id: LadderId) -> Result<LadderSession, LadderError> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .ok_or_else(|| unknown(id))?;
        let session = slot.session.take().ok_or_else(|| unknown(id))?;
        self.free.push(id.index);
        self.len -= 1;
        debug!(%id, "Ladder removed");
        Ok(session)
    }

    pub fn get(&self, id: LadderId) -> Result<&LadderSession, LadderError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.session.as_ref())
            .ok_or_else(|| unknown(id))
    }

    pub fn get_mut(&mut self, id: LadderId) -> Result<&mut LadderSession, LadderError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.session.as_mut())
            .ok_or_else(|| unknown(id))
    }

    pub fn contains(&self, id: LadderId) -> bool {
        self.get(id).is_ok()
    }

    /// Live handles in slot order.
    pub fn ids(&self) -> impl Iterator<Item = LadderId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.session.as_ref().map(|_| LadderId {
                index: index as u32,
                generation: slot.generation,
            })
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn unknown(id: LadderId) -> LadderError {
    LadderError::UnknownLadder { id: id.to_string() }
}
