use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::shape::{Kinematics, Shape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEventKind {
    Enter,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    pub trigger: TriggerHandle,
    pub particle_id: u32,
    pub tag: u32,
    pub kind: TriggerEventKind,
}

pub type TriggerCallback = Box<dyn FnMut(&TriggerEvent) + Send>;

/// Handlers registered together with a trigger. Both are optional.
#[derive(Default)]
pub struct TriggerCallbacks {
    pub on_enter: Option<TriggerCallback>,
    pub on_exit: Option<TriggerCallback>,
}

impl TriggerCallbacks {
    pub fn new() -> TriggerCallbacks {
        TriggerCallbacks::default()
    }

    pub fn on_enter(mut self, f: impl FnMut(&TriggerEvent) + Send + 'static) -> TriggerCallbacks {
        self.on_enter = Some(Box::new(f));
        self
    }

    pub fn on_exit(mut self, f: impl FnMut(&TriggerEvent) + Send + 'static) -> TriggerCallbacks {
        self.on_exit = Some(Box::new(f));
        self
    }

    pub fn dispatch(&mut self, event: &TriggerEvent) {
        let callback = match event.kind {
            TriggerEventKind::Enter => self.on_enter.as_mut(),
            TriggerEventKind::Exit => self.on_exit.as_mut(),
        };
        if let Some(callback) = callback {
            callback(event);
        }
    }
}

impl std::fmt::Debug for TriggerCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerCallbacks")
            .field("on_enter", &self.on_enter.is_some())
            .field("on_exit", &self.on_exit.is_some())
            .finish()
    }
}

/// A volume that tracks which particles are inside it between steps.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub shape: Shape,
    pub kinematics: Kinematics,

    /// particle id -> tag of every particle inside after the last evaluation
    inside: BTreeMap<u32, u32>,
}

impl Trigger {
    pub fn new(shape: Shape, kinematics: Kinematics) -> Trigger {
        Trigger {
            shape,
            kinematics,
            inside: BTreeMap::new(),
        }
    }

    pub fn inside(&self) -> &BTreeMap<u32, u32> {
        &self.inside
    }

    /// Replaces the inside set and returns one event per transition, exits first, each in particle id order.
    pub fn update(&mut self, handle: TriggerHandle, now_inside: BTreeMap<u32, u32>) -> Vec<TriggerEvent> {
        let mut events = Vec::new();

        for (&particle_id, &tag) in &self.inside {
            if !now_inside.contains_key(&particle_id) {
                events.push(TriggerEvent {
                    trigger: handle,
                    particle_id,
                    tag,
                    kind: TriggerEventKind::Exit,
                });
            }
        }

        for (&particle_id, &tag) in &now_inside {
            if !self.inside.contains_key(&particle_id) {
                events.push(TriggerEvent {
                    trigger: handle,
                    particle_id,
                    tag,
                    kind: TriggerEventKind::Enter,
                });
            }
        }

        self.inside = now_inside;
        events
    }
}
