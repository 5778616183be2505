use std::collections::BTreeMap;

use crate::{error::ControlError, servo::ServoState};

/// What a lookup demands of the servo it finds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Any registered servo, online or not. Used by discovery.
    Registered,
    /// Registered and not offline.
    Connected,
}

/// Servos keyed and ordered by id.
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    servos: BTreeMap<u8, ServoState>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, servo: ServoState) -> Result<(), ControlError> {
        if self.servos.contains_key(&servo.id) {
            return Err(ControlError::DuplicateId(servo.id));
        }
        self.servos.insert(servo.id, servo);
        Ok(())
    }

    pub fn remove(&mut self, id: u8) -> Result<ServoState, ControlError> {
        self.servos.remove(&id).ok_or(ControlError::UnknownId(id))
    }

    pub fn contains(&self, id: u8) -> bool {
        self.servos.contains_key(&id)
    }

    pub fn get(&self, id: u8) -> Option<&ServoState> {
        self.servos.get(&id)
    }

    pub fn get_mut(&mut self, id: u8) -> Option<&mut ServoState> {
        self.servos.get_mut(&id)
    }

    pub fn resolve(&mut self, id: u8, access: Access) -> Result<&mut ServoState, ControlError> {
        let servo = self.servos.get_mut(&id).ok_or(ControlError::UnknownId(id))?;
        if access == Access::Connected && !servo.is_online() {
            return Err(ControlError::NotConnected(id));
        }
        Ok(servo)
    }

    /// Re-key a servo. Either both steps happen or neither does.
    pub fn rename(&mut self, old: u8, new: u8) -> Result<(), ControlError> {
        if !self.servos.contains_key(&old) {
            return Err(ControlError::UnknownId(old));
        }
        if self.servos.contains_key(&new) {
            return Err(ControlError::DuplicateId(new));
        }
        let mut servo = self.remove(old)?;
        servo.id = new;
        self.servos.insert(new, servo);
        Ok(())
    }

    pub fn ids(&self) -> Vec<u8> {
        self.servos.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServoState> {
        self.servos.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ServoState> {
        self.servos.values_mut()
    }

    pub fn len(&self) -> usize {
        self.servos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servos.is_empty()
    }

    pub fn clear(&mut self) {
        self.servos.clear();
    }
}
