//! In-memory register bank for demos and tests.

use crate::slave::RegisterStore;

/// A contiguous bank of holding registers starting at address 0.
/// Accesses are served for the in-range prefix of a request; anything
/// past the end is refused.
#[derive(Debug, Clone)]
pub struct RegisterBank {
    values: Vec<u16>,
}

impl RegisterBank {
    pub fn new(values: Vec<u16>) -> Self {
        Self { values }
    }

    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, address: u16) -> Option<u16> {
        self.values.get(usize::from(address)).copied()
    }

    pub fn set(&mut self, address: u16, value: u16) -> bool {
        match self.values.get_mut(usize::from(address)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

impl RegisterStore for RegisterBank {
    fn load(&mut self, address: u16, out: &mut [u16]) -> usize {
        let start = usize::from(address);
        if start >= self.values.len() {
            return 0;
        }
        let available = &self.values[start..];
        let served = out.len().min(available.len());
        out[..served].copy_from_slice(&available[..served]);
        served
    }

    fn store(&mut self, address: u16, values: &[u16]) -> usize {
        let start = usize::from(address);
        if start >= self.values.len() {
            return 0;
        }
        let room = self.values.len() - start;
        let accepted = values.len().min(room);
        self.values[start..start + accepted].copy_from_slice(&values[..accepted]);
        accepted
    }
}
