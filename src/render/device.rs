use crate::error::{Error, Result};
use crate::render::Progress;

use log::debug;
use std::collections::{HashMap, HashSet};

/// Backend memory the packed scene buffers are uploaded to.
pub trait Device {
    /// Allocates (or replaces) the named buffer with a copy of `data`.
    fn mem_alloc(&mut self, name: &str, data: &[u8]) -> Result<()>;
    fn mem_read(&self, name: &str) -> Option<&[u8]>;
    fn mem_free(&mut self, name: &str);
    /// Total bytes currently allocated.
    fn mem_used(&self) -> usize;
}

/// Host-memory device with an optional allocation limit.
#[derive(Clone, Debug, Default)]
pub struct MemoryDevice {
    buffers: HashMap<String, Vec<u8>>,
    limit: Option<usize>,
    used: usize,
}

impl MemoryDevice {
    pub fn new() -> MemoryDevice {
        MemoryDevice::default()
    }

    pub fn with_limit(limit: usize) -> MemoryDevice {
        MemoryDevice {limit: Some(limit), ..MemoryDevice::default()}
    }

    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    pub fn buffer_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.buffers.keys().map(|n| n.as_str()).collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl Device for MemoryDevice {
    fn mem_alloc(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let replaced = self.buffers.get(name).map_or(0, |b| b.len());
        let used = self.used - replaced + data.len();
        if let Some(limit) = self.limit {
            if used > limit {
                return Err(Error::OutOfDeviceMemory {name: name.to_string(), bytes: data.len()});
            }
        }
        self.buffers.insert(name.to_string(), data.to_vec());
        self.used = used;
        Ok(())
    }

    fn mem_read(&self, name: &str) -> Option<&[u8]> {
        self.buffers.get(name).map(|b| b.as_slice())
    }

    fn mem_free(&mut self, name: &str) {
        if let Some(buffer) = self.buffers.remove(name) {
            self.used -= buffer.len();
        }
    }

    fn mem_used(&self) -> usize {
        self.used
    }
}

/// Loads the images displacement shaders sample before displacement runs.
pub trait ImageManager {
    fn device_update_slot(&mut self, device: &mut dyn Device, slot: usize, progress: &dyn Progress)
        -> Result<()>;
}

/// Uploads one placeholder texel per slot; stands in for a real image loader.
#[derive(Clone, Debug, Default)]
pub struct ConstantImageManager {
    pub value: f32,
    loaded: HashSet<usize>,
}

impl ConstantImageManager {
    pub fn new(value: f32) -> ConstantImageManager {
        ConstantImageManager {value: value, loaded: HashSet::new()}
    }

    pub fn is_loaded(&self, slot: usize) -> bool {
        self.loaded.contains(&slot)
    }
}

impl ImageManager for ConstantImageManager {
    fn device_update_slot(&mut self, device: &mut dyn Device, slot: usize, progress: &dyn Progress)
        -> Result<()>
    {
        if self.loaded.contains(&slot) {
            return Ok(());
        }
        progress.set_status("Updating Displacement Images", &format!("slot {}", slot));
        device.mem_alloc(&format!("__image_{}", slot), &self.value.to_le_bytes())?;
        debug!("loaded displacement image slot {}", slot);
        self.loaded.insert(slot);
        Ok(())
    }
}
