use anyhow::{anyhow, Result};
use log::info;
use vulkanalia::prelude::v1_0::*;

use super::backing::BackingProvider;

/// How the memory backing a pool will be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryUse {
    /// Resources only used by the GPU. Corresponds to the
    /// `DEVICE_LOCAL` flag.
    GpuOnly,
    /// Resources uploaded from the CPU to the GPU. Corresponds to
    /// `DEVICE_LOCAL | HOST_VISIBLE`.
    CpuToGpu,
}

impl MemoryUse {
    pub fn properties(self) -> vk::MemoryPropertyFlags {
        match self {
            MemoryUse::GpuOnly => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryUse::CpuToGpu => {
                vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE
            }
        }
    }
}

/// Provides `vk::DeviceMemory` blocks of a single memory type,
/// chosen once when the provider is created.
pub struct DeviceMemoryProvider {
    device: Device,
    memory_type: u32,
}

impl DeviceMemoryProvider {
    /// Pick the memory type matching `usage` among the ones set in
    /// `memory_type_bits` (as reported by the memory requirements
    /// of the resources that will live in the pool).
    pub fn new(
        instance: &Instance,
        device: &Device,
        physical_device: vk::PhysicalDevice,
        memory_type_bits: u32,
        usage: MemoryUse,
    ) -> Result<Self> {
        let memory_properties = unsafe {
            instance.get_physical_device_memory_properties(physical_device)
        };

        let memory_type = find_memory_type(&memory_properties, memory_type_bits, usage.properties())
            .ok_or_else(|| anyhow!("Failed to find suitable memory type for {usage:?}."))?;
        info!("Selected memory type {memory_type} for {usage:?} pools.");

        Ok(Self {
            device: device.clone(),
            memory_type,
        })
    }

    pub fn memory_type(&self) -> u32 {
        self.memory_type
    }
}

impl BackingProvider for DeviceMemoryProvider {
    type Resource = vk::DeviceMemory;

    fn acquire(&mut self, size: u64) -> Result<vk::DeviceMemory> {
        // The whole pool lives in one allocation of the selected
        // memory type; resources are later bound at the offsets
        // of their regions.
        let memory_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(self.memory_type);

        let memory = unsafe { self.device.allocate_memory(&memory_info, None)? };
        Ok(memory)
    }

    fn release(&mut self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) };
    }
}

fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    memory_type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    // A memory type is suitable if its bit is set in the
    // requirements mask and it has at least the requested
    // property flags.
    (0..memory_properties.memory_type_count).find(|&index| {
        memory_type_bits & (1 << index) != 0
            && memory_properties.memory_types[index as usize]
                .property_flags
                .contains(properties)
    })
}
