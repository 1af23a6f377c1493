//! Logical endpoint names
//!
//! Ports are opened against names like "directory" or "station7:hba0".
//! The resolver maps them to concrete transport addresses so task code
//! never hard-wires endpoints.

use std::collections::HashMap;

use parking_lot::RwLock;

use meridian_core::{MeridianError, MeridianResult};

use crate::channel::ChannelAddr;

/// Table-driven resolver populated at startup
#[derive(Default)]
pub struct StaticResolver {
    entries: RwLock<HashMap<String, ChannelAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        StaticResolver::default()
    }

    /// Resolver with a single entry
    pub fn single(name: impl Into<String>, addr: ChannelAddr) -> Self {
        let resolver = StaticResolver::new();
        resolver.insert(name, addr);
        resolver
    }

    pub fn insert(&self, name: impl Into<String>, addr: ChannelAddr) {
        self.entries.write().insert(name.into(), addr);
    }

    pub fn resolve(&self, name: &str) -> MeridianResult<ChannelAddr> {
        self.entries.read().get(name).cloned().ok_or_else(|| {
            MeridianError::AddressResolution(format!("unknown endpoint {:?}", name))
        })
    }
}
