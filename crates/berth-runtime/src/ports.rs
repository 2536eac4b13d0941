//! Host port reservations.
//!
//! A single table guarded by one lock: host ports are a host-wide resource,
//! so reservations are serialized globally. Critical sections only touch
//! the in-memory table.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use berth_common::config::PortRange;
use berth_common::error::{BerthError, Result};
use berth_common::types::ContainerId;

use crate::container::ContainerRecord;

#[derive(Debug)]
struct Table {
    owners: HashMap<u16, ContainerId>,
    /// Next candidate for automatic allocation, so released ports are not
    /// handed out again immediately.
    cursor: u16,
}

/// Tracks which container owns which host port.
#[derive(Debug)]
pub struct PortAllocator {
    range: PortRange,
    table: Mutex<Table>,
}

impl PortAllocator {
    /// Creates an empty allocator handing out automatic ports from `range`.
    #[must_use]
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            table: Mutex::new(Table {
                owners: HashMap::new(),
                cursor: range.start,
            }),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves `host_port` for `owner`.
    ///
    /// Reserving a port the same container already holds succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::AlreadyBound`] if another container holds it.
    pub fn reserve(&self, host_port: u16, owner: &ContainerId) -> Result<()> {
        let mut table = self.table();
        match table.owners.get(&host_port) {
            Some(current) if current == owner => Ok(()),
            Some(current) => Err(BerthError::AlreadyBound {
                port: host_port,
                owner: current.clone(),
            }),
            None => {
                let _ = table.owners.insert(host_port, owner.clone());
                tracing::debug!(port = host_port, id = %owner, "port reserved");
                Ok(())
            }
        }
    }

    /// Reserves the next free port of the configured range for `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::InvalidSpec`] when every port of the range is taken.
    pub fn reserve_any(&self, owner: &ContainerId) -> Result<u16> {
        let mut table = self.table();
        let span = u32::from(self.range.end - self.range.start) + 1;
        let mut candidate = table.cursor;
        for _ in 0..span {
            if !self.range.contains(candidate) {
                candidate = self.range.start;
            }
            if !table.owners.contains_key(&candidate) {
                let _ = table.owners.insert(candidate, owner.clone());
                table.cursor = if candidate == self.range.end {
                    self.range.start
                } else {
                    candidate + 1
                };
                tracing::debug!(port = candidate, id = %owner, "port allocated");
                return Ok(candidate);
            }
            candidate = if candidate == self.range.end {
                self.range.start
            } else {
                candidate + 1
            };
        }
        Err(BerthError::InvalidSpec {
            message: format!(
                "no free host port in {}..={}",
                self.range.start, self.range.end
            ),
        })
    }

    /// Releases a single port. Releasing a free port is a no-op.
    pub fn release(&self, host_port: u16) {
        if let Some(owner) = self.table().owners.remove(&host_port) {
            tracing::debug!(port = host_port, id = %owner, "port released");
        }
    }

    /// Releases every port held by `owner`, returning them in ascending order.
    pub fn release_all(&self, owner: &ContainerId) -> Vec<u16> {
        let mut table = self.table();
        let mut released: Vec<u16> = table
            .owners
            .iter()
            .filter(|(_, id)| *id == owner)
            .map(|(port, _)| *port)
            .collect();
        for port in &released {
            let _ = table.owners.remove(port);
        }
        released.sort_unstable();
        if !released.is_empty() {
            tracing::debug!(id = %owner, ports = ?released, "ports released");
        }
        released
    }

    /// Returns the current owner of `host_port`.
    #[must_use]
    pub fn owner(&self, host_port: u16) -> Option<ContainerId> {
        self.table().owners.get(&host_port).cloned()
    }

    /// Number of reserved ports.
    #[must_use]
    pub fn reserved_count(&self) -> usize {
        self.table().owners.len()
    }

    /// Replaces the table with the bindings of every record whose state
    /// still holds ports.
    ///
    /// Must run before any new reservation after an engine restart.
    pub fn rebuild<'a>(&self, records: impl IntoIterator<Item = &'a ContainerRecord>) {
        let mut table = self.table();
        table.owners.clear();
        for record in records.into_iter().filter(|r| r.state.holds_ports()) {
            for binding in &record.port_bindings {
                if let Some(other) = table.owners.get(&binding.host_port) {
                    tracing::warn!(
                        port = binding.host_port,
                        id = %record.id,
                        owner = %other,
                        "port claimed by two records, keeping the first"
                    );
                    continue;
                }
                let _ = table
                    .owners
                    .insert(binding.host_port, record.id.clone());
            }
        }
        tracing::info!(reserved = table.owners.len(), "port table rebuilt");
    }
}
