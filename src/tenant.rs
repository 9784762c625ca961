use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::calendar::Calendar;
use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;

/// One engine per organization, created on first use. Each gets its own WAL
/// under the data directory and its own compactor task.
/// Organization = database name from the pgwire connection.
pub struct OrganizationManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    calendar: Calendar,
}

/// Keep `[A-Za-z0-9_-]` only, so the name is safe as a file name.
pub fn sanitize_name(organization: &str) -> io::Result<String> {
    if organization.len() > MAX_ORG_NAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "organization name too long",
        ));
    }
    let safe: String = organization
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty organization name",
        ));
    }
    Ok(safe)
}

impl OrganizationManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, calendar: Calendar) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            calendar,
        }
    }

    /// Get or lazily load the engine of an organization.
    pub fn get_or_create(&self, organization: &str) -> io::Result<Arc<Engine>> {
        let name = sanitize_name(organization)?;
        if let Some(engine) = self.engines.get(&name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_ORGANIZATIONS {
            return Err(io::Error::other("too many organizations"));
        }

        let engine = match self.engines.entry(name) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{}.wal", slot.key()));
                let engine = Arc::new(Engine::new(slot.key().clone(), wal_path, self.calendar)?);
                slot.insert(engine.clone());
                engine
            }
        };

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        info!(organization = engine.organization_id(), "organization opened");
        metrics::gauge!(crate::observability::ORGANIZATIONS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
