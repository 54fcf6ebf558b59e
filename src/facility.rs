use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::seed;

/// Manages per-facility engines. Each facility gets its own Engine + WAL +
/// compactor. Facility = the name a client sends in its Hello line.
pub struct FacilityManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    seed_new: bool,
}

impl FacilityManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, seed_new: bool) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            seed_new,
        }
    }

    /// Get or lazily create an engine for the given facility.
    pub async fn get_or_create(&self, facility: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(facility) {
            return Ok(engine.value().clone());
        }
        if facility.len() > MAX_FACILITY_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "facility name too long",
            ));
        }
        if self.engines.len() >= MAX_FACILITIES {
            return Err(std::io::Error::other("too many facilities"));
        }

        // Sanitize facility name to prevent path traversal
        let safe_name: String = facility
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty facility name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify)?);

        if self.seed_new && engine.kennels.is_empty() {
            seed::seed_default_kennels(&engine)
                .await
                .map_err(std::io::Error::other)?;
        }

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(facility.to_string(), engine.clone());
        metrics::gauge!(crate::observability::FACILITIES_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}
