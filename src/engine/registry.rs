//! Engine registry: one lazily constructed engine per backend kind.

use super::{
    buffer::BufferEngine, disabled::DisabledEngine, fixed::FixedIntervalEngine,
    relational::RelationalEngine, variable::VariableIntervalEngine,
    virtual_feed::{UnconfiguredSource, VirtualEngine, VirtualSource},
    Engine, EngineSettings,
};
use crate::error::{Error, Result};
use crate::models::EngineKind;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

/// Maps backend kinds to live engines.
///
/// Engines are built on first request and kept for the registry's lifetime.
/// Invalid kinds and engines that fail to build resolve to a shared disabled
/// engine, so lookups never fail.
pub struct EngineRegistry {
    settings: EngineSettings,
    virtual_source: Arc<dyn VirtualSource>,
    engines: Mutex<HashMap<EngineKind, Arc<Engine>>>,
    disabled: Arc<Engine>,
}

impl EngineRegistry {
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_virtual_source(settings, Arc::new(UnconfiguredSource))
    }

    pub fn with_virtual_source(settings: EngineSettings, virtual_source: Arc<dyn VirtualSource>) -> Self {
        Self {
            settings,
            virtual_source,
            engines: Mutex::new(HashMap::new()),
            disabled: Arc::new(Engine::Disabled(DisabledEngine)),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn get(&self, kind: EngineKind) -> Arc<Engine> {
        if !kind.is_production() {
            error!("Engine kind {} ({}) is not supported", kind, kind.id());
            return self.disabled.clone();
        }

        let mut engines = self.engines.lock();
        if let Some(engine) = engines.get(&kind) {
            return engine.clone();
        }
        match self.build(kind) {
            Ok(engine) => {
                info!("Autoloaded new instance of {} engine", kind);
                let engine = Arc::new(engine);
                engines.insert(kind, engine.clone());
                engine
            }
            Err(e) => {
                error!("Failed to construct {} engine: {}", kind, e);
                self.disabled.clone()
            }
        }
    }

    /// Resolves a persisted engine id.
    pub fn get_by_id(&self, id: u32) -> Arc<Engine> {
        match EngineKind::from_id(id) {
            Some(kind) => self.get(kind),
            None => {
                error!("Engine id {} is not supported", id);
                self.disabled.clone()
            }
        }
    }

    /// Kinds with a live instance.
    pub fn loaded(&self) -> Vec<EngineKind> {
        let mut kinds: Vec<EngineKind> = self.engines.lock().keys().copied().collect();
        kinds.sort_by_key(|kind| kind.id());
        kinds
    }

    fn build(&self, kind: EngineKind) -> Result<Engine> {
        let datadir = &self.settings.datadir;
        Ok(match kind {
            EngineKind::FixedInterval => Engine::FixedInterval(FixedIntervalEngine::new(datadir.join("fixed"))?),
            EngineKind::VariableInterval => {
                Engine::VariableInterval(VariableIntervalEngine::new(datadir.join("variable"))?)
            }
            EngineKind::RelationalTable => Engine::Relational(RelationalEngine::new(
                &self.settings.relational_connection,
                EngineKind::RelationalTable,
            )?),
            EngineKind::MemoryTable => Engine::Relational(RelationalEngine::new_in_memory(EngineKind::MemoryTable)?),
            EngineKind::Virtual => Engine::Virtual(VirtualEngine::new(self.virtual_source.clone())),
            EngineKind::WriteBuffer => Engine::WriteBuffer(BufferEngine::new(self.settings.buffer_max_points)),
            EngineKind::Columnar => {
                return Err(Error::Unsupported(format!("Engine kind {} cannot be constructed", kind)))
            }
        })
    }
}
