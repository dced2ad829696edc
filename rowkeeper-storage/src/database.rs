//! Database handle and connection lifecycle

use crate::StorageEngine;
use rowkeeper_core::{RowkeeperResult, StorageError, StoreConfig};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Opens engines over one underlying store.
pub trait Connector: Send + Sync {
    fn open_writable(&self) -> RowkeeperResult<Arc<dyn StorageEngine>>;

    fn open_readable(&self) -> RowkeeperResult<Arc<dyn StorageEngine>>;
}

/// The single shared connection to a store.
///
/// Open and close take the write lock; statement dispatch clones the open
/// engine under the read lock, so a query never runs against a connection
/// that is mid-transition.
pub struct Database {
    connector: Box<dyn Connector>,
    config: StoreConfig,
    engine: RwLock<Option<Arc<dyn StorageEngine>>>,
}

impl Database {
    pub fn new(connector: impl Connector + 'static, config: StoreConfig) -> Self {
        Self {
            connector: Box::new(connector),
            config,
            engine: RwLock::new(None),
        }
    }

    /// Validate the configuration and open for writing.
    pub fn open(connector: impl Connector + 'static, config: StoreConfig) -> RowkeeperResult<Self> {
        config.validate()?;
        let database = Self::new(connector, config);
        database.open_for_writing()?;
        Ok(database)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Open for writing. When that fails and the configuration allows it,
    /// fall back to a read-only connection. A no-op when already open.
    pub fn open_for_writing(&self) -> RowkeeperResult<()> {
        let mut engine = self.engine.write().map_err(|_| StorageError::LockPoisoned)?;
        if engine.is_some() {
            return Ok(());
        }

        match self.connector.open_writable() {
            Ok(opened) => {
                debug!(read_only = opened.is_read_only(), "Opened database for writing");
                *engine = Some(opened);
                Ok(())
            }
            Err(e) if self.config.read_only_fallback => {
                warn!(error = %e, "Opening for writing failed, falling back to read-only");
                *engine = Some(self.connector.open_readable()?);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Open read-only. A no-op when already open.
    pub fn open_for_reading(&self) -> RowkeeperResult<()> {
        let mut engine = self.engine.write().map_err(|_| StorageError::LockPoisoned)?;
        if engine.is_none() {
            *engine = Some(self.connector.open_readable()?);
            debug!("Opened database for reading");
        }
        Ok(())
    }

    /// Drop the open engine. Statements already holding it finish first.
    pub fn close(&self) -> RowkeeperResult<()> {
        let mut engine = self.engine.write().map_err(|_| StorageError::LockPoisoned)?;
        if engine.take().is_some() {
            debug!("Closed database");
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.engine.read().map(|e| e.is_some()).unwrap_or(false)
    }

    /// The open engine.
    pub fn engine(&self) -> RowkeeperResult<Arc<dyn StorageEngine>> {
        let engine = self.engine.read().map_err(|_| StorageError::LockPoisoned)?;
        engine.clone().ok_or_else(|| StorageError::NotOpen.into())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("open", &self.is_open())
            .finish()
    }
}
