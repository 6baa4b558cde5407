//! Archive Module
//!
//! Entry point of the engine. An `Archive` owns the page store and the
//! transaction coordinator and hands out edit and read transactions.
//!
//! ## Concurrency Model: Single Writer / Many Readers
//!
//! - **Edits**: at most one `EditTransaction` exists at a time. It works on a
//!   private copy-on-write shadow of the published version and becomes
//!   visible only through a successful `commit`.
//! - **Reads**: any number of `ReadTransaction`s, each pinned to the version
//!   published when it began. Readers never block the writer or each other.
//!
//! ```text
//!   begin_edit ──► EditTransaction ──commit──► publish version n+1
//!                         │                          │
//!                   shadow pages               pending releases
//!                                                    │
//!   begin_read ──► ReadTransaction (pins n) ──close──► reclaim
//! ```

mod coordinator;
mod edit;
mod header;
mod read;
mod table;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{ArchiveError, Result};
use crate::page::{FilePageStore, PageStore};

use coordinator::Coordinator;
use header::Header;

pub use coordinator::ArchiveStats;
pub use edit::EditTransaction;
pub use read::ReadTransaction;
pub use table::AllocationTable;

/// State shared by the archive handle and every transaction it spawned
pub(crate) struct Shared {
    pub(crate) store: Arc<dyn PageStore>,
    pub(crate) coordinator: Coordinator,
    pub(crate) config: Config,
    read_only: bool,
}

/// Handle to an open archive. Cheap to clone; clones share one coordinator.
#[derive(Clone)]
pub struct Archive {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.shared.config.path)
            .field("read_only", &self.shared.read_only)
            .field("version", &self.version())
            .finish()
    }
}

impl Archive {
    // =========================================================================
    // Create / Open
    // =========================================================================

    /// Create a new archive file at `path` with default settings
    pub fn create_new(path: impl AsRef<Path>) -> Result<Self> {
        Self::create(Config::builder().path(path.as_ref()).build())
    }

    /// Open an existing archive file
    pub fn open_existing(path: impl AsRef<Path>, read_only: bool) -> Result<Self> {
        Self::open(Config::builder().path(path.as_ref()).read_only(read_only).build())
    }

    /// Create a new archive file as described by `config`
    ///
    /// Fails if the file already exists.
    pub fn create(config: Config) -> Result<Self> {
        config.validate()?;
        if config.read_only {
            return Err(ArchiveError::ReadOnlyViolation);
        }
        let store = FilePageStore::create(&config.path, config.page_size)?;
        tracing::info!(path = %config.path.display(), page_size = config.page_size, "creating archive");
        Self::create_with_store(Arc::new(store), config)
    }

    /// Open the archive file named by `config.path`
    pub fn open(config: Config) -> Result<Self> {
        let page_size = Header::probe_page_size(&config.path)?;
        let store = FilePageStore::open(&config.path, page_size, config.read_only)?;
        Self::open_with_store(Arc::new(store), config)
    }

    /// Throwaway archive backed by memory
    pub fn create_in_memory(page_size: usize) -> Result<Self> {
        let config = Config::builder().page_size(page_size).build();
        config.validate()?;
        let store = crate::page::MemoryPageStore::new(page_size);
        Self::create_with_store(Arc::new(store), config)
    }

    /// Format `store` as an empty archive at version 0
    pub fn create_with_store(store: Arc<dyn PageStore>, mut config: Config) -> Result<Self> {
        if store.is_read_only() {
            return Err(ArchiveError::ReadOnlyViolation);
        }
        config.page_size = store.page_size();
        config.validate()?;

        let mut table = AllocationTable::derive(0, BTreeMap::new(), Vec::new());
        let header = table.persist(store.as_ref(), &[], || store.allocate())?;
        // Slot 1 stays blank until version 1 is committed
        store.write_page(1, &[])?;
        store.flush()?;
        store.write_page(Header::slot(0), &header.encode())?;
        store.flush()?;

        Ok(Self::assemble(store, table, config))
    }

    /// Load the newest committed version from `store`.
    ///
    /// A header whose allocation table fails to load gives way to the
    /// header in the other slot.
    pub fn open_with_store(store: Arc<dyn PageStore>, mut config: Config) -> Result<Self> {
        let mut newest_error = None;
        let mut loaded = None;
        for header in Header::read_candidates(store.as_ref())? {
            match Self::load_version(store.as_ref(), &header) {
                Ok(table) => {
                    loaded = Some(table);
                    break;
                }
                Err(e) => {
                    tracing::warn!(version = header.version, error = %e, "skipping unreadable version");
                    newest_error.get_or_insert(e);
                }
            }
        }
        let table = match (loaded, newest_error) {
            (Some(table), _) => table,
            (None, Some(e)) => return Err(e),
            (None, None) => return Err(ArchiveError::Corruption("no valid header slot".to_string())),
        };
        config.page_size = store.page_size();

        tracing::info!(
            path = %config.path.display(),
            version = table.version(),
            streams = table.stream_ids().count(),
            read_only = config.read_only || store.is_read_only(),
            "opened archive"
        );
        Ok(Self::assemble(store, table, config))
    }

    fn load_version(store: &dyn PageStore, header: &Header) -> Result<AllocationTable> {
        if header.page_size as usize != store.page_size() {
            return Err(ArchiveError::IncompatibleFormat(format!(
                "archive page size {} does not match store page size {}",
                header.page_size,
                store.page_size()
            )));
        }
        AllocationTable::load(store, header)
    }

    fn assemble(store: Arc<dyn PageStore>, table: AllocationTable, config: Config) -> Self {
        let read_only = config.read_only || store.is_read_only();
        Self {
            shared: Arc::new(Shared {
                store,
                coordinator: Coordinator::new(table),
                config,
                read_only,
            }),
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Wait up to `timeout` (None = forever) for the edit slot.
    ///
    /// `Ok(None)` means the slot stayed busy; retry later. A read-only
    /// archive fails immediately with `ReadOnlyViolation`.
    pub fn begin_edit(&self, timeout: Option<Duration>) -> Result<Option<EditTransaction>> {
        if self.shared.read_only {
            return Err(ArchiveError::ReadOnlyViolation);
        }
        match self.shared.coordinator.acquire_edit(timeout) {
            Some(grant) => Ok(Some(EditTransaction::new(Arc::clone(&self.shared), grant))),
            None => {
                tracing::debug!(?timeout, "edit slot busy");
                Ok(None)
            }
        }
    }

    /// Like `begin_edit`, but a busy slot is `Err(Timeout)`
    pub fn require_edit(&self, timeout: Option<Duration>) -> Result<EditTransaction> {
        self.begin_edit(timeout)?.ok_or(ArchiveError::Timeout)
    }

    /// `require_edit` with the configured edit timeout
    pub fn edit(&self) -> Result<EditTransaction> {
        self.require_edit(self.shared.config.edit_timeout)
    }

    /// Snapshot of the currently published version
    pub fn begin_read(&self) -> ReadTransaction {
        ReadTransaction::new(Arc::clone(&self.shared))
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Currently published version
    pub fn version(&self) -> u64 {
        self.shared.coordinator.published().version()
    }

    pub fn stats(&self) -> ArchiveStats {
        self.shared.coordinator.stats(self.shared.store.page_count())
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn is_read_only(&self) -> bool {
        self.shared.read_only
    }

    pub fn page_size(&self) -> usize {
        self.shared.store.page_size()
    }
}
