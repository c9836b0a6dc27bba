//! Persistence abstraction for instances, tenants, relations and the catalog.
//!
//! The coordinator and handlers only see domain rows, never the backing
//! database.
//!
//! # Architecture
//!
//! ```text
//! DefaultHandler → Arc<dyn DataStore>
//!                       ↓
//!                 store.get_tenant(id)           // key lookup
//!                 store.find_instance(e, v, az)  // filter by fields
//!                 store.save_instance(&row)      // upsert
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use addon_deployer::store::{CatalogStore, InstanceStore, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! store.register_addon(definition).await;
//! store.register_addon_version(version).await;
//!
//! let live = store.find_instance("nacos", "2.0.0", "az1").await?;
//! ```

mod error;
mod memory;
mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use traits::*;
