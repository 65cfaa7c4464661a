mod store_db;
mod store_mgr;

#[cfg(test)]
mod store_db_tests;
#[cfg(test)]
mod store_mgr_tests;

pub use store_db::{FsDb, StoreError, StoreResult};
pub use store_mgr::FsStoreMgr;
