//! Storage location with injectable failures.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use strata_core::{FileMeta, StorageTier, TenantContext};
use strata_storage::{FilesystemLocation, StorageError, StorageLocation, StorageResult, StoredFile};

/// A filesystem location whose operations can be made to fail or panic.
pub struct FlakyLocation {
    inner: FilesystemLocation,
    pub fail_store: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_restore: AtomicBool,
    pub panic_on_store: AtomicBool,
    pub stores: AtomicUsize,
    pub deletes: AtomicUsize,
    pub restores: AtomicUsize,
}

#[allow(dead_code)]
impl FlakyLocation {
    pub async fn new(name: &str, tier: StorageTier, root: &Path) -> Self {
        Self {
            inner: FilesystemLocation::new(name, tier, root, true)
                .await
                .expect("create filesystem location"),
            fail_store: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_restore: AtomicBool::new(false),
            panic_on_store: AtomicBool::new(false),
            stores: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            restores: AtomicUsize::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        self.inner.root()
    }

    pub fn set_fail_store(&self, fail: bool) {
        self.fail_store.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_restore(&self, fail: bool) {
        self.fail_restore.store(fail, Ordering::SeqCst);
    }

    pub fn set_panic_on_store(&self, panic: bool) {
        self.panic_on_store.store(panic, Ordering::SeqCst);
    }

    fn injected(&self, operation: &str) -> StorageError {
        StorageError::Io(std::io::Error::other(format!(
            "injected {operation} failure on {}",
            self.inner.name()
        )))
    }
}

#[async_trait]
impl StorageLocation for FlakyLocation {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn tier(&self) -> StorageTier {
        self.inner.tier()
    }

    async fn store(
        &self,
        ctx: &TenantContext,
        meta: &FileMeta,
        origin_url: &str,
    ) -> StorageResult<StoredFile> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_store.load(Ordering::SeqCst) {
            panic!("injected panic while storing {}", meta.checksum);
        }
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(self.injected("store"));
        }
        self.inner.store(ctx, meta, origin_url).await
    }

    async fn delete(&self, ctx: &TenantContext, url: &str) -> StorageResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(self.injected("delete"));
        }
        self.inner.delete(ctx, url).await
    }

    async fn restore(&self, ctx: &TenantContext, url: &str, dest: &Path) -> StorageResult<u64> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        if self.fail_restore.load(Ordering::SeqCst) {
            return Err(self.injected("restore"));
        }
        self.inner.restore(ctx, url, dest).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }
}
