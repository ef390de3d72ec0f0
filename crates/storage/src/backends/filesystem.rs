//! Local filesystem storage location.

use crate::error::{StorageError, StorageResult};
use crate::traits::{StorageLocation, StoredFile};
use crate::url::{file_url, local_path};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use strata_core::{Checksum, FileMeta, StorageTier, TenantContext};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;
use uuid::Uuid;

/// Read buffer size for copies (64 KiB).
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// A storage location backed by a local directory.
///
/// Files are laid out as `<root>/<tenant>/<shard>/<checksum>` where the shard
/// is the first two characters of the checksum.
pub struct FilesystemLocation {
    name: String,
    tier: StorageTier,
    root: PathBuf,
    verify_checksums: bool,
}

impl FilesystemLocation {
    /// Create a filesystem location, creating its root directory.
    pub async fn new(
        name: impl Into<String>,
        tier: StorageTier,
        root: impl AsRef<Path>,
        verify_checksums: bool,
    ) -> StorageResult<Self> {
        let name = name.into();
        if !tier.is_physical() {
            return Err(StorageError::Config(format!(
                "filesystem location '{name}' cannot use the {tier} tier"
            )));
        }
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        // Canonical root so containment checks on URLs are exact.
        let root = fs::canonicalize(&root).await?;
        Ok(Self {
            name,
            tier,
            root,
            verify_checksums,
        })
    }

    /// Root directory of the location.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a tenant's file inside the location.
    pub fn file_path(&self, ctx: &TenantContext, checksum: &Checksum) -> StorageResult<PathBuf> {
        let key = format!("{}/{}/{}", ctx.tenant_str(), checksum.shard(), checksum.as_str());
        for component in Path::new(&key).components() {
            match component {
                std::path::Component::Normal(_) => {}
                _ => {
                    return Err(StorageError::InvalidKey(format!(
                        "contains unsafe path component: {key}"
                    )));
                }
            }
        }
        Ok(self.root.join(key))
    }

    /// Resolve a URL previously returned by `store` and check it belongs to
    /// this location and tenant.
    async fn owned_path(&self, ctx: &TenantContext, url: &str) -> StorageResult<PathBuf> {
        let path = local_path(url)?;
        let tenant_root = self.root.join(ctx.tenant_str());

        // Resolve symlinks on the deepest existing ancestor so a link inside the
        // root cannot point the operation elsewhere.
        let mut existing = path.as_path();
        let resolved = loop {
            match fs::canonicalize(existing).await {
                Ok(canonical) => {
                    let rest = path.strip_prefix(existing).unwrap_or(Path::new(""));
                    // Joining an empty path would append a trailing separator
                    if rest.as_os_str().is_empty() {
                        break canonical;
                    }
                    break canonical.join(rest);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => match existing.parent() {
                    Some(parent) => existing = parent,
                    None => break path.clone(),
                },
                Err(e) => return Err(StorageError::Io(e)),
            }
        };

        if !resolved.starts_with(&tenant_root)
            || resolved
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(StorageError::InvalidKey(format!(
                "{url} is outside storage {} for tenant {}",
                self.name,
                ctx.tenant_str()
            )));
        }
        Ok(resolved)
    }

    fn verifies(&self, meta: &FileMeta) -> bool {
        self.verify_checksums && meta.is_sha256()
    }
}

/// Temporary sibling path used for write-then-rename.
fn temp_path_for(path: &Path) -> PathBuf {
    let temp_name = format!(".tmp.{}", Uuid::new_v4());
    path.with_file_name(
        path.file_name()
            .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
            .unwrap_or(temp_name),
    )
}

/// Copy `src` to `dest` through a temp file, optionally checking the SHA-256
/// of the copied bytes against `expected`.
async fn copy_file(
    src: &Path,
    dest: &Path,
    expected_sha256: Option<&str>,
) -> StorageResult<u64> {
    let mut input = fs::File::open(src).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(src.display().to_string())
        } else {
            StorageError::Io(e)
        }
    })?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    let temp_path = temp_path_for(dest);

    let copied = write_copy(&mut input, &temp_path, expected_sha256).await;

    match copied {
        Ok(size) => {
            fs::rename(&temp_path, dest).await?;
            Ok(size)
        }
        Err(e) => {
            let _ = fs::remove_file(&temp_path).await;
            Err(e)
        }
    }
}

async fn write_copy(
    input: &mut fs::File,
    temp_path: &Path,
    expected_sha256: Option<&str>,
) -> StorageResult<u64> {
    let mut output = fs::File::create(temp_path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let mut size = 0u64;
    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if expected_sha256.is_some() {
            hasher.update(&buf[..n]);
        }
        output.write_all(&buf[..n]).await?;
        size += n as u64;
    }
    output.sync_all().await?;

    if let Some(expected) = expected_sha256 {
        let actual = hex::encode(hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(StorageError::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
    }
    Ok(size)
}

#[async_trait]
impl StorageLocation for FilesystemLocation {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> StorageTier {
        self.tier
    }

    #[instrument(skip(self, ctx, meta), fields(location = %self.name, tenant = %ctx.tenant(), checksum = %meta.checksum))]
    async fn store(
        &self,
        ctx: &TenantContext,
        meta: &FileMeta,
        origin_url: &str,
    ) -> StorageResult<StoredFile> {
        let src = local_path(origin_url)?;
        let dest = self.file_path(ctx, &meta.checksum)?;
        let expected = self.verifies(meta).then(|| meta.checksum.as_str());

        let size = copy_file(&src, &dest, expected).await?;
        tracing::debug!(size, dest = %dest.display(), "file stored");

        Ok(StoredFile {
            url: file_url(&dest),
            size,
        })
    }

    #[instrument(skip(self, ctx), fields(location = %self.name, tenant = %ctx.tenant()))]
    async fn delete(&self, ctx: &TenantContext, url: &str) -> StorageResult<()> {
        let path = self.owned_path(ctx, url).await?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "file already absent");
                Ok(())
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self, ctx), fields(location = %self.name, tenant = %ctx.tenant()))]
    async fn restore(&self, ctx: &TenantContext, url: &str, dest: &Path) -> StorageResult<u64> {
        let src = self.owned_path(ctx, url).await?;
        copy_file(&src, dest, None).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await?;
        if !metadata.is_dir() {
            return Err(StorageError::Config(format!(
                "root of storage {} is not a directory",
                self.name
            )));
        }
        Ok(())
    }
}
