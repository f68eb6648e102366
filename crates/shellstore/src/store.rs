//! Disk store implementation
//!
//! File layout, one pair per cached URL:
//! - `<key>.body`: raw response body; its modification time is the entry's `stored_at`
//! - `<key>.meta`: metadata sidecar (see [`crate::metadata`])
//!
//! There is no index file. Freshness and eviction order both come from file
//! timestamps, so the directory stays self-describing after an unclean
//! shutdown. Files are written to a temporary name and renamed into place.
//!
//! The two renames of a write are not atomic together, so every sidecar
//! records the length and SHA-256 of its body. A read that sees a body from
//! one write and a sidecar from another retries, then reports a mismatch.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::metadata::CacheMetadata;

/// Extension of body files
const BODY_EXT: &str = "body";

/// Extension of metadata sidecars
const META_EXT: &str = "meta";

/// Prefix of in-progress writes
const TEMP_PREFIX: &str = ".tmp-";

/// Reads attempted before a body/sidecar mismatch is reported
const READ_ATTEMPTS: usize = 3;

/// An entry read back from disk
#[derive(Debug, Clone)]
pub struct DiskEntry {
    /// Key of the entry
    pub key: CacheKey,
    /// Body bytes
    pub body: Bytes,
    /// Sidecar metadata (defaults if the sidecar was unreadable)
    pub metadata: CacheMetadata,
    /// Modification time of the body file
    pub stored_at: SystemTime,
    /// Body plus sidecar size on disk
    pub size_bytes: u64,
}

/// A body file found while scanning the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Key parsed from the file name
    pub key: CacheKey,
    /// Body plus sidecar size
    pub size_bytes: u64,
    /// Modification time of the body file
    pub modified: SystemTime,
}

/// DiskStore persists bodies and metadata sidecars in one directory
#[derive(Debug, Clone)]
pub struct DiskStore {
    /// Store directory
    dir: PathBuf,
}

impl DiskStore {
    /// Open or create a store at the given directory
    ///
    /// # Arguments
    /// * `dir` - Directory dedicated to cache files
    ///
    /// # Returns
    /// * `Result<DiskStore>` - Store handle
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        Ok(DiskStore {
            dir: dir.to_path_buf(),
        })
    }

    /// Directory holding the cache files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn body_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key, BODY_EXT))
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key, META_EXT))
    }

    fn temp_file(&self) -> Result<NamedTempFile> {
        let tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.dir)?;
        Ok(tmp)
    }

    /// Check whether a body exists for the key
    pub fn exists(&self, key: &CacheKey) -> bool {
        self.body_path(key).is_file()
    }

    /// Read an entry
    ///
    /// # Returns
    /// * `Ok(None)` - No body file for the key
    /// * `Err(Error::Mismatch(_))` - The body is not the one the sidecar describes
    /// * `Err(_)` - I/O failure
    pub fn read(&self, key: &CacheKey) -> Result<Option<DiskEntry>> {
        for attempt in 1..=READ_ATTEMPTS {
            let Some(entry) = self.read_once(key)? else {
                return Ok(None);
            };
            if entry.metadata.describes(&entry.body) {
                return Ok(Some(entry));
            }
            // A concurrent write replaced one file but not yet the other
            debug!(key = %key, attempt, "body and sidecar disagree, rereading");
        }
        Err(Error::Mismatch(key.clone()))
    }

    fn read_once(&self, key: &CacheKey) -> Result<Option<DiskEntry>> {
        let mut file = match File::open(self.body_path(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // Timestamp and bytes come from the same inode even if a writer renames over it
        let stored_at = file.metadata()?.modified()?;
        let mut body = Vec::new();
        file.read_to_end(&mut body)?;

        let (metadata, meta_len) = match fs::read(self.meta_path(key)) {
            Ok(bytes) => (CacheMetadata::decode_or_default(&bytes), bytes.len() as u64),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(key = %key, "metadata sidecar missing, using defaults");
                (CacheMetadata::default(), 0)
            }
            Err(e) => return Err(e.into()),
        };

        let size_bytes = body.len() as u64 + meta_len;
        Ok(Some(DiskEntry {
            key: key.clone(),
            body: Bytes::from(body),
            metadata,
            stored_at,
            size_bytes,
        }))
    }

    /// Open the body for streaming without reading the sidecar
    pub fn open_body(&self, key: &CacheKey) -> Result<Option<File>> {
        match File::open(self.body_path(key)) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write an entry
    ///
    /// # Arguments
    /// * `key` - Entry key
    /// * `body` - Response body
    /// * `metadata` - Sidecar contents; the body length and digest are recorded automatically
    /// * `stored_at` - Becomes the body file's modification time
    pub fn write(
        &self,
        key: &CacheKey,
        body: &[u8],
        metadata: &CacheMetadata,
        stored_at: SystemTime,
    ) -> Result<()> {
        let metadata = metadata.clone().with_body(body);

        let mut tmp = self.temp_file()?;
        tmp.write_all(body)?;
        tmp.as_file().set_modified(stored_at)?;
        tmp.persist(self.body_path(key))
            .map_err(|e| Error::Io(e.error))?;

        // The new body must not stay behind next to the previous sidecar
        if let Err(e) = self.write_metadata(key, &metadata) {
            if let Err(cleanup) = self.delete(key) {
                warn!(key = %key, error = %cleanup, "failed to roll back cache entry");
            }
            return Err(e);
        }

        debug!(key = %key, bytes = body.len(), "wrote cache entry");
        Ok(())
    }

    /// Rewrite only the metadata sidecar
    ///
    /// The sidecar should carry [`CacheMetadata::with_body`] for the body on
    /// disk, or reads of the entry will report a mismatch.
    pub fn write_metadata(&self, key: &CacheKey, metadata: &CacheMetadata) -> Result<()> {
        let mut tmp = self.temp_file()?;
        tmp.write_all(&metadata.encode())?;
        tmp.persist(self.meta_path(key))
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Set the body's modification time
    ///
    /// # Returns
    /// * `Err(Error::NotFound)` - The body file no longer exists
    pub fn touch(&self, key: &CacheKey, stored_at: SystemTime) -> Result<()> {
        let file = match OpenOptions::new().write(true).open(self.body_path(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(key.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        file.set_modified(stored_at)?;
        Ok(())
    }

    /// Current modification time of the body, `None` if it is gone
    pub fn modified(&self, key: &CacheKey) -> Result<Option<SystemTime>> {
        match fs::metadata(self.body_path(key)) {
            Ok(meta) => Ok(Some(meta.modified()?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete an entry; missing files are not an error
    pub fn delete(&self, key: &CacheKey) -> Result<()> {
        remove_if_exists(&self.body_path(key))?;
        remove_if_exists(&self.meta_path(key))?;
        Ok(())
    }

    /// List every body with its combined size and modification time
    pub fn list_all_with_age(&self) -> Result<Vec<StoredFile>> {
        let mut files = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(key) = key_for(&path, BODY_EXT) else {
                continue;
            };

            // Files can vanish under a concurrent delete
            let body_meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let sidecar_len = fs::metadata(self.meta_path(&key))
                .map(|m| m.len())
                .unwrap_or(0);

            files.push(StoredFile {
                key,
                size_bytes: body_meta.len() + sidecar_len,
                modified: body_meta.modified()?,
            });
        }

        Ok(files)
    }

    /// Total bytes held by bodies and their sidecars
    pub fn total_size(&self) -> Result<u64> {
        Ok(self
            .list_all_with_age()?
            .iter()
            .map(|f| f.size_bytes)
            .sum())
    }

    /// Remove sidecars without a body and abandoned temporary files
    ///
    /// Only files whose age at `now` is at least `grace` are removed, so
    /// temporaries of a write in progress are left alone.
    ///
    /// # Returns
    /// * `Result<usize>` - Number of files removed
    pub fn remove_orphans(&self, grace: Duration, now: SystemTime) -> Result<usize> {
        let mut removed = 0;

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();

            let orphaned = match key_for(&path, META_EXT) {
                Some(key) => !self.body_path(&key).exists(),
                None => file_name(&path).is_some_and(|n| n.starts_with(TEMP_PREFIX)),
            };
            if !orphaned {
                continue;
            }

            let old_enough = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|modified| now.duration_since(modified).unwrap_or_default() >= grace)
                .unwrap_or(false);
            if old_enough && remove_if_exists(&path)? {
                debug!(path = %path.display(), "removed orphaned cache file");
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Delete every entry
    ///
    /// # Returns
    /// * `Result<usize>` - Number of bodies removed
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if key_for(&path, BODY_EXT).is_some() {
                if remove_if_exists(&path)? {
                    removed += 1;
                }
            } else if key_for(&path, META_EXT).is_some()
                || file_name(&path).is_some_and(|n| n.starts_with(TEMP_PREFIX))
            {
                remove_if_exists(&path)?;
            }
        }

        Ok(removed)
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Parse `<key>.<ext>` file names
fn key_for(path: &Path, ext: &str) -> Option<CacheKey> {
    if path.extension().and_then(|e| e.to_str()) != Some(ext) {
        return None;
    }
    let stem = path.file_stem().and_then(|s| s.to_str())?;
    CacheKey::parse(stem).ok()
}

/// Returns whether a file was actually removed
fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Validators;
    use tempfile::TempDir;

    fn meta(url: &str) -> CacheMetadata {
        CacheMetadata::new(url, "text/javascript", "utf-8")
            .with_validators(Validators::new(Some("\"v1\"".to_string()), None))
    }

    #[test]
    fn test_open_creates_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache");
        let store = DiskStore::open(&path).unwrap();

        assert!(path.is_dir());
        assert_eq!(store.dir(), path.as_path());
    }

    #[test]
    fn test_write_and_read() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let url = "https://a.test/app.js";
        let key = CacheKey::encode(url);
        let stored_at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        assert!(!store.exists(&key));
        store.write(&key, b"console.log(1)", &meta(url), stored_at).unwrap();
        assert!(store.exists(&key));

        let entry = store.read(&key).unwrap().unwrap();
        assert_eq!(&entry.body[..], b"console.log(1)");
        assert_eq!(entry.metadata.url, url);
        assert_eq!(entry.metadata.validators.etag.as_deref(), Some("\"v1\""));
        assert_eq!(entry.metadata.content_length, Some(14));
        assert_eq!(
            entry.metadata.body_sha256.as_deref(),
            Some(crate::metadata::body_digest(b"console.log(1)").as_str())
        );
        assert_eq!(entry.stored_at, stored_at);
        assert!(entry.size_bytes > 14);
    }

    #[test]
    fn test_read_missing() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let key = CacheKey::encode("https://a.test/missing.js");

        assert!(store.read(&key).unwrap().is_none());
        assert!(store.open_body(&key).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_sidecar_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let key = CacheKey::encode("https://a.test/app.js");

        store
            .write(&key, b"body", &meta("https://a.test/app.js"), SystemTime::now())
            .unwrap();
        fs::write(store.meta_path(&key), b"\xff\xfe garbage").unwrap();

        let entry = store.read(&key).unwrap().unwrap();
        assert_eq!(entry.metadata, CacheMetadata::default());
        assert_eq!(&entry.body[..], b"body");
    }

    #[test]
    fn test_missing_sidecar_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let key = CacheKey::encode("https://a.test/app.js");

        store
            .write(&key, b"body", &meta("https://a.test/app.js"), SystemTime::now())
            .unwrap();
        fs::remove_file(store.meta_path(&key)).unwrap();

        let entry = store.read(&key).unwrap().unwrap();
        assert_eq!(entry.metadata.mime_type, "application/octet-stream");
    }

    #[test]
    fn test_truncated_body_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let key = CacheKey::encode("https://a.test/app.js");

        store
            .write(&key, b"full body", &meta("https://a.test/app.js"), SystemTime::now())
            .unwrap();
        fs::write(store.body_path(&key), b"full").unwrap();

        assert!(matches!(store.read(&key), Err(Error::Mismatch(_))));
    }

    #[test]
    fn test_replaced_body_of_same_length_is_a_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let key = CacheKey::encode("https://a.test/app.js");

        store
            .write(&key, b"AAAA", &meta("https://a.test/app.js"), SystemTime::now())
            .unwrap();
        fs::write(store.body_path(&key), b"BBBB").unwrap();

        assert!(matches!(store.read(&key), Err(Error::Mismatch(_))));
    }

    #[test]
    fn test_concurrent_writes_never_pair_body_with_other_sidecar() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let url = "https://a.test/app.js";
        let key = CacheKey::encode(url);
        let versioned = |etag: &str| {
            CacheMetadata::new(url, "text/javascript", "utf-8")
                .with_validators(Validators::new(Some(etag.to_string()), None))
        };
        store.write(&key, b"AAAA", &versioned("A"), SystemTime::now()).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let writer = {
            let store = store.clone();
            let key = key.clone();
            let done = done.clone();
            let (a, b) = (versioned("A"), versioned("B"));
            std::thread::spawn(move || {
                let mut i = 0u64;
                while !done.load(Ordering::Relaxed) {
                    let (body, metadata) = if i % 2 == 0 { (b"BBBB", &b) } else { (b"AAAA", &a) };
                    store.write(&key, body, metadata, SystemTime::now()).unwrap();
                    i += 1;
                }
            })
        };

        let mut served = 0;
        for _ in 0..20_000 {
            match store.read(&key) {
                Ok(Some(entry)) => {
                    let etag = entry.metadata.validators.etag.as_deref().unwrap();
                    let expected: &[u8] = if etag == "A" { b"AAAA" } else { b"BBBB" };
                    assert_eq!(&entry.body[..], expected, "body served with etag {}", etag);
                    served += 1;
                }
                Ok(None) => {}
                Err(Error::Mismatch(_)) => {}
                Err(e) => panic!("unexpected read error: {}", e),
            }
        }
        done.store(true, Ordering::Relaxed);
        writer.join().unwrap();

        assert!(served > 0);
    }

    #[test]
    fn test_failed_sidecar_write_rolls_back_body() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let url = "https://a.test/app.js";
        let key = CacheKey::encode(url);
        store.write(&key, b"old", &meta(url), SystemTime::now()).unwrap();

        // A directory where the sidecar goes makes the sidecar rename fail
        fs::remove_file(store.meta_path(&key)).unwrap();
        fs::create_dir(store.meta_path(&key)).unwrap();
        fs::write(store.meta_path(&key).join("blocker"), b"x").unwrap();

        assert!(store.write(&key, b"new", &meta(url), SystemTime::now()).is_err());
        assert!(!store.exists(&key));
    }

    #[test]
    fn test_open_body_streams() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let key = CacheKey::encode("https://a.test/app.js");

        store
            .write(&key, b"streamed", &meta("https://a.test/app.js"), SystemTime::now())
            .unwrap();

        let mut file = store.open_body(&key).unwrap().unwrap();
        let mut out = String::new();
        file.read_to_string(&mut out).unwrap();
        assert_eq!(out, "streamed");
    }

    #[test]
    fn test_touch() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let key = CacheKey::encode("https://a.test/app.js");
        let first = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let later = first + Duration::from_secs(3600);

        store.write(&key, b"body", &meta("https://a.test/app.js"), first).unwrap();
        store.touch(&key, later).unwrap();

        let entry = store.read(&key).unwrap().unwrap();
        assert_eq!(entry.stored_at, later);
        assert_eq!(&entry.body[..], b"body");

        let missing = CacheKey::encode("https://a.test/other.js");
        assert!(matches!(store.touch(&missing, later), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_modified() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let key = CacheKey::encode("https://a.test/app.js");
        let stored_at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        assert_eq!(store.modified(&key).unwrap(), None);
        store
            .write(&key, b"body", &meta("https://a.test/app.js"), stored_at)
            .unwrap();
        assert_eq!(store.modified(&key).unwrap(), Some(stored_at));
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let key = CacheKey::encode("https://a.test/app.js");

        store
            .write(&key, b"body", &meta("https://a.test/app.js"), SystemTime::now())
            .unwrap();
        store.delete(&key).unwrap();

        assert!(!store.exists(&key));
        assert!(!store.meta_path(&key).exists());
        // Deleting again is fine
        store.delete(&key).unwrap();
    }

    #[test]
    fn test_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let url = "https://a.test/app.js";
        let key = CacheKey::encode(url);

        store.write(&key, b"version one", &meta(url), SystemTime::now()).unwrap();
        store.write(&key, b"v2", &meta(url), SystemTime::now()).unwrap();

        let entry = store.read(&key).unwrap().unwrap();
        assert_eq!(&entry.body[..], b"v2");
        assert_eq!(store.list_all_with_age().unwrap().len(), 1);
    }

    #[test]
    fn test_list_all_with_age() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        for i in 0..3u64 {
            let url = format!("https://a.test/{}.js", i);
            let key = CacheKey::encode(&url);
            store
                .write(&key, &vec![b'x'; 100], &meta(&url), base + Duration::from_secs(i))
                .unwrap();
        }
        // Unrelated files are ignored
        fs::write(dir.path().join("README"), b"hello").unwrap();

        let mut files = store.list_all_with_age().unwrap();
        files.sort_by_key(|f| f.modified);

        assert_eq!(files.len(), 3);
        assert_eq!(files[0].modified, base);
        assert_eq!(files[0].key, CacheKey::encode("https://a.test/0.js"));
        assert!(files.iter().all(|f| f.size_bytes > 100));
        assert_eq!(
            store.total_size().unwrap(),
            files.iter().map(|f| f.size_bytes).sum::<u64>()
        );
    }

    #[test]
    fn test_remove_orphans() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let kept = CacheKey::encode("https://a.test/kept.js");
        let orphan = CacheKey::encode("https://a.test/orphan.js");

        store
            .write(&kept, b"body", &meta("https://a.test/kept.js"), SystemTime::now())
            .unwrap();
        store
            .write_metadata(&orphan, &meta("https://a.test/orphan.js"))
            .unwrap();
        fs::write(dir.path().join(".tmp-abandoned"), b"partial").unwrap();

        let grace = Duration::from_secs(3600);
        let now = SystemTime::now();

        // Inside the grace period nothing goes
        assert_eq!(store.remove_orphans(grace, now).unwrap(), 0);

        assert_eq!(store.remove_orphans(grace, now + grace * 2).unwrap(), 2);
        assert!(store.exists(&kept));
        assert!(store.meta_path(&kept).exists());
        assert!(!store.meta_path(&orphan).exists());
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();

        for i in 0..4 {
            let url = format!("https://a.test/{}.css", i);
            store
                .write(&CacheKey::encode(&url), b"body", &meta(&url), SystemTime::now())
                .unwrap();
        }

        assert_eq!(store.clear().unwrap(), 4);
        assert!(store.list_all_with_age().unwrap().is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
