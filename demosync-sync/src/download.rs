//! Download pipeline.
//!
//! ## `fetch_and_store`: 6-step protocol
//!
//! 1. Derive the destination from the descriptor.
//! 2. Destination exists → skip (`AlreadyPresent`).
//! 3. Open the blob; wrap a bzip2 decoder when the locator ends in `.bz2`.
//! 4. Stream into `<final>.<pid>-<seq>.demosync.tmp`, unique per attempt.
//! 5. Set access and modification times of the temp file to `played_at`.
//! 6. Rename to the final path (atomic on POSIX, keeps the times).
//!
//! Any failure removes the temp file, so a half-written or unstamped replay
//! never sits under its final name. Two accounts fetching the same match
//! each write their own temp file; the last rename wins with a complete copy.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_compression::tokio::bufread::BzDecoder;
use filetime::FileTime;
use futures::future::join_all;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::Semaphore;

use demosync_core::{Category, MatchDescriptor, MatchId};

use crate::error::{download_io_err, DownloadError};
use crate::source::{BlobReader, BlobSource};

const TMP_SUFFIX: &str = "demosync.tmp";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Outcome of one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Fetched { path: PathBuf },
    AlreadyPresent { path: PathBuf },
}

impl DownloadOutcome {
    pub fn path(&self) -> &Path {
        match self {
            DownloadOutcome::Fetched { path } | DownloadOutcome::AlreadyPresent { path } => path,
        }
    }
}

/// `match730_<id padded to 21 digits>_<category>.dem`
pub fn file_name(id: MatchId, category: Category) -> String {
    format!("match730_{}_{}.dem", id.padded(), category)
}

pub fn destination_path(demos_dir: &Path, descriptor: &MatchDescriptor) -> PathBuf {
    demos_dir.join(file_name(descriptor.id, descriptor.category))
}

/// A temp name next to `path` that no other attempt in any process shares.
fn tmp_path(path: &Path) -> PathBuf {
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}-{seq}.{TMP_SUFFIX}", std::process::id()));
    PathBuf::from(name)
}

fn is_compressed(locator: &str) -> bool {
    locator.ends_with(".bz2")
}

/// Fetch one replay into `demos_dir`. Idempotent on the destination path.
pub async fn fetch_and_store(
    blobs: &dyn BlobSource,
    demos_dir: &Path,
    descriptor: &MatchDescriptor,
) -> Result<DownloadOutcome, DownloadError> {
    let path = destination_path(demos_dir, descriptor);
    let tmp = tmp_path(&path);
    fetch_and_store_with_tmp(blobs, descriptor, &path, &tmp).await
}

async fn fetch_and_store_with_tmp(
    blobs: &dyn BlobSource,
    descriptor: &MatchDescriptor,
    path: &Path,
    tmp: &Path,
) -> Result<DownloadOutcome, DownloadError> {
    // Step 2: the final name only ever holds complete files.
    if tokio::fs::try_exists(path)
        .await
        .map_err(|e| download_io_err(path, e))?
    {
        tracing::debug!(match_id = %descriptor.id, path = %path.display(), "already present");
        return Ok(DownloadOutcome::AlreadyPresent {
            path: path.to_path_buf(),
        });
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| download_io_err(parent, e))?;
    }

    // Step 3.
    let raw = blobs.open(&descriptor.locator).await?;
    let mut reader: BlobReader = if is_compressed(&descriptor.locator) {
        Box::new(BzDecoder::new(BufReader::new(raw)))
    } else {
        raw
    };

    // Steps 4-6.
    let result = async {
        let bytes = stage(&mut reader, tmp, descriptor).await?;
        tokio::fs::rename(tmp, path)
            .await
            .map_err(|e| download_io_err(path, e))?;
        Ok::<u64, DownloadError>(bytes)
    }
    .await;

    match result {
        Ok(bytes) => {
            tracing::info!(match_id = %descriptor.id, path = %path.display(), bytes, "downloaded");
            Ok(DownloadOutcome::Fetched {
                path: path.to_path_buf(),
            })
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(tmp).await;
            Err(e)
        }
    }
}

/// Write the whole replay to `tmp` and stamp it with `played_at`.
async fn stage(
    reader: &mut BlobReader,
    tmp: &Path,
    descriptor: &MatchDescriptor,
) -> Result<u64, DownloadError> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp)
        .await
        .map_err(|e| download_io_err(tmp, e))?;
    let bytes = tokio::io::copy(reader, &mut file)
        .await
        .map_err(|e| download_io_err(tmp, e))?;
    file.flush().await.map_err(|e| download_io_err(tmp, e))?;
    file.sync_all().await.map_err(|e| download_io_err(tmp, e))?;
    drop(file);

    let played_at = FileTime::from_unix_time(descriptor.played_at.timestamp(), 0);
    filetime::set_file_times(tmp, played_at, played_at).map_err(|e| download_io_err(tmp, e))?;
    Ok(bytes)
}

/// Runs downloads on one semaphore shared by every account.
#[derive(Clone)]
pub struct DownloadPool {
    blobs: Arc<dyn BlobSource>,
    demos_dir: PathBuf,
    permits: Arc<Semaphore>,
}

impl DownloadPool {
    pub fn new(blobs: Arc<dyn BlobSource>, demos_dir: impl Into<PathBuf>, concurrency: usize) -> Self {
        Self {
            blobs,
            demos_dir: demos_dir.into(),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Download every descriptor; one failure never affects its siblings.
    pub async fn download_all(
        &self,
        descriptors: &[MatchDescriptor],
    ) -> BTreeMap<MatchId, Result<DownloadOutcome, DownloadError>> {
        let jobs = descriptors.iter().map(|descriptor| async move {
            let outcome = match self.permits.acquire().await {
                Ok(_permit) => fetch_and_store(self.blobs.as_ref(), &self.demos_dir, descriptor).await,
                Err(_) => Err(download_io_err(
                    &self.demos_dir,
                    std::io::Error::other("download pool closed"),
                )),
            };
            if let Err(error) = &outcome {
                tracing::error!(
                    match_id = %descriptor.id,
                    category = %descriptor.category,
                    url = %descriptor.locator,
                    played_at = %descriptor.played_at,
                    %error,
                    "download failed"
                );
            }
            (descriptor.id, outcome)
        });
        join_all(jobs).await.into_iter().collect()
    }
}

impl std::fmt::Debug for DownloadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadPool")
            .field("demos_dir", &self.demos_dir)
            .field("available", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use async_compression::tokio::write::BzEncoder;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use demosync_core::StreamKind;
    use std::collections::{HashMap, VecDeque};
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

    struct Blobs {
        bodies: HashMap<String, Vec<u8>>,
        opened: AtomicUsize,
    }

    impl Blobs {
        fn new(bodies: &[(&str, Vec<u8>)]) -> Self {
            Self {
                bodies: bodies.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
                opened: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BlobSource for Blobs {
        async fn open(&self, locator: &str) -> Result<BlobReader, SourceError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            match self.bodies.get(locator) {
                Some(body) => Ok(Box::new(std::io::Cursor::new(body.clone()))),
                None => Err(SourceError::Status {
                    status: 404,
                    url: locator.to_string(),
                }),
            }
        }
    }

    async fn bz2(data: &[u8]) -> Vec<u8> {
        let mut enc = BzEncoder::new(Vec::new());
        enc.write_all(data).await.unwrap();
        enc.shutdown().await.unwrap();
        enc.into_inner()
    }

    fn descriptor(id: u64, locator: &str) -> MatchDescriptor {
        MatchDescriptor {
            id: MatchId(id),
            played_at: Utc.with_ymd_and_hms(2023, 10, 1, 20, 15, 0).unwrap(),
            locator: locator.to_string(),
            category: Category::Premier,
            origin: StreamKind::PaginationWatermark,
        }
    }

    fn leftover_tmps(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(TMP_SUFFIX))
            .count()
    }

    /// Hands out pre-built readers in call order.
    struct Scripted(Mutex<VecDeque<BlobReader>>);

    #[async_trait]
    impl BlobSource for Scripted {
        async fn open(&self, locator: &str) -> Result<BlobReader, SourceError> {
            self.0.lock().unwrap().pop_front().ok_or_else(|| SourceError::Status {
                status: 404,
                url: locator.to_string(),
            })
        }
    }

    /// A reader that fails on first poll, like a dropped connection.
    struct Reset;

    impl AsyncRead for Reset {
        fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset")))
        }
    }

    // -----------------------------------------------------------------------
    // 1. Naming
    // -----------------------------------------------------------------------

    #[test]
    fn tmp_names_differ_per_attempt() {
        let path = Path::new("/demos/match730_000000000000000000005_premier.dem");
        let (a, b) = (tmp_path(path), tmp_path(path));
        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
        assert!(a.to_string_lossy().ends_with(TMP_SUFFIX));
    }

    #[test]
    fn file_name_pads_id() {
        assert_eq!(
            file_name(MatchId(3638895521671676017), Category::Wingman),
            "match730_003638895521671676017_wingman.dem"
        );
    }

    // -----------------------------------------------------------------------
    // 2. Single download
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn staged_file_is_stamped_before_publish() {
        let tmp = TempDir::new().unwrap();
        let d = descriptor(5, "http://replay1.valve.net/730/000000000000000000005_1.dem");
        let staged = tmp.path().join("staged.demosync.tmp");
        let mut reader: BlobReader = Box::new(std::io::Cursor::new(b"payload".to_vec()));

        let bytes = stage(&mut reader, &staged, &d).await.unwrap();
        assert_eq!(bytes, 7);
        let meta = std::fs::metadata(&staged).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta).unix_seconds(), d.played_at.timestamp());
        assert!(!destination_path(tmp.path(), &d).exists());
    }

    #[tokio::test]
    async fn decompresses_and_stamps_mtime() {
        let tmp = TempDir::new().unwrap();
        let url = "http://replay1.valve.net/730/000000000000000000005_1.dem.bz2";
        let blobs = Blobs::new(&[(url, bz2(b"HL2DEMO payload").await)]);
        let d = descriptor(5, url);

        let outcome = fetch_and_store(&blobs, tmp.path(), &d).await.unwrap();
        let path = outcome.path().to_path_buf();
        assert!(matches!(outcome, DownloadOutcome::Fetched { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), b"HL2DEMO payload");

        let meta = std::fs::metadata(&path).unwrap();
        let mtime = FileTime::from_last_modification_time(&meta);
        assert_eq!(mtime.unix_seconds(), d.played_at.timestamp());
        assert_eq!(leftover_tmps(tmp.path()), 0);
    }

    #[tokio::test]
    async fn plain_locator_is_copied_verbatim() {
        let tmp = TempDir::new().unwrap();
        let url = "http://replay1.valve.net/730/000000000000000000005_1.dem";
        let blobs = Blobs::new(&[(url, b"raw bytes".to_vec())]);

        let outcome = fetch_and_store(&blobs, tmp.path(), &descriptor(5, url)).await.unwrap();
        assert_eq!(std::fs::read(outcome.path()).unwrap(), b"raw bytes");
    }

    #[tokio::test]
    async fn existing_file_is_not_fetched_again() {
        let tmp = TempDir::new().unwrap();
        let url = "http://replay1.valve.net/730/000000000000000000005_1.dem.bz2";
        let blobs = Blobs::new(&[(url, bz2(b"new").await)]);
        let d = descriptor(5, url);
        std::fs::write(destination_path(tmp.path(), &d), b"old").unwrap();

        let outcome = fetch_and_store(&blobs, tmp.path(), &d).await.unwrap();
        assert!(matches!(outcome, DownloadOutcome::AlreadyPresent { .. }));
        assert_eq!(std::fs::read(outcome.path()).unwrap(), b"old");
        assert_eq!(blobs.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn corrupt_archive_leaves_no_files_behind() {
        let tmp = TempDir::new().unwrap();
        let url = "http://replay1.valve.net/730/000000000000000000005_1.dem.bz2";
        let blobs = Blobs::new(&[(url, b"definitely not bzip2".to_vec())]);
        let d = descriptor(5, url);

        let err = fetch_and_store(&blobs, tmp.path(), &d).await.unwrap_err();
        assert!(matches!(err, DownloadError::Io { .. }), "got: {err}");
        let path = destination_path(tmp.path(), &d);
        assert!(!path.exists());
        assert_eq!(leftover_tmps(tmp.path()), 0);
    }

    // -----------------------------------------------------------------------
    // 3. Pool
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn pool_isolates_failures() {
        let tmp = TempDir::new().unwrap();
        let ok = "http://replay1.valve.net/730/000000000000000000001_1.dem";
        let missing = "http://replay1.valve.net/730/000000000000000000002_1.dem";
        let blobs = Arc::new(Blobs::new(&[(ok, b"one".to_vec())]));
        let pool = DownloadPool::new(blobs, tmp.path(), 2);

        let outcomes = pool
            .download_all(&[descriptor(1, ok), descriptor(2, missing)])
            .await;
        assert!(matches!(outcomes[&MatchId(1)], Ok(DownloadOutcome::Fetched { .. })));
        assert!(matches!(outcomes[&MatchId(2)], Err(DownloadError::Fetch(_))));
    }

    #[tokio::test]
    async fn two_accounts_fetching_one_match_publish_a_complete_copy() {
        let tmp = TempDir::new().unwrap();
        let url = "http://replay1.valve.net/730/000000000000000000005_1.dem";
        let d = descriptor(5, url);

        // First reader: 1000 bytes, a pause, then 1000 more.
        let (slow, mut feed) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            feed.write_all(&[b'a'; 1000]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            feed.write_all(&[b'a'; 1000]).await.unwrap();
        });
        // Second reader: opens while the first is mid-stream, then breaks.
        let broken = std::io::Cursor::new(vec![b'b'; 500]).chain(Reset);

        let blobs = Arc::new(Scripted(Mutex::new(VecDeque::from([
            Box::new(slow) as BlobReader,
            Box::new(broken) as BlobReader,
        ]))));
        let first = DownloadPool::new(blobs.clone(), tmp.path(), 1);
        let second = DownloadPool::new(blobs, tmp.path(), 1);

        let (a, b) = tokio::join!(first.download_all(std::slice::from_ref(&d)), async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            second.download_all(std::slice::from_ref(&d)).await
        });

        assert!(matches!(a[&MatchId(5)], Ok(DownloadOutcome::Fetched { .. })), "{:?}", a);
        assert!(b[&MatchId(5)].is_err(), "{:?}", b);
        let bytes = std::fs::read(destination_path(tmp.path(), &d)).unwrap();
        assert_eq!(bytes, vec![b'a'; 2000]);
        assert_eq!(leftover_tmps(tmp.path()), 0);
    }
}
