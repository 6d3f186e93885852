/*!
 * Work out which files a time window needs and fetch them.
 *
 * GLM publishes one file per fixed-length slot, so the file keys for a window can be computed
 * from the window alone. Retrieval is delegated to a [ByteStreamProvider].
 */

use crate::{
    satellite::{self, Satellite, GLM_PRODUCT},
    window::TimeWindow,
    SatFlashError, SatFlashResult,
};
use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::{bounded, unbounded};
use log::{debug, info, warn};
use std::{
    path::{Path, PathBuf},
    thread,
};

/// GLM-L2-LCFA files each cover 20 seconds.
pub const DEFAULT_CADENCE_SECONDS: i64 = 20;

/// Anything that can hand back the bytes stored under a key.
///
/// Implementations are shared between retrieval threads, so they must be `Sync`.
pub trait ByteStreamProvider: Sync {
    /// Fetch the bytes for a key, or fail with [SatFlashError::SourceUnavailable].
    fn fetch(&self, key: &str) -> SatFlashResult<Vec<u8>>;
}

/// A retrieved file, ready for the [transformer](crate::transform()).
#[derive(Debug, Clone, PartialEq)]
pub struct RawFile {
    /// The key the file was fetched with.
    pub key: String,
    /// Name recorded as the source of every record derived from this file.
    ///
    /// This is derived from the key rather than from whatever name the provider found, so
    /// re-processing a slot always produces the same record keys.
    pub source_file: String,
    /// Start of the slot this file covers.
    pub scan_start: DateTime<Utc>,
    pub bytes: Vec<u8>,
}

/// Computes file keys for windows and retrieves them in parallel.
#[derive(Debug, Clone)]
pub struct Extractor {
    satellite: Satellite,
    product: String,
    cadence: Duration,
    threads: usize,
}

impl Extractor {
    /// An extractor for the GLM-L2-LCFA product with the standard cadence.
    pub fn new(satellite: Satellite) -> Self {
        Extractor {
            satellite,
            product: GLM_PRODUCT.to_owned(),
            cadence: Duration::seconds(DEFAULT_CADENCE_SECONDS),
            threads: num_cpus::get(),
        }
    }

    /// Set the length of time each source file covers.
    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence;
        self
    }

    /// Set the number of retrieval threads, at least one is always used.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn satellite(&self) -> Satellite {
        self.satellite
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// The keys of every file whose slot overlaps the window, in time order.
    pub fn keys_for(&self, window: &TimeWindow) -> SatFlashResult<Vec<(DateTime<Utc>, String)>> {
        if window.start() < self.satellite.operational() {
            warn!(
                "window {} starts before {} was operational",
                window,
                self.satellite.name()
            );
        }

        Ok(window
            .slot_starts(self.cadence)?
            .into_iter()
            .map(|start| (start, satellite::file_key(&self.product, self.satellite, start)))
            .collect())
    }

    /// Fetch every file needed to cover the window.
    ///
    /// Files are retrieved concurrently but the result is in time order. If any file is missing
    /// the whole call fails with the error for the earliest missing file.
    pub fn extract<P: ByteStreamProvider + ?Sized>(
        &self,
        window: &TimeWindow,
        provider: &P,
    ) -> SatFlashResult<Vec<RawFile>> {
        let keys = self.keys_for(window)?;
        let num_keys = keys.len();
        let num_workers = self.threads.min(num_keys).max(1);

        info!(
            "extracting {} files for {} with {} threads",
            num_keys, window, num_workers
        );

        let (to_workers, from_main) = bounded::<(usize, DateTime<Utc>, String)>(num_keys);
        let (to_main, from_workers) = unbounded::<(usize, SatFlashResult<RawFile>)>();

        for (index, (start, key)) in keys.into_iter().enumerate() {
            // Capacity matches the number of keys, this never blocks.
            let _ = to_workers.send((index, start, key));
        }
        drop(to_workers);

        let mut slots: Vec<Option<SatFlashResult<RawFile>>> = (0..num_keys).map(|_| None).collect();

        thread::scope(|scope| {
            for i in 0..num_workers {
                let from_main = from_main.clone();
                let to_main = to_main.clone();

                let spawned = thread::Builder::new()
                    .name(format!("satflash-extract-{}", i))
                    .spawn_scoped(scope, move || {
                        for (index, scan_start, key) in from_main {
                            let res = provider.fetch(&key).map(|bytes| {
                                debug!("fetched {} ({} bytes)", key, bytes.len());
                                RawFile {
                                    source_file: satellite::key_file_name(&key).to_owned(),
                                    key,
                                    scan_start,
                                    bytes,
                                }
                            });

                            if to_main.send((index, res)).is_err() {
                                break;
                            }
                        }
                    });

                if let Err(err) = spawned {
                    warn!("unable to start retrieval thread: {}", err);
                }
            }
            drop(to_main);

            // Ends once every worker has hung up.
            for (index, res) in from_workers.iter() {
                slots[index] = Some(res);
            }
        });

        // Workers that failed to start leave their share of the queue behind, fetch it here.
        for (index, scan_start, key) in from_main.try_iter() {
            let res = provider.fetch(&key).map(|bytes| RawFile {
                source_file: satellite::key_file_name(&key).to_owned(),
                key,
                scan_start,
                bytes,
            });
            slots[index] = Some(res);
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(SatFlashError::SourceUnavailable {
                        key: String::new(),
                        reason: "retrieval did not complete".to_owned(),
                    })
                })
            })
            .collect()
    }
}

/// A local mirror of the NOAA bucket layout.
///
/// Files live at `<root>/<product>/<year>/<day of year>/<hour>/<file name>`, exactly as they do
/// in the bucket. Keys are file name prefixes. Of the files in the hour directory that start with
/// the prefix and end in `.nc` or `.zip`, the lexically last one is returned. For reprocessed
/// files that is the one with the newest creation time.
#[derive(Debug, Clone)]
pub struct DirectoryArchive {
    root: PathBuf,
}

impl DirectoryArchive {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        DirectoryArchive {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Find the path for a key, if there is one.
    pub fn resolve(&self, key: &str) -> Option<PathBuf> {
        let (dir, prefix) = match key.rsplit_once('/') {
            Some((dir, prefix)) => (self.root.join(dir), prefix),
            None => (self.root.clone(), key),
        };

        let mut candidates: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|res| res.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                let fname = entry.file_name().to_string_lossy();
                fname.starts_with(prefix) && (fname.ends_with(".nc") || fname.ends_with(".zip"))
            })
            .map(|entry| entry.into_path())
            .collect();

        // Reprocessed files share a start time, prefer the newest creation time.
        candidates.sort();
        candidates.pop()
    }
}

impl ByteStreamProvider for DirectoryArchive {
    fn fetch(&self, key: &str) -> SatFlashResult<Vec<u8>> {
        let path = self
            .resolve(key)
            .ok_or_else(|| SatFlashError::SourceUnavailable {
                key: key.to_owned(),
                reason: format!("not found under {}", self.root.display()),
            })?;

        std::fs::read(&path).map_err(|err| SatFlashError::SourceUnavailable {
            key: key.to_owned(),
            reason: format!("{}: {}", path.display(), err),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::{collections::HashMap, sync::Mutex};

    struct MapProvider {
        files: HashMap<String, Vec<u8>>,
        requests: Mutex<Vec<String>>,
    }

    impl ByteStreamProvider for MapProvider {
        fn fetch(&self, key: &str) -> SatFlashResult<Vec<u8>> {
            self.requests.lock().unwrap().push(key.to_owned());
            self.files
                .get(key)
                .cloned()
                .ok_or_else(|| SatFlashError::SourceUnavailable {
                    key: key.to_owned(),
                    reason: "missing".to_owned(),
                })
        }
    }

    fn window(secs: i64) -> TimeWindow {
        let start = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        TimeWindow::new(start, start + Duration::seconds(secs)).unwrap()
    }

    fn provider_for(extractor: &Extractor, window: &TimeWindow) -> MapProvider {
        let files = extractor
            .keys_for(window)
            .unwrap()
            .into_iter()
            .map(|(_, key)| {
                let bytes = key.as_bytes().to_vec();
                (key, bytes)
            })
            .collect();

        MapProvider {
            files,
            requests: Mutex::new(vec![]),
        }
    }

    #[test]
    fn extract_returns_files_in_time_order() {
        let extractor = Extractor::new(Satellite::G18).with_threads(4);
        let window = window(120);
        let provider = provider_for(&extractor, &window);

        let files = extractor.extract(&window, &provider).unwrap();
        assert_eq!(files.len(), 6);

        for pair in files.windows(2) {
            assert!(pair[0].scan_start < pair[1].scan_start);
        }

        for file in &files {
            assert_eq!(file.bytes, file.key.as_bytes());
            assert!(file.key.ends_with(&file.source_file));
            assert!(file.source_file.starts_with("OR_GLM-L2-LCFA_G18_s2023152120"));
        }
    }

    #[test]
    fn extract_is_idempotent() {
        let extractor = Extractor::new(Satellite::G16).with_threads(3);
        let window = window(100);
        let provider = provider_for(&extractor, &window);

        let first = extractor.extract(&window, &provider).unwrap();
        let second = extractor.extract(&window, &provider).unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.requests.lock().unwrap().len(), 10);
    }

    #[test]
    fn missing_file_is_source_unavailable() {
        let extractor = Extractor::new(Satellite::G16).with_threads(2);
        let window = window(60);
        let mut provider = provider_for(&extractor, &window);

        let keys = extractor.keys_for(&window).unwrap();
        provider.files.remove(&keys[1].1);

        match extractor.extract(&window, &provider) {
            Err(SatFlashError::SourceUnavailable { key, .. }) => assert_eq!(key, keys[1].1),
            other => panic!("expected SourceUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn cadence_controls_the_number_of_files() {
        let extractor = Extractor::new(Satellite::G16).with_cadence(Duration::minutes(1));
        let keys = extractor.keys_for(&window(300)).unwrap();
        assert_eq!(keys.len(), 5);
    }

    #[test]
    fn directory_archive_resolves_prefixes() {
        let root = std::env::temp_dir().join(format!("satflash-archive-{}", std::process::id()));
        let hour_dir = root.join("GLM-L2-LCFA/2023/152/12");
        std::fs::create_dir_all(&hour_dir).unwrap();

        let prefix = "OR_GLM-L2-LCFA_G16_s20231521200000";
        let older = format!("{}_e20231521200200_c20231521200210.nc", prefix);
        let newer = format!("{}_e20231521200200_c20231521200299.nc", prefix);
        std::fs::write(hour_dir.join(&older), b"old").unwrap();
        std::fs::write(hour_dir.join(&newer), b"new").unwrap();
        std::fs::write(hour_dir.join(format!("{}.txt", prefix)), b"ignored").unwrap();

        let archive = DirectoryArchive::new(&root);
        let key = format!("GLM-L2-LCFA/2023/152/12/{}", prefix);
        assert_eq!(archive.fetch(&key).unwrap(), b"new");

        let missing = "GLM-L2-LCFA/2023/152/12/OR_GLM-L2-LCFA_G16_s20231521200200";
        assert!(matches!(
            archive.fetch(missing),
            Err(SatFlashError::SourceUnavailable { .. })
        ));

        std::fs::remove_dir_all(&root).unwrap();
    }
}
