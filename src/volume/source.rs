//! A byte source spanning several volumes.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use crate::io::{ByteSource, FileSource};
use crate::{Error, Result};

/// Hook invoked after every volume switch with `(old_index, new_index)`.
pub type VolumeSwitch = Box<dyn FnMut(usize, usize) + Send>;

/// Concatenates several sources into one logical stream.
pub struct MultiVolumeSource {
    volumes: Vec<Box<dyn ByteSource>>,
    labels: Vec<String>,
    current: usize,
    opened: bool,
    switches: usize,
    on_switch: Option<VolumeSwitch>,
}

impl std::fmt::Debug for MultiVolumeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiVolumeSource")
            .field("volumes", &self.labels)
            .field("current", &self.current)
            .field("switches", &self.switches)
            .finish_non_exhaustive()
    }
}

impl MultiVolumeSource {
    /// Creates an empty source. Add volumes with [`push`](Self::push).
    pub fn new() -> Self {
        Self {
            volumes: Vec::new(),
            labels: Vec::new(),
            current: 0,
            opened: false,
            switches: 0,
            on_switch: None,
        }
    }

    /// Appends a volume.
    pub fn push(&mut self, volume: impl ByteSource + 'static) {
        let label = format!("volume {}", self.volumes.len() + 1);
        self.push_labeled(Box::new(volume), label);
    }

    fn push_labeled(&mut self, volume: Box<dyn ByteSource>, label: String) {
        self.volumes.push(volume);
        self.labels.push(label);
    }

    /// Appends a volume, builder style.
    pub fn with_volume(mut self, volume: impl ByteSource + 'static) -> Self {
        self.push(volume);
        self
    }

    /// Creates a source reading the given files in order.
    pub fn from_paths<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Self {
        let mut source = Self::new();
        for path in paths {
            let path = path.as_ref();
            source.push_labeled(
                Box::new(FileSource::new(path)),
                path.to_string_lossy().into_owned(),
            );
        }
        source
    }

    /// Discovers `<base>.001`, `<base>.002`, ... and reads them in order.
    ///
    /// Accepts either the first volume (`name.001`) or the base path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VolumeMissing`] if the first volume does not exist.
    pub fn open_numbered(path: impl AsRef<Path>) -> Result<Self> {
        let base = detect_base_path(path.as_ref());
        let mut paths = Vec::new();
        let mut number = 1u32;
        loop {
            let candidate = volume_path_for(&base, number);
            match std::fs::metadata(&candidate) {
                Ok(_) => paths.push(candidate),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if paths.is_empty() {
                        return Err(Error::VolumeMissing {
                            volume: number,
                            path: candidate.to_string_lossy().into_owned(),
                            source: e,
                        });
                    }
                    break;
                }
                Err(e) => return Err(Error::Io(e)),
            }
            number += 1;
        }
        log::debug!(
            "Discovered {} volumes for {}",
            paths.len(),
            base.to_string_lossy()
        );
        Ok(Self::from_paths(paths))
    }

    /// Installs the switch hook.
    pub fn on_switch(mut self, hook: impl FnMut(usize, usize) + Send + 'static) -> Self {
        self.on_switch = Some(Box::new(hook));
        self
    }

    /// Returns the number of volumes.
    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    /// Returns the index of the volume currently being read.
    pub fn current_volume(&self) -> usize {
        self.current
    }

    /// Returns how many switches have happened so far.
    pub fn switch_count(&self) -> usize {
        self.switches
    }

    fn current_mut(&mut self) -> io::Result<&mut Box<dyn ByteSource>> {
        self.volumes
            .get_mut(self.current)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no volumes to read"))
    }

    fn has_next(&self) -> bool {
        self.current + 1 < self.volumes.len()
    }

    fn advance(&mut self) -> io::Result<()> {
        let old = self.current;
        self.volumes[old].close()?;
        let new = old + 1;
        self.current = new;
        let label = &self.labels[new];
        self.volumes[new].open().map_err(|e| {
            io::Error::new(e.kind(), format!("cannot open {}: {}", label, e))
        })?;
        self.switches += 1;
        log::debug!("Switched from {} to {}", self.labels[old], self.labels[new]);
        if let Some(hook) = self.on_switch.as_mut() {
            hook(old, new);
        }
        Ok(())
    }
}

impl Default for MultiVolumeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteSource for MultiVolumeSource {
    fn open(&mut self) -> io::Result<()> {
        if self.opened {
            return Ok(());
        }
        self.current = 0;
        self.current_mut()?.open()?;
        self.opened = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let n = self.current_mut()?.read(buf)?;
            if n > 0 || !self.has_next() {
                return Ok(n);
            }
            self.advance()?;
        }
    }

    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let mut skipped = 0;
        while skipped < n {
            let step = self.current_mut()?.skip(n - skipped)?;
            skipped += step;
            if skipped < n {
                if !self.has_next() {
                    break;
                }
                self.advance()?;
            }
        }
        Ok(skipped)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let _ = pos;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "multi-volume sources are sequential",
        ))
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.opened {
            return Ok(());
        }
        self.opened = false;
        self.current_mut()?.close()
    }
}

/// Strips a trailing `.NNN` volume suffix.
fn detect_base_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    if let Some(pos) = path_str.rfind('.') {
        let suffix = &path_str[pos + 1..];
        if suffix.len() == 3 && suffix.chars().all(|c| c.is_ascii_digit()) {
            return PathBuf::from(&path_str[..pos]);
        }
    }
    path.to_path_buf()
}

/// Generates the volume path for a base path and volume number.
fn volume_path_for(base: &Path, number: u32) -> PathBuf {
    PathBuf::from(format!("{}.{:03}", base.to_string_lossy(), number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySource;
    use std::sync::{Arc, Mutex};

    fn read_all(source: &mut MultiVolumeSource) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            let n = source.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_reads_across_boundaries_and_reports_switches() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_hook = Arc::clone(&seen);
        let mut source = MultiVolumeSource::new()
            .with_volume(MemorySource::new(b"abc".to_vec()))
            .with_volume(MemorySource::new(Vec::new()))
            .with_volume(MemorySource::new(b"defgh".to_vec()))
            .on_switch(move |old, new| seen_hook.lock().unwrap().push((old, new)));
        source.open().unwrap();
        assert_eq!(read_all(&mut source), b"abcdefgh");
        assert_eq!(*seen.lock().unwrap(), vec![(0, 1), (1, 2)]);
        assert_eq!(source.switch_count(), 2);
        source.close().unwrap();
    }

    #[test]
    fn test_skip_spans_volumes() {
        let mut source = MultiVolumeSource::new()
            .with_volume(MemorySource::new(b"012".to_vec()))
            .with_volume(MemorySource::new(b"345".to_vec()));
        source.open().unwrap();
        assert_eq!(source.skip(4).unwrap(), 4);
        assert_eq!(read_all(&mut source), b"45");
        assert_eq!(source.skip(1).unwrap(), 0);
    }

    #[test]
    fn test_empty_source_fails_to_open() {
        let mut source = MultiVolumeSource::new();
        assert!(source.open().is_err());
    }

    #[test]
    fn test_detect_base_path() {
        assert_eq!(
            detect_base_path(Path::new("dir/a.tar.001")),
            PathBuf::from("dir/a.tar")
        );
        assert_eq!(detect_base_path(Path::new("a.tar")), PathBuf::from("a.tar"));
        assert_eq!(
            volume_path_for(Path::new("a.tar"), 12),
            PathBuf::from("a.tar.012")
        );
    }

    #[test]
    fn test_open_numbered_discovers_volumes() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("set.bin");
        std::fs::write(volume_path_for(&base, 1), b"one-").unwrap();
        std::fs::write(volume_path_for(&base, 2), b"two").unwrap();

        let mut source = MultiVolumeSource::open_numbered(volume_path_for(&base, 1)).unwrap();
        assert_eq!(source.volume_count(), 2);
        source.open().unwrap();
        assert_eq!(read_all(&mut source), b"one-two");
    }

    #[test]
    fn test_open_numbered_missing_first_volume() {
        let dir = tempfile::tempdir().unwrap();
        let err = MultiVolumeSource::open_numbered(dir.path().join("none.bin")).unwrap_err();
        assert!(matches!(err, Error::VolumeMissing { volume: 1, .. }));
    }
}
