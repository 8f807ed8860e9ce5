//! Read-only access to the index and instance files published by the host.
//!
//! On Windows these are named file mappings in the kernel object namespace.
//! Elsewhere the same names resolve to files in a directory, which is what
//! the fake host and the integration tests use.

use std::path::{Path, PathBuf};

use tracing::trace;

/// A source of named text files. Missing names yield `None`, never an error.
pub trait IndexSource: Send + Sync {
    fn read_lines(&self, name: &str) -> Option<Vec<String>>;
}

/// Decode a mapped region as UTF-8 lines.
///
/// The mapping is usually larger than its content, so text ends at the first
/// NUL. A leading BOM is dropped. `\n`, `\r\n` and a lone `\r` all end a line
/// and a trailing terminator does not produce an empty final line.
pub fn split_index_text(bytes: &[u8]) -> Vec<String> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let mut bytes = &bytes[..end];
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        bytes = rest;
    }

    let text = String::from_utf8_lossy(bytes);
    let mut lines = Vec::new();
    let mut rest: &str = &text;

    while !rest.is_empty() {
        match rest.find(['\r', '\n']) {
            Some(pos) => {
                lines.push(rest[..pos].to_string());
                let skip = if rest[pos..].starts_with("\r\n") { 2 } else { 1 };
                rest = &rest[pos + skip..];
            }
            None => {
                lines.push(rest.to_string());
                break;
            }
        }
    }

    lines
}

/// Map a kernel object name onto a file name: `Global\X` becomes `Global_X`.
pub fn sanitize_name(name: &str) -> String {
    name.replace(['\\', '/'], "_")
}

/// Index files stored as plain files in one directory.
#[derive(Debug, Clone)]
pub struct DirectoryIndex {
    dir: PathBuf,
}

impl DirectoryIndex {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(sanitize_name(name))
    }
}

impl IndexSource for DirectoryIndex {
    fn read_lines(&self, name: &str) -> Option<Vec<String>> {
        if name.is_empty() {
            return None;
        }
        let path = self.path_for(name);
        match map_file::read(&path) {
            Ok(bytes) => Some(split_index_text(&bytes)),
            Err(e) => {
                trace!(path = %path.display(), error = %e, "index file unavailable");
                None
            }
        }
    }
}

#[cfg(unix)]
mod map_file {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;
    use std::path::Path;

    /// Copy the contents of a read-only private mapping of `path`.
    pub fn read(path: &Path) -> io::Result<Vec<u8>> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            return Ok(Vec::new());
        }

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: the mapping is `len` readable bytes until munmap below.
        let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, len) }.to_vec();
        unsafe {
            libc::munmap(ptr, len);
        }
        Ok(bytes)
    }
}

#[cfg(not(unix))]
mod map_file {
    use std::io;
    use std::path::Path;

    pub fn read(path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// Named file mappings created by the host in the kernel object namespace.
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct NamedMappingIndex;

#[cfg(windows)]
impl IndexSource for NamedMappingIndex {
    fn read_lines(&self, name: &str) -> Option<Vec<String>> {
        use windows_sys::Win32::Foundation::{CloseHandle, FALSE};
        use windows_sys::Win32::System::Memory::{
            MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, VirtualQuery, FILE_MAP_READ,
            MEMORY_BASIC_INFORMATION,
        };

        if name.is_empty() {
            return None;
        }
        let wide = super::to_wide(name);

        let mapping = unsafe { OpenFileMappingW(FILE_MAP_READ, FALSE, wide.as_ptr()) };
        if mapping.is_null() {
            trace!(name, "named mapping unavailable");
            return None;
        }

        let view = unsafe { MapViewOfFile(mapping, FILE_MAP_READ, 0, 0, 0) };
        if view.Value.is_null() {
            unsafe { CloseHandle(mapping) };
            return None;
        }

        let mut info: MEMORY_BASIC_INFORMATION = unsafe { std::mem::zeroed() };
        let queried = unsafe {
            VirtualQuery(view.Value, &mut info, std::mem::size_of::<MEMORY_BASIC_INFORMATION>())
        };
        let lines = if queried == 0 {
            Vec::new()
        } else {
            // SAFETY: VirtualQuery reports the committed size of the view.
            let bytes = unsafe { std::slice::from_raw_parts(view.Value as *const u8, info.RegionSize) };
            split_index_text(bytes)
        };

        unsafe {
            UnmapViewOfFile(view);
            CloseHandle(mapping);
        }
        Some(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_line_endings() {
        assert_eq!(split_index_text(b"a\r\nb\nc\rd"), vec!["a", "b", "c", "d"]);
        assert_eq!(split_index_text(b"a\n\nb\n"), vec!["a", "", "b"]);
        assert!(split_index_text(b"").is_empty());
    }

    #[test]
    fn test_split_stops_at_nul() {
        let mut region = b"first\r\nsecond\r\n".to_vec();
        region.resize(4096, 0);
        region[100] = b'x';
        assert_eq!(split_index_text(&region), vec!["first", "second"]);
    }

    #[test]
    fn test_split_strips_bom() {
        assert_eq!(split_index_text(b"\xEF\xBB\xBFhost-name:localhost"), vec!["host-name:localhost"]);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name(r"Global\PageInspector.Artery"), "Global_PageInspector.Artery");
        assert_eq!(sanitize_name("PageInspector.Artery"), "PageInspector.Artery");
    }

    #[test]
    fn test_directory_index_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Global_Index"), "one\r\ntwo\r\n").unwrap();
        std::fs::write(dir.path().join("Empty"), "").unwrap();

        let index = DirectoryIndex::new(dir.path());
        assert_eq!(index.read_lines(r"Global\Index"), Some(vec!["one".to_string(), "two".to_string()]));
        assert_eq!(index.read_lines("Empty"), Some(vec![]));
        assert_eq!(index.read_lines("Missing"), None);
        assert_eq!(index.read_lines(""), None);
    }
}
