//! Discovery of a running Browser Link host for an application.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

pub mod connection;
pub mod index;
pub mod path;
pub mod signal;

pub use connection::HostConnectionData;
pub use index::{DirectoryIndex, IndexSource};
pub use path::{normalize_directory_path, same_normalized_path};
pub use signal::{DirectorySignals, SignalSource, WaitOutcome};

#[cfg(windows)]
pub use index::NamedMappingIndex;
#[cfg(windows)]
pub use signal::NamedEvents;

/// Index names written by elevated and non-elevated hosts, scanned in order.
pub const GLOBAL_INDEX_NAME: &str = r"Global\PageInspector.Artery";
pub const LOCAL_INDEX_NAME: &str = "PageInspector.Artery";

/// Runtime discovery parameters derived from [`crate::config::HostConfig`].
#[derive(Debug, Clone)]
pub struct DirectoryParams {
    pub startup_timeout: Duration,
    pub index_names: Vec<String>,
    pub index_dir: Option<PathBuf>,
}

impl Default for DirectoryParams {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_millis(1500),
            index_names: vec![GLOBAL_INDEX_NAME.to_string(), LOCAL_INDEX_NAME.to_string()],
            index_dir: None,
        }
    }
}

/// Resolves application paths to host connections and wakes the host.
#[derive(Clone)]
pub struct HostDirectory {
    index: Arc<dyn IndexSource>,
    signals: Arc<dyn SignalSource>,
    params: DirectoryParams,
}

impl HostDirectory {
    pub fn new(index: Arc<dyn IndexSource>, signals: Arc<dyn SignalSource>, params: DirectoryParams) -> Self {
        Self { index, signals, params }
    }

    /// Index files and signals in `dir`.
    pub fn in_directory(dir: impl Into<PathBuf>, params: DirectoryParams) -> Self {
        let dir = dir.into();
        Self::new(
            Arc::new(DirectoryIndex::new(dir.clone())),
            Arc::new(DirectorySignals::new(dir)),
            params,
        )
    }

    /// The platform's native backends, or the directory backends when
    /// `index_dir` is set.
    pub fn system(params: DirectoryParams) -> Self {
        if let Some(dir) = params.index_dir.clone() {
            return Self::in_directory(dir, params);
        }

        #[cfg(windows)]
        {
            Self::new(Arc::new(NamedMappingIndex), Arc::new(NamedEvents), params)
        }

        #[cfg(not(windows))]
        {
            Self::in_directory(std::env::temp_dir().join("browserlink"), params)
        }
    }

    pub fn params(&self) -> &DirectoryParams {
        &self.params
    }

    /// First connection, in index order, whose projects include `app_path`.
    pub fn find_host_connection(&self, app_path: &str) -> Option<HostConnectionData> {
        let app_path = normalize_directory_path(app_path);

        for instance in self.instance_names() {
            for candidate in self.read_connection_data(&instance) {
                if candidate.serves(&app_path) {
                    debug!(app_path = %app_path, instance = %instance, "host connection found");
                    return Some(candidate);
                }
            }
        }

        debug!(app_path = %app_path, "no host serves application");
        None
    }

    /// Ask the host to start. With `block`, wait for it to report ready.
    ///
    /// A ready signal that does not exist means the host already started and
    /// cleaned it up.
    pub fn signal_host_for_startup(&self, connection: &HostConnectionData, block: bool) -> bool {
        if connection.request_signal_name.is_empty() || connection.ready_signal_name.is_empty() {
            return false;
        }

        self.signals.set(&connection.request_signal_name);
        if !block {
            return true;
        }

        match self.signals.wait(&connection.ready_signal_name, self.params.startup_timeout) {
            WaitOutcome::Signaled | WaitOutcome::Missing => {
                info!(signal = %connection.ready_signal_name, "host ready");
                true
            }
            WaitOutcome::TimedOut => {
                warn!(
                    signal = %connection.ready_signal_name,
                    timeout_ms = self.params.startup_timeout.as_millis() as u64,
                    "host did not become ready"
                );
                false
            }
        }
    }

    /// Resolve and signal in one step; false if no host serves `app_path`.
    pub fn signal_host_for_path(&self, app_path: &str, block: bool) -> bool {
        match self.find_host_connection(app_path) {
            Some(connection) => self.signal_host_for_startup(&connection, block),
            None => false,
        }
    }

    fn instance_names(&self) -> Vec<String> {
        self.params
            .index_names
            .iter()
            .filter_map(|name| self.index.read_lines(name))
            .flatten()
            .filter(|line| !line.is_empty())
            .collect()
    }

    fn read_connection_data(&self, instance: &str) -> Vec<HostConnectionData> {
        let v2_name = format!("{}{}", instance, connection::VERSION2_SUFFIX);
        if let Some(lines) = self.index.read_lines(&v2_name) {
            return connection::parse_v2(&v2_name, &lines);
        }

        self.index
            .read_lines(instance)
            .and_then(|lines| connection::parse_v1(instance, &lines))
            .into_iter()
            .collect()
    }
}

#[cfg(windows)]
pub(crate) fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const APP_PATH: &str = r"C:\path\to\My Projects\WebApplication1\src\WebApplication1";

    #[derive(Default)]
    struct MemoryIndex {
        files: HashMap<String, Vec<String>>,
    }

    impl MemoryIndex {
        fn with(mut self, name: &str, lines: &[&str]) -> Self {
            self.files.insert(name.to_string(), lines.iter().map(|s| s.to_string()).collect());
            self
        }
    }

    impl IndexSource for MemoryIndex {
        fn read_lines(&self, name: &str) -> Option<Vec<String>> {
            self.files.get(name).cloned()
        }
    }

    struct ScriptedSignals {
        sets: AtomicUsize,
        outcome: WaitOutcome,
    }

    impl SignalSource for ScriptedSignals {
        fn set(&self, _name: &str) -> bool {
            self.sets.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn wait(&self, _name: &str, _timeout: Duration) -> WaitOutcome {
            self.outcome
        }
    }

    fn directory(index: MemoryIndex, outcome: WaitOutcome) -> (HostDirectory, Arc<ScriptedSignals>) {
        let signals = Arc::new(ScriptedSignals { sets: AtomicUsize::new(0), outcome });
        (HostDirectory::new(Arc::new(index), signals.clone(), DirectoryParams::default()), signals)
    }

    fn v2_instance(port: u16, project: &str, key: &str) -> Vec<String> {
        vec![
            "host-name:localhost".to_string(),
            format!("http-port:{}", port),
            "verb-fetch-script:browserLink".to_string(),
            "verb-inject-script:injectScriptLink".to_string(),
            format!("project:{};{}", project, key),
        ]
    }

    #[test]
    fn test_find_prefers_v2_instance_file() {
        let v2 = v2_instance(2000, APP_PATH, "KEY");
        let v2: Vec<&str> = v2.iter().map(|s| s.as_str()).collect();
        let index = MemoryIndex::default()
            .with(GLOBAL_INDEX_NAME, &["BrowserLink.1"])
            .with("BrowserLink.1", &["http://localhost:1000/x/browserLink", "", APP_PATH])
            .with("BrowserLink.1.v2", &v2);
        let (dir, _) = directory(index, WaitOutcome::Signaled);

        let found = dir.find_host_connection(APP_PATH).unwrap();
        assert_eq!(found.connection_string, "http://localhost:2000/KEY/browserLink");
        assert_eq!(found.request_signal_name, "BrowserLink.1.RequestSignal");
    }

    #[test]
    fn test_find_falls_back_to_v1_and_later_index() {
        let index = MemoryIndex::default()
            .with(LOCAL_INDEX_NAME, &["", "BrowserLink.9"])
            .with("BrowserLink.9", &["http://localhost:1000/x/browserLink", "", APP_PATH]);
        let (dir, _) = directory(index, WaitOutcome::Signaled);

        let found = dir.find_host_connection(&format!("{}\\", APP_PATH.to_uppercase())).unwrap();
        assert_eq!(found.connection_string, "http://localhost:1000/x/browserLink");
        assert_eq!(found.ready_signal_name, "BrowserLink.9.ReadySignal");
    }

    #[test]
    fn test_find_scans_global_before_local() {
        let global = v2_instance(1111, APP_PATH, "G");
        let local = v2_instance(2222, APP_PATH, "L");
        let global: Vec<&str> = global.iter().map(|s| s.as_str()).collect();
        let local: Vec<&str> = local.iter().map(|s| s.as_str()).collect();
        let index = MemoryIndex::default()
            .with(GLOBAL_INDEX_NAME, &["A"])
            .with(LOCAL_INDEX_NAME, &["B"])
            .with("A.v2", &global)
            .with("B.v2", &local);
        let (dir, _) = directory(index, WaitOutcome::Signaled);

        assert_eq!(dir.find_host_connection(APP_PATH).unwrap().connection_string, "http://localhost:1111/G/browserLink");
    }

    #[test]
    fn test_find_misses_are_none() {
        let (dir, _) = directory(MemoryIndex::default(), WaitOutcome::Signaled);
        assert!(dir.find_host_connection(APP_PATH).is_none());

        let index = MemoryIndex::default()
            .with(GLOBAL_INDEX_NAME, &["Gone", "Short"])
            .with("Short", &["http://localhost:1/x/browserLink"]);
        let (dir, _) = directory(index, WaitOutcome::Signaled);
        assert!(dir.find_host_connection(APP_PATH).is_none());
        assert!(!dir.signal_host_for_path(APP_PATH, true));
    }

    #[test]
    fn test_find_requires_exact_project_root() {
        let index = MemoryIndex::default()
            .with(GLOBAL_INDEX_NAME, &["I"])
            .with("I", &["http://localhost:1/x/browserLink", "", APP_PATH]);
        let (dir, _) = directory(index, WaitOutcome::Signaled);

        assert!(dir.find_host_connection(&format!(r"{}\Views", APP_PATH)).is_none());
    }

    fn connection() -> HostConnectionData {
        connection::parse_v1("I", &["http://localhost:1/x/browserLink".to_string(), String::new(), APP_PATH.to_string()])
            .unwrap()
    }

    #[test]
    fn test_signal_without_blocking_returns_true() {
        let (dir, signals) = directory(MemoryIndex::default(), WaitOutcome::TimedOut);
        assert!(dir.signal_host_for_startup(&connection(), false));
        assert_eq!(signals.sets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_signal_blocking_outcomes() {
        for (outcome, expected) in [
            (WaitOutcome::Signaled, true),
            (WaitOutcome::Missing, true),
            (WaitOutcome::TimedOut, false),
        ] {
            let (dir, _) = directory(MemoryIndex::default(), outcome);
            assert_eq!(dir.signal_host_for_startup(&connection(), true), expected, "{:?}", outcome);
        }
    }

    #[test]
    fn test_signal_needs_signal_names() {
        let (dir, signals) = directory(MemoryIndex::default(), WaitOutcome::Signaled);
        let mut c = connection();
        c.request_signal_name.clear();

        assert!(!dir.signal_host_for_startup(&c, true));
        assert_eq!(signals.sets.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_directory_backends_end_to_end() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = HostDirectory::in_directory(tmp.path(), DirectoryParams::default());

        std::fs::write(tmp.path().join("Global_PageInspector.Artery"), "BrowserLink.7\r\n").unwrap();
        std::fs::write(
            tmp.path().join("BrowserLink.7.v2"),
            format!("host-name:localhost\r\nhttp-port:4321\r\nverb-fetch-script:browserLink\r\nproject:{};P\r\n\0\0\0", APP_PATH),
        )
        .unwrap();

        let found = dir.find_host_connection(APP_PATH).unwrap();
        assert_eq!(found.connection_string, "http://localhost:4321/P/browserLink");

        let signals = DirectorySignals::new(tmp.path());
        signals.create(&found.request_signal_name).unwrap();
        assert!(dir.signal_host_for_startup(&found, true), "missing ready signal means started");
        assert!(signals.is_set(&found.request_signal_name));
    }
}
