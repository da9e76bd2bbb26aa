//! Finding target processes and loading the probe into them.
//!
//! Both are collaborators the capture session consumes but does not
//! implement: enumerating audio sessions and injecting a library are
//! platform services. [`StaticDiscovery`] is an in-memory source for tests
//! and demos.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use parking_lot::RwLock;

/// A process that may render audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessInfo {
    /// OS process id.
    pub pid: u32,
    /// Whether the process is 64-bit, which decides the payload to inject.
    pub is_64bit: bool,
}

/// An application and the processes it currently runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Application {
    /// Name shown to users.
    pub display_name: String,
    /// Running processes belonging to the application.
    pub processes: HashSet<ProcessInfo>,
}

impl Application {
    /// Creates an application with no processes.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            processes: HashSet::new(),
        }
    }

    /// Adds a process, builder style.
    #[must_use]
    pub fn with_process(mut self, pid: u32, is_64bit: bool) -> Self {
        self.processes.insert(ProcessInfo { pid, is_64bit });
        self
    }

    /// Pids of all processes.
    pub fn pids(&self) -> HashSet<u32> {
        self.processes.iter().map(|p| p.pid).collect()
    }
}

/// Applications keyed by target name (typically the executable name).
pub type ApplicationMap = HashMap<String, Application>;

/// Source of the current set of target applications.
///
/// Called once per update cycle from a blocking-capable thread.
pub trait TargetDiscovery: Send + Sync {
    /// Enumerates applications currently rendering audio.
    ///
    /// # Errors
    ///
    /// An error skips this cycle; the previous producers stay attached.
    fn refresh(&self) -> Result<ApplicationMap, String>;
}

/// Loads the capture probe into another process.
pub trait Injector: Send + Sync {
    /// Runs `loader` to load `payload` into `pid`. Returns whether it worked.
    fn inject(&self, loader: &Path, payload: &Path, pid: u32) -> bool;
}

impl<F> Injector for F
where
    F: Fn(&Path, &Path, u32) -> bool + Send + Sync,
{
    fn inject(&self, loader: &Path, payload: &Path, pid: u32) -> bool {
        self(loader, payload, pid)
    }
}

/// Discovery backed by a map the caller edits.
///
/// # Example
///
/// ```
/// use app_audio_capture::discovery::{Application, StaticDiscovery, TargetDiscovery};
///
/// let discovery = StaticDiscovery::new();
/// discovery.insert("game.exe", Application::new("Game").with_process(4242, true));
///
/// let apps = discovery.refresh().unwrap();
/// assert!(apps["game.exe"].pids().contains(&4242));
/// ```
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    apps: RwLock<ApplicationMap>,
}

impl StaticDiscovery {
    /// Creates an empty discovery source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an application.
    pub fn insert(&self, name: impl Into<String>, app: Application) {
        self.apps.write().insert(name.into(), app);
    }

    /// Removes an application, as if all its processes exited.
    pub fn remove(&self, name: &str) -> Option<Application> {
        self.apps.write().remove(name)
    }

    /// Replaces the process set of `name`, creating the entry if needed.
    pub fn set_processes(&self, name: &str, processes: impl IntoIterator<Item = ProcessInfo>) {
        let mut apps = self.apps.write();
        let app = apps
            .entry(name.to_string())
            .or_insert_with(|| Application::new(name));
        app.processes = processes.into_iter().collect();
    }
}

impl TargetDiscovery for StaticDiscovery {
    fn refresh(&self) -> Result<ApplicationMap, String> {
        Ok(self.apps.read().clone())
    }
}

impl<T: TargetDiscovery + ?Sized> TargetDiscovery for std::sync::Arc<T> {
    fn refresh(&self) -> Result<ApplicationMap, String> {
        (**self).refresh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_static_discovery_edits() {
        let discovery = StaticDiscovery::new();
        discovery.insert("a.exe", Application::new("A").with_process(1, true));
        discovery.set_processes(
            "a.exe",
            [
                ProcessInfo { pid: 2, is_64bit: true },
                ProcessInfo { pid: 3, is_64bit: false },
            ],
        );

        let apps = discovery.refresh().unwrap();
        assert_eq!(apps["a.exe"].display_name, "A");
        assert_eq!(apps["a.exe"].pids(), HashSet::from([2, 3]));

        discovery.remove("a.exe");
        assert!(discovery.refresh().unwrap().is_empty());
    }

    #[test]
    fn test_closure_is_an_injector() {
        let last = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&last);
        let injector = move |_: &Path, _: &Path, pid: u32| {
            seen.store(pid, Ordering::SeqCst);
            pid % 2 == 0
        };

        assert!(injector.inject(Path::new("loader"), Path::new("payload"), 8));
        assert!(!injector.inject(Path::new("loader"), Path::new("payload"), 9));
        assert_eq!(last.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn test_shared_discovery_delegates() {
        let discovery = Arc::new(StaticDiscovery::new());
        discovery.insert("b.exe", Application::new("B"));
        let shared: Arc<StaticDiscovery> = Arc::clone(&discovery);
        assert!(shared.refresh().unwrap().contains_key("b.exe"));
    }
}
