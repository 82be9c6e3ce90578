//! The share registry.
//!
//! Holds the ordered name→path bindings of one server process. Every read
//! and write goes through a single mutex, so an add or remove is either
//! fully visible or not visible at all, and listings are copied out as
//! snapshots before anyone iterates them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Share exists already")]
    AlreadyExists,

    #[error("Invalid share specification: {0}")]
    InvalidSpec(String),

    #[error("Failed to resolve path: {0}")]
    Io(#[from] std::io::Error),
}

/// A named file exposed for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub name: String,
    /// Absolute path, resolved when the share was registered.
    pub path: PathBuf,
    /// Reserved for expiring shares; never set yet.
    pub timeout: Option<Duration>,
}

impl fmt::Display for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.path.display())
    }
}

/// A parsed `[name:]path` argument.
///
/// The name is everything before the first `:`. Without a colon, the name
/// is the final segment of the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareSpec {
    pub name: String,
    pub path: PathBuf,
}

impl ShareSpec {
    /// Parse a `[name:]path` argument without touching the filesystem.
    pub fn parse(spec: &str) -> Result<Self, RegistryError> {
        let (name, path) = match spec.split_once(':') {
            Some((name, path)) => (name.to_string(), path),
            None => (final_segment(spec).to_string(), spec),
        };

        if name.is_empty() {
            return Err(RegistryError::InvalidSpec(format!(
                "no share name in '{}'",
                spec
            )));
        }
        if path.is_empty() {
            return Err(RegistryError::InvalidSpec(format!(
                "no path in '{}'",
                spec
            )));
        }

        Ok(Self {
            name,
            path: PathBuf::from(path),
        })
    }

    /// Return the same spec with its path made absolute against the
    /// current working directory.
    pub fn resolve(self) -> Result<Self, RegistryError> {
        Ok(Self {
            path: absolute(&self.path)?,
            ..self
        })
    }

    /// Wire form used by the control protocol's `add` command.
    pub fn to_arg(&self) -> String {
        format!("{}:{}", self.name, self.path.display())
    }
}

fn final_segment(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        std::path::absolute(path)
    }
}

/// Ordered, thread-safe collection of shares.
#[derive(Debug, Default)]
pub struct Registry {
    shares: Mutex<Vec<Share>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn shares(&self) -> MutexGuard<'_, Vec<Share>> {
        // No critical section can panic halfway through a mutation, so a
        // poisoned vector is still consistent.
        self.shares.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a share, resolving `path` to an absolute path now.
    ///
    /// Fails with [`RegistryError::AlreadyExists`] if `name` is taken.
    pub fn add(&self, name: &str, path: impl AsRef<Path>) -> Result<Share, RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::InvalidSpec("empty share name".to_string()));
        }
        let path = absolute(path.as_ref())?;

        let mut shares = self.shares();
        if shares.iter().any(|s| s.name == name) {
            return Err(RegistryError::AlreadyExists);
        }

        let share = Share {
            name: name.to_string(),
            path,
            timeout: None,
        };
        shares.push(share.clone());
        Ok(share)
    }

    /// Register a parsed `[name:]path` spec.
    pub fn add_spec(&self, spec: &ShareSpec) -> Result<Share, RegistryError> {
        self.add(&spec.name, &spec.path)
    }

    /// Remove the share called `name`, keeping the order of the rest.
    pub fn remove(&self, name: &str) -> bool {
        let mut shares = self.shares();
        match shares.iter().position(|s| s.name == name) {
            Some(index) => {
                shares.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Share> {
        self.shares().iter().find(|s| s.name == name).cloned()
    }

    /// Point-in-time copy of all shares in insertion order.
    pub fn list(&self) -> Vec<Share> {
        self.shares().clone()
    }

    pub fn len(&self) -> usize {
        self.shares().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_parse_named_spec() {
        let spec = ShareSpec::parse("report:/tmp/report.txt").unwrap();
        assert_eq!(spec.name, "report");
        assert_eq!(spec.path, PathBuf::from("/tmp/report.txt"));
    }

    #[test]
    fn test_parse_path_only_uses_final_segment() {
        let spec = ShareSpec::parse("/var/log/syslog").unwrap();
        assert_eq!(spec.name, "syslog");
        assert_eq!(spec.path, PathBuf::from("/var/log/syslog"));

        let spec = ShareSpec::parse("notes.md").unwrap();
        assert_eq!(spec.name, "notes.md");
    }

    #[test]
    fn test_parse_splits_on_first_colon() {
        let spec = ShareSpec::parse("a:/tmp/b:c").unwrap();
        assert_eq!(spec.name, "a");
        assert_eq!(spec.path, PathBuf::from("/tmp/b:c"));
    }

    #[test]
    fn test_parse_rejects_empty_name() {
        assert!(matches!(
            ShareSpec::parse("/tmp/dir/"),
            Err(RegistryError::InvalidSpec(_))
        ));
        assert!(matches!(
            ShareSpec::parse(":/tmp/x"),
            Err(RegistryError::InvalidSpec(_))
        ));
        assert!(matches!(
            ShareSpec::parse("name:"),
            Err(RegistryError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_resolve_makes_path_absolute() {
        let spec = ShareSpec::parse("x:relative/file.txt")
            .unwrap()
            .resolve()
            .unwrap();
        assert!(spec.path.is_absolute());
        assert!(spec.path.ends_with("relative/file.txt"));
        assert_eq!(spec.to_arg(), format!("x:{}", spec.path.display()));
    }

    #[test]
    fn test_add_and_lookup() {
        let registry = Registry::new();
        let share = registry.add("a", "/tmp/x").unwrap();
        assert_eq!(share.path, PathBuf::from("/tmp/x"));
        assert!(share.timeout.is_none());

        assert_eq!(registry.lookup("a"), Some(share));
        assert_eq!(registry.lookup("b"), None);
    }

    #[test]
    fn test_add_relative_path_is_resolved() {
        let registry = Registry::new();
        let share = registry.add("rel", "some/file").unwrap();
        assert!(share.path.is_absolute());
    }

    #[test]
    fn test_duplicate_add_keeps_first() {
        let registry = Registry::new();
        registry.add("a", "/tmp/x").unwrap();

        let result = registry.add("a", "/tmp/y");
        assert!(matches!(result, Err(RegistryError::AlreadyExists)));
        assert_eq!(registry.lookup("a").unwrap().path, PathBuf::from("/tmp/x"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_preserves_order() {
        let registry = Registry::new();
        for name in ["a", "b", "c", "d"] {
            registry.add(name, format!("/tmp/{}", name)).unwrap();
        }

        assert!(registry.remove("b"));
        assert!(!registry.remove("b"));
        assert!(!registry.remove("missing"));

        let names: Vec<_> = registry.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "c", "d"]);
    }

    #[test]
    fn test_list_is_a_snapshot() {
        let registry = Registry::new();
        registry.add("a", "/tmp/a").unwrap();

        let snapshot = registry.list();
        registry.add("b", "/tmp/b").unwrap();
        registry.remove("a");

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "a");
        assert_eq!(registry.list()[0].name, "b");
    }

    #[test]
    fn test_share_display() {
        let share = Share {
            name: "report".to_string(),
            path: PathBuf::from("/tmp/report.txt"),
            timeout: None,
        };
        assert_eq!(share.to_string(), "report /tmp/report.txt");
    }

    #[test]
    fn test_concurrent_adds_never_duplicate() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let mut added = 0;
                    for i in 0..50 {
                        // Every thread races for the same 50 names.
                        if registry.add(&format!("n{}", i), format!("/tmp/{}", t)).is_ok() {
                            added += 1;
                        }
                        if i % 7 == 0 {
                            registry.remove(&format!("n{}", i / 2));
                        }
                    }
                    added
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let names: Vec<_> = registry.list().into_iter().map(|s| s.name).collect();
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(names.len(), unique.len());
    }
}
