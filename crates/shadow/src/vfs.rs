//! # Virtual Filesystem
//!
//! In-memory file tree the sandbox exposes to candidates. Everything a
//! candidate writes lands here and stays visible to later (nested) analyses
//! in the same session; nothing touches the host disk.
//!
//! Paths are POSIX-style and normalized against [`SANDBOX_ROOT`]. Directories
//! exist implicitly as prefixes of stored files, plus the root itself.

use std::collections::BTreeMap;

/// Working directory of every sandboxed candidate.
pub const SANDBOX_ROOT: &str = "/sandbox";

/// Errors from virtual file operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShadowError {
    #[error("No such file or directory: '{0}'")]
    NotFound(String),
    #[error("Is a directory: '{0}'")]
    IsADirectory(String),
    #[error("Not a directory: '{0}'")]
    NotADirectory(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualFs {
    files: BTreeMap<String, String>,
}

impl VirtualFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absolute, `.`/`..`-free form of `path`, resolved against the sandbox
    /// working directory.
    pub fn normalize(path: &str) -> String {
        let joined = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{SANDBOX_ROOT}/{path}")
        };
        let mut parts: Vec<&str> = Vec::new();
        for part in joined.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        format!("/{}", parts.join("/"))
    }

    /// Contents of the file at `path`.
    ///
    /// # Errors
    /// `NotFound` for missing paths, `IsADirectory` for directory prefixes.
    pub fn read(&self, path: &str) -> Result<&str, ShadowError> {
        let key = Self::normalize(path);
        match self.files.get(&key) {
            Some(text) => Ok(text),
            None if self.is_dir(&key) => Err(ShadowError::IsADirectory(key)),
            None => Err(ShadowError::NotFound(key)),
        }
    }

    /// Creates or truncates `path` with `contents`.
    ///
    /// # Errors
    /// `IsADirectory` when `path` names an existing directory.
    pub fn write(&mut self, path: &str, contents: impl Into<String>) -> Result<(), ShadowError> {
        let key = Self::normalize(path);
        if self.is_dir(&key) {
            return Err(ShadowError::IsADirectory(key));
        }
        self.files.insert(key, contents.into());
        Ok(())
    }

    /// Appends to `path`, creating it if needed.
    ///
    /// # Errors
    /// `IsADirectory` when `path` names an existing directory.
    pub fn append(&mut self, path: &str, text: &str) -> Result<(), ShadowError> {
        let key = Self::normalize(path);
        if self.is_dir(&key) {
            return Err(ShadowError::IsADirectory(key));
        }
        self.files.entry(key).or_default().push_str(text);
        Ok(())
    }

    /// Deletes the file at `path`.
    ///
    /// # Errors
    /// `NotFound` when no such file exists.
    pub fn remove(&mut self, path: &str) -> Result<(), ShadowError> {
        let key = Self::normalize(path);
        match self.files.remove(&key) {
            Some(_) => Ok(()),
            None if self.is_dir(&key) => Err(ShadowError::IsADirectory(key)),
            None => Err(ShadowError::NotFound(key)),
        }
    }

    pub fn is_file(&self, path: &str) -> bool {
        self.files.contains_key(&Self::normalize(path))
    }

    pub fn is_dir(&self, path: &str) -> bool {
        let key = Self::normalize(path);
        if key == "/" || key == SANDBOX_ROOT {
            return true;
        }
        let prefix = format!("{key}/");
        self.files
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.is_file(path) || self.is_dir(path)
    }

    /// Sorted names of the entries directly inside `path`.
    ///
    /// # Errors
    /// `NotADirectory` for files, `NotFound` for missing paths.
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, ShadowError> {
        let key = Self::normalize(path);
        if self.files.contains_key(&key) {
            return Err(ShadowError::NotADirectory(key));
        }
        if !self.is_dir(&key) {
            return Err(ShadowError::NotFound(key));
        }
        let prefix = if key == "/" { key } else { format!("{key}/") };
        let mut names: Vec<String> = self
            .files
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .map(str::to_string)
            .collect();
        names.dedup();
        Ok(names)
    }

    /// Path of the first stored file whose contents equal `contents`.
    pub fn find_by_content(&self, contents: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|(_, text)| text.as_str() == contents)
            .map(|(path, _)| path.as_str())
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, t)| (p.as_str(), t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Directory part of a POSIX path (`os.path.dirname`).
pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => "",
    }
}

/// Final component of a POSIX path (`os.path.basename`).
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// `os.path.join`: an absolute component discards everything before it.
pub fn join<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for part in parts {
        if part.starts_with('/') {
            out.clear();
        } else if !out.is_empty() && !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(part);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_resolves_relative_and_parent_parts() {
        assert_eq!(VirtualFs::normalize("a.py"), "/sandbox/a.py");
        assert_eq!(VirtualFs::normalize("/sandbox/./x/../b.py"), "/sandbox/b.py");
        assert_eq!(VirtualFs::normalize("/../.."), "/");
    }

    #[test]
    fn test_write_then_read() {
        let mut fs = VirtualFs::new();
        fs.write("b.py", "print(1)\n").unwrap();
        assert_eq!(fs.read("/sandbox/b.py").unwrap(), "print(1)\n");
        fs.append("b.py", "print(2)\n").unwrap();
        assert_eq!(fs.read("b.py").unwrap(), "print(1)\nprint(2)\n");
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let fs = VirtualFs::new();
        assert_eq!(
            fs.read("nope.txt"),
            Err(ShadowError::NotFound("/sandbox/nope.txt".into()))
        );
    }

    #[test]
    fn test_directories_are_implicit() {
        let mut fs = VirtualFs::new();
        fs.write("/sandbox/pkg/mod.py", "").unwrap();
        fs.write("/sandbox/top.py", "").unwrap();
        assert!(fs.is_dir("/sandbox/pkg"));
        assert!(!fs.is_dir("/sandbox/pk"));
        assert!(matches!(fs.read("pkg"), Err(ShadowError::IsADirectory(_))));
        assert_eq!(fs.list_dir("/sandbox").unwrap(), vec!["pkg", "top.py"]);
    }

    #[test]
    fn test_remove() {
        let mut fs = VirtualFs::new();
        fs.write("x", "1").unwrap();
        fs.remove("x").unwrap();
        assert!(!fs.exists("x"));
        assert!(fs.remove("x").is_err());
    }

    #[test]
    fn test_find_by_content() {
        let mut fs = VirtualFs::new();
        fs.write("a.py", "A").unwrap();
        fs.write("b.py", "B").unwrap();
        assert_eq!(fs.find_by_content("B"), Some("/sandbox/b.py"));
        assert_eq!(fs.find_by_content("C"), None);
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(dirname("/sandbox/a.py"), "/sandbox");
        assert_eq!(dirname("/a.py"), "/");
        assert_eq!(dirname("a.py"), "");
        assert_eq!(basename("/sandbox/a.py"), "a.py");
        assert_eq!(join(["/sandbox", "b.py"]), "/sandbox/b.py");
        assert_eq!(join(["/sandbox", "/etc", "x"]), "/etc/x");
        assert_eq!(join(["", "b.py"]), "b.py");
    }
}
