//! Per-game world state: a directory of text files agents read and mutate.
//!
//! The store is the only state shared between pre-steps and the narrator. It
//! holds no lock; turns are sequential so nothing else touches a game's files
//! while a step runs.

use crate::error::WorldError;
use std::fs;
use std::path::{Component, Path, PathBuf};

pub trait WorldStore: Send + Sync {
    /// Every world file, concatenated under `## <path>` headers.
    fn read_context(&self, game_id: &str) -> Result<String, WorldError>;

    fn list_files(&self, game_id: &str) -> Result<Vec<String>, WorldError>;

    fn read_file(&self, game_id: &str, path: &str) -> Result<String, WorldError>;

    fn write_file(&self, game_id: &str, path: &str, content: &str) -> Result<(), WorldError>;

    /// Replace `old` with `new` in `path`. `old` must occur exactly once.
    fn replace_unique(
        &self,
        game_id: &str,
        path: &str,
        old: &str,
        new: &str,
    ) -> Result<(), WorldError>;
}

#[derive(Debug, Clone)]
pub struct FsWorldStore {
    root: PathBuf,
}

impl FsWorldStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn game_dir(&self, game_id: &str) -> Result<PathBuf, WorldError> {
        let relative = sanitize(game_id)?;
        if relative.components().count() != 1 {
            return Err(WorldError::InvalidPath(game_id.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn file_path(&self, game_id: &str, path: &str) -> Result<PathBuf, WorldError> {
        Ok(self.game_dir(game_id)?.join(sanitize(path)?))
    }
}

/// Relative, `..`-free paths only.
fn sanitize(path: &str) -> Result<PathBuf, WorldError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(WorldError::InvalidPath(path.to_string()));
    }
    let mut clean = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(WorldError::InvalidPath(path.to_string())),
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(WorldError::InvalidPath(path.to_string()));
    }
    Ok(clean)
}

/// Reduce an id to characters safe for a single directory name.
pub fn safe_segment(id: &str) -> String {
    let safe: String = id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    match safe.trim_matches('.') {
        "" => "_".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Occurrences of `needle`, overlapping ones included.
fn occurrences(haystack: &str, needle: &str) -> usize {
    let mut count = 0;
    let mut from = 0;
    while let Some(at) = haystack[from..].find(needle) {
        count += 1;
        let start = from + at;
        from = start + haystack[start..].chars().next().map_or(1, char::len_utf8);
    }
    count
}

fn io_error(path: &Path, source: std::io::Error) -> WorldError {
    WorldError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), WorldError> {
    let entries = fs::read_dir(dir).map_err(|e| io_error(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_error(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(base, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(base) {
            let parts: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(parts.join("/"));
        }
    }
    Ok(())
}

impl WorldStore for FsWorldStore {
    fn read_context(&self, game_id: &str) -> Result<String, WorldError> {
        let mut context = String::new();
        for path in self.list_files(game_id)? {
            let content = self.read_file(game_id, &path)?;
            context.push_str(&format!("## {path}\n{}\n\n", content.trim_end()));
        }
        Ok(context)
    }

    fn list_files(&self, game_id: &str) -> Result<Vec<String>, WorldError> {
        let dir = self.game_dir(game_id)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        collect_files(&dir, &dir, &mut files)?;
        files.sort();
        Ok(files)
    }

    fn read_file(&self, game_id: &str, path: &str) -> Result<String, WorldError> {
        let full = self.file_path(game_id, path)?;
        match fs::read_to_string(&full) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(WorldError::NotFound(path.to_string()))
            }
            Err(e) => Err(io_error(&full, e)),
        }
    }

    fn write_file(&self, game_id: &str, path: &str, content: &str) -> Result<(), WorldError> {
        let full = self.file_path(game_id, path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        fs::write(&full, content).map_err(|e| io_error(&full, e))?;
        log::debug!("World {game_id}: wrote {path} ({} bytes)", content.len());
        Ok(())
    }

    fn replace_unique(
        &self,
        game_id: &str,
        path: &str,
        old: &str,
        new: &str,
    ) -> Result<(), WorldError> {
        if old.is_empty() {
            return Err(WorldError::NoMatch(path.to_string()));
        }
        let content = self.read_file(game_id, path)?;
        match occurrences(&content, old) {
            0 => Err(WorldError::NoMatch(path.to_string())),
            1 => self.write_file(game_id, path, &content.replacen(old, new, 1)),
            count => Err(WorldError::Ambiguous {
                path: path.to_string(),
                count,
            }),
        }
    }
}
