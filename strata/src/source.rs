//! Migration sources and the file-tree seam beneath them.
//!
//! A [`Source`] hands the engine migration pairs and their byte streams. The
//! only filesystem capability it needs is "list the top-level files" and
//! "open one by name", captured by [`FileTree`] so that on-disk
//! ([`DirTree`]), in-memory and compiled-in ([`MemTree`]) sources all plug
//! in uniformly.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;

use crate::errors::{Error, SourceError};
use crate::migration::{is_migration_file, parse_migration, Direction, MigrationPair};

/// A minimal read-only file tree: top-level listing plus open-by-name.
pub trait FileTree: Send + Sync {
    /// Lists the names of the top-level files in the tree. Directories are
    /// not included.
    fn entries(&self) -> io::Result<Vec<String>>;

    /// Opens the named file for reading. Ownership of the reader transfers
    /// to the caller; dropping it releases the underlying resource.
    fn open(&self, name: &str) -> io::Result<Box<dyn Read + Send>>;
}

/// A [`FileTree`] over a filesystem directory, one level deep.
#[derive(Debug, Clone)]
pub struct DirTree {
    root: PathBuf,
}

impl DirTree {
    /// Creates a tree rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirTree { root: root.into() }
    }
}

impl FileTree for DirTree {
    fn entries(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn open(&self, name: &str) -> io::Result<Box<dyn Read + Send>> {
        let file = fs::File::open(self.root.join(name))?;
        Ok(Box::new(file))
    }
}

/// An in-memory [`FileTree`], for tests and for migrations compiled into
/// the binary with `include_str!`.
#[derive(Debug, Clone, Default)]
pub struct MemTree {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        MemTree::default()
    }

    /// Adds a file, replacing any previous content under the same name.
    pub fn with_file(mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(name.into(), content.into());
        self
    }
}

impl FileTree for MemTree {
    fn entries(&self) -> io::Result<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }

    fn open(&self, name: &str) -> io::Result<Box<dyn Read + Send>> {
        match self.files.get(name) {
            Some(content) => Ok(Box::new(Cursor::new(content.clone()))),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {name}"),
            )),
        }
    }
}

/// Provides the engine with migration pairs and their content.
pub trait Source: Send + Sync {
    /// Returns all migration pairs, ascending by version.
    fn list(&self) -> Result<Vec<MigrationPair>, Error>;

    /// Opens the up migration for `version`.
    fn read_up(&self, version: u64) -> Result<Box<dyn Read + Send>, Error>;

    /// Opens the down migration for `version`.
    fn read_down(&self, version: u64) -> Result<Box<dyn Read + Send>, Error>;

    /// Releases any resources held by the source. Idempotent.
    fn close(&mut self) {}
}

/// A [`Source`] backed by a [`FileTree`], scanned once at construction.
#[derive(Debug)]
pub struct FsSource<T: FileTree> {
    tree: T,
    pairs: BTreeMap<u64, MigrationPair>,
}

impl FsSource<DirTree> {
    /// Creates a source from a filesystem directory path.
    pub fn from_dir(path: impl Into<PathBuf>) -> Result<Self, Error> {
        FsSource::new(DirTree::new(path))
    }
}

impl<T: FileTree> FsSource<T> {
    /// Creates a source over `tree`, scanning it immediately.
    pub fn new(tree: T) -> Result<Self, Error> {
        let pairs = scan(&tree)?;
        Ok(FsSource { tree, pairs })
    }

    /// Returns the pair for `version`, when the source knows it.
    pub fn get(&self, version: u64) -> Option<&MigrationPair> {
        self.pairs.get(&version)
    }

    /// Returns all known versions, ascending.
    pub fn versions(&self) -> Vec<u64> {
        self.pairs.keys().copied().collect()
    }

    fn read(&self, version: u64, direction: Direction) -> Result<Box<dyn Read + Send>, Error> {
        let op = match direction {
            Direction::Up => "read up",
            Direction::Down => "read down",
        };

        let pair = self
            .pairs
            .get(&version)
            .ok_or_else(|| SourceError::new(version, op, Error::VersionNotFound))?;

        let migration = match direction {
            Direction::Up => pair.up.as_ref(),
            Direction::Down => pair.down.as_ref(),
        };
        let migration = migration.ok_or_else(|| {
            let missing = match direction {
                Direction::Up => Error::MissingUp,
                Direction::Down => Error::MissingDown,
            };
            SourceError::new(version, op, missing)
        })?;

        self.tree
            .open(&migration.raw)
            .map_err(|e| SourceError::new(version, op, Error::Io(e)).into())
    }
}

impl<T: FileTree> Source for FsSource<T> {
    fn list(&self) -> Result<Vec<MigrationPair>, Error> {
        Ok(self.pairs.values().cloned().collect())
    }

    fn read_up(&self, version: u64) -> Result<Box<dyn Read + Send>, Error> {
        self.read(version, Direction::Up)
    }

    fn read_down(&self, version: u64) -> Result<Box<dyn Read + Send>, Error> {
        self.read(version, Direction::Down)
    }

    // FsSource holds no long-lived handles; close is the trait's default
    // no-op, kept for sources that do.
}

/// Indexes every migration file in the tree into version-keyed pairs.
///
/// Non-migration filenames are skipped silently. A filename that matches
/// the pattern but fails to parse (u64 overflow) aborts the scan, as does
/// a second file with the same version and direction.
fn scan<T: FileTree>(tree: &T) -> Result<BTreeMap<u64, MigrationPair>, Error> {
    let names = tree
        .entries()
        .map_err(|e| SourceError::new(0, "scan", Error::Io(e)))?;

    let mut pairs: BTreeMap<u64, MigrationPair> = BTreeMap::new();

    for name in names {
        if !is_migration_file(&name) {
            continue;
        }

        let migration = parse_migration(&name)?;

        let pair = pairs
            .entry(migration.version)
            .or_insert_with(|| MigrationPair {
                version: migration.version,
                description: migration.description.clone(),
                up: None,
                down: None,
            });

        let slot = match migration.direction {
            Direction::Up => &mut pair.up,
            Direction::Down => &mut pair.down,
        };
        if slot.is_some() {
            return Err(Error::DuplicateMigration {
                version: migration.version,
                direction: migration.direction,
                filename: name,
            });
        }
        *slot = Some(migration);
    }

    Ok(pairs)
}
