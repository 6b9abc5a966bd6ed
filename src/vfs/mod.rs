//! Virtual Filesystem
//!
//! A read-only node tree keyed by canonical absolute path. The tree is built
//! once per persona and shared between sessions through an `Arc`; each
//! session wraps it in a [`VirtualFs`] holding its own working directory.
//!
//! File nodes carry either fixed text or a generator that runs on every read,
//! so `/proc` style files never repeat stale numbers. Generators that sample
//! numbers draw from the reading session's rng, keeping seeded sessions
//! reproducible.

mod etc;
mod proc;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use thiserror::Error;

use crate::persona::Persona;

pub use proc::{MemSnapshot, load_average, memory_snapshot, system_uptime};

/// Home directory every session starts in
pub const HOME_ROOT: &str = "/root";

/// Timestamp shown by `ls -l` for files shipped with the image
pub const IMAGE_MTIME: &str = "Oct  6  2021";

// ============================================================================
// Errors
// ============================================================================

/// Errors returned by filesystem lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("No such file or directory")]
    NotFound,
    #[error("Not a directory")]
    NotADirectory,
    #[error("Is a directory")]
    NotAFile,
}

// ============================================================================
// Nodes
// ============================================================================

/// Content of a file node
pub enum FileContent {
    /// Fixed text
    Static(String),
    /// Computed fresh from the persona on every read
    Generated(fn(&Persona) -> String),
    /// Computed from the persona plus numbers drawn from the reader's rng
    Sampled(fn(&Persona, &mut StdRng) -> String),
}

/// Directory or file payload
pub enum NodeKind {
    Directory(BTreeSet<String>),
    File(FileContent),
}

/// A node in the tree
pub struct Node {
    pub kind: NodeKind,
    /// Permission bits (`0o755`, ...)
    pub mode: u16,
    pub owner: &'static str,
    /// Files whose content is regenerated report the current time in `ls -l`
    pub volatile: bool,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }

    pub fn is_executable(&self) -> bool {
        !self.is_dir() && self.mode & 0o111 != 0
    }

    /// `ls -l` style permission string
    pub fn mode_string(&self) -> String {
        let mut out = String::with_capacity(10);
        out.push(if self.is_dir() { 'd' } else { '-' });
        for shift in [6u16, 3, 0] {
            let bits = (self.mode >> shift) & 0o7;
            out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        if self.mode & 0o1000 != 0 {
            out.pop();
            out.push(if self.mode & 0o1 != 0 { 't' } else { 'T' });
        }
        out
    }
}

// ============================================================================
// Path Normalization
// ============================================================================

/// Resolve `path` against `cwd` and `home` into a canonical absolute path
///
/// A leading `~` expands to `home`, relative paths are joined onto `cwd`,
/// empty and `.` segments are dropped and `..` pops one segment, clamping at
/// root. The result has no trailing separator unless it is `/` itself.
pub fn normalize(path: &str, cwd: &str, home: &str) -> String {
    let expanded = if path == "~" {
        home.to_string()
    } else if let Some(rest) = path.strip_prefix("~/") {
        format!("{}/{}", home, rest)
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", cwd, path)
    };

    let mut components: Vec<&str> = Vec::new();
    for component in expanded.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            c => components.push(c),
        }
    }

    if components.is_empty() {
        return String::from("/");
    }
    let mut result = String::new();
    for c in components {
        result.push('/');
        result.push_str(c);
    }
    result
}

/// Final path segment of a canonical path
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("/")
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

// ============================================================================
// Shared Tree
// ============================================================================

/// Immutable node tree for one persona
pub struct FsTree {
    persona: &'static Persona,
    nodes: BTreeMap<String, Node>,
}

impl FsTree {
    /// An empty tree holding only `/`
    pub fn new(persona: &'static Persona) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            String::from("/"),
            Node {
                kind: NodeKind::Directory(BTreeSet::new()),
                mode: 0o755,
                owner: "root",
                volatile: false,
            },
        );
        Self { persona, nodes }
    }

    /// The full device image for `persona`
    pub fn for_persona(persona: &'static Persona) -> Self {
        let mut tree = Self::new(persona);
        etc::populate(&mut tree);
        proc::populate(&mut tree);
        tree
    }

    pub fn persona(&self) -> &'static Persona {
        self.persona
    }

    /// Look up a canonical path
    pub fn node(&self, path: &str) -> Option<&Node> {
        self.nodes.get(path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a directory, creating missing parents
    pub fn add_dir(&mut self, path: &str, mode: u16, owner: &'static str) {
        if let Some(existing) = self.nodes.get_mut(path).filter(|n| n.is_dir()) {
            existing.mode = mode;
            existing.owner = owner;
            return;
        }
        self.insert(
            path,
            Node {
                kind: NodeKind::Directory(BTreeSet::new()),
                mode,
                owner,
                volatile: false,
            },
        );
    }

    /// Add a fixed-content file
    pub fn add_file(&mut self, path: &str, mode: u16, owner: &'static str, text: impl Into<String>) {
        self.insert(
            path,
            Node {
                kind: NodeKind::File(FileContent::Static(text.into())),
                mode,
                owner,
                volatile: false,
            },
        );
    }

    /// Add a file computed from the persona on each read
    pub fn add_generated(
        &mut self,
        path: &str,
        mode: u16,
        volatile: bool,
        generator: fn(&Persona) -> String,
    ) {
        self.insert(
            path,
            Node {
                kind: NodeKind::File(FileContent::Generated(generator)),
                mode,
                owner: "root",
                volatile,
            },
        );
    }

    /// Add a procfs style file whose numbers fluctuate between reads
    pub fn add_sampled(&mut self, path: &str, mode: u16, sampler: fn(&Persona, &mut StdRng) -> String) {
        self.insert(
            path,
            Node {
                kind: NodeKind::File(FileContent::Sampled(sampler)),
                mode,
                owner: "root",
                volatile: true,
            },
        );
    }

    fn insert(&mut self, path: &str, node: Node) {
        let path = normalize(path, "/", HOME_ROOT);
        if path == "/" {
            return;
        }
        let parent = parent_of(&path).to_string();
        if !self.nodes.contains_key(&parent) {
            self.add_dir(&parent, 0o755, "root");
        }
        if let Some(Node {
            kind: NodeKind::Directory(children),
            ..
        }) = self.nodes.get_mut(&parent)
        {
            children.insert(basename(&path).to_string());
        }
        self.nodes.insert(path, node);
    }
}

// ============================================================================
// Per-Session View
// ============================================================================

/// A session's view of the shared tree
pub struct VirtualFs {
    tree: Arc<FsTree>,
    cwd: String,
    home: String,
}

impl VirtualFs {
    /// Start in the home root
    pub fn new(tree: Arc<FsTree>) -> Self {
        Self {
            tree,
            cwd: String::from(HOME_ROOT),
            home: String::from(HOME_ROOT),
        }
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn home(&self) -> &str {
        &self.home
    }

    pub fn persona(&self) -> &'static Persona {
        self.tree.persona()
    }

    /// Canonical form of `path` relative to this session
    pub fn normalize(&self, path: &str) -> String {
        normalize(path, &self.cwd, &self.home)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.get(path).is_ok()
    }

    /// Look up a node
    pub fn get(&self, path: &str) -> Result<&Node, FsError> {
        self.tree.node(&self.normalize(path)).ok_or(FsError::NotFound)
    }

    /// Ordered child names of a directory
    pub fn list(&self, path: &str) -> Result<Vec<String>, FsError> {
        match &self.get(path)?.kind {
            NodeKind::Directory(children) => Ok(children.iter().cloned().collect()),
            NodeKind::File(_) => Err(FsError::NotADirectory),
        }
    }

    /// Read file content, running its generator if it has one
    ///
    /// Sampled files draw their fluctuating numbers from `rng`.
    pub fn read(&self, path: &str, rng: &mut StdRng) -> Result<String, FsError> {
        match &self.get(path)?.kind {
            NodeKind::File(FileContent::Static(text)) => Ok(text.clone()),
            NodeKind::File(FileContent::Generated(generator)) => Ok(generator(self.tree.persona())),
            NodeKind::File(FileContent::Sampled(sampler)) => Ok(sampler(self.tree.persona(), rng)),
            NodeKind::Directory(_) => Err(FsError::NotAFile),
        }
    }

    /// Byte size as reported by `ls -l`
    pub fn size_of(&self, path: &str) -> Result<usize, FsError> {
        let node = self.get(path)?;
        match &node.kind {
            NodeKind::Directory(_) => Ok(4096),
            // procfs reports zero for everything
            NodeKind::File(_) if node.volatile => Ok(0),
            NodeKind::File(FileContent::Static(text)) => Ok(text.len()),
            NodeKind::File(FileContent::Generated(generator)) => Ok(generator(self.tree.persona()).len()),
            NodeKind::File(FileContent::Sampled(_)) => Ok(0),
        }
    }

    /// Move the working directory; returns the new canonical path
    pub fn change_directory(&mut self, path: &str) -> Result<String, FsError> {
        let target = self.normalize(path);
        let node = self.tree.node(&target).ok_or(FsError::NotFound)?;
        if !node.is_dir() {
            return Err(FsError::NotADirectory);
        }
        self.cwd = target.clone();
        Ok(target)
    }

    /// Depth-first listing of `path` and everything under it
    pub fn walk(&self, path: &str) -> Result<Vec<String>, FsError> {
        let start = self.normalize(path);
        self.tree.node(&start).ok_or(FsError::NotFound)?;

        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            if let Some(Node {
                kind: NodeKind::Directory(children),
                ..
            }) = self.tree.node(&current)
            {
                for child in children.iter().rev() {
                    stack.push(join(&current, child));
                }
            }
            out.push(current);
        }
        Ok(out)
    }
}
