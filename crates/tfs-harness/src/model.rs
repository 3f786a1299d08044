//! In-memory reference filesystem.
//!
//! Mirrors the engine's observable behavior: the same path grammar, the same
//! error precedence, lowest-first inode numbering and swap-with-last entry
//! removal. The only resource it tracks besides inodes is the number of data
//! blocks in use, which is enough to predict allocation failures.

use serde::{Deserialize, Serialize};
use tfs::{ExpectedKind, FileKind, Filesystem, Geometry, MAX_FILE_SIZE, NAME_MAX, TfsError};

const ENTRIES_PER_BLOCK: usize = 16;
const ENTRY_SIZE: usize = 32;
const MAX_ENTRIES: usize = 128;
const BLOCK_BYTES: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Dir(Vec<(String, u32)>),
    File(Vec<u8>),
}

impl Node {
    fn kind(&self) -> FileKind {
        match self {
            Self::Dir(_) => FileKind::Directory,
            Self::File(_) => FileKind::File,
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::Dir(children) => children.len() * ENTRY_SIZE,
            Self::File(content) => content.len(),
        }
    }

    fn blocks(&self) -> usize {
        self.size().div_ceil(BLOCK_BYTES)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Component<'a> {
    Current,
    Parent,
    Name(&'a str),
}

fn split(path: &str) -> Result<Vec<Component<'_>>, TfsError> {
    if path.contains('\0') {
        return Err(TfsError::InvalidPath(path.to_owned()));
    }
    path.split('/')
        .filter(|part| !part.is_empty())
        .map(|part| match part {
            "." => Ok(Component::Current),
            ".." => Ok(Component::Parent),
            name if name.len() > NAME_MAX => Err(TfsError::NameTooLong),
            name => Ok(Component::Name(name)),
        })
        .collect()
}

fn not_dir(path: &str) -> TfsError {
    TfsError::WrongType {
        path: path.to_owned(),
        expected: ExpectedKind::Directory,
    }
}

fn not_file(path: &str) -> TfsError {
    TfsError::WrongType {
        path: path.to_owned(),
        expected: ExpectedKind::File,
    }
}

/// One line of a tree snapshot: what `lsr` plus `cat` report for a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub path: String,
    pub inode: u32,
    pub kind: FileKind,
    pub size: u32,
    pub content: Vec<u8>,
}

/// Comparable image of a whole tree, in pre-order.
pub type TreeSnapshot = Vec<SnapshotEntry>;

/// Snapshot of a live engine, reading every file through `cat`.
pub fn snapshot_of(fs: &Filesystem) -> tfs::Result<TreeSnapshot> {
    fs.lsr()?
        .into_iter()
        .map(|entry| {
            let content = if entry.stat.kind == FileKind::File {
                fs.cat(&entry.path)?
            } else {
                Vec::new()
            };
            Ok(SnapshotEntry {
                path: entry.path,
                inode: entry.stat.inode.0,
                kind: entry.stat.kind,
                size: entry.stat.size,
                content,
            })
        })
        .collect()
}

/// The reference tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFs {
    nodes: Vec<Option<Node>>,
    data_blocks: usize,
}

impl ModelFs {
    /// An empty tree holding only the root directory.
    #[must_use]
    pub fn new(geo: &Geometry) -> Self {
        let mut nodes = vec![None; geo.inode_count as usize];
        nodes[0] = Some(Node::Dir(Vec::new()));
        Self {
            nodes,
            data_blocks: geo.data.blocks as usize,
        }
    }

    fn node(&self, ino: u32) -> &Node {
        self.nodes[ino as usize]
            .as_ref()
            .unwrap_or_else(|| unreachable!("model entry names free inode {ino}"))
    }

    fn node_mut(&mut self, ino: u32) -> &mut Node {
        self.nodes[ino as usize]
            .as_mut()
            .unwrap_or_else(|| unreachable!("model entry names free inode {ino}"))
    }

    fn blocks_in_use(&self) -> usize {
        self.nodes.iter().flatten().map(Node::blocks).sum()
    }

    fn free_blocks(&self) -> usize {
        self.data_blocks - self.blocks_in_use()
    }

    fn lookup(&self, dir: u32, name: &str) -> Option<(usize, u32)> {
        match self.node(dir) {
            Node::Dir(children) => children
                .iter()
                .position(|(n, _)| n == name)
                .map(|idx| (idx, children[idx].1)),
            Node::File(_) => None,
        }
    }

    fn resolve(&self, path: &str, components: &[Component<'_>]) -> Result<u32, TfsError> {
        let mut chain = vec![0_u32];
        for component in components {
            let current = chain[chain.len() - 1];
            if !matches!(self.node(current), Node::Dir(_)) {
                return Err(not_dir(path));
            }
            match component {
                Component::Current => {}
                Component::Parent => {
                    if chain.len() > 1 {
                        chain.pop();
                    }
                }
                Component::Name(name) => {
                    let (_, child) = self
                        .lookup(current, name)
                        .ok_or_else(|| TfsError::NotFound(path.to_owned()))?;
                    chain.push(child);
                }
            }
        }
        Ok(chain[chain.len() - 1])
    }

    fn resolve_parent<'p>(
        &self,
        path: &str,
        components: &[Component<'p>],
    ) -> Result<(u32, Component<'p>), TfsError> {
        let Some((last, parents)) = components.split_last() else {
            return Err(TfsError::InvalidPath(path.to_owned()));
        };
        let parent = self.resolve(path, parents)?;
        if !matches!(self.node(parent), Node::Dir(_)) {
            return Err(not_dir(path));
        }
        Ok((parent, *last))
    }

    fn make_node(&mut self, path: &str, node: Node) -> Result<(), TfsError> {
        let components = split(path)?;
        if components.is_empty() {
            return Err(TfsError::AlreadyExists(path.to_owned()));
        }
        let (parent, last) = self.resolve_parent(path, &components)?;
        let Component::Name(name) = last else {
            return Err(TfsError::AlreadyExists(path.to_owned()));
        };
        if self.lookup(parent, name).is_some() {
            return Err(TfsError::AlreadyExists(path.to_owned()));
        }
        let count = self.node(parent).size() / ENTRY_SIZE;
        if count >= MAX_ENTRIES {
            return Err(TfsError::StorageFull(path.to_owned()));
        }
        let ino = self
            .nodes
            .iter()
            .position(Option::is_none)
            .ok_or(TfsError::AllocationExhausted("inode"))?;
        if count % ENTRIES_PER_BLOCK == 0 && self.free_blocks() == 0 {
            return Err(TfsError::AllocationExhausted("block"));
        }
        let ino = u32::try_from(ino).unwrap_or(u32::MAX);
        self.nodes[ino as usize] = Some(node);
        if let Node::Dir(children) = self.node_mut(parent) {
            children.push((name.to_owned(), ino));
        }
        Ok(())
    }

    pub fn mkdir(&mut self, path: &str) -> Result<(), TfsError> {
        self.make_node(path, Node::Dir(Vec::new()))
    }

    pub fn create(&mut self, path: &str) -> Result<(), TfsError> {
        self.make_node(path, Node::File(Vec::new()))
    }

    pub fn rmdir(&mut self, path: &str) -> Result<(), TfsError> {
        let components = split(path)?;
        if components.is_empty() {
            return Err(TfsError::Busy(path.to_owned()));
        }
        let (parent, last) = self.resolve_parent(path, &components)?;
        let Component::Name(name) = last else {
            return Err(TfsError::InvalidPath(path.to_owned()));
        };
        let (idx, target) = self
            .lookup(parent, name)
            .ok_or_else(|| TfsError::NotFound(path.to_owned()))?;
        match self.node(target) {
            Node::File(_) => return Err(not_dir(path)),
            Node::Dir(children) if !children.is_empty() => {
                return Err(TfsError::NotEmpty(path.to_owned()));
            }
            Node::Dir(_) => {}
        }
        if let Node::Dir(children) = self.node_mut(parent) {
            children.swap_remove(idx);
        }
        self.nodes[target as usize] = None;
        Ok(())
    }

    pub fn write(&mut self, path: &str, data: &[u8]) -> Result<(), TfsError> {
        if data.len() > MAX_FILE_SIZE {
            return Err(TfsError::DataTooLong {
                len: data.len(),
                max: MAX_FILE_SIZE,
            });
        }
        let components = split(path)?;
        let target = self.resolve(path, &components)?;
        let have = match self.node(target) {
            Node::File(content) => content.len().div_ceil(BLOCK_BYTES),
            Node::Dir(_) => return Err(not_file(path)),
        };
        let need = data.len().div_ceil(BLOCK_BYTES);
        if need > have && need - have > self.free_blocks() {
            return Err(TfsError::AllocationExhausted("block"));
        }
        *self.node_mut(target) = Node::File(data.to_vec());
        Ok(())
    }

    /// `(inode, kind, size, blocks)` of `path`.
    pub fn stat(&self, path: &str) -> Result<(u32, FileKind, usize, usize), TfsError> {
        let components = split(path)?;
        let ino = self.resolve(path, &components)?;
        let node = self.node(ino);
        Ok((ino, node.kind(), node.size(), node.blocks()))
    }

    pub fn cat(&self, path: &str) -> Result<Vec<u8>, TfsError> {
        let components = split(path)?;
        match self.node(self.resolve(path, &components)?) {
            Node::File(content) => Ok(content.clone()),
            Node::Dir(_) => Err(not_file(path)),
        }
    }

    /// Names in the root directory, in stored order.
    #[must_use]
    pub fn ls(&self) -> Vec<String> {
        match self.node(0) {
            Node::Dir(children) => children.iter().map(|(name, _)| name.clone()).collect(),
            Node::File(_) => Vec::new(),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> TreeSnapshot {
        let mut out = Vec::new();
        self.walk(0, "/", &mut out);
        out
    }

    fn walk(&self, ino: u32, path: &str, out: &mut TreeSnapshot) {
        let node = self.node(ino);
        out.push(SnapshotEntry {
            path: path.to_owned(),
            inode: ino,
            kind: node.kind(),
            size: u32::try_from(node.size()).unwrap_or(u32::MAX),
            content: match node {
                Node::File(content) => content.clone(),
                Node::Dir(_) => Vec::new(),
            },
        });
        if let Node::Dir(children) = node {
            let prefix = if ino == 0 { "" } else { path };
            for (name, child) in children {
                self.walk(*child, &format!("{prefix}/{name}"), out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfs::FormatOptions;

    fn model() -> ModelFs {
        ModelFs::new(&FormatOptions::default().geometry().expect("geometry"))
    }

    #[test]
    fn removal_swaps_last_entry() {
        let mut m = model();
        for name in ["a", "b", "c"] {
            m.mkdir(name).unwrap();
        }
        m.rmdir("a").unwrap();
        assert_eq!(m.ls(), vec!["c", "b"]);
        // Lowest free inode is reused.
        m.create("d").unwrap();
        assert_eq!(m.stat("d").unwrap().0, 1);
    }

    #[test]
    fn error_precedence_matches_engine_rules() {
        let mut m = model();
        m.create("f").unwrap();
        assert!(matches!(m.mkdir(""), Err(TfsError::AlreadyExists(_))));
        assert!(matches!(m.mkdir("f/x"), Err(TfsError::WrongType { .. })));
        assert!(matches!(m.mkdir("f/."), Err(TfsError::WrongType { .. })));
        assert!(matches!(m.mkdir("./."), Err(TfsError::AlreadyExists(_))));
        assert!(matches!(m.rmdir("/"), Err(TfsError::Busy(_))));
        assert!(matches!(m.rmdir(".."), Err(TfsError::InvalidPath(_))));
        assert!(matches!(m.write("", b"x"), Err(TfsError::WrongType { .. })));
        assert!(matches!(
            m.write("f", &[0; MAX_FILE_SIZE + 1]),
            Err(TfsError::DataTooLong { .. })
        ));
    }

    #[test]
    fn snapshot_paths_are_absolute() {
        let mut m = model();
        m.mkdir("a").unwrap();
        m.create("a/f").unwrap();
        m.write("a/f", b"xy").unwrap();
        let snap = m.snapshot();
        let paths: Vec<&str> = snap.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/a", "/a/f"]);
        assert_eq!(snap[2].content, b"xy");
        assert_eq!(snap[1].size, 32);
    }
}
