//! Virtual filesystem layer.
//!
//! One mounted root filesystem, optional sub-mounts, path resolution with
//! `.`/`..` handling, a global current-working-directory, and an open-handle
//! table ([`file::FileTable`]). The only real backend is [`ramfs`] (an
//! in-memory tree); [`fat32`] is a typed contract for the on-disk format this
//! kernel also supports but whose parsing is out of scope here.

use alloc::{collections::BTreeMap, format, string::String, sync::Arc, vec, vec::Vec};

pub mod fat32;
pub mod file;
pub mod ramfs;

pub use file::{File, FileDescriptor, FileTable, OpenFlags, SeekFrom};

use crate::{
    error::{FsError, KernelError},
    sync::once_lock::GlobalState,
};

/// Maximum path length.
pub const PATH_MAX: usize = 4096;

/// Maximum filename length.
pub const NAME_MAX: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy)]
pub struct Permissions {
    pub owner_read: bool,
    pub owner_write: bool,
    pub owner_exec: bool,
}

impl Permissions {
    pub fn default() -> Self {
        Self {
            owner_read: true,
            owner_write: true,
            owner_exec: false,
        }
    }

    pub fn read_only() -> Self {
        Self {
            owner_read: true,
            owner_write: false,
            owner_exec: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Metadata {
    pub node_type: NodeType,
    pub size: usize,
    pub permissions: Permissions,
    pub uid: u32,
    pub gid: u32,
    pub created: u64,
    pub modified: u64,
    pub accessed: u64,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub node_type: NodeType,
    pub inode: u64,
}

/// A single file or directory node, backed by whichever filesystem mounted
/// it.
pub trait VfsNode: Send + Sync {
    fn node_type(&self) -> NodeType;
    fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<usize, KernelError>;
    fn write(&self, offset: usize, data: &[u8]) -> Result<usize, KernelError>;
    fn metadata(&self) -> Result<Metadata, KernelError>;
    fn readdir(&self) -> Result<Vec<DirEntry>, KernelError>;
    fn lookup(&self, name: &str) -> Result<Arc<dyn VfsNode>, KernelError>;
    fn create(&self, name: &str, permissions: Permissions) -> Result<Arc<dyn VfsNode>, KernelError>;
    fn mkdir(&self, name: &str, permissions: Permissions) -> Result<Arc<dyn VfsNode>, KernelError>;
    fn unlink(&self, name: &str) -> Result<(), KernelError>;
    fn truncate(&self, size: usize) -> Result<(), KernelError>;
}

/// A mountable backend, e.g. [`ramfs::RamFs`].
pub trait Filesystem: Send + Sync {
    fn root(&self) -> Arc<dyn VfsNode>;
    fn name(&self) -> &str;
    fn is_readonly(&self) -> bool;
    fn sync(&self) -> Result<(), KernelError>;
}

/// Split `path` into its parent directory and final component. `path` must
/// be absolute.
fn split_parent(path: &str) -> Result<(&str, &str), KernelError> {
    match path.rfind('/') {
        Some(0) => Ok(("/", &path[1..])),
        Some(pos) => Ok((&path[..pos], &path[pos + 1..])),
        None => Err(KernelError::InvalidArgument {
            name: "path",
            value: "not absolute",
        }),
    }
}

pub struct Vfs {
    root_fs: Option<Arc<dyn Filesystem>>,
    mounts: BTreeMap<String, Arc<dyn Filesystem>>,
    cwd: String,
}

impl Vfs {
    fn new() -> Self {
        Self {
            root_fs: None,
            mounts: BTreeMap::new(),
            cwd: String::from("/"),
        }
    }

    pub fn mount_root(&mut self, fs: Arc<dyn Filesystem>) -> Result<(), KernelError> {
        if self.root_fs.is_some() {
            return Err(KernelError::AlreadyExists {
                resource: "root filesystem",
                id: 0,
            });
        }
        self.root_fs = Some(fs);
        Ok(())
    }

    pub fn mount(&mut self, path: String, fs: Arc<dyn Filesystem>) -> Result<(), KernelError> {
        if self.root_fs.is_none() {
            return Err(KernelError::NotInitialized { subsystem: "vfs root" });
        }
        if self.mounts.contains_key(&path) {
            return Err(KernelError::AlreadyExists { resource: "mount", id: 0 });
        }
        self.mounts.insert(path, fs);
        Ok(())
    }

    /// Resolve an absolute or cwd-relative path to the node it names.
    pub fn resolve_path(&self, path: &str) -> Result<Arc<dyn VfsNode>, KernelError> {
        let root_fs = self
            .root_fs
            .as_ref()
            .ok_or(KernelError::NotInitialized { subsystem: "vfs root" })?;

        let absolute = if let Some(stripped) = path.strip_prefix('/') {
            format!("/{stripped}")
        } else {
            format!("{}/{}", self.cwd, path)
        };

        for (mount_path, fs) in self.mounts.iter().rev() {
            if let Some(rest) = absolute.strip_prefix(mount_path.as_str()) {
                return Self::traverse(fs.root(), rest);
            }
        }
        Self::traverse(root_fs.root(), &absolute)
    }

    fn traverse(mut node: Arc<dyn VfsNode>, path: &str) -> Result<Arc<dyn VfsNode>, KernelError> {
        let mut stack: Vec<Arc<dyn VfsNode>> = vec![node.clone()];

        for component in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
            if component == ".." {
                if stack.len() > 1 {
                    stack.pop();
                    node = stack.last().unwrap().clone();
                }
            } else {
                node = node.lookup(component)?;
                stack.push(node.clone());
            }
        }
        Ok(node)
    }

    pub fn get_cwd(&self) -> &str {
        &self.cwd
    }

    pub fn set_cwd(&mut self, path: String) -> Result<(), KernelError> {
        let node = self.resolve_path(&path)?;
        if node.metadata()?.node_type != NodeType::Directory {
            return Err(KernelError::FsError(FsError::NotADirectory));
        }
        self.cwd = path;
        Ok(())
    }

    pub fn open(&self, path: &str) -> Result<Arc<dyn VfsNode>, KernelError> {
        self.resolve_path(path)
    }

    pub fn mkdir(&self, path: &str, permissions: Permissions) -> Result<(), KernelError> {
        let (parent_path, name) = split_parent(path)?;
        self.resolve_path(parent_path)?.mkdir(name, permissions)?;
        Ok(())
    }

    pub fn unlink(&self, path: &str) -> Result<(), KernelError> {
        let (parent_path, name) = split_parent(path)?;
        self.resolve_path(parent_path)?.unlink(name)
    }
}

static VFS: GlobalState<Vfs> = GlobalState::new();

/// Run `f` against the mounted VFS. Returns `None` if [`init`] hasn't run.
pub fn with_vfs<R>(f: impl FnOnce(&Vfs) -> R) -> Option<R> {
    VFS.with(f)
}

/// Run `f` with mutable access to the mounted VFS.
pub fn with_vfs_mut<R>(f: impl FnOnce(&mut Vfs) -> R) -> Option<R> {
    VFS.with_mut(f)
}

/// Mount an in-memory root filesystem and create the handful of top-level
/// directories the boot sequence and shipped programs expect.
pub fn init() {
    let mut vfs = Vfs::new();
    vfs.mount_root(Arc::new(ramfs::RamFs::new())).expect("first mount_root call");
    for dir in ["bin", "etc", "tmp"] {
        with_vfs_root(&vfs, dir);
    }
    VFS.init(vfs).ok();
    log::info!("vfs mounted: ramfs at /, {{bin,etc,tmp}} created");
}

fn with_vfs_root(vfs: &Vfs, dir: &str) {
    if let Some(root_fs) = &vfs.root_fs {
        let _ = root_fs.root().mkdir(dir, Permissions::default());
    }
}

pub fn read_file(path: &str) -> Result<Vec<u8>, KernelError> {
    with_vfs(|vfs| {
        let node = vfs.resolve_path(path)?;
        let metadata = node.metadata()?;
        if metadata.node_type != NodeType::File {
            return Err(KernelError::FsError(FsError::NotAFile));
        }
        let mut buffer = vec![0u8; metadata.size];
        let n = node.read(0, &mut buffer)?;
        buffer.truncate(n);
        Ok(buffer)
    })
    .unwrap_or(Err(KernelError::NotInitialized { subsystem: "vfs" }))
}

pub fn write_file(path: &str, data: &[u8]) -> Result<usize, KernelError> {
    with_vfs(|vfs| {
        let node = match vfs.resolve_path(path) {
            Ok(node) => node,
            Err(_) => {
                let (parent_path, name) = split_parent(path)?;
                vfs.resolve_path(parent_path)?.create(name, Permissions::default())?
            }
        };
        node.truncate(0)?;
        node.write(0, data)
    })
    .unwrap_or(Err(KernelError::NotInitialized { subsystem: "vfs" }))
}

pub fn file_exists(path: &str) -> bool {
    with_vfs(|vfs| vfs.resolve_path(path).is_ok()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Vfs {
        let mut vfs = Vfs::new();
        vfs.mount_root(Arc::new(ramfs::RamFs::new())).unwrap();
        vfs
    }

    #[test]
    fn mkdir_and_resolve() {
        let vfs = fresh();
        vfs.mkdir("/home", Permissions::default()).unwrap();
        let node = vfs.resolve_path("/home").unwrap();
        assert_eq!(node.metadata().unwrap().node_type, NodeType::Directory);
    }

    #[test]
    fn dotdot_walks_up_to_parent() {
        let mut vfs = fresh();
        vfs.mkdir("/a", Permissions::default()).unwrap();
        vfs.mkdir("/a/b", Permissions::default()).unwrap();
        vfs.set_cwd(String::from("/a/b")).unwrap();
        let node = vfs.resolve_path("../../a").unwrap();
        assert_eq!(node.metadata().unwrap().node_type, NodeType::Directory);
    }

    #[test]
    fn write_then_read_round_trips() {
        let vfs = fresh();
        {
            let node = vfs.resolve_path("/").unwrap();
            node.create("hello.txt", Permissions::default()).unwrap();
        }
        let node = vfs.resolve_path("/hello.txt").unwrap();
        node.write(0, b"hi there").unwrap();
        let mut buf = [0u8; 8];
        let n = node.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi there");
    }

    #[test]
    fn resolve_missing_path_fails() {
        let vfs = fresh();
        assert!(vfs.resolve_path("/nope").is_err());
    }
}
