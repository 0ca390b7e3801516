//! Append-only inode ↔ archive member mapping for the FUSE filesystem
//!
//! FUSE identifies files by 64-bit inode numbers. Here the inode number is the
//! index of a slot in a growable array. Slots are never removed: deleting a
//! member leaves a hole, so a number handed to the kernel is never reused for
//! a different member during the lifetime of a mount.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::archive::FileData;

/// Result of bringing the table in line with an archive listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub created: usize,
    pub deleted: usize,
}

/// Inode table plus reverse index from full archive path to inode
#[derive(Debug)]
pub struct InodeTable {
    /// Slot `i` describes inode `i`; `None` is a reserved slot or a hole
    slots: Vec<Option<FileData>>,
    /// Full path to inode, only for live slots
    path_to_inode: HashMap<String, u64>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    /// Root inode number (always 1 in FUSE)
    pub const ROOT_INODE: u64 = 1;

    /// First inode number handed to an archive member
    pub const FIRST_INODE: u64 = Self::ROOT_INODE + 1;

    /// Create a table with inode 0 and the root pre-reserved as empty slots
    pub fn new() -> Self {
        let mut table = Self {
            slots: Vec::new(),
            path_to_inode: HashMap::new(),
        };
        table.create(None);
        table.create(None);
        table
    }

    /// Append a slot and return its inode number.
    ///
    /// `None` appends a hole. If another live slot already owns the same full
    /// path it is retired first, so the reverse index keeps pointing at exactly
    /// one slot per path.
    pub fn create(&mut self, entry: Option<&FileData>) -> u64 {
        let ino = self.slots.len() as u64;

        match entry {
            Some(fdata) => {
                if let Some(previous) = self.path_to_inode.get(&fdata.full_path).copied() {
                    self.delete(previous);
                }
                debug!(ino = ino, path = %fdata.full_path, "create inode");
                self.path_to_inode.insert(fdata.full_path.clone(), ino);
                self.slots.push(Some(fdata.clone()));
            }
            None => self.slots.push(None),
        }

        ino
    }

    /// Turn a live slot into a hole. Reserved, out-of-range and already
    /// deleted inodes are ignored. Returns whether anything was removed.
    pub fn delete(&mut self, ino: u64) -> bool {
        if ino <= Self::ROOT_INODE {
            return false;
        }

        let Some(slot) = self.slot_mut(ino) else {
            return false;
        };
        let Some(fdata) = slot.take() else {
            return false;
        };

        debug!(ino = ino, path = %fdata.full_path, "delete inode");
        self.path_to_inode.remove(&fdata.full_path);
        true
    }

    /// Member behind an inode; `None` for reserved slots, holes and
    /// out-of-range numbers
    pub fn get(&self, ino: u64) -> Option<&FileData> {
        if ino <= Self::ROOT_INODE {
            return None;
        }
        usize::try_from(ino)
            .ok()
            .and_then(|index| self.slots.get(index))
            .and_then(Option::as_ref)
    }

    /// Inode currently assigned to a full archive path
    pub fn get_inode(&self, full_path: &str) -> Option<u64> {
        self.path_to_inode.get(full_path).copied()
    }

    /// Number of allocated slots, holes and reserved slots included
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no archive member has ever been added
    pub fn is_empty(&self) -> bool {
        self.slots.len() <= Self::FIRST_INODE as usize
    }

    /// Live slots in inode order
    pub fn live(&self) -> impl Iterator<Item = (u64, &FileData)> {
        self.slots
            .iter()
            .enumerate()
            .skip(Self::FIRST_INODE as usize)
            .filter_map(|(index, slot)| slot.as_ref().map(|fdata| (index as u64, fdata)))
    }

    /// Live slots whose canonical parent path equals `dir_path`, in inode order
    pub fn children(&self, dir_path: &str) -> impl Iterator<Item = (u64, &FileData)> + '_ {
        let dir_path = dir_path.to_string();
        self.live()
            .filter(move |(_, fdata)| Self::canonicalize(&fdata.path) == dir_path)
    }

    /// Child of `dir_path` named `name`
    pub fn find_child(&self, dir_path: &str, name: &str) -> Option<(u64, &FileData)> {
        self.children(dir_path).find(|(_, fdata)| fdata.name == name)
    }

    /// Canonical directory path for an inode used as a parent: `/` for the
    /// root, the canonicalized full path for a member, `None` when unknown
    pub fn dir_path(&self, ino: u64) -> Option<String> {
        if ino == Self::ROOT_INODE {
            return Some("/".to_string());
        }
        self.get(ino).map(|fdata| Self::canonicalize(&fdata.full_path))
    }

    /// Size reported for an inode.
    ///
    /// Archives carry no entry for the root, so its size is the sum of the
    /// top-level members. Unknown inodes report 0.
    pub fn entry_size(&self, ino: u64) -> u64 {
        if ino != Self::ROOT_INODE {
            return self.get(ino).map(FileData::entry_size).unwrap_or(0);
        }

        self.children("/").map(|(_, fdata)| fdata.entry_size()).sum()
    }

    /// Bring the table in line with the archive's current member listing.
    ///
    /// Members that disappeared are deleted before new ones are created, so a
    /// path removed and re-added in the same pass never collides with itself.
    pub fn reconcile(&mut self, members: &[FileData]) -> ReconcileStats {
        let mut stats = ReconcileStats::default();

        let current: HashSet<&str> = members.iter().map(|m| m.full_path.as_str()).collect();
        let stale: Vec<u64> = self
            .live()
            .filter(|(_, fdata)| !current.contains(fdata.full_path.as_str()))
            .map(|(ino, _)| ino)
            .collect();

        for ino in stale {
            if self.delete(ino) {
                stats.deleted += 1;
            }
        }

        for fdata in members {
            if !self.path_to_inode.contains_key(&fdata.full_path) {
                self.create(Some(fdata));
                stats.created += 1;
            }
        }

        stats
    }

    /// Resolve `.` and `..`, collapse repeated separators and drop any
    /// trailing `/`. Relative paths are taken relative to `/`.
    pub fn canonicalize(path: &str) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for component in path.split('/') {
            match component {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }

        if parts.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", parts.join("/"))
        }
    }

    fn slot_mut(&mut self, ino: u64) -> Option<&mut Option<FileData>> {
        usize::try_from(ino)
            .ok()
            .and_then(|index| self.slots.get_mut(index))
    }
}
