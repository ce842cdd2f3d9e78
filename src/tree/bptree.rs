//! Dynamic B+ tree with out-of-line variable-size payloads
//!
//! ## Architecture
//! The tree spans two storages. The *directory* holds the header plus all
//! nodes in fixed-size slots, so splits never move existing nodes; the
//! *data* file holds the payload bytes, appended on every `put`. Leaf
//! entries carry `(key, payload offset, payload length)`; a `put` over an
//! existing key appends a fresh payload and abandons the old extent. Dead
//! space in the data file is accepted: trees live for one pairing and are
//! write-once from the consumer's point of view.
//!
//! ## Directory layout
//! ```text
//! [Header (32B)] [Node slot 0] [Node slot 1] ...
//! Header: magic(4) version(4) root_offset(8) entry_count(8)
//!         max_keys(4) node_count(4)
//! Leaf slot:     tag(1) count(4) count x (key 4, offset 8, len 4)
//! Interior slot: tag(1) count(4) count x key(4), (count+1) x child(8)
//! ```
//!
//! A root offset of zero marks an empty tree; no node can live at offset
//! zero because the header does.

use crate::storage::{PagedStorage, PointIdSerializer, ValueSerializer};
use crate::model::PointId;
use crate::{ProcessError, Result};
use std::marker::PhantomData;

/// Magic number for tree directory files (ASCII "KNNT")
const TREE_MAGIC: u32 = 0x4B4E_4E54;

/// Current directory format version
const TREE_VERSION: u32 = 1;

/// Directory header size
const HEADER_SIZE: u64 = 32;

const LEAF_TAG: u8 = 1;
const INTERIOR_TAG: u8 = 2;

/// A node, materialized in memory while being read or rewritten
enum Node {
    /// Sorted entries of (key, payload offset, payload length)
    Leaf {
        entries: Vec<(PointId, u64, u32)>,
    },
    /// Separator keys plus child offsets; children.len() == keys.len() + 1
    Interior {
        keys: Vec<PointId>,
        children: Vec<u64>,
    },
}

/// Disk-backed ordered map from point id to a variable-size payload
///
/// `D` backs the directory (write-buffered in production), `P` the data
/// file (direct). Keys are fixed four-byte point ids; values go through the
/// supplied [`ValueSerializer`].
pub struct DynamicBPlusTree<D, P, V, S>
where
    D: PagedStorage,
    P: PagedStorage,
    S: ValueSerializer<V>,
{
    directory: D,
    data: P,
    key_codec: PointIdSerializer,
    value_codec: S,
    max_keys: usize,
    slot_size: usize,
    root_offset: u64,
    entry_count: u64,
    node_count: u32,
    _value: PhantomData<V>,
}

impl<D, P, V, S> DynamicBPlusTree<D, P, V, S>
where
    D: PagedStorage,
    P: PagedStorage,
    S: ValueSerializer<V>,
{
    /// Create a fresh tree over two empty storages
    ///
    /// `max_keys` is the node capacity; the engine derives it from the
    /// pairing's estimated unique-id count.
    pub fn create(directory: D, data: P, value_codec: S, max_keys: usize) -> Result<Self> {
        if max_keys < 2 {
            return Err(ProcessError::InvalidParameter(format!(
                "max_keys must be at least 2, got {}",
                max_keys
            )));
        }
        let mut tree = Self {
            directory,
            data,
            key_codec: PointIdSerializer,
            value_codec,
            max_keys,
            slot_size: slot_size(max_keys),
            root_offset: 0,
            entry_count: 0,
            node_count: 0,
            _value: PhantomData,
        };
        tree.write_header()?;
        Ok(tree)
    }

    /// Reopen a persisted tree from its two storages
    pub fn open(mut directory: D, data: P, value_codec: S) -> Result<Self> {
        let header = directory.read(0, HEADER_SIZE as usize)?;

        let magic = u32::from_be_bytes(header[0..4].try_into().expect("4-byte slice"));
        if magic != TREE_MAGIC {
            return Err(ProcessError::CorruptTree(format!(
                "bad magic: expected {:#010X}, got {:#010X}",
                TREE_MAGIC, magic
            )));
        }
        let version = u32::from_be_bytes(header[4..8].try_into().expect("4-byte slice"));
        if version != TREE_VERSION {
            return Err(ProcessError::CorruptTree(format!(
                "unsupported tree version: {}",
                version
            )));
        }
        let root_offset = u64::from_be_bytes(header[8..16].try_into().expect("8-byte slice"));
        let entry_count = u64::from_be_bytes(header[16..24].try_into().expect("8-byte slice"));
        let max_keys =
            u32::from_be_bytes(header[24..28].try_into().expect("4-byte slice")) as usize;
        let node_count = u32::from_be_bytes(header[28..32].try_into().expect("4-byte slice"));

        if max_keys < 2 {
            return Err(ProcessError::CorruptTree(format!(
                "invalid max_keys in header: {}",
                max_keys
            )));
        }

        Ok(Self {
            directory,
            data,
            key_codec: PointIdSerializer,
            value_codec,
            max_keys,
            slot_size: slot_size(max_keys),
            root_offset,
            entry_count,
            node_count,
            _value: PhantomData,
        })
    }

    /// Insert or update `key`
    ///
    /// The encoded value is appended to the data file first; on update the
    /// previous extent becomes dead space.
    pub fn put(&mut self, key: PointId, value: &V) -> Result<()> {
        let bytes = self.value_codec.encode(value);
        let payload_offset = self.data.append(&bytes)?;
        let payload_len = bytes.len() as u32;

        if self.root_offset == 0 {
            let root = self.alloc_node();
            self.write_node(
                root,
                &Node::Leaf {
                    entries: vec![(key, payload_offset, payload_len)],
                },
            )?;
            self.root_offset = root;
            self.entry_count = 1;
            return Ok(());
        }

        let (replaced, split) = self.insert_rec(self.root_offset, key, payload_offset, payload_len)?;

        if let Some((separator, right_offset)) = split {
            let new_root = self.alloc_node();
            self.write_node(
                new_root,
                &Node::Interior {
                    keys: vec![separator],
                    children: vec![self.root_offset, right_offset],
                },
            )?;
            self.root_offset = new_root;
        }
        if !replaced {
            self.entry_count += 1;
        }
        Ok(())
    }

    /// Fetch the payload stored for `key`
    ///
    /// A missing key is an invariant violation for this workload and fails
    /// with [`ProcessError::KeyMissing`].
    pub fn get(&mut self, key: PointId) -> Result<V> {
        match self.lookup(key)? {
            Some((offset, len)) => {
                let bytes = self.data.read(offset, len as usize)?;
                self.value_codec.decode(&bytes)
            }
            None => Err(ProcessError::KeyMissing(key)),
        }
    }

    /// Whether `key` is present; descends the directory without touching
    /// the data file
    pub fn contains(&mut self, key: PointId) -> Result<bool> {
        Ok(self.lookup(key)?.is_some())
    }

    /// Number of distinct keys stored
    pub fn len(&self) -> u64 {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// Offset of the root node in the directory file
    pub fn root_offset(&self) -> u64 {
        self.root_offset
    }

    /// Flush the header and both storages; returns (root offset, entry count)
    ///
    /// Must be called before the backing files are handed to a consumer;
    /// the returned pair goes into the package's tree handle.
    pub fn close(mut self) -> Result<(u64, u64)> {
        self.write_header()?;
        self.directory.sync()?;
        self.data.sync()?;
        Ok((self.root_offset, self.entry_count))
    }

    fn lookup(&mut self, key: PointId) -> Result<Option<(u64, u32)>> {
        if self.root_offset == 0 {
            return Ok(None);
        }
        let mut offset = self.root_offset;
        loop {
            match self.read_node(offset)? {
                Node::Leaf { entries } => {
                    return Ok(entries
                        .binary_search_by_key(&key, |&(k, _, _)| k)
                        .ok()
                        .map(|idx| (entries[idx].1, entries[idx].2)));
                }
                Node::Interior { keys, children } => {
                    let child_idx = match keys.binary_search(&key) {
                        Ok(idx) => idx + 1,
                        Err(idx) => idx,
                    };
                    offset = children[child_idx];
                }
            }
        }
    }

    /// Recursive insert; returns (replaced, split) where split is the
    /// promoted separator and the new right sibling's offset
    fn insert_rec(
        &mut self,
        node_offset: u64,
        key: PointId,
        payload_offset: u64,
        payload_len: u32,
    ) -> Result<(bool, Option<(PointId, u64)>)> {
        match self.read_node(node_offset)? {
            Node::Leaf { mut entries } => {
                match entries.binary_search_by_key(&key, |&(k, _, _)| k) {
                    Ok(idx) => {
                        entries[idx] = (key, payload_offset, payload_len);
                        self.write_node(node_offset, &Node::Leaf { entries })?;
                        Ok((true, None))
                    }
                    Err(idx) => {
                        entries.insert(idx, (key, payload_offset, payload_len));
                        if entries.len() > self.max_keys {
                            // split on overflow, median moves right and is
                            // copied up as the separator
                            let mid = entries.len() / 2;
                            let right_entries = entries.split_off(mid);
                            let separator = right_entries[0].0;
                            let right_offset = self.alloc_node();
                            self.write_node(node_offset, &Node::Leaf { entries })?;
                            self.write_node(
                                right_offset,
                                &Node::Leaf {
                                    entries: right_entries,
                                },
                            )?;
                            Ok((false, Some((separator, right_offset))))
                        } else {
                            self.write_node(node_offset, &Node::Leaf { entries })?;
                            Ok((false, None))
                        }
                    }
                }
            }
            Node::Interior {
                mut keys,
                mut children,
            } => {
                let child_idx = match keys.binary_search(&key) {
                    Ok(idx) => idx + 1,
                    Err(idx) => idx,
                };
                let child_offset = children[child_idx];

                let (replaced, child_split) =
                    self.insert_rec(child_offset, key, payload_offset, payload_len)?;

                let Some((separator, new_child)) = child_split else {
                    return Ok((replaced, None));
                };

                let at = keys
                    .binary_search(&separator)
                    .unwrap_or_else(|idx| idx);
                keys.insert(at, separator);
                children.insert(at + 1, new_child);

                if keys.len() > self.max_keys {
                    // interior split promotes the median key instead of
                    // copying it
                    let mid = keys.len() / 2;
                    let right_keys = keys.split_off(mid + 1);
                    let promoted = keys.pop().expect("median exists after overflow");
                    let right_children = children.split_off(mid + 1);

                    let right_offset = self.alloc_node();
                    self.write_node(node_offset, &Node::Interior { keys, children })?;
                    self.write_node(
                        right_offset,
                        &Node::Interior {
                            keys: right_keys,
                            children: right_children,
                        },
                    )?;
                    Ok((replaced, Some((promoted, right_offset))))
                } else {
                    self.write_node(node_offset, &Node::Interior { keys, children })?;
                    Ok((replaced, None))
                }
            }
        }
    }

    /// Reserve the next fixed-size node slot
    fn alloc_node(&mut self) -> u64 {
        let offset = HEADER_SIZE + self.node_count as u64 * self.slot_size as u64;
        self.node_count += 1;
        offset
    }

    fn read_node(&mut self, offset: u64) -> Result<Node> {
        let buf = self.directory.read(offset, self.slot_size)?;
        let tag = buf[0];
        let count = u32::from_be_bytes(buf[1..5].try_into().expect("4-byte slice")) as usize;
        if count > self.max_keys {
            return Err(ProcessError::CorruptTree(format!(
                "node at {} claims {} keys, max is {}",
                offset, count, self.max_keys
            )));
        }

        match tag {
            LEAF_TAG => {
                let mut entries = Vec::with_capacity(count);
                let mut pos = 5;
                for _ in 0..count {
                    let key = self.key_codec.decode(&buf[pos..pos + 4])?;
                    let payload_offset =
                        u64::from_be_bytes(buf[pos + 4..pos + 12].try_into().expect("8-byte slice"));
                    let payload_len =
                        u32::from_be_bytes(buf[pos + 12..pos + 16].try_into().expect("4-byte slice"));
                    entries.push((key, payload_offset, payload_len));
                    pos += 16;
                }
                Ok(Node::Leaf { entries })
            }
            INTERIOR_TAG => {
                if count == 0 {
                    return Err(ProcessError::CorruptTree(format!(
                        "interior node at {} has no keys",
                        offset
                    )));
                }
                let mut keys = Vec::with_capacity(count);
                let mut pos = 5;
                for _ in 0..count {
                    keys.push(self.key_codec.decode(&buf[pos..pos + 4])?);
                    pos += 4;
                }
                let mut children = Vec::with_capacity(count + 1);
                for _ in 0..=count {
                    children.push(u64::from_be_bytes(
                        buf[pos..pos + 8].try_into().expect("8-byte slice"),
                    ));
                    pos += 8;
                }
                Ok(Node::Interior { keys, children })
            }
            other => Err(ProcessError::CorruptTree(format!(
                "bad node tag {} at offset {}",
                other, offset
            ))),
        }
    }

    fn write_node(&mut self, offset: u64, node: &Node) -> Result<()> {
        let mut buf = vec![0u8; self.slot_size];
        match node {
            Node::Leaf { entries } => {
                buf[0] = LEAF_TAG;
                buf[1..5].copy_from_slice(&(entries.len() as u32).to_be_bytes());
                let mut pos = 5;
                for &(key, payload_offset, payload_len) in entries {
                    buf[pos..pos + 4].copy_from_slice(&self.key_codec.encode(&key));
                    buf[pos + 4..pos + 12].copy_from_slice(&payload_offset.to_be_bytes());
                    buf[pos + 12..pos + 16].copy_from_slice(&payload_len.to_be_bytes());
                    pos += 16;
                }
            }
            Node::Interior { keys, children } => {
                buf[0] = INTERIOR_TAG;
                buf[1..5].copy_from_slice(&(keys.len() as u32).to_be_bytes());
                let mut pos = 5;
                for key in keys {
                    buf[pos..pos + 4].copy_from_slice(&self.key_codec.encode(key));
                    pos += 4;
                }
                for child in children {
                    buf[pos..pos + 8].copy_from_slice(&child.to_be_bytes());
                    pos += 8;
                }
            }
        }
        self.directory.write(offset, &buf)
    }

    fn write_header(&mut self) -> Result<()> {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&TREE_MAGIC.to_be_bytes());
        buf[4..8].copy_from_slice(&TREE_VERSION.to_be_bytes());
        buf[8..16].copy_from_slice(&self.root_offset.to_be_bytes());
        buf[16..24].copy_from_slice(&self.entry_count.to_be_bytes());
        buf[24..28].copy_from_slice(&(self.max_keys as u32).to_be_bytes());
        buf[28..32].copy_from_slice(&self.node_count.to_be_bytes());
        self.directory.write(0, &buf)
    }
}

/// Fixed node slot size for a given capacity
///
/// The leaf layout is the larger of the two for any capacity >= 2, so every
/// node fits regardless of kind.
fn slot_size(max_keys: usize) -> usize {
    5 + max_keys * 16
}
