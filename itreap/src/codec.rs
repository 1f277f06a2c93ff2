//! Versioned binary encoding of a single key's tree.
//!
//! Layout, little-endian:
//!
//! ```text
//! magic    b"ITRP"
//! version  u8
//! record   u8 tag (0 = absent, 1 = node), then for a node:
//!          key (u32 length + UTF-8), start i64, end i64, priority u32,
//!          max_end i64, payload (u32 length + bincode), left record,
//!          right record
//! ```
//!
//! Records are written in pre-order, so decoding rebuilds the exact shape and
//! priorities without any rotations.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::info;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::consts::{FORMAT_VERSION, MAGIC_NUMBER};
use crate::errors::{Result, TreapError};
use crate::models::Interval;
use crate::node::{Arena, IntervalId, Node};
use crate::tree_index::{Tree, TreeIndex};

const TAG_ABSENT: u8 = 0;
const TAG_NODE: u8 = 1;

enum Side {
    Left,
    Right,
}

/// A tree decoded into its own arena, not yet part of any index.
struct Decoded<T> {
    key: String,
    arena: Arena<T>,
    root: IntervalId,
    len: usize,
}

fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("field of {} bytes does not fit a u32 length prefix", bytes.len()),
        )
    })?;
    writer.write_u32::<LittleEndian>(len)?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let len = reader.read_u32::<LittleEndian>()?;
    let mut buf = Vec::new();
    reader.by_ref().take(u64::from(len)).read_to_end(&mut buf)?;
    if buf.len() != len as usize {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    Ok(buf)
}

fn write_tree<T: Serialize, W: Write>(
    arena: &Arena<T>,
    root: Option<IntervalId>,
    writer: &mut W,
) -> Result<()> {
    writer.write_all(MAGIC_NUMBER)?;
    writer.write_u8(FORMAT_VERSION)?;

    let mut stack = vec![root];
    while let Some(slot) = stack.pop() {
        let Some(id) = slot else {
            writer.write_u8(TAG_ABSENT)?;
            continue;
        };
        let node = arena.node(id);
        let interval = &node.interval;

        writer.write_u8(TAG_NODE)?;
        write_bytes(writer, interval.key().as_bytes())?;
        writer.write_i64::<LittleEndian>(interval.start())?;
        writer.write_i64::<LittleEndian>(interval.end())?;
        writer.write_u32::<LittleEndian>(node.priority)?;
        writer.write_i64::<LittleEndian>(node.max_end)?;
        write_bytes(writer, &bincode::serialize(interval.payload())?)?;

        // left subtree is written first
        stack.push(node.right);
        stack.push(node.left);
    }
    Ok(())
}

fn read_tree<T: DeserializeOwned, R: Read>(reader: &mut R) -> Result<Option<Decoded<T>>> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC_NUMBER {
        return Err(TreapError::InvalidMagic);
    }
    let version = reader.read_u8()?;
    if version != FORMAT_VERSION {
        return Err(TreapError::EncodingMismatch {
            expected: FORMAT_VERSION,
            found: version,
        });
    }

    let mut arena = Arena::default();
    let mut root = None;
    let mut key: Option<String> = None;
    // stored max_end per decoded node
    let mut stored_max_end = Vec::new();

    let mut pending = vec![(None, Side::Left)];
    while let Some((parent, side)) = pending.pop() {
        match reader.read_u8()? {
            TAG_ABSENT => continue,
            TAG_NODE => {}
            tag => {
                return Err(TreapError::CorruptEncoding(format!(
                    "unknown record tag {tag}"
                )));
            }
        }

        let node_key = String::from_utf8(read_bytes(reader)?)
            .map_err(|e| TreapError::CorruptEncoding(format!("key is not valid UTF-8: {e}")))?;
        let start = reader.read_i64::<LittleEndian>()?;
        let end = reader.read_i64::<LittleEndian>()?;
        let priority = reader.read_u32::<LittleEndian>()?;
        let max_end = reader.read_i64::<LittleEndian>()?;
        let payload: T = bincode::deserialize(&read_bytes(reader)?)?;

        match key.as_deref() {
            Some(k) if k != node_key => {
                return Err(TreapError::CorruptEncoding(format!(
                    "tree mixes keys {k} and {node_key}"
                )));
            }
            Some(_) => {}
            None => key = Some(node_key.clone()),
        }
        let interval = Interval::new(node_key, start, end, payload).map_err(|_| {
            TreapError::CorruptEncoding(format!("interval ends at {end} before its start {start}"))
        })?;

        let id = arena.alloc(Node::new(interval, priority));
        stored_max_end.push((id, max_end));
        match parent {
            None => root = Some(id),
            Some(p) => {
                arena.node_mut(id).parent = Some(p);
                match side {
                    Side::Left => arena.node_mut(p).left = Some(id),
                    Side::Right => arena.node_mut(p).right = Some(id),
                }
            }
        }
        pending.push((Some(id), Side::Right));
        pending.push((Some(id), Side::Left));
    }

    let (Some(root), Some(key)) = (root, key) else {
        return Ok(None);
    };

    arena.recompute_ranges(root);
    for (id, stored) in stored_max_end {
        let node = arena.node(id);
        if node.max_end != stored {
            return Err(TreapError::CorruptEncoding(format!(
                "{} records subtree end {stored} but its subtree ends at {}",
                node.interval, node.max_end
            )));
        }
    }
    let len = arena.check(root).map_err(TreapError::CorruptEncoding)?;

    Ok(Some(Decoded {
        key,
        arena,
        root,
        len,
    }))
}

impl<T: Serialize> TreeIndex<T> {
    /// Encode the subtree rooted at `id` as a standalone tree. A handle that
    /// no longer resolves encodes an empty tree.
    pub fn encode_subtree<W: Write>(&self, id: IntervalId, writer: &mut W) -> Result<()> {
        let root = self.arena.get(id).map(|node| {
            self.assert_queryable(node.interval.key());
            id
        });
        write_tree(&self.arena, root, writer)
    }

    /// Encode every interval on `key`. An unknown key encodes an empty tree.
    pub fn encode_tree<W: Write>(&self, key: &str, writer: &mut W) -> Result<()> {
        self.assert_queryable(key);
        write_tree(&self.arena, self.trees.get(key).map(|tree| tree.root), writer)
    }
}

impl<T: DeserializeOwned> TreeIndex<T> {
    /// Decode one encoded tree and install it under its key.
    ///
    /// Returns the key, or `None` if the encoding held an empty tree. The
    /// decoded tree keeps its encoded shape and priorities. Fails with
    /// [`TreapError::KeyOccupied`] rather than mixing two trees for one key.
    pub fn decode_tree<R: Read>(&mut self, reader: &mut R) -> Result<Option<String>> {
        let Some(decoded) = read_tree::<T, R>(reader)? else {
            return Ok(None);
        };
        if self.trees.contains_key(&decoded.key) {
            return Err(TreapError::KeyOccupied(decoded.key));
        }

        let offset = self.arena.absorb(decoded.arena);
        self.trees.insert(
            decoded.key.clone(),
            Tree {
                root: decoded.root.shifted(offset),
                len: decoded.len,
                stale: false,
            },
        );
        info!("decoded {} intervals for {}", decoded.len, decoded.key);
        Ok(Some(decoded.key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs::File;
    use std::io::{BufReader, BufWriter, Cursor};

    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};
    use tempfile::NamedTempFile;

    use crate::config::IndexConfig;

    #[fixture]
    fn index() -> TreeIndex<String> {
        let mut index = TreeIndex::with_config(IndexConfig::default().with_seed(3));
        for (i, start) in [40, 10, 70, 25, 55, 5, 90, 33].into_iter().enumerate() {
            let iv = Interval::new("chr1", start, start + 12, format!("peak{i}")).unwrap();
            index.insert(iv);
        }
        index.insert(Interval::new("chr2", 0, 5, "solo".to_string()).unwrap());
        index
    }

    fn listing(index: &TreeIndex<String>, key: &str) -> Vec<(String, String)> {
        index
            .traverse(key)
            .map(|h| (h.interval.to_string(), h.interval.payload().clone()))
            .collect()
    }

    #[rstest]
    fn test_round_trip_in_memory(index: TreeIndex<String>) {
        let mut bytes = Vec::new();
        index.encode_tree("chr1", &mut bytes).unwrap();
        assert_eq!(&bytes[..4], MAGIC_NUMBER);
        assert_eq!(bytes[4], FORMAT_VERSION);

        let mut decoded: TreeIndex<String> = TreeIndex::new();
        let key = decoded.decode_tree(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(key.as_deref(), Some("chr1"));
        assert_eq!(listing(&decoded, "chr1"), listing(&index, "chr1"));
        assert_eq!(decoded.range("chr1"), index.range("chr1"));
        decoded.check_invariants().unwrap();

        // same shape and priorities, so re-encoding is byte for byte identical
        let mut again = Vec::new();
        decoded.encode_tree("chr1", &mut again).unwrap();
        assert_eq!(again, bytes);
    }

    #[rstest]
    fn test_round_trip_through_file(index: TreeIndex<String>) {
        let file = NamedTempFile::new().unwrap();
        {
            let mut writer = BufWriter::new(File::create(file.path()).unwrap());
            index.encode_tree("chr1", &mut writer).unwrap();
            index.encode_tree("chr2", &mut writer).unwrap();
        }

        let mut decoded: TreeIndex<String> = TreeIndex::new();
        let mut reader = BufReader::new(File::open(file.path()).unwrap());
        assert_eq!(
            decoded.decode_tree(&mut reader).unwrap().as_deref(),
            Some("chr1")
        );
        assert_eq!(
            decoded.decode_tree(&mut reader).unwrap().as_deref(),
            Some("chr2")
        );
        assert_eq!(decoded.len(), index.len());
        assert_eq!(listing(&decoded, "chr2"), listing(&index, "chr2"));
        decoded.check_invariants().unwrap();
    }

    #[rstest]
    fn test_decode_next_to_existing_trees(index: TreeIndex<String>) {
        let mut bytes = Vec::new();
        index.encode_tree("chr1", &mut bytes).unwrap();

        let mut other: TreeIndex<String> = TreeIndex::new();
        other.insert(Interval::new("chrX", 1, 2, "x".to_string()).unwrap());
        other.decode_tree(&mut bytes.as_slice()).unwrap();
        assert_eq!(other.len(), 9);
        other.check_invariants().unwrap();

        // the decoded tree is fully mutable
        let first = other.first("chr1").unwrap();
        other.remove(first);
        other.insert(Interval::new("chr1", 0, 100, "wide".to_string()).unwrap());
        assert_eq!(other.range("chr1"), Some((0, 102)));
        other.check_invariants().unwrap();
    }

    #[rstest]
    fn test_encode_subtree(index: TreeIndex<String>) {
        let root = index.trees["chr1"].root;
        let child = index
            .arena
            .node(root)
            .left
            .or(index.arena.node(root).right)
            .unwrap();

        let mut bytes = Vec::new();
        index.encode_subtree(child, &mut bytes).unwrap();
        let mut decoded: TreeIndex<String> = TreeIndex::new();
        decoded.decode_tree(&mut bytes.as_slice()).unwrap();
        decoded.check_invariants().unwrap();

        let node = index.arena.node(child);
        assert_eq!(decoded.range("chr1"), Some((node.min_start, node.max_end)));
        assert_eq!(decoded.len() < index.len_of("chr1"), true);
    }

    #[rstest]
    fn test_empty_tree_decodes_to_none(index: TreeIndex<String>) {
        let mut bytes = Vec::new();
        index.encode_tree("chrY", &mut bytes).unwrap();
        assert_eq!(bytes.len(), 6);

        let mut decoded: TreeIndex<String> = TreeIndex::new();
        assert_eq!(decoded.decode_tree(&mut bytes.as_slice()).unwrap(), None);
        assert_eq!(decoded.is_empty(), true);
    }

    #[rstest]
    fn test_version_mismatch(index: TreeIndex<String>) {
        let mut bytes = Vec::new();
        index.encode_tree("chr2", &mut bytes).unwrap();
        bytes[4] = 9;

        let mut decoded: TreeIndex<String> = TreeIndex::new();
        let err = decoded.decode_tree(&mut bytes.as_slice()).unwrap_err();
        assert_eq!(
            matches!(
                err,
                TreapError::EncodingMismatch {
                    expected: 1,
                    found: 9
                }
            ),
            true
        );
        assert_eq!(decoded.is_empty(), true);
    }

    #[rstest]
    fn test_bad_magic() {
        let mut decoded: TreeIndex<String> = TreeIndex::new();
        let err = decoded
            .decode_tree(&mut b"BAM\x01\x01\x00".as_slice())
            .unwrap_err();
        assert_eq!(matches!(err, TreapError::InvalidMagic), true);
    }

    #[rstest]
    fn test_key_occupied(index: TreeIndex<String>) {
        let mut bytes = Vec::new();
        index.encode_tree("chr2", &mut bytes).unwrap();

        let mut target = index.clone();
        let err = target.decode_tree(&mut bytes.as_slice()).unwrap_err();
        assert_eq!(matches!(err, TreapError::KeyOccupied(ref k) if k == "chr2"), true);
        assert_eq!(target.len(), index.len());
    }

    #[rstest]
    fn test_tampered_max_end_is_rejected(index: TreeIndex<String>) {
        let mut bytes = Vec::new();
        index.encode_tree("chr2", &mut bytes).unwrap();
        // magic, version, tag, key length, "chr2", start, end, priority
        let offset = 4 + 1 + 1 + 4 + 4 + 8 + 8 + 4;
        bytes[offset..offset + 8].copy_from_slice(&99i64.to_le_bytes());

        let mut decoded: TreeIndex<String> = TreeIndex::new();
        let err = decoded.decode_tree(&mut bytes.as_slice()).unwrap_err();
        assert_eq!(matches!(err, TreapError::CorruptEncoding(_)), true);
        assert_eq!(decoded.is_empty(), true);
    }

    #[rstest]
    fn test_truncated_stream_is_io_error(index: TreeIndex<String>) {
        let mut bytes = Vec::new();
        index.encode_tree("chr1", &mut bytes).unwrap();
        bytes.truncate(bytes.len() / 2);

        let mut decoded: TreeIndex<String> = TreeIndex::new();
        let err = decoded.decode_tree(&mut bytes.as_slice()).unwrap_err();
        assert_eq!(matches!(err, TreapError::Io(_)), true);
    }
}
