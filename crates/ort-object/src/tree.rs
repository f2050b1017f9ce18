use std::cmp::Ordering;

use bstr::{BStr, BString, ByteSlice};
use ort_hash::{HashAlgorithm, ObjectId};

use crate::ObjectError;

/// File mode of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileMode {
    /// Regular file (100644)
    Regular,
    /// Executable file (100755)
    Executable,
    /// Symbolic link (120000)
    Symlink,
    /// Submodule pointer (160000)
    Gitlink,
    /// Subdirectory (040000)
    Tree,
    /// Anything else, preserved for round-trip
    Unknown(u32),
}

impl FileMode {
    /// Parse from octal ASCII bytes (e.g. `b"100644"`).
    pub fn from_bytes(s: &[u8]) -> Result<Self, ObjectError> {
        let raw = parse_octal(s)
            .ok_or_else(|| ObjectError::InvalidFileMode(String::from_utf8_lossy(s).into()))?;
        Ok(Self::from_raw(raw))
    }

    /// Create from the raw numeric mode.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0o100644 => Self::Regular,
            0o100755 => Self::Executable,
            0o120000 => Self::Symlink,
            0o160000 => Self::Gitlink,
            0o040000 => Self::Tree,
            other => Self::Unknown(other),
        }
    }

    /// Serialize to octal ASCII (no leading zero for trees).
    pub fn as_bytes(&self) -> BString {
        BString::from(format!("{:o}", self.raw()))
    }

    /// The raw numeric mode.
    pub fn raw(&self) -> u32 {
        match self {
            Self::Regular => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
            Self::Gitlink => 0o160000,
            Self::Tree => 0o40000,
            Self::Unknown(v) => *v,
        }
    }

    /// Is this a directory entry?
    pub fn is_tree(&self) -> bool {
        matches!(self, Self::Tree)
    }

    /// Is this a regular or executable file?
    pub fn is_blob(&self) -> bool {
        matches!(self, Self::Regular | Self::Executable)
    }

    /// Is this a symbolic link?
    pub fn is_symlink(&self) -> bool {
        matches!(self, Self::Symlink)
    }

    /// Is this a submodule pointer?
    pub fn is_gitlink(&self) -> bool {
        matches!(self, Self::Gitlink)
    }

    /// Whether two modes carry the same object type — regular and executable
    /// files are compatible, a symlink and a file are not.
    pub fn is_compatible_with(&self, other: FileMode) -> bool {
        self.is_blob() == other.is_blob()
            && self.is_symlink() == other.is_symlink()
            && self.is_gitlink() == other.is_gitlink()
            && self.is_tree() == other.is_tree()
    }
}

/// Parse an octal ASCII string to u32.
fn parse_octal(s: &[u8]) -> Option<u32> {
    if s.is_empty() {
        return None;
    }
    let mut val: u32 = 0;
    for &b in s {
        if !(b'0'..=b'7').contains(&b) {
            return None;
        }
        val = val.checked_mul(8)?.checked_add(u32::from(b - b'0'))?;
    }
    Some(val)
}

/// A single entry in a tree object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: FileMode,
    pub name: BString,
    pub oid: ObjectId,
}

impl TreeEntry {
    /// Compare entries in canonical tree order.
    ///
    /// Directories sort as if their name carried a trailing `/`, so the
    /// directory "foo" lands after the file "foo.c" but before "foo0".
    pub fn cmp_entries(a: &TreeEntry, b: &TreeEntry) -> Ordering {
        base_name_compare(
            a.name.as_ref(),
            a.mode.is_tree(),
            b.name.as_ref(),
            b.mode.is_tree(),
        )
    }
}

impl PartialOrd for TreeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TreeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        Self::cmp_entries(self, other)
    }
}

/// Canonical tree-entry name comparison: after the common prefix, a
/// directory contributes an implicit `/` as its next character.
pub fn base_name_compare(name1: &[u8], is_dir1: bool, name2: &[u8], is_dir2: bool) -> Ordering {
    let min_len = name1.len().min(name2.len());
    let cmp = name1[..min_len].cmp(&name2[..min_len]);
    if cmp != Ordering::Equal {
        return cmp;
    }
    let c1 = if name1.len() > min_len {
        name1[min_len]
    } else if is_dir1 {
        b'/'
    } else {
        0
    };
    let c2 = if name2.len() > min_len {
        name2[min_len]
    } else if is_dir2 {
        b'/'
    } else {
        0
    };
    c1.cmp(&c2)
}

/// A tree object — one directory level of a content-addressed snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse tree content: a sequence of `<mode> <name>\0<raw oid>` records.
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut entries = Vec::new();
        let mut pos = 0;

        while pos < content.len() {
            let space = content[pos..]
                .find_byte(b' ')
                .ok_or_else(|| ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "missing space after mode".into(),
                })?
                + pos;
            let mode = FileMode::from_bytes(&content[pos..space]).map_err(|_| {
                ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "invalid mode".into(),
                }
            })?;

            let name_start = space + 1;
            let nul = content[name_start..]
                .find_byte(0)
                .ok_or_else(|| ObjectError::InvalidTreeEntry {
                    offset: name_start,
                    reason: "missing NUL after name".into(),
                })?
                + name_start;
            let name = BString::from(&content[name_start..nul]);

            let oid_start = nul + 1;
            let oid_len = HashAlgorithm::Sha1.digest_len();
            if oid_start + oid_len > content.len() {
                return Err(ObjectError::InvalidTreeEntry {
                    offset: oid_start,
                    reason: "truncated oid".into(),
                });
            }
            let oid = ObjectId::from_bytes(
                &content[oid_start..oid_start + oid_len],
                HashAlgorithm::Sha1,
            )?;

            entries.push(TreeEntry { mode, name, oid });
            pos = oid_start + oid_len;
        }

        Ok(Self { entries })
    }

    /// Serialize to the canonical binary format, entries in canonical order.
    pub fn serialize_content(&self) -> Vec<u8> {
        let mut sorted = self.entries.clone();
        sorted.sort();

        let mut out = Vec::new();
        for entry in &sorted {
            out.extend_from_slice(&entry.mode.as_bytes());
            out.push(b' ');
            out.extend_from_slice(&entry.name);
            out.push(0);
            out.extend_from_slice(entry.oid.as_bytes());
        }
        out
    }

    /// Look up an entry by name.
    pub fn find(&self, name: &BStr) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name.as_bstr() == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(byte: u8) -> ObjectId {
        ObjectId::Sha1([byte; 20])
    }

    #[test]
    fn mode_octal_roundtrip() {
        for mode in [
            FileMode::Regular,
            FileMode::Executable,
            FileMode::Symlink,
            FileMode::Gitlink,
            FileMode::Tree,
        ] {
            assert_eq!(FileMode::from_bytes(&mode.as_bytes()).unwrap(), mode);
        }
        assert_eq!(FileMode::Tree.as_bytes(), "40000");
        assert!(FileMode::from_bytes(b"10064x").is_err());
    }

    #[test]
    fn mode_compatibility() {
        assert!(FileMode::Regular.is_compatible_with(FileMode::Executable));
        assert!(!FileMode::Regular.is_compatible_with(FileMode::Symlink));
        assert!(!FileMode::Gitlink.is_compatible_with(FileMode::Regular));
        assert!(FileMode::Tree.is_compatible_with(FileMode::Tree));
    }

    #[test]
    fn directory_sorts_with_implicit_slash() {
        let dir = TreeEntry {
            mode: FileMode::Tree,
            name: BString::from("foo"),
            oid: oid(0),
        };
        let dotted = TreeEntry {
            mode: FileMode::Regular,
            name: BString::from("foo.c"),
            oid: oid(0),
        };
        let hyphenated = TreeEntry {
            mode: FileMode::Regular,
            name: BString::from("foo-bar"),
            oid: oid(0),
        };
        // '/' (0x2f) sorts after '.' (0x2e) and '-' (0x2d).
        assert_eq!(TreeEntry::cmp_entries(&dir, &dotted), Ordering::Greater);
        assert_eq!(TreeEntry::cmp_entries(&dir, &hyphenated), Ordering::Greater);
    }

    #[test]
    fn parse_serialize_roundtrip() {
        let tree = Tree {
            entries: vec![
                TreeEntry {
                    mode: FileMode::Regular,
                    name: BString::from("b.txt"),
                    oid: oid(1),
                },
                TreeEntry {
                    mode: FileMode::Tree,
                    name: BString::from("a-dir"),
                    oid: oid(2),
                },
            ],
        };
        let bytes = tree.serialize_content();
        let parsed = Tree::parse(&bytes).unwrap();
        assert_eq!(parsed.entries[0].name, "a-dir");
        assert_eq!(parsed.entries[1].name, "b.txt");
        assert_eq!(parsed.serialize_content(), bytes);
    }

    #[test]
    fn parse_empty() {
        assert!(Tree::parse(b"").unwrap().is_empty());
    }

    #[test]
    fn parse_rejects_truncated_oid() {
        let mut data = Vec::new();
        data.extend_from_slice(b"100644 f\0");
        data.extend_from_slice(&[0xab; 10]);
        assert!(matches!(
            Tree::parse(&data),
            Err(ObjectError::InvalidTreeEntry { .. })
        ));
    }

    #[test]
    fn find_by_name() {
        let tree = Tree {
            entries: vec![TreeEntry {
                mode: FileMode::Regular,
                name: BString::from("README"),
                oid: oid(1),
            }],
        };
        assert!(tree.find(BStr::new("README")).is_some());
        assert!(tree.find(BStr::new("missing")).is_none());
    }
}
