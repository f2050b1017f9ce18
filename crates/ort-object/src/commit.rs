use bstr::{BString, ByteSlice};
use ort_hash::ObjectId;

use crate::ObjectError;

/// A commit object.
///
/// The merge engine only consumes the tree pointer and the parent list; the
/// identity lines and message are preserved verbatim for round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// OID of the root tree.
    pub tree: ObjectId,
    /// Parent commit OIDs, in order (empty for a root commit).
    pub parents: Vec<ObjectId>,
    /// Raw author line ("Name <email> timestamp tz").
    pub author: BString,
    /// Raw committer line.
    pub committer: BString,
    /// Commit message (everything after the blank separator line).
    pub message: BString,
}

impl Commit {
    /// Build a commit pointing at `tree` with the given parents and a
    /// placeholder identity.
    pub fn new(tree: ObjectId, parents: Vec<ObjectId>, message: impl Into<BString>) -> Self {
        Self {
            tree,
            parents,
            author: BString::from("nobody <nobody@example.com> 0 +0000"),
            committer: BString::from("nobody <nobody@example.com> 0 +0000"),
            message: message.into(),
        }
    }

    /// Parse commit content from raw bytes (no object header).
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut tree: Option<ObjectId> = None;
        let mut parents = Vec::new();
        let mut author: Option<BString> = None;
        let mut committer: Option<BString> = None;

        let mut pos = 0;
        while pos < content.len() {
            if content[pos] == b'\n' {
                pos += 1;
                break;
            }
            let line_end = content[pos..]
                .find_byte(b'\n')
                .map(|p| p + pos)
                .unwrap_or(content.len());
            let line = &content[pos..line_end];

            let space = line.find_byte(b' ').ok_or_else(|| {
                ObjectError::InvalidCommitHeader(String::from_utf8_lossy(line).into())
            })?;
            let (key, value) = (&line[..space], &line[space + 1..]);
            match key {
                b"tree" => tree = Some(parse_oid_header(value)?),
                b"parent" => parents.push(parse_oid_header(value)?),
                b"author" => author = Some(BString::from(value)),
                b"committer" => committer = Some(BString::from(value)),
                // Headers the merge does not interpret (encoding, gpgsig,
                // mergetag) are skipped; round-trip of those is not needed
                // because the engine never rewrites commits.
                _ => {}
            }
            pos = (line_end + 1).min(content.len());
        }

        Ok(Self {
            tree: tree.ok_or(ObjectError::MissingCommitField { field: "tree" })?,
            parents,
            author: author.ok_or(ObjectError::MissingCommitField { field: "author" })?,
            committer: committer.ok_or(ObjectError::MissingCommitField { field: "committer" })?,
            message: BString::from(&content[pos..]),
        })
    }

    /// Serialize to canonical commit content.
    pub fn serialize_content(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"tree ");
        out.extend_from_slice(self.tree.to_hex().as_bytes());
        out.push(b'\n');
        for parent in &self.parents {
            out.extend_from_slice(b"parent ");
            out.extend_from_slice(parent.to_hex().as_bytes());
            out.push(b'\n');
        }
        out.extend_from_slice(b"author ");
        out.extend_from_slice(&self.author);
        out.push(b'\n');
        out.extend_from_slice(b"committer ");
        out.extend_from_slice(&self.committer);
        out.push(b'\n');
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }
}

fn parse_oid_header(value: &[u8]) -> Result<ObjectId, ObjectError> {
    let hex = std::str::from_utf8(value)
        .map_err(|_| ObjectError::InvalidCommitHeader("non-UTF8 oid".into()))?;
    Ok(ObjectId::from_hex(hex)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(byte: u8) -> ObjectId {
        ObjectId::Sha1([byte; 20])
    }

    #[test]
    fn serialize_parse_roundtrip() {
        let commit = Commit::new(oid(1), vec![oid(2), oid(3)], "merge two histories\n");
        let bytes = commit.serialize_content();
        let parsed = Commit::parse(&bytes).unwrap();
        assert_eq!(parsed, commit);
    }

    #[test]
    fn root_commit_has_no_parents() {
        let commit = Commit::new(oid(9), vec![], "initial\n");
        let parsed = Commit::parse(&commit.serialize_content()).unwrap();
        assert!(parsed.parents.is_empty());
        assert_eq!(parsed.tree, oid(9));
    }

    #[test]
    fn missing_tree_rejected() {
        let content = b"author a <a@b> 0 +0000\ncommitter a <a@b> 0 +0000\n\nmsg\n";
        assert!(matches!(
            Commit::parse(content),
            Err(ObjectError::MissingCommitField { field: "tree" })
        ));
    }

    #[test]
    fn unknown_headers_skipped() {
        let base = Commit::new(oid(1), vec![], "msg\n");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"tree ");
        bytes.extend_from_slice(base.tree.to_hex().as_bytes());
        bytes.extend_from_slice(b"\nencoding UTF-8\nauthor n <n@e> 0 +0000\ncommitter n <n@e> 0 +0000\n\nmsg\n");
        let parsed = Commit::parse(&bytes).unwrap();
        assert_eq!(parsed.tree, oid(1));
        assert_eq!(parsed.message, "msg\n");
    }
}
