//! Anchor chain resolution
//!
//! Anchor levels are virtual grouping nodes (a periodical above its
//! volumes, a multi-volume work above its volumes) whose metadata lives in
//! a sibling file next to the document. On write the document splits into
//! one truncated file per anchor class plus the remainder; on read the
//! chain is resolved back by loading each sibling and splicing the matched
//! node's metadata into its stub.
//!
//! Sibling files sit next to the primary file: `<stem>_anchor.<ext>` for a
//! single-level chain, `<stem>_<anchorClass>.<ext>` for deeper ones.
//! Cross-file links use the configured pointer URLs, indexed by level along
//! the chain, with the remainder file last.

use crate::core::error::{MetsError, MetsResult};
use crate::core::mapping::Substitution;
use crate::core::reader::MetsReader;
use crate::model::{DigitalDocument, DsId};
use crate::prefs::{Prefs, ANCHOR_FILE_SUFFIX};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Upper bound on recursive sibling loads. Real chains are two or three
/// levels deep; anything beyond this is a configuration accident.
pub const MAX_CHAIN_DEPTH: usize = 8;

/// Recursion guard for anchor resolution: bounds the depth and rejects a
/// file visited twice within one resolution.
#[derive(Debug, Default)]
pub struct AnchorGuard {
    depth: usize,
    visited: HashSet<PathBuf>,
}

impl AnchorGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enter(&mut self, path: &Path) -> MetsResult<()> {
        if self.depth >= MAX_CHAIN_DEPTH {
            return Err(MetsError::AnchorError(format!(
                "Anchor chain deeper than {} levels",
                MAX_CHAIN_DEPTH
            )));
        }
        if !self.visited.insert(path.to_path_buf()) {
            return Err(MetsError::AnchorError(format!(
                "Cyclic anchor chain: '{}' loaded twice",
                path.display()
            )));
        }
        self.depth += 1;
        Ok(())
    }
}

/// One output of splitting a document for writing.
#[derive(Debug)]
pub struct MetsFile {
    /// The anchor class this file holds, `None` for the remainder.
    pub anchor_class: Option<String>,
    pub doc: DigitalDocument,
    /// Divisions that carry a cross-file pointer, with its URL.
    pub(crate) pointers: HashMap<DsId, String>,
    /// The one node whose full metadata this file carries; every anchor
    /// node other than this one is an identifier-only stub.
    pub(crate) level: Option<DsId>,
}

/// The sibling file holding an anchor level's metadata.
pub fn sibling_path(path: &Path, anchor_class: &str, multi_level: bool) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = if multi_level {
        format!("_{}", anchor_class)
    } else {
        ANCHOR_FILE_SUFFIX.to_string()
    };
    let name = match path.extension() {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}{}", stem, suffix),
    };
    path.with_file_name(name)
}

/// The chain of anchor nodes from the logical root down. An anchor node
/// with more than one child is malformed.
fn anchor_chain(doc: &DigitalDocument, prefs: &Prefs) -> MetsResult<(Vec<DsId>, Option<DsId>)> {
    let Some(root) = doc.logical_root else {
        return Ok((Vec::new(), None));
    };
    let mut chain = Vec::new();
    let mut cur = root;
    loop {
        let ds = doc.get(cur);
        if !prefs.is_anchor(&ds.type_name) {
            break;
        }
        chain.push(cur);
        match ds.children.as_slice() {
            [only] => cur = *only,
            [] => return Ok((chain, None)),
            _ => {
                return Err(MetsError::Structure(format!(
                    "Anchor level '{}' must have exactly one child, found {}",
                    ds.type_name,
                    ds.children.len()
                )));
            }
        }
    }
    let below = if chain.is_empty() { None } else { Some(cur) };
    Ok((chain, below))
}

/// Resolve the anchor chain of a freshly read document by loading sibling
/// files and splicing matched metadata into the stub nodes, innermost
/// level first.
pub(crate) fn resolve_read(
    reader: &MetsReader,
    doc: &mut DigitalDocument,
    path: &Path,
    guard: &mut AnchorGuard,
) -> MetsResult<()> {
    let prefs = reader.prefs();
    let (chain, below) = anchor_chain(doc, prefs)?;
    if chain.is_empty() {
        return Ok(());
    }
    let id_type = prefs.anchor_identifier_type.as_str();
    if id_type.is_empty() {
        return Err(MetsError::Config(
            "Anchor levels are in use but no anchor identifier type is configured".to_string(),
        ));
    }
    let multi = chain.len() > 1;
    // Flagged identifiers were transformed on write; candidates from the
    // sibling's own metadata are raw and must pass the same pattern before
    // comparison.
    let pattern = prefs
        .anchor_identifier_pattern
        .as_deref()
        .map(Substitution::parse)
        .transpose()?;

    // The flagged identifier on the node below the deepest anchor names
    // the level to resolve first; each loaded file carries the next one.
    let mut next_ident = below.and_then(|node| flagged_identifier(doc, node, id_type));

    for &anchor_node in chain.iter().rev() {
        let Some(ident) = next_ident.take() else {
            // Nothing to resolve from here up; reading an anchor file on
            // its own lands here immediately.
            debug!("no flagged anchor identifier present, leaving chain unresolved");
            return Ok(());
        };
        let class = prefs
            .anchor_class(&doc.get(anchor_node).type_name)
            .unwrap_or_default()
            .to_string();
        let sibling = sibling_path(path, &class, multi);
        guard.enter(&sibling)?;
        if !sibling.exists() {
            return Err(MetsError::AnchorError(format!(
                "Anchor file '{}' not found",
                sibling.display()
            )));
        }
        let sib_doc = reader.read_raw_file(&sibling)?;
        let sib_root = sib_doc.logical_root.ok_or_else(|| {
            MetsError::Structure(format!(
                "Anchor file '{}' has no logical structure map",
                sibling.display()
            ))
        })?;

        let matched = sib_doc
            .subtree(sib_root)
            .into_iter()
            .find(|&node| {
                sib_doc.get(node).metadata.iter().any(|m| {
                    if m.type_name != id_type || m.anchor_ident {
                        return false;
                    }
                    match &pattern {
                        Some(p) => p.apply(&m.value) == ident,
                        None => m.value == ident,
                    }
                })
            })
            .ok_or_else(|| {
                MetsError::AnchorError(format!(
                    "No node with {} '{}' in anchor file '{}'",
                    id_type,
                    ident,
                    sibling.display()
                ))
            })?;

        // Splice: the stub keeps its place in the tree and takes over the
        // matched node's values.
        let src = sib_doc.get(matched);
        let persons = src.persons.clone();
        let groups = src.groups.clone();
        let metadata: Vec<_> = src
            .metadata
            .iter()
            .filter(|m| !m.anchor_ident)
            .cloned()
            .collect();
        next_ident = flagged_identifier(&sib_doc, matched, id_type);

        let stub = doc.get_mut(anchor_node);
        stub.metadata = metadata;
        stub.persons = persons;
        stub.groups = groups;
    }
    Ok(())
}

fn flagged_identifier(doc: &DigitalDocument, node: DsId, id_type: &str) -> Option<String> {
    doc.get(node)
        .metadata
        .iter()
        .find(|m| m.anchor_ident && m.type_name == id_type)
        .map(|m| m.value.clone())
}

/// Split a document for writing: one truncated file per anchor class, the
/// remainder last. A document without anchor levels yields itself.
pub fn split(doc: &DigitalDocument, prefs: &Prefs) -> MetsResult<Vec<MetsFile>> {
    if doc.logical_root.is_none() {
        return Err(MetsError::Structure(
            "Document has no logical root".to_string(),
        ));
    }
    let (chain, below) = anchor_chain(doc, prefs)?;
    if chain.is_empty() {
        return Ok(vec![MetsFile {
            anchor_class: None,
            doc: doc.clone(),
            pointers: HashMap::new(),
            level: None,
        }]);
    }

    let urls = prefs.pointer_urls();
    let needed = chain.len() + 1;
    if urls.len() < needed {
        return Err(MetsError::Config(format!(
            "Anchor chain of {} level(s) needs {} pointer URLs, {} configured",
            chain.len(),
            needed,
            urls.len()
        )));
    }
    let id_type = prefs.anchor_identifier_type.as_str();

    let mut parts = Vec::with_capacity(needed);
    for (i, &anchor_node) in chain.iter().enumerate() {
        let class = prefs
            .anchor_class(&doc.get(anchor_node).type_name)
            .unwrap_or_default()
            .to_string();
        let mut fdoc = DigitalDocument::new();
        let mut pointers = HashMap::new();

        // Identifier-only stubs above this level.
        let mut parent: Option<DsId> = None;
        for &upper in &chain[..i] {
            let stub = make_stub(doc, upper, &mut fdoc, id_type);
            if let Some(p) = parent {
                fdoc.add_child(p, stub)?;
            } else {
                fdoc.logical_root = Some(stub);
            }
            parent = Some(stub);
        }

        // This level in full, without its subtree.
        let level = fdoc.create_node(doc.get(anchor_node).type_name.clone());
        {
            let src = doc.get(anchor_node);
            let node = fdoc.get_mut(level);
            node.metadata = src.metadata.iter().filter(|m| !m.anchor_ident).cloned().collect();
            node.persons = src.persons.clone();
            node.groups = src.groups.clone();
            node.admin_id = src.admin_id.clone();
        }
        if let Some(p) = parent {
            fdoc.add_child(p, level)?;
        } else {
            fdoc.logical_root = Some(level);
        }

        // Downward pointer: a bare stub for the next level.
        let next = chain.get(i + 1).copied().or(below);
        if let Some(next) = next {
            let stub = fdoc.create_node(doc.get(next).type_name.clone());
            fdoc.add_child(level, stub)?;
            pointers.insert(stub, urls[i + 1].to_string());
        }

        parts.push(MetsFile {
            anchor_class: Some(class),
            doc: fdoc,
            pointers,
            level: Some(level),
        });
    }

    // The remainder: the full document with anchors reduced to stubs; the
    // deepest stub carries the single upward pointer.
    let mut remainder = doc.clone();
    for &anchor_node in &chain {
        let stub = remainder.get_mut(anchor_node);
        stub.metadata
            .retain(|m| m.type_name == id_type && !m.anchor_ident);
        stub.persons.clear();
        stub.groups.clear();
        stub.references.clear();
        stub.admin_id = None;
    }
    let mut pointers = HashMap::new();
    let last = *chain.last().ok_or_else(|| {
        MetsError::AnchorError("Empty anchor chain after split".to_string())
    })?;
    pointers.insert(last, urls[chain.len() - 1].to_string());
    parts.push(MetsFile {
        anchor_class: None,
        doc: remainder,
        pointers,
        level: None,
    });

    Ok(parts)
}

fn make_stub(
    doc: &DigitalDocument,
    node: DsId,
    target: &mut DigitalDocument,
    id_type: &str,
) -> DsId {
    let stub = target.create_node(doc.get(node).type_name.clone());
    let metadata: Vec<_> = doc
        .get(node)
        .metadata
        .iter()
        .filter(|m| m.type_name == id_type && !m.anchor_ident)
        .cloned()
        .collect();
    target.get_mut(stub).metadata = metadata;
    stub
}
