//! METS document reader
//!
//! Turns a serialized METS/MODS document back into a [`DigitalDocument`]:
//! both structure maps, the file section, descriptive metadata through the
//! mapping engine, and the struct-link references connecting the trees.
//! Reading from a file additionally resolves anchor chains by loading the
//! sibling files.

use crate::core::anchor::{self, AnchorGuard};
use crate::core::error::{MetsError, MetsResult};
use crate::core::mapping::MappingEngine;
use crate::core::namespace::NamespaceMap;
use crate::core::xml::{NodeId, XmlTree};
use crate::model::{
    ContentFile, DigitalDocument, DsId, FileId, Metadata, MD_LOGICAL_PAGE_NUMBER,
    MD_PHYS_PAGE_NUMBER, REF_LOGICAL_PHYSICAL, UNCOUNTED,
};
use crate::prefs::Prefs;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::warn;

/// The file group the document model is read from; other groups are
/// derived views regenerated on write.
const SOURCE_FILE_GROUP: &str = "LOCAL";

/// Reads METS documents against one preferences document.
pub struct MetsReader<'a> {
    prefs: &'a Prefs,
    namespaces: NamespaceMap,
    mapping: MappingEngine<'a>,
}

/// Mutable read state: side tables connecting division ids, model nodes
/// and content files while one document is being read.
struct ReadState {
    /// dmdSec ID to the MODS fragment root inside it.
    dmd_sections: HashMap<String, NodeId>,
    /// Division ID to model node, per structure map type.
    logical_ids: HashMap<String, DsId>,
    physical_ids: HashMap<String, DsId>,
    /// Files already claimed by a file pointer.
    used_files: HashSet<FileId>,
}

impl<'a> MetsReader<'a> {
    /// Create a reader. Compiling the correspondence table may fail on a
    /// malformed preferences entry.
    pub fn new(prefs: &'a Prefs) -> MetsResult<Self> {
        Ok(Self {
            prefs,
            namespaces: prefs.namespace_map()?,
            mapping: MappingEngine::new(prefs)?,
        })
    }

    /// Read a document from a string. Anchor chains are left unresolved;
    /// there is no file context to locate sibling files in.
    pub fn read(&self, xml: &str) -> MetsResult<DigitalDocument> {
        let tree = XmlTree::parse(xml)?;
        self.read_tree(&tree)
    }

    /// Read a document from a file, resolving anchor chains through
    /// sibling files next to it.
    pub fn read_file(&self, path: impl AsRef<Path>) -> MetsResult<DigitalDocument> {
        let path = path.as_ref();
        let mut guard = AnchorGuard::new();
        guard.enter(path)?;
        let mut doc = self.read_raw_file(path)?;
        anchor::resolve_read(self, &mut doc, path, &mut guard)?;
        Ok(doc)
    }

    /// Read one file without anchor resolution.
    pub(crate) fn read_raw_file(&self, path: &Path) -> MetsResult<DigitalDocument> {
        let xml = fs::read_to_string(path)?;
        self.read(&xml)
    }

    pub(crate) fn prefs(&self) -> &Prefs {
        self.prefs
    }

    fn read_tree(&self, tree: &XmlTree) -> MetsResult<DigitalDocument> {
        let root = tree
            .root()
            .ok_or_else(|| MetsError::Structure("Empty document".to_string()))?;
        if tree.name(root) != Some("mets:mets") {
            return Err(MetsError::Structure(format!(
                "Expected <mets:mets> root, found <{}>",
                tree.name(root).unwrap_or("?")
            )));
        }

        let mut doc = DigitalDocument::new();
        let mut state = ReadState {
            dmd_sections: HashMap::new(),
            logical_ids: HashMap::new(),
            physical_ids: HashMap::new(),
            used_files: HashSet::new(),
        };

        self.collect_dmd_sections(tree, root, &mut state)?;
        self.read_file_section(tree, root, &mut doc)?;
        self.read_struct_maps(tree, root, &mut doc, &mut state)?;
        self.read_struct_links(tree, root, &mut doc, &state)?;

        if doc.logical_root.is_none() {
            return Err(MetsError::Structure(
                "Document has no LOGICAL structure map".to_string(),
            ));
        }
        Ok(doc)
    }

    fn collect_dmd_sections(
        &self,
        tree: &XmlTree,
        root: NodeId,
        state: &mut ReadState,
    ) -> MetsResult<()> {
        for section in tree.find_children(root, "mets:dmdSec") {
            let id = tree.attr(section, "ID").ok_or_else(|| {
                MetsError::Structure("<mets:dmdSec> without an ID attribute".to_string())
            })?;
            let mods = tree
                .find_child(section, "mets:mdWrap")
                .and_then(|wrap| tree.find_child(wrap, "mets:xmlData"))
                .and_then(|data| tree.find_child(data, "mods:mods"));
            match mods {
                Some(mods) => {
                    state.dmd_sections.insert(id.to_string(), mods);
                }
                None => warn!(id, "descriptive section without a MODS payload was skipped"),
            }
        }
        Ok(())
    }

    fn read_file_section(
        &self,
        tree: &XmlTree,
        root: NodeId,
        doc: &mut DigitalDocument,
    ) -> MetsResult<()> {
        let Some(file_sec) = tree.find_child(root, "mets:fileSec") else {
            return Ok(());
        };
        for group in tree.find_children(file_sec, "mets:fileGrp") {
            if tree.attr(group, "USE") != Some(SOURCE_FILE_GROUP) {
                continue;
            }
            for file in tree.find_children(group, "mets:file") {
                let id = tree.attr(file, "ID").ok_or_else(|| {
                    MetsError::Structure("<mets:file> without an ID attribute".to_string())
                })?;
                let href = tree
                    .find_child(file, "mets:FLocat")
                    .and_then(|loc| tree.attr(loc, "xlink:href"))
                    .ok_or_else(|| {
                        MetsError::Structure(format!(
                            "File '{}' has no <mets:FLocat> location",
                            id
                        ))
                    })?;
                let mime = tree.attr(file, "MIMETYPE").unwrap_or_default();
                let mut content = ContentFile::new(id, href, mime);
                if let Some(admid) = tree.attr(file, "ADMID") {
                    content.tech_md_ids =
                        admid.split_whitespace().map(|s| s.to_string()).collect();
                }
                content.representative = tree.attr(file, "USE") == Some("REPRESENTATIVE");
                doc.file_set.add(content);
            }
        }
        Ok(())
    }

    fn read_struct_maps(
        &self,
        tree: &XmlTree,
        root: NodeId,
        doc: &mut DigitalDocument,
        state: &mut ReadState,
    ) -> MetsResult<()> {
        for map in tree.find_children(root, "mets:structMap") {
            let map_type = tree.attr(map, "TYPE").unwrap_or("LOGICAL");
            let physical = match map_type {
                "LOGICAL" => false,
                "PHYSICAL" => true,
                other => {
                    return Err(MetsError::Structure(format!(
                        "Unsupported structure map type '{}'",
                        other
                    )));
                }
            };
            let slot = if physical {
                &doc.physical_root
            } else {
                &doc.logical_root
            };
            if slot.is_some() {
                return Err(MetsError::Structure(format!(
                    "More than one {} structure map",
                    map_type
                )));
            }

            let div = tree.find_child(map, "mets:div").ok_or_else(|| {
                MetsError::Structure(format!("{} structure map has no root division", map_type))
            })?;
            let node = self.read_div(tree, div, doc, physical, state)?;
            if physical {
                doc.physical_root = Some(node);
                self.synthesize_page_numbers(doc, node);
            } else {
                doc.logical_root = Some(node);
            }
        }
        Ok(())
    }

    fn read_div(
        &self,
        tree: &XmlTree,
        div: NodeId,
        doc: &mut DigitalDocument,
        physical: bool,
        state: &mut ReadState,
    ) -> MetsResult<DsId> {
        let type_name = tree.attr(div, "TYPE").ok_or_else(|| {
            MetsError::Structure("Division without a TYPE attribute".to_string())
        })?;
        self.prefs.struct_type(type_name)?;
        let node = doc.create_node(type_name);

        if let Some(div_id) = tree.attr(div, "ID") {
            let ids = if physical {
                &mut state.physical_ids
            } else {
                &mut state.logical_ids
            };
            ids.insert(div_id.to_string(), node);
        }
        if let Some(admid) = tree.attr(div, "ADMID") {
            doc.get_mut(node).admin_id = Some(admid.to_string());
        }

        if let Some(dmd_id) = tree.attr(div, "DMDID") {
            let mods = *state.dmd_sections.get(dmd_id).ok_or_else(|| {
                MetsError::Structure(format!(
                    "Division references unknown descriptive section '{}'",
                    dmd_id
                ))
            })?;
            self.mapping
                .read_node(tree, mods, &self.namespaces, doc, node)?;
        }

        if physical {
            if let Some(order) = tree.attr(div, "ORDER") {
                doc.add_metadata(node, Metadata::new(MD_PHYS_PAGE_NUMBER, order));
            }
            if let Some(label) = tree.attr(div, "ORDERLABEL") {
                doc.add_metadata(node, Metadata::new(MD_LOGICAL_PAGE_NUMBER, label));
            }
            self.attach_files(tree, div, doc, node, state)?;
        }

        // Children with an explicit ORDER are stable-inserted by value;
        // children without keep their input order after them.
        let mut ordered: Vec<(u32, DsId)> = Vec::new();
        let mut unordered: Vec<DsId> = Vec::new();
        for child_div in tree.find_children(div, "mets:div") {
            let child = self.read_div(tree, child_div, doc, physical, state)?;
            match tree.attr(child_div, "ORDER").map(|o| o.parse::<u32>()) {
                Some(Ok(order)) => {
                    let at = ordered.partition_point(|(o, _)| *o <= order);
                    ordered.insert(at, (order, child));
                }
                Some(Err(_)) => {
                    warn!(
                        order = tree.attr(child_div, "ORDER"),
                        "non-numeric ORDER attribute, division appended in input order"
                    );
                    unordered.push(child);
                }
                None => unordered.push(child),
            }
        }
        for (_, child) in ordered {
            doc.add_child(node, child)?;
        }
        for child in unordered {
            doc.add_child(node, child)?;
        }

        Ok(node)
    }

    fn attach_files(
        &self,
        tree: &XmlTree,
        div: NodeId,
        doc: &mut DigitalDocument,
        node: DsId,
        state: &mut ReadState,
    ) -> MetsResult<()> {
        let pointers = tree.find_children(div, "mets:fptr");
        if !pointers.is_empty() {
            for fptr in pointers {
                let file_id = tree.attr(fptr, "FILEID").ok_or_else(|| {
                    MetsError::Structure("<mets:fptr> without a FILEID attribute".to_string())
                })?;
                let Some(fid) = doc.file_set.find_by_id(file_id) else {
                    // Pointers into derived file groups reference the same
                    // content under a decorated id; only unresolvable bare
                    // ids are structural defects.
                    if doc
                        .file_set
                        .iter()
                        .any(|(_, f)| file_id.starts_with(&f.id))
                    {
                        continue;
                    }
                    return Err(MetsError::Structure(format!(
                        "File pointer references unknown file '{}'",
                        file_id
                    )));
                };
                if state.used_files.insert(fid) {
                    doc.attach_file(node, fid);
                }
            }
            return Ok(());
        }

        // Fallback: a page division without pointers consumes the next
        // unclaimed file in ascending file-id order.
        let is_page = tree.find_children(div, "mets:div").is_empty();
        if is_page && !doc.file_set.is_empty() {
            let mut candidates: Vec<(String, FileId)> = doc
                .file_set
                .iter()
                .filter(|(fid, _)| !state.used_files.contains(fid))
                .map(|(fid, f)| (f.id.clone(), fid))
                .collect();
            candidates.sort();
            if let Some((_, fid)) = candidates.into_iter().next() {
                state.used_files.insert(fid);
                doc.attach_file(node, fid);
            }
        }
        Ok(())
    }

    /// Fill in page numbers on every division below the physical root that
    /// lacks them: the physical number is the 1-based position among its
    /// siblings, the logical label falls back to the uncounted sentinel.
    fn synthesize_page_numbers(&self, doc: &mut DigitalDocument, root: DsId) {
        for parent in doc.subtree(root) {
            for (position, child) in doc.get(parent).children.clone().into_iter().enumerate() {
                if doc.first_metadata(child, MD_PHYS_PAGE_NUMBER).is_none() {
                    doc.add_metadata(
                        child,
                        Metadata::new(MD_PHYS_PAGE_NUMBER, (position + 1).to_string()),
                    );
                }
                if doc.first_metadata(child, MD_LOGICAL_PAGE_NUMBER).is_none() {
                    doc.add_metadata(child, Metadata::new(MD_LOGICAL_PAGE_NUMBER, UNCOUNTED));
                }
            }
        }
    }

    fn read_struct_links(
        &self,
        tree: &XmlTree,
        root: NodeId,
        doc: &mut DigitalDocument,
        state: &ReadState,
    ) -> MetsResult<()> {
        let Some(link_sec) = tree.find_child(root, "mets:structLink") else {
            return Ok(());
        };
        for link in tree.find_children(link_sec, "mets:smLink") {
            let from = tree.attr(link, "xlink:from").ok_or_else(|| {
                MetsError::Structure("<mets:smLink> without an xlink:from attribute".to_string())
            })?;
            let to = tree.attr(link, "xlink:to").ok_or_else(|| {
                MetsError::Structure("<mets:smLink> without an xlink:to attribute".to_string())
            })?;
            if from.is_empty() && to.is_empty() {
                // Placeholder link of an empty document.
                continue;
            }
            let logical = *state.logical_ids.get(from).ok_or_else(|| {
                MetsError::Structure(format!(
                    "Struct link references unknown logical division '{}'",
                    from
                ))
            })?;
            let physical = *state.physical_ids.get(to).ok_or_else(|| {
                MetsError::Structure(format!(
                    "Struct link references unknown physical division '{}'",
                    to
                ))
            })?;
            // Anchor levels are virtual; links from them carry no model
            // reference.
            if self.prefs.is_anchor(&doc.get(logical).type_name) {
                continue;
            }
            doc.add_reference(logical, physical, REF_LOGICAL_PHYSICAL);
        }
        Ok(())
    }
}
