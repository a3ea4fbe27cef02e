//! METS document writer
//!
//! Serializes a [`DigitalDocument`] into METS/MODS: descriptive sections
//! through the mapping engine, the file section from the declared file
//! groups, both structure maps, and the struct-link section. Identifiers
//! are zero-padded counters assigned per output document. [`write_files`]
//! splits anchor chains into sibling files and locks each output path
//! against concurrent serialization.

use crate::core::anchor::{self, MetsFile};
use crate::core::error::{MetsError, MetsResult};
use crate::core::mapping::MappingEngine;
use crate::core::namespace::NamespaceMap;
use crate::core::path::strip_group_tags;
use crate::core::xml::{NodeId, XmlTree};
use crate::model::{
    DigitalDocument, DsId, FileSet, MD_LOGICAL_PAGE_NUMBER, MD_PHYS_PAGE_NUMBER,
    REF_LOGICAL_PHYSICAL,
};
use crate::prefs::{FileGroup, Prefs};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::warn;

/// Per-document id counters, zero-padded on formatting.
#[derive(Debug, Default)]
struct Counters {
    log: u32,
    phys: u32,
    dmd_log: u32,
    dmd_phys: u32,
}

impl Counters {
    fn next(counter: &mut u32, prefix: &str) -> String {
        *counter += 1;
        format!("{}_{:04}", prefix, counter)
    }
}

/// Writes METS documents against one preferences document.
pub struct MetsWriter<'a> {
    prefs: &'a Prefs,
    namespaces: NamespaceMap,
    mapping: MappingEngine<'a>,
    counters: Counters,
}

/// Side tables built while serializing one document.
#[derive(Default)]
struct WriteState {
    dmd_ids: HashMap<DsId, String>,
    log_ids: HashMap<DsId, String>,
    phys_ids: HashMap<DsId, String>,
    /// FileId index to the per-group decorated file ids, group order.
    file_ids: HashMap<u32, Vec<String>>,
    pages_without_files: usize,
}

impl<'a> MetsWriter<'a> {
    /// Create a writer. Compiling the correspondence table may fail on a
    /// malformed preferences entry.
    pub fn new(prefs: &'a Prefs) -> MetsResult<Self> {
        Ok(Self {
            prefs,
            namespaces: prefs.namespace_map()?,
            mapping: MappingEngine::new(prefs)?,
            counters: Counters::default(),
        })
    }

    /// Serialize a document to a METS string. Anchor levels present in the
    /// document are written as identifier-only stubs; use [`write_files`]
    /// to split them into sibling files.
    pub fn write(&mut self, doc: &DigitalDocument) -> MetsResult<String> {
        self.write_with(doc, &HashMap::new(), None)
    }

    pub(crate) fn write_part(&mut self, part: &MetsFile) -> MetsResult<String> {
        self.write_with(&part.doc, &part.pointers, part.level)
    }

    fn write_with(
        &mut self,
        doc: &DigitalDocument,
        pointers: &HashMap<DsId, String>,
        level: Option<DsId>,
    ) -> MetsResult<String> {
        self.counters = Counters::default();
        let logical_root = doc.logical_root.ok_or_else(|| {
            MetsError::Structure("Document has no logical root".to_string())
        })?;

        let mut tree = XmlTree::new();
        let mets = tree.create_element("mets:mets");
        tree.set_root(mets);
        for ns in self.namespaces.all() {
            tree.set_attr(mets, format!("xmlns:{}", ns.prefix), ns.uri.clone());
        }
        tree.set_attr(mets, "xsi:schemaLocation", self.namespaces.schema_location());
        self.write_header(&mut tree, mets);

        let mut state = WriteState::default();

        // Descriptive sections, logical tree first.
        for node in doc.subtree(logical_root) {
            if self.wants_dmd(doc, node, level) {
                self.write_dmd(doc, node, &mut tree, mets, &mut state, false)?;
            }
        }
        if let Some(phys_root) = doc.physical_root {
            for node in doc.subtree(phys_root) {
                self.write_dmd(doc, node, &mut tree, mets, &mut state, true)?;
            }
        }

        self.write_amd_sections(doc, &mut tree, mets);
        self.write_file_section(&doc.file_set, &mut tree, mets, &mut state)?;

        let log_map = tree.create_element("mets:structMap");
        tree.set_attr(log_map, "TYPE", "LOGICAL");
        tree.append(mets, log_map);
        self.write_div(doc, logical_root, &mut tree, log_map, pointers, &mut state, false)?;

        if let Some(phys_root) = doc.physical_root {
            let phys_map = tree.create_element("mets:structMap");
            tree.set_attr(phys_map, "TYPE", "PHYSICAL");
            tree.append(mets, phys_map);
            self.write_div(doc, phys_root, &mut tree, phys_map, pointers, &mut state, true)?;
            if state.pages_without_files > 0 {
                warn!(
                    count = state.pages_without_files,
                    "page division(s) without content files"
                );
            }
        }

        self.write_struct_links(doc, logical_root, &mut tree, mets, &state)?;

        tree.serialize_document(mets)
    }

    /// The header comes first in the schema order. The creating agent is
    /// the only content; no timestamp, output stays reproducible.
    fn write_header(&self, tree: &mut XmlTree, mets: NodeId) {
        let header = tree.create_element("mets:metsHdr");
        let agent = tree.create_element("mets:agent");
        tree.set_attr(agent, "ROLE", "CREATOR");
        tree.set_attr(agent, "TYPE", "OTHER");
        tree.set_attr(agent, "OTHERTYPE", "SOFTWARE");
        let name = tree.create_element("mets:name");
        tree.set_text(name, "metskit");
        tree.append(agent, name);
        tree.append(header, agent);
        tree.append(mets, header);
    }

    /// Which nodes get a descriptive section. In an anchor file only the
    /// anchor level itself does; elsewhere anchor stubs are skipped, their
    /// metadata lives in the sibling file.
    fn wants_dmd(&self, doc: &DigitalDocument, node: DsId, level: Option<DsId>) -> bool {
        match level {
            Some(level) => node == level,
            None => !self.prefs.is_anchor(&doc.get(node).type_name),
        }
    }

    fn write_dmd(
        &mut self,
        doc: &DigitalDocument,
        node: DsId,
        tree: &mut XmlTree,
        mets: NodeId,
        state: &mut WriteState,
        physical: bool,
    ) -> MetsResult<()> {
        let mut fragment = XmlTree::new();
        let frag_root = fragment.create_element("mods:mods");
        fragment.set_root(frag_root);
        self.mapping
            .write_node(doc, node, &mut fragment, frag_root, &self.namespaces)?;
        strip_group_tags(&mut fragment, frag_root);
        if fragment.children(frag_root).is_empty() {
            // No correspondence produced content; the division gets no
            // DMDID.
            return Ok(());
        }
        let mods = tree.import_subtree(&fragment, frag_root);

        let id = if physical {
            Counters::next(&mut self.counters.dmd_phys, "DMDPHYS")
        } else {
            Counters::next(&mut self.counters.dmd_log, "DMDLOG")
        };
        let section = tree.create_element("mets:dmdSec");
        tree.set_attr(section, "ID", id.clone());
        let wrap = tree.create_element("mets:mdWrap");
        tree.set_attr(wrap, "MDTYPE", "MODS");
        let data = tree.create_element("mets:xmlData");
        tree.append(section, wrap);
        tree.append(wrap, data);
        tree.append(data, mods);
        tree.append(mets, section);
        state.dmd_ids.insert(node, id);
        Ok(())
    }

    fn write_amd_sections(&self, doc: &DigitalDocument, tree: &mut XmlTree, mets: NodeId) {
        let mut seen = Vec::new();
        let mut roots = Vec::new();
        roots.extend(doc.logical_root);
        roots.extend(doc.physical_root);
        for root in roots {
            for node in doc.subtree(root) {
                if let Some(id) = &doc.get(node).admin_id {
                    if !seen.contains(id) {
                        seen.push(id.clone());
                    }
                }
            }
        }
        for (_, file) in doc.file_set.iter() {
            for id in &file.tech_md_ids {
                if !seen.contains(id) {
                    seen.push(id.clone());
                }
            }
        }
        for id in seen {
            let section = tree.create_element("mets:amdSec");
            tree.set_attr(section, "ID", id);
            tree.append(mets, section);
        }
    }

    fn write_file_section(
        &self,
        file_set: &FileSet,
        tree: &mut XmlTree,
        mets: NodeId,
        state: &mut WriteState,
    ) -> MetsResult<()> {
        if file_set.is_empty() {
            return Ok(());
        }
        let default_group;
        let groups: Vec<&FileGroup> = if self.prefs.file_groups.is_empty() {
            default_group = FileGroup {
                use_label: "LOCAL".to_string(),
                ..FileGroup::default()
            };
            vec![&default_group]
        } else {
            self.prefs.file_groups.values().collect()
        };

        let file_sec = tree.create_element("mets:fileSec");
        tree.append(mets, file_sec);
        for group in groups {
            if group.path.is_none() {
                warn!(
                    group = %group.use_label,
                    "file group has no location prefix, falling back to the file's own location"
                );
            }
            if group.mime_type.is_none() {
                warn!(
                    group = %group.use_label,
                    "file group has no MIME type, falling back to the file's own type"
                );
            }
            let grp = tree.create_element("mets:fileGrp");
            tree.set_attr(grp, "USE", group.use_label.clone());
            tree.append(file_sec, grp);
            for (fid, file) in file_set.iter() {
                let id = if group.use_label == "LOCAL" {
                    file.id.clone()
                } else {
                    format!("{}_{}", file.id, group.use_label)
                };
                state.file_ids.entry(fid.0).or_default().push(id.clone());

                let element = tree.create_element("mets:file");
                tree.set_attr(element, "ID", id);
                let mime = group
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| file.mime_type.clone());
                tree.set_attr(element, "MIMETYPE", mime);
                if !file.tech_md_ids.is_empty() {
                    tree.set_attr(element, "ADMID", file.tech_md_ids.join(" "));
                }
                if file.representative && group.use_label == "LOCAL" {
                    tree.set_attr(element, "USE", "REPRESENTATIVE");
                }
                let locat = tree.create_element("mets:FLocat");
                tree.set_attr(locat, "LOCTYPE", "URL");
                tree.set_attr(locat, "xlink:href", group_location(group, &file.location));
                tree.append(element, locat);
                tree.append(grp, element);
            }
        }
        Ok(())
    }

    fn write_div(
        &mut self,
        doc: &DigitalDocument,
        node: DsId,
        tree: &mut XmlTree,
        parent: NodeId,
        pointers: &HashMap<DsId, String>,
        state: &mut WriteState,
        physical: bool,
    ) -> MetsResult<()> {
        let ds = doc.get(node);
        let div = tree.create_element("mets:div");
        let id = if physical {
            Counters::next(&mut self.counters.phys, "PHYS")
        } else {
            Counters::next(&mut self.counters.log, "LOG")
        };
        tree.set_attr(div, "ID", id.clone());
        if physical {
            state.phys_ids.insert(node, id);
        } else {
            state.log_ids.insert(node, id);
        }
        if let Some(dmd_id) = state.dmd_ids.get(&node) {
            tree.set_attr(div, "DMDID", dmd_id.clone());
        }
        if let Some(admin_id) = &ds.admin_id {
            tree.set_attr(div, "ADMID", admin_id.clone());
        }
        tree.set_attr(div, "TYPE", ds.type_name.clone());

        if physical {
            if let Some(order) = doc.first_metadata(node, MD_PHYS_PAGE_NUMBER) {
                tree.set_attr(div, "ORDER", order.value.clone());
            }
            if let Some(label) = doc.first_metadata(node, MD_LOGICAL_PAGE_NUMBER) {
                tree.set_attr(div, "ORDERLABEL", label.value.clone());
            }
        }
        tree.append(parent, div);

        if let Some(url) = pointers.get(&node) {
            let mptr = tree.create_element("mets:mptr");
            tree.set_attr(mptr, "LOCTYPE", "URL");
            tree.set_attr(mptr, "xlink:href", url.clone());
            tree.append(div, mptr);
        }

        if physical {
            if ds.children.is_empty() && ds.content_files.is_empty() {
                state.pages_without_files += 1;
            }
            for fid in &ds.content_files {
                let Some(group_ids) = state.file_ids.get(&fid.0) else {
                    return Err(MetsError::Structure(format!(
                        "Division references a file missing from the file section ({:?})",
                        fid
                    )));
                };
                for file_id in group_ids.clone() {
                    let fptr = tree.create_element("mets:fptr");
                    tree.set_attr(fptr, "FILEID", file_id);
                    tree.append(div, fptr);
                }
            }
        }

        for child in &ds.children {
            self.write_div(doc, *child, tree, div, pointers, state, physical)?;
        }
        Ok(())
    }

    fn write_struct_links(
        &self,
        doc: &DigitalDocument,
        logical_root: DsId,
        tree: &mut XmlTree,
        mets: NodeId,
        state: &WriteState,
    ) -> MetsResult<()> {
        let link_sec = tree.create_element("mets:structLink");
        tree.append(mets, link_sec);
        let mut wrote_any = false;
        for node in doc.subtree(logical_root) {
            for reference in &doc.get(node).references {
                if reference.ref_type != REF_LOGICAL_PHYSICAL {
                    continue;
                }
                let from = state.log_ids.get(&node).ok_or_else(|| {
                    MetsError::Structure("Struct link from an unserialized division".to_string())
                })?;
                let to = state.phys_ids.get(&reference.target).ok_or_else(|| {
                    MetsError::Structure(
                        "Struct link to a division outside the physical tree".to_string(),
                    )
                })?;
                let link = tree.create_element("mets:smLink");
                tree.set_attr(link, "xlink:from", from.clone());
                tree.set_attr(link, "xlink:to", to.clone());
                tree.append(link_sec, link);
                wrote_any = true;
            }
        }
        if !wrote_any {
            // Keep the section well-formed for consumers expecting it.
            let link = tree.create_element("mets:smLink");
            tree.set_attr(link, "xlink:from", "");
            tree.set_attr(link, "xlink:to", "");
            tree.append(link_sec, link);
        }
        Ok(())
    }
}

/// Write a document to disk, splitting anchor chains into sibling files.
/// Returns the written paths, anchor files first.
pub fn write_files(
    doc: &DigitalDocument,
    prefs: &Prefs,
    path: impl AsRef<Path>,
) -> MetsResult<Vec<PathBuf>> {
    let path = path.as_ref();
    let parts = anchor::split(doc, prefs)?;
    let multi_level = parts.len() > 2;
    let mut written = Vec::with_capacity(parts.len());
    for part in &parts {
        let target = match &part.anchor_class {
            Some(class) => anchor::sibling_path(path, class, multi_level),
            None => path.to_path_buf(),
        };
        let mut writer = MetsWriter::new(prefs)?;
        let xml = writer.write_part(part)?;
        let lock = output_lock(&target);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        fs::write(&target, xml)?;
        written.push(target);
    }
    Ok(written)
}

/// Per-path serialization locks; two writers targeting the same output
/// file take turns.
fn output_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let registry = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    map.entry(path.to_path_buf()).or_default().clone()
}

fn group_location(group: &FileGroup, location: &str) -> String {
    let Some(prefix) = &group.path else {
        return location.to_string();
    };
    let name = location.rsplit('/').next().unwrap_or(location);
    let name = match &group.suffix {
        Some(suffix) => match name.rfind('.') {
            Some(dot) => format!("{}{}", &name[..dot], suffix),
            None => format!("{}{}", name, suffix),
        },
        None => name.to_string(),
    };
    format!("{}{}", prefix, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentFile, Metadata};
    use crate::prefs::FieldRule;
    use pretty_assertions::assert_eq;

    fn base_prefs() -> Prefs {
        let mut prefs = Prefs::new();
        prefs.add_struct_type("Monograph", None);
        prefs.add_struct_type("Chapter", None);
        prefs.add_struct_type("physSequence", None);
        prefs.add_struct_type("page", None);
        prefs.add_rule(
            FieldRule::new("TitleDocMain")
                .write_path("./mods:titleInfo/mods:title")
                .read_path("./mods:titleInfo/mods:title"),
        );
        prefs
    }

    fn simple_doc() -> DigitalDocument {
        let mut doc = DigitalDocument::new();
        let root = doc.create_node("Monograph");
        doc.add_metadata(root, Metadata::new("TitleDocMain", "Report 1"));
        doc.logical_root = Some(root);

        let seq = doc.create_node("physSequence");
        let page = doc.create_node("page");
        doc.add_metadata(page, Metadata::new(MD_PHYS_PAGE_NUMBER, "1"));
        doc.add_metadata(page, Metadata::new(MD_LOGICAL_PAGE_NUMBER, "i"));
        doc.add_child(seq, page).unwrap();
        doc.physical_root = Some(seq);

        let fid = doc
            .file_set
            .add(ContentFile::new("FILE_0001", "file:///images/0001.tif", "image/tiff"));
        doc.attach_file(page, fid);
        doc.add_reference(root, page, REF_LOGICAL_PHYSICAL);
        doc
    }

    #[test]
    fn test_write_simple_document() {
        let prefs = base_prefs();
        let mut writer = MetsWriter::new(&prefs).unwrap();
        let xml = writer.write(&simple_doc()).unwrap();

        assert!(xml.contains("<mets:mets"));
        assert!(xml.contains("xmlns:mets=\"http://www.loc.gov/METS/\""));
        assert!(xml.contains("xsi:schemaLocation"));
        assert!(xml.contains("DMDLOG_0001"));
        assert!(xml.contains("<mods:title>Report 1</mods:title>"));
        assert!(xml.contains("TYPE=\"LOGICAL\""));
        assert!(xml.contains("TYPE=\"PHYSICAL\""));
        assert!(xml.contains("ORDER=\"1\""));
        assert!(xml.contains("ORDERLABEL=\"i\""));
        assert!(xml.contains("FILEID=\"FILE_0001\""));
        assert!(xml.contains("xlink:from=\"LOG_0001\""));
        assert!(xml.contains("xlink:to=\"PHYS_0002\""));
    }

    #[test]
    fn test_header_written_first() {
        let prefs = base_prefs();
        let mut writer = MetsWriter::new(&prefs).unwrap();
        let xml = writer.write(&simple_doc()).unwrap();
        let header = xml.find("<mets:metsHdr>").unwrap();
        assert!(xml.contains("<mets:name>metskit</mets:name>"));
        assert!(header < xml.find("<mets:dmdSec").unwrap());
        assert!(header < xml.find("<mets:fileSec").unwrap());
    }

    #[test]
    fn test_title_written_exactly_once() {
        let prefs = base_prefs();
        let mut writer = MetsWriter::new(&prefs).unwrap();
        let xml = writer.write(&simple_doc()).unwrap();
        assert_eq!(xml.matches("<mods:titleInfo>").count(), 1);
        assert_eq!(xml.matches("<mods:title>Report 1</mods:title>").count(), 1);
    }

    #[test]
    fn test_no_dmd_for_empty_node() {
        let prefs = base_prefs();
        let mut doc = DigitalDocument::new();
        let root = doc.create_node("Monograph");
        doc.logical_root = Some(root);
        let mut writer = MetsWriter::new(&prefs).unwrap();
        let xml = writer.write(&doc).unwrap();
        assert!(!xml.contains("DMDID"));
        assert!(!xml.contains("<mets:dmdSec"));
    }

    #[test]
    fn test_placeholder_link_for_bare_document() {
        let prefs = base_prefs();
        let mut doc = DigitalDocument::new();
        let root = doc.create_node("Monograph");
        doc.logical_root = Some(root);
        let mut writer = MetsWriter::new(&prefs).unwrap();
        let xml = writer.write(&doc).unwrap();
        assert!(xml.contains("<mets:smLink xlink:from=\"\" xlink:to=\"\"/>"));
    }

    #[test]
    fn test_file_groups_written_with_decorated_ids() {
        let mut prefs = base_prefs();
        prefs.add_file_group(FileGroup {
            use_label: "LOCAL".to_string(),
            path: Some("file:///images/".to_string()),
            mime_type: Some("image/tiff".to_string()),
            suffix: None,
        });
        prefs.add_file_group(FileGroup {
            use_label: "PRESENTATION".to_string(),
            path: Some("https://viewer.example.org/images/".to_string()),
            mime_type: Some("image/jpeg".to_string()),
            suffix: Some(".jpg".to_string()),
        });
        let mut writer = MetsWriter::new(&prefs).unwrap();
        let xml = writer.write(&simple_doc()).unwrap();

        assert!(xml.contains("USE=\"LOCAL\""));
        assert!(xml.contains("USE=\"PRESENTATION\""));
        assert!(xml.contains("ID=\"FILE_0001_PRESENTATION\""));
        assert!(xml.contains("xlink:href=\"https://viewer.example.org/images/0001.jpg\""));
        // The page points at the file once per group.
        assert!(xml.contains("FILEID=\"FILE_0001\""));
        assert!(xml.contains("FILEID=\"FILE_0001_PRESENTATION\""));
    }

    #[test]
    fn test_group_location_suffix_replacement() {
        let group = FileGroup {
            use_label: "PRESENTATION".to_string(),
            path: Some("https://x/".to_string()),
            mime_type: None,
            suffix: Some(".jpg".to_string()),
        };
        assert_eq!(
            group_location(&group, "file:///images/0001.tif"),
            "https://x/0001.jpg"
        );
    }

    #[test]
    fn test_dangling_reference_fatal() {
        let prefs = base_prefs();
        let mut doc = DigitalDocument::new();
        let root = doc.create_node("Monograph");
        doc.logical_root = Some(root);
        // Reference into a node that is in no structure map.
        let stray = doc.create_node("page");
        doc.add_reference(root, stray, REF_LOGICAL_PHYSICAL);
        let mut writer = MetsWriter::new(&prefs).unwrap();
        let err = writer.write(&doc).unwrap_err();
        assert!(matches!(err, MetsError::Structure(_)));
    }

    #[test]
    fn test_counters_reset_per_document() {
        let prefs = base_prefs();
        let mut writer = MetsWriter::new(&prefs).unwrap();
        let first = writer.write(&simple_doc()).unwrap();
        let second = writer.write(&simple_doc()).unwrap();
        assert_eq!(first, second);
    }
}
