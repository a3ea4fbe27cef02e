//! Document structure tree
//!
//! A digitized work carries two parallel trees: a logical one (work,
//! volume, chapter) and a physical one (carrier, pages), connected only
//! through typed references from logical to physical nodes. Both trees live
//! in one arena owned by [`DigitalDocument`]; cross-tree links are handles,
//! never ownership.

use crate::core::error::{MetsError, MetsResult};
use crate::model::files::{FileId, FileSet};
use crate::model::metadata::{Metadata, MetadataGroup, Person};

/// Handle for a structure node inside a [`DigitalDocument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DsId(pub u32);

/// Reference type connecting a logical node to the physical node realizing it.
pub const REF_LOGICAL_PHYSICAL: &str = "logical_physical";

/// A typed, non-owning reference to a node in the other tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub target: DsId,
    pub ref_type: String,
}

/// One node of a structure tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocStruct {
    /// Structure-type name, resolved against the type catalog.
    pub type_name: String,
    /// Simple metadata values in declaration order.
    pub metadata: Vec<Metadata>,
    /// Person values in declaration order.
    pub persons: Vec<Person>,
    /// Group values in declaration order.
    pub groups: Vec<MetadataGroup>,
    /// Owning parent; only tree roots have none.
    pub parent: Option<DsId>,
    /// Children in document order.
    pub children: Vec<DsId>,
    /// Outgoing typed references into the other tree.
    pub references: Vec<Reference>,
    /// Content files attached to this (physical) node.
    pub content_files: Vec<FileId>,
    /// Administrative-metadata section reference.
    pub admin_id: Option<String>,
}

impl DocStruct {
    fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            metadata: Vec::new(),
            persons: Vec::new(),
            groups: Vec::new(),
            parent: None,
            children: Vec::new(),
            references: Vec::new(),
            content_files: Vec::new(),
            admin_id: None,
        }
    }

    /// Check whether the node carries any metadata, person or group value.
    pub fn has_metadata(&self) -> bool {
        !self.metadata.is_empty() || !self.persons.is_empty() || !self.groups.is_empty()
    }
}

/// The in-memory document: one arena holding both trees plus the file-set.
///
/// Model objects are created fresh per read or write call and live only for
/// its duration.
#[derive(Debug, Clone, Default)]
pub struct DigitalDocument {
    nodes: Vec<DocStruct>,
    /// Root of the logical tree (mandatory after a successful read).
    pub logical_root: Option<DsId>,
    /// Root of the physical tree, if the document has one.
    pub physical_root: Option<DsId>,
    /// All content files.
    pub file_set: FileSet,
}

impl DigitalDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detached node of the given structure type.
    pub fn create_node(&mut self, type_name: impl Into<String>) -> DsId {
        let id = DsId(self.nodes.len() as u32);
        self.nodes.push(DocStruct::new(type_name));
        id
    }

    /// Borrow a node.
    pub fn get(&self, id: DsId) -> &DocStruct {
        &self.nodes[id.0 as usize]
    }

    /// Borrow a node mutably.
    pub fn get_mut(&mut self, id: DsId) -> &mut DocStruct {
        &mut self.nodes[id.0 as usize]
    }

    /// Append a child. A node has exactly one parent; attaching an already
    /// parented node is an error.
    pub fn add_child(&mut self, parent: DsId, child: DsId) -> MetsResult<()> {
        if self.get(child).parent.is_some() {
            return Err(MetsError::Structure(format!(
                "Node {:?} already has a parent",
                child
            )));
        }
        self.get_mut(child).parent = Some(parent);
        self.get_mut(parent).children.push(child);
        Ok(())
    }

    /// Insert a child at a position in the parent's child list.
    pub fn insert_child(&mut self, parent: DsId, index: usize, child: DsId) -> MetsResult<()> {
        if self.get(child).parent.is_some() {
            return Err(MetsError::Structure(format!(
                "Node {:?} already has a parent",
                child
            )));
        }
        self.get_mut(child).parent = Some(parent);
        let children = &mut self.get_mut(parent).children;
        let index = index.min(children.len());
        children.insert(index, child);
        Ok(())
    }

    /// Attach a typed reference from one node to another.
    pub fn add_reference(&mut self, from: DsId, to: DsId, ref_type: impl Into<String>) {
        self.get_mut(from).references.push(Reference {
            target: to,
            ref_type: ref_type.into(),
        });
    }

    /// Append a metadata value to a node.
    pub fn add_metadata(&mut self, node: DsId, md: Metadata) {
        self.get_mut(node).metadata.push(md);
    }

    /// Append a person value to a node.
    pub fn add_person(&mut self, node: DsId, person: Person) {
        self.get_mut(node).persons.push(person);
    }

    /// Append a group value to a node.
    pub fn add_group(&mut self, node: DsId, group: MetadataGroup) {
        self.get_mut(node).groups.push(group);
    }

    /// Attach a content file to a (physical) node.
    pub fn attach_file(&mut self, node: DsId, file: FileId) {
        self.get_mut(node).content_files.push(file);
    }

    /// First metadata value of the given type on a node.
    pub fn first_metadata<'a>(&'a self, node: DsId, type_name: &str) -> Option<&'a Metadata> {
        self.get(node)
            .metadata
            .iter()
            .find(|m| m.type_name == type_name)
    }

    /// All node ids of a subtree in depth-first document order, root first.
    pub fn subtree(&self, root: DsId) -> Vec<DsId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.get(id).children.iter().rev().copied());
        }
        out
    }

    /// Total number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the document holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Deep-copy a subtree into another document, without references or
    /// content-file attachments (handles would not translate across
    /// arenas). Returns the copied root, detached.
    pub fn copy_subtree_into(&self, root: DsId, target: &mut DigitalDocument) -> DsId {
        let src = self.get(root);
        let copied = target.create_node(src.type_name.clone());
        {
            let node = target.get_mut(copied);
            node.metadata = src.metadata.clone();
            node.persons = src.persons.clone();
            node.groups = src.groups.clone();
            node.admin_id = src.admin_id.clone();
        }
        for child in src.children.clone() {
            let copied_child = self.copy_subtree_into(child, target);
            // The copied child is freshly created and unparented.
            let _ = target.add_child(copied, copied_child);
        }
        copied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_parent_invariant() {
        let mut doc = DigitalDocument::new();
        let root = doc.create_node("Monograph");
        let chapter = doc.create_node("Chapter");
        let other = doc.create_node("Monograph");

        doc.add_child(root, chapter).unwrap();
        assert!(doc.add_child(other, chapter).is_err());
        assert_eq!(doc.get(chapter).parent, Some(root));
    }

    #[test]
    fn test_insert_child_position() {
        let mut doc = DigitalDocument::new();
        let root = doc.create_node("Monograph");
        let a = doc.create_node("Chapter");
        let b = doc.create_node("Chapter");
        let c = doc.create_node("Chapter");
        doc.add_child(root, a).unwrap();
        doc.add_child(root, c).unwrap();
        doc.insert_child(root, 1, b).unwrap();
        assert_eq!(doc.get(root).children, vec![a, b, c]);
    }

    #[test]
    fn test_references_do_not_own() {
        let mut doc = DigitalDocument::new();
        let logical = doc.create_node("Chapter");
        let physical = doc.create_node("page");
        doc.add_reference(logical, physical, REF_LOGICAL_PHYSICAL);

        assert_eq!(doc.get(logical).references.len(), 1);
        assert_eq!(doc.get(logical).references[0].target, physical);
        // The referenced node stays unparented.
        assert_eq!(doc.get(physical).parent, None);
    }

    #[test]
    fn test_subtree_order() {
        let mut doc = DigitalDocument::new();
        let root = doc.create_node("Monograph");
        let a = doc.create_node("Chapter");
        let b = doc.create_node("Chapter");
        let a1 = doc.create_node("Section");
        doc.add_child(root, a).unwrap();
        doc.add_child(root, b).unwrap();
        doc.add_child(a, a1).unwrap();
        assert_eq!(doc.subtree(root), vec![root, a, a1, b]);
    }

    #[test]
    fn test_copy_subtree() {
        let mut doc = DigitalDocument::new();
        let root = doc.create_node("Volume");
        doc.add_metadata(root, Metadata::new("TitleDocMain", "Vol 1"));
        let chapter = doc.create_node("Chapter");
        doc.add_child(root, chapter).unwrap();

        let mut target = DigitalDocument::new();
        let copied = doc.copy_subtree_into(root, &mut target);
        assert_eq!(target.get(copied).type_name, "Volume");
        assert_eq!(target.get(copied).metadata[0].value, "Vol 1");
        assert_eq!(target.get(copied).children.len(), 1);
    }
}
