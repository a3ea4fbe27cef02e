//! Arena-backed XML tree
//!
//! METS reading, MODS mapping and the path engine all work against one
//! in-memory XML representation. Nodes live in a contiguous vector and are
//! addressed by `NodeId` handles; element names keep their prefixed form
//! (`mets:div`, `mods:title`) exactly as they appear in the document.

use crate::core::error::{MetsError, MetsResult};
use quick_xml::escape::unescape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

/// Unique identifier for a node in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// Node payload: a prefixed element with attributes, or character data.
#[derive(Debug, Clone)]
pub enum XmlData {
    /// Element with prefixed name and attributes in document order.
    Element {
        name: String,
        attrs: Vec<(String, String)>,
    },
    /// Text content.
    Text(String),
}

/// A node in the tree.
#[derive(Debug, Clone)]
pub struct XmlNode {
    pub data: XmlData,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Arena XML tree.
#[derive(Debug, Clone, Default)]
pub struct XmlTree {
    nodes: Vec<XmlNode>,
    root: Option<NodeId>,
}

impl XmlTree {
    /// Create a new empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self, data: XmlData) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(XmlNode {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    /// Create a new element node with the given prefixed name.
    pub fn create_element(&mut self, name: impl Into<String>) -> NodeId {
        self.alloc(XmlData::Element {
            name: name.into(),
            attrs: Vec::new(),
        })
    }

    /// Create a new text node.
    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(XmlData::Text(text.into()))
    }

    /// Get the root node id.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Set the root node.
    pub fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    fn node(&self, id: NodeId) -> &XmlNode {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut XmlNode {
        &mut self.nodes[id.0 as usize]
    }

    /// Append a child to a parent node.
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.node_mut(child).parent = Some(parent);
        self.node_mut(parent).children.push(child);
    }

    /// Insert a child at a specific position in the parent's child list.
    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.node_mut(child).parent = Some(parent);
        let children = &mut self.node_mut(parent).children;
        let index = index.min(children.len());
        children.insert(index, child);
    }

    /// Get the parent of a node.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Get the children of a node in document order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Child element ids (text nodes skipped).
    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .children
            .iter()
            .copied()
            .filter(|c| self.is_element(*c))
            .collect()
    }

    /// Check if a node is an element.
    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.node(id).data, XmlData::Element { .. })
    }

    /// Get the prefixed name of an element node.
    pub fn name(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).data {
            XmlData::Element { name, .. } => Some(name.as_str()),
            XmlData::Text(_) => None,
        }
    }

    /// Get the local part of an element name (after the prefix, if any).
    pub fn local_name(&self, id: NodeId) -> Option<&str> {
        self.name(id)
            .map(|n| n.rsplit_once(':').map(|(_, local)| local).unwrap_or(n))
    }

    /// Rename an element node.
    pub fn set_name(&mut self, id: NodeId, new_name: impl Into<String>) {
        if let XmlData::Element { name, .. } = &mut self.node_mut(id).data {
            *name = new_name.into();
        }
    }

    /// Get an attribute value of an element node.
    pub fn attr(&self, id: NodeId, attr_name: &str) -> Option<&str> {
        match &self.node(id).data {
            XmlData::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == attr_name)
                .map(|(_, v)| v.as_str()),
            XmlData::Text(_) => None,
        }
    }

    /// Set an attribute, replacing any previous value.
    pub fn set_attr(&mut self, id: NodeId, attr_name: impl Into<String>, value: impl Into<String>) {
        let attr_name = attr_name.into();
        let value = value.into();
        if let XmlData::Element { attrs, .. } = &mut self.node_mut(id).data {
            if let Some(entry) = attrs.iter_mut().find(|(k, _)| *k == attr_name) {
                entry.1 = value;
            } else {
                attrs.push((attr_name, value));
            }
        }
    }

    /// All attributes of an element node.
    pub fn attrs(&self, id: NodeId) -> &[(String, String)] {
        match &self.node(id).data {
            XmlData::Element { attrs, .. } => attrs,
            XmlData::Text(_) => &[],
        }
    }

    /// Concatenated direct text content of a node.
    pub fn text(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in &self.node(id).children {
            if let XmlData::Text(t) = &self.node(*child).data {
                out.push_str(t);
            }
        }
        out
    }

    /// Set the text content of an element, replacing existing text children.
    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) {
        let kept: Vec<NodeId> = self
            .node(id)
            .children
            .iter()
            .copied()
            .filter(|c| self.is_element(*c))
            .collect();
        self.node_mut(id).children = kept;
        let t = self.create_text(text);
        self.append(id, t);
    }

    /// Find the first direct child element with the given prefixed name.
    pub fn find_child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.node(id)
            .children
            .iter()
            .copied()
            .find(|c| self.name(*c) == Some(name))
    }

    /// All direct child elements with the given prefixed name.
    pub fn find_children(&self, id: NodeId, name: &str) -> Vec<NodeId> {
        self.node(id)
            .children
            .iter()
            .copied()
            .filter(|c| self.name(*c) == Some(name))
            .collect()
    }

    /// Depth-first search for the first descendant element with the given name.
    pub fn find_descendant(&self, from: NodeId, name: &str) -> Option<NodeId> {
        let mut stack: Vec<NodeId> = self.node(from).children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if self.name(id) == Some(name) {
                return Some(id);
            }
            stack.extend(self.node(id).children.iter().rev().copied());
        }
        None
    }

    /// All descendant elements with the given name, in document order.
    pub fn find_descendants(&self, from: NodeId, name: &str) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.node(from).children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if self.name(id) == Some(name) {
                out.push(id);
            }
            stack.extend(self.node(id).children.iter().rev().copied());
        }
        out
    }

    /// Deep-copy a subtree from another tree into this one.
    ///
    /// The copied root is returned detached; attach it with [`append`].
    ///
    /// [`append`]: XmlTree::append
    pub fn import_subtree(&mut self, other: &XmlTree, other_id: NodeId) -> NodeId {
        let data = other.node(other_id).data.clone();
        let new_id = self.alloc(data);
        for child in other.node(other_id).children.clone() {
            let copied = self.import_subtree(other, child);
            self.append(new_id, copied);
        }
        new_id
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the tree holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Parse an XML document into a tree.
    pub fn parse(xml: &str) -> MetsResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut tree = XmlTree::new();
        let mut buf = Vec::new();
        let mut stack: Vec<NodeId> = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let id = tree.element_from_event(&e);
                    tree.attach(&mut stack, id);
                    stack.push(id);
                }
                Ok(Event::Empty(e)) => {
                    let id = tree.element_from_event(&e);
                    tree.attach(&mut stack, id);
                }
                Ok(Event::Text(e)) => {
                    let raw = String::from_utf8_lossy(e.as_ref()).to_string();
                    let text = match unescape(&raw) {
                        Ok(unescaped) => unescaped.to_string(),
                        Err(_) => raw,
                    };
                    if text.trim().is_empty() {
                        buf.clear();
                        continue;
                    }
                    if let Some(parent) = stack.last().copied() {
                        let t = tree.create_text(text);
                        tree.append(parent, t);
                    }
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(MetsError::ParseError(format!("XML parsing error: {}", e)));
                }
                _ => {}
            }
            buf.clear();
        }

        if tree.root.is_none() {
            return Err(MetsError::ParseError(
                "Document has no root element".to_string(),
            ));
        }
        Ok(tree)
    }

    fn element_from_event(&mut self, e: &BytesStart<'_>) -> NodeId {
        let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
        let id = self.create_element(name);
        for attr in e.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let raw = String::from_utf8_lossy(attr.value.as_ref()).to_string();
            let value = match unescape(&raw) {
                Ok(unescaped) => unescaped.to_string(),
                Err(_) => raw,
            };
            self.set_attr(id, key, value);
        }
        id
    }

    fn attach(&mut self, stack: &mut [NodeId], id: NodeId) {
        if let Some(parent) = stack.last().copied() {
            self.append(parent, id);
        } else if self.root.is_none() {
            self.root = Some(id);
        }
    }

    /// Serialize a subtree to an indented XML string with declaration.
    pub fn serialize_document(&self, root: NodeId) -> MetsResult<String> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        self.write_node(&mut writer, root)?;
        let bytes = writer.into_inner().into_inner();
        String::from_utf8(bytes)
            .map_err(|e| MetsError::SerializationError(format!("UTF-8 encoding error: {}", e)))
    }

    /// Serialize a subtree to an XML fragment (no declaration).
    pub fn serialize_fragment(&self, root: NodeId) -> MetsResult<String> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        self.write_node(&mut writer, root)?;
        let bytes = writer.into_inner().into_inner();
        String::from_utf8(bytes)
            .map_err(|e| MetsError::SerializationError(format!("UTF-8 encoding error: {}", e)))
    }

    fn write_node(&self, writer: &mut Writer<Cursor<Vec<u8>>>, id: NodeId) -> MetsResult<()> {
        match &self.node(id).data {
            XmlData::Element { name, attrs } => {
                let mut start = BytesStart::new(name.as_str());
                for (k, v) in attrs {
                    start.push_attribute((k.as_str(), v.as_str()));
                }
                if self.node(id).children.is_empty() {
                    writer.write_event(Event::Empty(start))?;
                } else {
                    writer.write_event(Event::Start(start))?;
                    for child in &self.node(id).children {
                        self.write_node(writer, *child)?;
                    }
                    writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
                }
            }
            XmlData::Text(t) => {
                writer.write_event(Event::Text(BytesText::new(t)))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_and_query() {
        let mut tree = XmlTree::new();
        let root = tree.create_element("mets:mets");
        tree.set_root(root);
        let div = tree.create_element("mets:div");
        tree.set_attr(div, "TYPE", "Monograph");
        tree.append(root, div);

        assert_eq!(tree.name(div), Some("mets:div"));
        assert_eq!(tree.local_name(div), Some("div"));
        assert_eq!(tree.attr(div, "TYPE"), Some("Monograph"));
        assert_eq!(tree.find_child(root, "mets:div"), Some(div));
        assert_eq!(tree.parent(div), Some(root));
    }

    #[test]
    fn test_parse_nested() {
        let xml = r#"<mets:mets xmlns:mets="http://www.loc.gov/METS/">
            <mets:structMap TYPE="LOGICAL">
                <mets:div TYPE="Monograph" ID="LOG_0001"/>
            </mets:structMap>
        </mets:mets>"#;
        let tree = XmlTree::parse(xml).unwrap();
        let root = tree.root().unwrap();
        assert_eq!(tree.name(root), Some("mets:mets"));
        let map = tree.find_child(root, "mets:structMap").unwrap();
        assert_eq!(tree.attr(map, "TYPE"), Some("LOGICAL"));
        let div = tree.find_descendant(root, "mets:div").unwrap();
        assert_eq!(tree.attr(div, "ID"), Some("LOG_0001"));
    }

    #[test]
    fn test_parse_text_and_entities() {
        let xml = "<a><b>Tom &amp; Jerry</b></a>";
        let tree = XmlTree::parse(xml).unwrap();
        let root = tree.root().unwrap();
        let b = tree.find_child(root, "b").unwrap();
        assert_eq!(tree.text(b), "Tom & Jerry");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(XmlTree::parse("").is_err());
        assert!(XmlTree::parse("<a><b></a>").is_err());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut tree = XmlTree::new();
        let root = tree.create_element("mods:mods");
        tree.set_root(root);
        let title_info = tree.create_element("mods:titleInfo");
        tree.append(root, title_info);
        let title = tree.create_element("mods:title");
        tree.append(title_info, title);
        tree.set_text(title, "Report 1");

        let xml = tree.serialize_fragment(root).unwrap();
        let reparsed = XmlTree::parse(&xml).unwrap();
        let r = reparsed.root().unwrap();
        let t = reparsed.find_descendant(r, "mods:title").unwrap();
        assert_eq!(reparsed.text(t), "Report 1");
    }

    #[test]
    fn test_insert_child_ordering() {
        let mut tree = XmlTree::new();
        let root = tree.create_element("r");
        tree.set_root(root);
        let a = tree.create_element("a");
        let b = tree.create_element("b");
        let c = tree.create_element("c");
        tree.append(root, a);
        tree.append(root, c);
        tree.insert_child(root, 1, b);
        let names: Vec<_> = tree
            .children(root)
            .iter()
            .map(|id| tree.name(*id).unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_import_subtree() {
        let mut src = XmlTree::new();
        let m = src.create_element("mods:mods");
        src.set_root(m);
        let t = src.create_element("mods:title");
        src.append(m, t);
        src.set_text(t, "Imported");

        let mut dst = XmlTree::new();
        let wrap = dst.create_element("mets:xmlData");
        dst.set_root(wrap);
        let copied = dst.import_subtree(&src, m);
        dst.append(wrap, copied);

        let title = dst.find_descendant(wrap, "mods:title").unwrap();
        assert_eq!(dst.text(title), "Imported");
    }
}
