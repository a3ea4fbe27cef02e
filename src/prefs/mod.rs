//! Preferences document and type catalog
//!
//! The converter is driven by a typed preferences document: namespace
//! declarations, the structure/metadata type catalog, the anchor-identifier
//! type, pointer URLs for cross-file links, declared file groups, and the
//! field-correspondence table mapping internal metadata types to MODS
//! locations. Preferences can be built programmatically or loaded from XML
//! with [`Prefs::from_xml`].

use crate::core::error::{MetsError, MetsResult};
use crate::core::namespace::NamespaceMap;
use crate::core::xml::XmlTree;
use indexmap::IndexMap;
use std::collections::HashMap;

/// Separator joining the configured pointer URLs into one value. A C0
/// control character can never appear in a percent-encoded URL.
pub const POINTER_URL_SEPARATOR: char = '\u{1f}';

/// Fixed filename suffix of the anchor sibling file for single-level
/// chains, inserted before the extension.
pub const ANCHOR_FILE_SUFFIX: &str = "_anchor";

/// A structure type from the catalog.
///
/// A type with an anchor class is a virtual, contentless grouping level
/// whose metadata lives in a separate sibling file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructType {
    pub name: String,
    pub anchor_class: Option<String>,
}

/// A metadata type from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataKind {
    pub name: String,
    /// Person values are populated from per-attribute sub-paths.
    pub is_person: bool,
    /// Identifier-flagged types participate in anchor resolution.
    pub is_identifier: bool,
}

/// Per-attribute sub-paths of a person correspondence, relative to the
/// realized (or matched) base element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonPaths {
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub affiliation: Option<String>,
    pub display_name: Option<String>,
    pub person_type: Option<String>,
}

/// One field correspondence: an internal metadata/person/group type mapped
/// to MODS locations, bidirectionally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldRule {
    /// Internal type name this rule claims.
    pub internal_name: String,
    /// Create-oriented path used on write, relative to the MODS root.
    pub write_path: Option<String>,
    /// Path evaluated on read, relative to the MODS root.
    pub read_path: Option<String>,
    /// Regex a value must match to be written; a non-match skips the value
    /// silently.
    pub condition: Option<String>,
    /// Substitution pattern in `s/search/replacement/` form applied to the
    /// written value.
    pub value_pattern: Option<String>,
    /// Person sub-paths; present only for person rules.
    pub person_paths: Option<PersonPaths>,
    /// Group sub-field name to sub-path, in declaration order.
    pub group_fields: IndexMap<String, String>,
}

impl FieldRule {
    /// Create a rule for an internal type name.
    pub fn new(internal_name: impl Into<String>) -> Self {
        Self {
            internal_name: internal_name.into(),
            ..Self::default()
        }
    }

    /// Set the write path.
    pub fn write_path(mut self, path: impl Into<String>) -> Self {
        self.write_path = Some(path.into());
        self
    }

    /// Set the read path.
    pub fn read_path(mut self, path: impl Into<String>) -> Self {
        self.read_path = Some(path.into());
        self
    }

    /// Set the value condition regex.
    pub fn condition(mut self, regex: impl Into<String>) -> Self {
        self.condition = Some(regex.into());
        self
    }

    /// Set the substitution pattern (`s/search/replacement/`).
    pub fn value_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.value_pattern = Some(pattern.into());
        self
    }

    /// Set the person sub-paths.
    pub fn person_paths(mut self, paths: PersonPaths) -> Self {
        self.person_paths = Some(paths);
        self
    }

    /// Add a group sub-field path.
    pub fn group_field(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.group_fields.insert(name.into(), path.into());
        self
    }
}

/// A declared file group of the file section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileGroup {
    /// The USE label, e.g. `LOCAL` or `PRESENTATION`.
    pub use_label: String,
    /// Location prefix prepended to the file name; unset logs a warning.
    pub path: Option<String>,
    /// MIME type written for this group; unset falls back to the file's own
    /// type and logs a warning.
    pub mime_type: Option<String>,
    /// Filename suffix replacing the original extension, e.g. `.jpg`.
    pub suffix: Option<String>,
}

/// The complete preferences document.
#[derive(Debug, Clone, Default)]
pub struct Prefs {
    namespaces: Vec<(String, String, Option<String>)>,
    struct_types: HashMap<String, StructType>,
    metadata_kinds: HashMap<String, MetadataKind>,
    /// Field correspondences in declaration order.
    pub rules: Vec<FieldRule>,
    /// The metadata type carrying the anchor identifier.
    pub anchor_identifier_type: String,
    /// Optional substitution pattern applied to the identifier on write.
    pub anchor_identifier_pattern: Option<String>,
    /// Pointer URLs joined with [`POINTER_URL_SEPARATOR`], outermost anchor
    /// class first.
    pub pointer_url: String,
    /// Declared file groups in declaration order.
    pub file_groups: IndexMap<String, FileGroup>,
}

impl Prefs {
    /// Create empty preferences.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a namespace (prefix, URI, optional schema location).
    pub fn add_namespace(
        &mut self,
        prefix: impl Into<String>,
        uri: impl Into<String>,
        schema_location: Option<String>,
    ) {
        self.namespaces
            .push((prefix.into(), uri.into(), schema_location));
    }

    /// Register a structure type.
    pub fn add_struct_type(&mut self, name: impl Into<String>, anchor_class: Option<String>) {
        let name = name.into();
        self.struct_types.insert(
            name.clone(),
            StructType {
                name,
                anchor_class,
            },
        );
    }

    /// Register a metadata type.
    pub fn add_metadata_kind(
        &mut self,
        name: impl Into<String>,
        is_person: bool,
        is_identifier: bool,
    ) {
        let name = name.into();
        self.metadata_kinds.insert(
            name.clone(),
            MetadataKind {
                name,
                is_person,
                is_identifier,
            },
        );
    }

    /// Append a field correspondence.
    pub fn add_rule(&mut self, rule: FieldRule) {
        self.rules.push(rule);
    }

    /// Declare a file group.
    pub fn add_file_group(&mut self, group: FileGroup) {
        self.file_groups.insert(group.use_label.clone(), group);
    }

    /// Resolve a structure type; an unknown name is a fatal configuration
    /// error.
    pub fn struct_type(&self, name: &str) -> MetsResult<&StructType> {
        self.struct_types
            .get(name)
            .ok_or_else(|| MetsError::Config(format!("Unknown structure type '{}'", name)))
    }

    /// Look up a metadata type, if declared.
    pub fn metadata_kind(&self, name: &str) -> Option<&MetadataKind> {
        self.metadata_kinds.get(name)
    }

    /// The anchor class a structure type declares, if any.
    pub fn anchor_class(&self, type_name: &str) -> Option<&str> {
        self.struct_types
            .get(type_name)
            .and_then(|t| t.anchor_class.as_deref())
    }

    /// Check whether a structure type is an anchor level.
    pub fn is_anchor(&self, type_name: &str) -> bool {
        self.anchor_class(type_name).is_some()
    }

    /// The configured pointer URLs, split back out of the joined value.
    pub fn pointer_urls(&self) -> Vec<&str> {
        if self.pointer_url.is_empty() {
            return Vec::new();
        }
        self.pointer_url.split(POINTER_URL_SEPARATOR).collect()
    }

    /// Set the pointer URLs, joining them with the private separator.
    pub fn set_pointer_urls<I, S>(&mut self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined: Vec<String> = urls
            .into_iter()
            .map(|u| u.as_ref().to_string())
            .collect();
        self.pointer_url = joined.join(&POINTER_URL_SEPARATOR.to_string());
    }

    /// Build a namespace map seeded with the built-ins plus every declared
    /// namespace. A prefix conflicting with a built-in URI is fatal.
    pub fn namespace_map(&self) -> MetsResult<NamespaceMap> {
        let mut map = NamespaceMap::new();
        for (prefix, uri, schema) in &self.namespaces {
            map.register(prefix, uri, schema.as_deref())?;
        }
        Ok(map)
    }

    /// Load preferences from their XML form.
    pub fn from_xml(xml: &str) -> MetsResult<Self> {
        let tree = XmlTree::parse(xml)?;
        let root = tree
            .root()
            .ok_or_else(|| MetsError::Config("Empty preferences document".to_string()))?;
        if tree.name(root) != Some("Preferences") {
            return Err(MetsError::Config(format!(
                "Expected <Preferences> root, found <{}>",
                tree.name(root).unwrap_or("?")
            )));
        }

        let mut prefs = Prefs::new();
        for child in tree.element_children(root) {
            let Some(name) = tree.name(child) else {
                continue;
            };
            match name {
                "Namespace" => {
                    let prefix = require_attr(&tree, child, "prefix")?;
                    let uri = require_attr(&tree, child, "uri")?;
                    let schema = tree.attr(child, "schemaLocation").map(|s| s.to_string());
                    prefs.add_namespace(prefix, uri, schema);
                }
                "DocStrctType" => {
                    let type_name = require_attr(&tree, child, "name")?;
                    let anchor = tree.attr(child, "anchorClass").map(|s| s.to_string());
                    prefs.add_struct_type(type_name, anchor);
                }
                "MetadataType" => {
                    let type_name = require_attr(&tree, child, "name")?;
                    let is_person = tree.attr(child, "person") == Some("true");
                    let is_identifier = tree.attr(child, "identifier") == Some("true");
                    prefs.add_metadata_kind(type_name, is_person, is_identifier);
                }
                "AnchorIdentifier" => {
                    prefs.anchor_identifier_type = require_attr(&tree, child, "type")?;
                    prefs.anchor_identifier_pattern =
                        tree.attr(child, "pattern").map(|s| s.to_string());
                }
                "PointerUrl" => {
                    let url = tree.text(child);
                    if !prefs.pointer_url.is_empty() {
                        prefs.pointer_url.push(POINTER_URL_SEPARATOR);
                    }
                    prefs.pointer_url.push_str(url.trim());
                }
                "FileGroup" => {
                    prefs.add_file_group(FileGroup {
                        use_label: require_attr(&tree, child, "use")?,
                        path: tree.attr(child, "path").map(|s| s.to_string()),
                        mime_type: tree.attr(child, "mimeType").map(|s| s.to_string()),
                        suffix: tree.attr(child, "suffix").map(|s| s.to_string()),
                    });
                }
                "Metadata" | "Person" | "Group" => {
                    prefs.add_rule(parse_rule(&tree, child, name)?);
                }
                other => {
                    return Err(MetsError::Config(format!(
                        "Unknown preferences element <{}>",
                        other
                    )));
                }
            }
        }
        Ok(prefs)
    }
}

fn require_attr(tree: &XmlTree, node: crate::core::xml::NodeId, name: &str) -> MetsResult<String> {
    tree.attr(node, name)
        .map(|s| s.to_string())
        .ok_or_else(|| {
            MetsError::Config(format!(
                "<{}> is missing the '{}' attribute",
                tree.name(node).unwrap_or("?"),
                name
            ))
        })
}

fn parse_rule(tree: &XmlTree, node: crate::core::xml::NodeId, kind: &str) -> MetsResult<FieldRule> {
    let mut rule = FieldRule::new(require_attr(tree, node, "internal")?);
    rule.write_path = tree.attr(node, "writeXPath").map(|s| s.to_string());
    rule.read_path = tree.attr(node, "readXPath").map(|s| s.to_string());
    rule.condition = tree.attr(node, "condition").map(|s| s.to_string());
    rule.value_pattern = tree.attr(node, "pattern").map(|s| s.to_string());

    match kind {
        "Person" => {
            rule.person_paths = Some(PersonPaths {
                firstname: tree.attr(node, "firstnameXPath").map(|s| s.to_string()),
                lastname: tree.attr(node, "lastnameXPath").map(|s| s.to_string()),
                affiliation: tree.attr(node, "affiliationXPath").map(|s| s.to_string()),
                display_name: tree.attr(node, "displayNameXPath").map(|s| s.to_string()),
                person_type: tree.attr(node, "personTypeXPath").map(|s| s.to_string()),
            });
        }
        "Group" => {
            for sub in tree.find_children(node, "SubField") {
                let name = require_attr(tree, sub, "internal")?;
                let path = require_attr(tree, sub, "xpath")?;
                rule.group_fields.insert(name, path);
            }
        }
        _ => {}
    }
    Ok(rule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_struct_type_lookup() {
        let mut prefs = Prefs::new();
        prefs.add_struct_type("Periodical", Some("Periodical".to_string()));
        prefs.add_struct_type("Chapter", None);

        assert!(prefs.is_anchor("Periodical"));
        assert!(!prefs.is_anchor("Chapter"));
        assert!(prefs.struct_type("Unknown").is_err());
    }

    #[test]
    fn test_pointer_urls_roundtrip() {
        let mut prefs = Prefs::new();
        prefs.set_pointer_urls(["http://example.org/a?x=1", "http://example.org/b"]);
        assert_eq!(
            prefs.pointer_urls(),
            vec!["http://example.org/a?x=1", "http://example.org/b"]
        );
    }

    #[test]
    fn test_namespace_map_from_prefs() {
        let mut prefs = Prefs::new();
        prefs.add_namespace("dv", "http://dfg-viewer.de/", None);
        let map = prefs.namespace_map().unwrap();
        assert_eq!(map.get_uri("dv"), Some("http://dfg-viewer.de/"));
        assert_eq!(map.get_uri("mets"), Some("http://www.loc.gov/METS/"));
    }

    #[test]
    fn test_from_xml() {
        let xml = r#"<Preferences>
            <Namespace prefix="dv" uri="http://dfg-viewer.de/"/>
            <DocStrctType name="Periodical" anchorClass="Periodical"/>
            <DocStrctType name="PeriodicalVolume"/>
            <MetadataType name="CatalogIDDigital" identifier="true"/>
            <MetadataType name="Author" person="true"/>
            <AnchorIdentifier type="CatalogIDDigital"/>
            <PointerUrl>http://example.org/periodical.xml</PointerUrl>
            <PointerUrl>http://example.org/volume.xml</PointerUrl>
            <FileGroup use="LOCAL" path="file:///images/" mimeType="image/tiff"/>
            <Metadata internal="TitleDocMain"
                      writeXPath="./mods:titleInfo/mods:title"
                      readXPath="./mods:titleInfo/mods:title"/>
            <Person internal="Author"
                    writeXPath="./mods:name/@type='personal'"
                    readXPath="./mods:name"
                    firstnameXPath="./mods:namePart/@type='given'"
                    lastnameXPath="./mods:namePart/@type='family'"/>
            <Group internal="Publishing" writeXPath="./mods:originInfo">
                <SubField internal="PlaceOfPublication"
                          xpath="./mods:place/mods:placeTerm"/>
            </Group>
        </Preferences>"#;

        let prefs = Prefs::from_xml(xml).unwrap();
        assert!(prefs.is_anchor("Periodical"));
        assert!(!prefs.is_anchor("PeriodicalVolume"));
        assert_eq!(prefs.anchor_identifier_type, "CatalogIDDigital");
        assert_eq!(prefs.pointer_urls().len(), 2);
        assert_eq!(prefs.rules.len(), 3);
        assert_eq!(prefs.rules[0].internal_name, "TitleDocMain");
        assert!(prefs.rules[1].person_paths.is_some());
        assert_eq!(prefs.rules[2].group_fields.len(), 1);
        assert_eq!(prefs.file_groups.len(), 1);
        assert!(prefs.metadata_kind("Author").unwrap().is_person);
        assert!(prefs.metadata_kind("CatalogIDDigital").unwrap().is_identifier);
    }

    #[test]
    fn test_from_xml_unknown_element() {
        let err = Prefs::from_xml("<Preferences><Bogus/></Preferences>").unwrap_err();
        assert!(matches!(err, MetsError::Config(_)));
    }
}
