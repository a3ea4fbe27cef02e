//! Metadata value objects
//!
//! Plain value holders carried by document structure nodes: simple metadata
//! values, person values, and repeatable metadata groups. They hold no
//! format knowledge; the mapping engine decides where they live in MODS.

use std::fmt;

/// Synthesized physical page number of a page-level division.
pub const MD_PHYS_PAGE_NUMBER: &str = "physPageNumber";
/// Synthesized logical page label of a page-level division.
pub const MD_LOGICAL_PAGE_NUMBER: &str = "logicalPageNumber";
/// Sentinel label of a page without a counted logical page number.
pub const UNCOUNTED: &str = "uncounted";

/// An authority record reference: all three components must be present for
/// the triple to be serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    /// Authority code, e.g. `gnd`.
    pub authority: String,
    /// Authority URI.
    pub authority_uri: String,
    /// Value URI within the authority.
    pub value_uri: String,
}

impl Authority {
    /// Create a new authority triple.
    pub fn new(
        authority: impl Into<String>,
        authority_uri: impl Into<String>,
        value_uri: impl Into<String>,
    ) -> Self {
        Self {
            authority: authority.into(),
            authority_uri: authority_uri.into(),
            value_uri: value_uri.into(),
        }
    }
}

/// A simple metadata value: type name plus string value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Internal metadata type name, e.g. `TitleDocMain`.
    pub type_name: String,
    /// The value.
    pub value: String,
    /// Optional authority triple.
    pub authority: Option<Authority>,
    /// Marks a value carried over from an anchor parent (the identifier
    /// written into the extension section). Such values are re-derived on
    /// write, never mapped through the correspondence table.
    pub anchor_ident: bool,
}

impl Metadata {
    /// Create a new metadata value.
    pub fn new(type_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            value: value.into(),
            authority: None,
            anchor_ident: false,
        }
    }

    /// Attach an authority triple.
    pub fn with_authority(mut self, authority: Authority) -> Self {
        self.authority = Some(authority);
        self
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.type_name, self.value)
    }
}

/// A person value: a metadata value with name parts and a role.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Person {
    /// Internal metadata type name, e.g. `Author`.
    pub type_name: String,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub affiliation: Option<String>,
    pub display_name: Option<String>,
    /// Role term, e.g. `aut`.
    pub role: Option<String>,
    /// Sub-type discriminator, e.g. `personal`.
    pub person_type: Option<String>,
    /// Optional authority triple.
    pub authority: Option<Authority>,
}

impl Person {
    /// Create a new person value of the given type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    /// The name to display: the explicit display name, else "last, first".
    pub fn display(&self) -> String {
        if let Some(display) = &self.display_name {
            return display.clone();
        }
        match (&self.lastname, &self.firstname) {
            (Some(last), Some(first)) => format!("{}, {}", last, first),
            (Some(last), None) => last.clone(),
            (None, Some(first)) => first.clone(),
            (None, None) => String::new(),
        }
    }
}

/// A repeatable compound field: an ordered list of metadata and person
/// values under one group type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataGroup {
    /// Internal group type name.
    pub type_name: String,
    /// Simple values in declaration order.
    pub metadata: Vec<Metadata>,
    /// Person values in declaration order.
    pub persons: Vec<Person>,
}

impl MetadataGroup {
    /// Create a new empty group of the given type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            metadata: Vec::new(),
            persons: Vec::new(),
        }
    }

    /// Append a simple value.
    pub fn add_metadata(&mut self, md: Metadata) {
        self.metadata.push(md);
    }

    /// Append a person value.
    pub fn add_person(&mut self, person: Person) {
        self.persons.push(person);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_new() {
        let md = Metadata::new("TitleDocMain", "Report 1");
        assert_eq!(md.type_name, "TitleDocMain");
        assert_eq!(md.value, "Report 1");
        assert!(md.authority.is_none());
    }

    #[test]
    fn test_metadata_with_authority() {
        let md = Metadata::new("Classification", "History").with_authority(Authority::new(
            "gnd",
            "http://d-nb.info/gnd/",
            "http://d-nb.info/gnd/4024578-0",
        ));
        let auth = md.authority.unwrap();
        assert_eq!(auth.authority, "gnd");
    }

    #[test]
    fn test_person_display() {
        let mut p = Person::new("Author");
        assert_eq!(p.display(), "");
        p.lastname = Some("Mann".to_string());
        assert_eq!(p.display(), "Mann");
        p.firstname = Some("Thomas".to_string());
        assert_eq!(p.display(), "Mann, Thomas");
        p.display_name = Some("Th. Mann".to_string());
        assert_eq!(p.display(), "Th. Mann");
    }

    #[test]
    fn test_group() {
        let mut group = MetadataGroup::new("Publishing");
        group.add_metadata(Metadata::new("PlaceOfPublication", "Leipzig"));
        group.add_person(Person::new("Publisher"));
        assert_eq!(group.metadata.len(), 1);
        assert_eq!(group.persons.len(), 1);
    }
}
