//! # metskit
//!
//! A METS/MODS interchange library for digitized works: a format-agnostic
//! document model (two structure trees, metadata values, content files), a
//! preferences-driven mapping between internal metadata types and MODS,
//! and a reader/writer pair for the METS container, including split anchor
//! files for multi-level works.
//!
//! ## Example
//!
//! ```no_run
//! use metskit::{FieldRule, MetsReader, Prefs};
//!
//! # fn main() -> metskit::MetsResult<()> {
//! let mut prefs = Prefs::new();
//! prefs.add_struct_type("Monograph", None);
//! prefs.add_struct_type("physSequence", None);
//! prefs.add_struct_type("page", None);
//! prefs.add_rule(
//!     FieldRule::new("TitleDocMain")
//!         .write_path("./mods:titleInfo/mods:title")
//!         .read_path("./mods:titleInfo/mods:title"),
//! );
//!
//! let reader = MetsReader::new(&prefs)?;
//! let doc = reader.read_file("meta.xml")?;
//! let root = doc.logical_root.expect("validated on read");
//! println!("{}", doc.get(root).type_name);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod model;
pub mod prefs;

pub use crate::core::{
    ns, sibling_path, split, write_files, AnchorGuard, MappingEngine, MetsError, MetsFile,
    MetsReader, MetsResult, MetsWriter, NamespaceMap, PathExpr, PathTarget, XmlTree,
};
pub use crate::model::{
    Authority, ContentFile, DigitalDocument, DocStruct, DsId, FileId, FileSet, Metadata,
    MetadataGroup, Person, Reference, MD_LOGICAL_PAGE_NUMBER, MD_PHYS_PAGE_NUMBER,
    REF_LOGICAL_PHYSICAL, UNCOUNTED,
};
pub use crate::prefs::{
    FieldRule, FileGroup, MetadataKind, PersonPaths, Prefs, StructType, ANCHOR_FILE_SUFFIX,
    POINTER_URL_SEPARATOR,
};
