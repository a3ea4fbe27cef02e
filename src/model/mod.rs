//! Format-agnostic document model
//!
//! The structure tree, metadata value objects and the file-set. Nothing in
//! this module knows about METS or MODS; the `core` modules translate
//! between this model and the interchange XML.

pub mod docstruct;
pub mod files;
pub mod metadata;

pub use docstruct::{DigitalDocument, DocStruct, DsId, Reference, REF_LOGICAL_PHYSICAL};
pub use files::{ContentFile, FileId, FileSet};
pub use metadata::{
    Authority, Metadata, MetadataGroup, Person, MD_LOGICAL_PAGE_NUMBER, MD_PHYS_PAGE_NUMBER,
    UNCOUNTED,
};
