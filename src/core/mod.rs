//! METS core module
//!
//! This module contains the conversion machinery: XML tree handling, path
//! expressions, the mapping engine, anchor chain handling, and the METS
//! reader and writer.

pub mod anchor;
pub mod error;
pub mod mapping;
pub mod namespace;
pub mod path;
pub mod reader;
pub mod writer;
pub mod xml;

pub use anchor::{sibling_path, split, AnchorGuard, MetsFile, MAX_CHAIN_DEPTH};
pub use error::{MetsError, MetsResult};
pub use mapping::{MappingEngine, Substitution};
pub use namespace::{ns, Namespace, NamespaceMap};
pub use path::{strip_group_tags, PathExpr, PathTarget, Step, FORCE_CREATE_MARKER};
pub use reader::MetsReader;
pub use writer::{write_files, MetsWriter};
pub use xml::{NodeId, XmlTree};
