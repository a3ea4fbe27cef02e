//! Namespace management for METS/MODS documents
//!
//! METS wraps descriptive MODS metadata and cross-file links from several
//! XML vocabularies. This module holds the built-in namespaces and a
//! per-instance map from prefix to URI (plus optional schema location, used
//! to assemble the `xsi:schemaLocation` attribute on write).

use crate::core::error::{MetsError, MetsResult};
use std::collections::HashMap;

/// Built-in namespaces
pub mod ns {
    /// METS container namespace
    pub const METS: &str = "http://www.loc.gov/METS/";
    /// MODS descriptive metadata namespace
    pub const MODS: &str = "http://www.loc.gov/mods/v3";
    /// XLink namespace (struct-link and pointer href attributes)
    pub const XLINK: &str = "http://www.w3.org/1999/xlink";
    /// XML Schema instance namespace (schemaLocation)
    pub const XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
    /// Private extension namespace for non-native metadata values
    pub const EXT: &str = "http://meta.goobi.org/v1.5.1/";

    /// METS prefix
    pub const METS_PREFIX: &str = "mets";
    /// MODS prefix
    pub const MODS_PREFIX: &str = "mods";
    /// XLink prefix
    pub const XLINK_PREFIX: &str = "xlink";
    /// XSI prefix
    pub const XSI_PREFIX: &str = "xsi";
    /// Extension prefix
    pub const EXT_PREFIX: &str = "goobi";

    /// METS schema location
    pub const METS_SCHEMA: &str = "http://www.loc.gov/standards/mets/mets.xsd";
    /// MODS schema location
    pub const MODS_SCHEMA: &str = "http://www.loc.gov/standards/mods/v3/mods-3-7.xsd";
}

/// A single registered namespace: prefix, URI and optional schema location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub prefix: String,
    pub uri: String,
    pub schema_location: Option<String>,
}

/// Map of namespace prefix to URI
///
/// One map is built per converter instance, seeded with the built-ins and
/// extended from the preferences document. Instances are not shared across
/// concurrent operations.
#[derive(Debug, Clone, Default)]
pub struct NamespaceMap {
    prefix_to_ns: HashMap<String, Namespace>,
    uri_to_prefix: HashMap<String, String>,
    // Declaration order, so xmlns attributes and schemaLocation pairs come
    // out in a stable sequence.
    order: Vec<String>,
}

impl NamespaceMap {
    /// Create a new namespace map with the built-in namespaces registered
    pub fn new() -> Self {
        let mut map = Self::default();
        map.register_builtin_namespaces();
        map
    }

    /// Register a namespace prefix with a URI and optional schema location
    ///
    /// Returns an error if the prefix is already registered to a different URI.
    pub fn register(
        &mut self,
        prefix: &str,
        uri: &str,
        schema_location: Option<&str>,
    ) -> MetsResult<()> {
        if let Some(existing) = self.prefix_to_ns.get(prefix) {
            if existing.uri != uri {
                return Err(MetsError::Config(format!(
                    "Prefix '{}' is already registered to '{}'",
                    prefix, existing.uri
                )));
            }
            // Same URI; a later declaration may add a schema location.
            if schema_location.is_some() {
                let entry = self
                    .prefix_to_ns
                    .get_mut(prefix)
                    .ok_or_else(|| MetsError::Config(format!("Prefix '{}' vanished", prefix)))?;
                entry.schema_location = schema_location.map(|s| s.to_string());
            }
            return Ok(());
        }

        self.prefix_to_ns.insert(
            prefix.to_string(),
            Namespace {
                prefix: prefix.to_string(),
                uri: uri.to_string(),
                schema_location: schema_location.map(|s| s.to_string()),
            },
        );
        self.uri_to_prefix
            .insert(uri.to_string(), prefix.to_string());
        self.order.push(prefix.to_string());
        Ok(())
    }

    /// Get the URI for a namespace prefix
    pub fn get_uri(&self, prefix: &str) -> Option<&str> {
        self.prefix_to_ns.get(prefix).map(|n| n.uri.as_str())
    }

    /// Get the prefix for a namespace URI
    pub fn get_prefix(&self, uri: &str) -> Option<&str> {
        self.uri_to_prefix.get(uri).map(|s| s.as_str())
    }

    /// Check if a namespace prefix is registered
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.prefix_to_ns.contains_key(prefix)
    }

    /// Resolve a prefix or fail with a configuration error
    ///
    /// The path engine treats an undeclared prefix as fatal; this is the
    /// single place that raises that error.
    pub fn require_uri(&self, prefix: &str) -> MetsResult<&str> {
        self.get_uri(prefix).ok_or_else(|| {
            MetsError::Config(format!("Undeclared namespace prefix '{}'", prefix))
        })
    }

    /// All registered namespaces in declaration order
    pub fn all(&self) -> impl Iterator<Item = &Namespace> {
        self.order.iter().filter_map(|p| self.prefix_to_ns.get(p))
    }

    /// Assemble the `xsi:schemaLocation` attribute value from every
    /// namespace that declares a schema location.
    pub fn schema_location(&self) -> String {
        let mut parts = Vec::new();
        for ns in self.all() {
            if let Some(loc) = &ns.schema_location {
                parts.push(format!("{} {}", ns.uri, loc));
            }
        }
        parts.join(" ")
    }

    fn register_builtin_namespaces(&mut self) {
        // Built-in registrations cannot conflict with an empty map.
        let builtins = [
            (ns::METS_PREFIX, ns::METS, Some(ns::METS_SCHEMA)),
            (ns::MODS_PREFIX, ns::MODS, Some(ns::MODS_SCHEMA)),
            (ns::XLINK_PREFIX, ns::XLINK, None),
            (ns::XSI_PREFIX, ns::XSI, None),
            (ns::EXT_PREFIX, ns::EXT, None),
        ];
        for (prefix, uri, schema) in builtins {
            let _ = self.register(prefix, uri, schema);
        }
    }
}
