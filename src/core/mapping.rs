//! Field mapping between internal metadata and MODS
//!
//! The mapping engine evaluates the field-correspondence table from the
//! preferences. On write it realizes one path per value into a MODS
//! fragment; on read it selects matches and turns them back into model
//! values. Correspondences are compiled once per engine: a rule with an
//! unparsable path, condition regex or substitution pattern fails
//! construction.
//!
//! Values no correspondence claims are reported once per node through a
//! single aggregated warning. The anchor identifier is the one exception:
//! when the node's parent is an anchor level, the parent's identifier is
//! written into the extension section as a flagged element instead.

use crate::core::error::{MetsError, MetsResult};
use crate::core::namespace::NamespaceMap;
use crate::core::path::{PathExpr, PathTarget};
use crate::core::xml::{NodeId, XmlTree};
use crate::model::{Authority, DigitalDocument, DsId, Metadata, MetadataGroup, Person};
use crate::prefs::{FieldRule, Prefs};
use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

/// A compiled `s/search/replacement/` pattern.
#[derive(Debug, Clone)]
pub struct Substitution {
    search: Regex,
    replacement: String,
}

impl Substitution {
    /// Parse and compile a substitution pattern.
    pub fn parse(pattern: &str) -> MetsResult<Self> {
        let body = pattern
            .strip_prefix("s/")
            .and_then(|p| p.strip_suffix('/'))
            .ok_or_else(|| {
                MetsError::Config(format!(
                    "Substitution pattern must have the form s/search/replacement/: '{}'",
                    pattern
                ))
            })?;

        // Split at the first '/' not escaped as '\/'.
        let mut split = None;
        let mut prev_backslash = false;
        for (i, ch) in body.char_indices() {
            if ch == '/' && !prev_backslash {
                split = Some(i);
                break;
            }
            prev_backslash = ch == '\\' && !prev_backslash;
        }
        let split = split.ok_or_else(|| {
            MetsError::Config(format!(
                "Substitution pattern must have the form s/search/replacement/: '{}'",
                pattern
            ))
        })?;

        let search = body[..split].replace("\\/", "/");
        let replacement = body[split + 1..].replace("\\/", "/");
        let search = Regex::new(&search)
            .map_err(|e| MetsError::Config(format!("Invalid substitution regex: {}", e)))?;
        Ok(Self {
            search,
            replacement,
        })
    }

    /// Apply the substitution to a value.
    pub fn apply(&self, value: &str) -> String {
        self.search
            .replace_all(value, self.replacement.as_str())
            .into_owned()
    }
}

enum RuleKind {
    Plain,
    Person,
    Group,
}

/// Person sub-paths compiled to expressions.
#[derive(Default)]
struct PersonExprs {
    firstname: Option<PathExpr>,
    lastname: Option<PathExpr>,
    affiliation: Option<PathExpr>,
    display_name: Option<PathExpr>,
    person_type: Option<PathExpr>,
}

struct CompiledRule<'a> {
    rule: &'a FieldRule,
    kind: RuleKind,
    write: Option<PathExpr>,
    read: Option<PathExpr>,
    condition: Option<Regex>,
    substitution: Option<Substitution>,
    person: PersonExprs,
    group_fields: Vec<(String, PathExpr)>,
}

/// The compiled correspondence table.
pub struct MappingEngine<'a> {
    prefs: &'a Prefs,
    rules: Vec<CompiledRule<'a>>,
    anchor_pattern: Option<Substitution>,
    extension_base: PathExpr,
}

impl<'a> MappingEngine<'a> {
    /// Compile the correspondence table of a preferences document.
    pub fn new(prefs: &'a Prefs) -> MetsResult<Self> {
        let mut rules = Vec::with_capacity(prefs.rules.len());
        for rule in &prefs.rules {
            rules.push(compile_rule(prefs, rule)?);
        }
        let anchor_pattern = prefs
            .anchor_identifier_pattern
            .as_deref()
            .map(Substitution::parse)
            .transpose()?;
        Ok(Self {
            prefs,
            rules,
            anchor_pattern,
            extension_base: PathExpr::parse("mods:extension/goobi:goobi")?,
        })
    }

    /// Map every value of a node into the MODS fragment rooted at
    /// `mods_root`. Values no rule claims are reported in one warning.
    pub fn write_node(
        &self,
        doc: &DigitalDocument,
        node: DsId,
        tree: &mut XmlTree,
        mods_root: NodeId,
        namespaces: &NamespaceMap,
    ) -> MetsResult<()> {
        let ds = doc.get(node);
        let mut md_claimed = vec![false; ds.metadata.len()];
        let mut person_claimed = vec![false; ds.persons.len()];
        let mut group_claimed = vec![false; ds.groups.len()];

        for compiled in &self.rules {
            match compiled.kind {
                RuleKind::Plain => {
                    let mut instance = 0usize;
                    for (i, md) in ds.metadata.iter().enumerate() {
                        if md.type_name != compiled.rule.internal_name || md.anchor_ident {
                            continue;
                        }
                        md_claimed[i] = true;
                        let Some(value) = compiled.prepare_value(&md.value) else {
                            continue;
                        };
                        let Some(write) = &compiled.write else {
                            continue;
                        };
                        let target =
                            write_value(tree, mods_root, write, &value, instance, namespaces)?;
                        instance += 1;
                        if let Some(auth) = &md.authority {
                            write_authority(tree, target.node(), auth);
                        }
                    }
                }
                RuleKind::Person => {
                    let mut instance = 0usize;
                    for (i, person) in ds.persons.iter().enumerate() {
                        if person.type_name != compiled.rule.internal_name {
                            continue;
                        }
                        person_claimed[i] = true;
                        let Some(write) = &compiled.write else {
                            continue;
                        };
                        let base =
                            realize_instance(tree, mods_root, write, instance, namespaces)?;
                        instance += 1;
                        compiled.write_person(tree, base, person, namespaces)?;
                    }
                }
                RuleKind::Group => {
                    let mut instance = 0usize;
                    for (i, group) in ds.groups.iter().enumerate() {
                        if group.type_name != compiled.rule.internal_name {
                            continue;
                        }
                        group_claimed[i] = true;
                        let Some(write) = &compiled.write else {
                            continue;
                        };
                        let base =
                            realize_instance(tree, mods_root, write, instance, namespaces)?;
                        instance += 1;
                        compiled.write_group(tree, base, group, namespaces)?;
                    }
                }
            }
        }

        self.write_anchor_identifier(doc, node, tree, mods_root, namespaces)?;

        let mut unclaimed: Vec<&str> = Vec::new();
        for (i, md) in ds.metadata.iter().enumerate() {
            // Synthesized page numbers are carried as structure-map
            // attributes, not through the correspondence table.
            let structural = md.type_name == crate::model::MD_PHYS_PAGE_NUMBER
                || md.type_name == crate::model::MD_LOGICAL_PAGE_NUMBER;
            if !md_claimed[i] && !md.anchor_ident && !structural {
                unclaimed.push(&md.type_name);
            }
        }
        for (i, person) in ds.persons.iter().enumerate() {
            if !person_claimed[i] {
                unclaimed.push(&person.type_name);
            }
        }
        for (i, group) in ds.groups.iter().enumerate() {
            if !group_claimed[i] {
                unclaimed.push(&group.type_name);
            }
        }
        if !unclaimed.is_empty() {
            unclaimed.sort_unstable();
            unclaimed.dedup();
            warn!(
                node_type = %ds.type_name,
                types = %unclaimed.join(", "),
                "metadata without a field correspondence was not written"
            );
        }
        Ok(())
    }

    /// Read every correspondence out of a MODS fragment onto a node.
    pub fn read_node(
        &self,
        tree: &XmlTree,
        mods_root: NodeId,
        namespaces: &NamespaceMap,
        doc: &mut DigitalDocument,
        node: DsId,
    ) -> MetsResult<()> {
        for compiled in &self.rules {
            let Some(read) = &compiled.read else {
                continue;
            };
            let targets = read.select(tree, mods_root, namespaces)?;
            match compiled.kind {
                RuleKind::Plain => {
                    for target in targets {
                        let value = read.read_target(tree, target);
                        if value.is_empty() {
                            continue;
                        }
                        let mut md = Metadata::new(&compiled.rule.internal_name, value);
                        md.authority = read_authority(tree, target.node());
                        doc.add_metadata(node, md);
                    }
                }
                RuleKind::Person => {
                    for target in targets {
                        let person =
                            compiled.read_person(tree, target.node(), namespaces)?;
                        doc.add_person(node, person);
                    }
                }
                RuleKind::Group => {
                    for target in targets {
                        let group = compiled.read_group(tree, target.node(), namespaces)?;
                        doc.add_group(node, group);
                    }
                }
            }
        }
        self.read_extension(tree, mods_root, doc, node);
        Ok(())
    }

    /// Write the parent anchor's identifier as a flagged extension element.
    /// Only applies when the direct parent is an anchor level; the
    /// identifier missing there is fatal, the chain could never be resolved
    /// back.
    fn write_anchor_identifier(
        &self,
        doc: &DigitalDocument,
        node: DsId,
        tree: &mut XmlTree,
        mods_root: NodeId,
        namespaces: &NamespaceMap,
    ) -> MetsResult<()> {
        let Some(parent) = doc.get(node).parent else {
            return Ok(());
        };
        let parent_type = &doc.get(parent).type_name;
        if !self.prefs.is_anchor(parent_type) {
            return Ok(());
        }
        let id_type = &self.prefs.anchor_identifier_type;
        if id_type.is_empty() {
            return Err(MetsError::Config(
                "Anchor levels are in use but no anchor identifier type is configured"
                    .to_string(),
            ));
        }
        let md = doc.first_metadata(parent, id_type).ok_or_else(|| {
            MetsError::AnchorError(format!(
                "Anchor node '{}' carries no '{}' identifier",
                parent_type, id_type
            ))
        })?;
        let value = match &self.anchor_pattern {
            Some(sub) => sub.apply(&md.value),
            None => md.value.clone(),
        };

        let holder = self
            .extension_base
            .realize(tree, mods_root, namespaces)?
            .node();
        let element = tree.create_element("goobi:metadata");
        tree.set_attr(element, "name", id_type.clone());
        tree.set_attr(element, "anchorId", "true");
        tree.set_text(element, value);
        tree.append(holder, element);
        Ok(())
    }

    /// Read generic extension metadata: elements carrying an internal type
    /// name directly, including the flagged anchor identifier.
    fn read_extension(
        &self,
        tree: &XmlTree,
        mods_root: NodeId,
        doc: &mut DigitalDocument,
        node: DsId,
    ) {
        let Some(extension) = tree.find_child(mods_root, "mods:extension") else {
            return;
        };
        let Some(holder) = tree.find_child(extension, "goobi:goobi") else {
            return;
        };
        for element in tree.find_children(holder, "goobi:metadata") {
            let Some(name) = tree.attr(element, "name").map(|s| s.to_string()) else {
                warn!("extension metadata element without a 'name' attribute was skipped");
                continue;
            };
            match tree.attr(element, "type") {
                Some("person") => {
                    let person = read_extension_person(tree, element, &name);
                    doc.add_person(node, person);
                }
                Some("group") => {
                    let mut group = MetadataGroup::new(&name);
                    for sub in tree.find_children(element, "goobi:metadata") {
                        let Some(sub_name) = tree.attr(sub, "name").map(|s| s.to_string())
                        else {
                            continue;
                        };
                        if tree.attr(sub, "type") == Some("person") {
                            group.add_person(read_extension_person(tree, sub, &sub_name));
                        } else {
                            group.add_metadata(Metadata::new(sub_name, tree.text(sub)));
                        }
                    }
                    doc.add_group(node, group);
                }
                _ => {
                    let mut md = Metadata::new(name, tree.text(element));
                    md.anchor_ident = tree.attr(element, "anchorId") == Some("true");
                    md.authority = read_authority(tree, element);
                    doc.add_metadata(node, md);
                }
            }
        }
    }
}

impl<'a> CompiledRule<'a> {
    /// Apply condition and substitution; `None` skips the value silently.
    fn prepare_value(&self, value: &str) -> Option<String> {
        if let Some(condition) = &self.condition {
            if !condition.is_match(value) {
                return None;
            }
        }
        Some(match &self.substitution {
            Some(sub) => sub.apply(value),
            None => value.to_string(),
        })
    }

    fn write_person(
        &self,
        tree: &mut XmlTree,
        base: NodeId,
        person: &Person,
        namespaces: &NamespaceMap,
    ) -> MetsResult<()> {
        let parts = [
            (&self.person.firstname, &person.firstname),
            (&self.person.lastname, &person.lastname),
            (&self.person.affiliation, &person.affiliation),
            (&self.person.display_name, &person.display_name),
            (&self.person.person_type, &person.person_type),
        ];
        for (expr, value) in parts {
            if let (Some(expr), Some(value)) = (expr, value) {
                let target = expr.realize(tree, base, namespaces)?;
                expr.write_target(tree, target, value);
            }
        }
        if let Some(auth) = &person.authority {
            write_authority(tree, base, auth);
        }
        Ok(())
    }

    fn read_person(
        &self,
        tree: &XmlTree,
        base: NodeId,
        namespaces: &NamespaceMap,
    ) -> MetsResult<Person> {
        let mut person = Person::new(&self.rule.internal_name);
        let parts: [(&Option<PathExpr>, fn(&mut Person, String)); 5] = [
            (&self.person.firstname, |p, v| p.firstname = Some(v)),
            (&self.person.lastname, |p, v| p.lastname = Some(v)),
            (&self.person.affiliation, |p, v| p.affiliation = Some(v)),
            (&self.person.display_name, |p, v| p.display_name = Some(v)),
            (&self.person.person_type, |p, v| p.person_type = Some(v)),
        ];
        for (expr, assign) in parts {
            if let Some(expr) = expr {
                if let Some(target) = expr.select(tree, base, namespaces)?.first() {
                    let value = expr.read_target(tree, *target);
                    if !value.is_empty() {
                        assign(&mut person, value);
                    }
                }
            }
        }
        person.authority = read_authority(tree, base);
        Ok(person)
    }

    fn write_group(
        &self,
        tree: &mut XmlTree,
        base: NodeId,
        group: &MetadataGroup,
        namespaces: &NamespaceMap,
    ) -> MetsResult<()> {
        let mut missing: Vec<&str> = Vec::new();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for md in &group.metadata {
            match self.group_expr(&md.type_name) {
                Some(expr) => {
                    let instance = counts.entry(&md.type_name).or_insert(0);
                    let target =
                        write_value(tree, base, expr, &md.value, *instance, namespaces)?;
                    *instance += 1;
                    if let Some(auth) = &md.authority {
                        write_authority(tree, target.node(), auth);
                    }
                }
                None => missing.push(&md.type_name),
            }
        }
        for person in &group.persons {
            match self.group_expr(&person.type_name) {
                Some(expr) => {
                    let instance = counts.entry(&person.type_name).or_insert(0);
                    write_value(tree, base, expr, &person.display(), *instance, namespaces)?;
                    *instance += 1;
                }
                None => missing.push(&person.type_name),
            }
        }
        if !missing.is_empty() {
            missing.sort_unstable();
            missing.dedup();
            warn!(
                group = %group.type_name,
                fields = %missing.join(", "),
                "group sub-fields without a declared sub-path were not written"
            );
        }
        Ok(())
    }

    fn read_group(
        &self,
        tree: &XmlTree,
        base: NodeId,
        namespaces: &NamespaceMap,
    ) -> MetsResult<MetadataGroup> {
        let mut group = MetadataGroup::new(&self.rule.internal_name);
        for (name, expr) in &self.group_fields {
            for target in expr.select(tree, base, namespaces)? {
                let value = expr.read_target(tree, target);
                if value.is_empty() {
                    continue;
                }
                group.add_metadata(Metadata::new(name.clone(), value));
            }
        }
        Ok(group)
    }

    fn group_expr(&self, name: &str) -> Option<&PathExpr> {
        self.group_fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
    }
}

fn compile_rule<'a>(prefs: &Prefs, rule: &'a FieldRule) -> MetsResult<CompiledRule<'a>> {
    let is_person = rule.person_paths.is_some()
        || prefs
            .metadata_kind(&rule.internal_name)
            .is_some_and(|k| k.is_person);
    let kind = if is_person {
        RuleKind::Person
    } else if !rule.group_fields.is_empty() {
        RuleKind::Group
    } else {
        RuleKind::Plain
    };

    let parse_opt = |path: &Option<String>| -> MetsResult<Option<PathExpr>> {
        path.as_deref().map(PathExpr::parse).transpose()
    };

    let person = match &rule.person_paths {
        Some(paths) => PersonExprs {
            firstname: parse_opt(&paths.firstname)?,
            lastname: parse_opt(&paths.lastname)?,
            affiliation: parse_opt(&paths.affiliation)?,
            display_name: parse_opt(&paths.display_name)?,
            person_type: parse_opt(&paths.person_type)?,
        },
        None => PersonExprs::default(),
    };

    let mut group_fields = Vec::with_capacity(rule.group_fields.len());
    for (name, path) in &rule.group_fields {
        group_fields.push((name.clone(), PathExpr::parse(path)?));
    }

    let condition = rule
        .condition
        .as_deref()
        .map(|c| {
            Regex::new(c).map_err(|e| {
                MetsError::Config(format!(
                    "Invalid condition regex for '{}': {}",
                    rule.internal_name, e
                ))
            })
        })
        .transpose()?;

    Ok(CompiledRule {
        rule,
        kind,
        write: parse_opt(&rule.write_path)?,
        read: parse_opt(&rule.read_path)?,
        condition,
        substitution: rule
            .value_pattern
            .as_deref()
            .map(Substitution::parse)
            .transpose()?,
        person,
        group_fields,
    })
}

/// Realize a path and write the n-th value of one rule at its target.
/// Every value after the first is force-created, so repeated values get
/// their own element even when their text is equal.
fn write_value(
    tree: &mut XmlTree,
    ctx: NodeId,
    expr: &PathExpr,
    value: &str,
    instance: usize,
    namespaces: &NamespaceMap,
) -> MetsResult<PathTarget> {
    let target = if instance == 0 {
        expr.realize(tree, ctx, namespaces)?
    } else {
        let mut forced = expr.clone();
        forced.forced = true;
        forced.realize(tree, ctx, namespaces)?
    };
    expr.write_target(tree, target, value);
    Ok(target)
}

/// Realize the base path of the n-th person or group instance of a rule.
/// Every instance after the first is force-created so repeated values get
/// their own element.
fn realize_instance(
    tree: &mut XmlTree,
    ctx: NodeId,
    expr: &PathExpr,
    instance: usize,
    namespaces: &NamespaceMap,
) -> MetsResult<NodeId> {
    let target = if instance == 0 {
        expr.realize(tree, ctx, namespaces)?
    } else {
        let mut forced = expr.clone();
        forced.forced = true;
        forced.realize(tree, ctx, namespaces)?
    };
    Ok(target.node())
}

fn write_authority(tree: &mut XmlTree, node: NodeId, auth: &Authority) {
    tree.set_attr(node, "authority", auth.authority.clone());
    tree.set_attr(node, "authorityURI", auth.authority_uri.clone());
    tree.set_attr(node, "valueURI", auth.value_uri.clone());
}

fn read_authority(tree: &XmlTree, node: NodeId) -> Option<Authority> {
    match (
        tree.attr(node, "authority"),
        tree.attr(node, "authorityURI"),
        tree.attr(node, "valueURI"),
    ) {
        (Some(a), Some(au), Some(vu)) => Some(Authority::new(a, au, vu)),
        _ => None,
    }
}

fn read_extension_person(tree: &XmlTree, element: NodeId, type_name: &str) -> Person {
    let mut person = Person::new(type_name);
    let child_text = |name: &str| -> Option<String> {
        tree.find_child(element, name).map(|c| tree.text(c)).filter(|t| !t.is_empty())
    };
    person.firstname = child_text("goobi:firstName");
    person.lastname = child_text("goobi:lastName");
    person.affiliation = child_text("goobi:affiliation");
    person.display_name = child_text("goobi:displayName");
    person.person_type = child_text("goobi:type");
    person.authority = read_authority(tree, element);
    person
}
