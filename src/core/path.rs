//! Constrained path expressions
//!
//! The mapping engine and the writer both materialize MODS fragments from
//! configured path expressions. The grammar is a small, create-oriented
//! subset of XPath:
//!
//! - steps are separated by `/` (a `/` inside brackets or single quotes is
//!   not a separator); a leading `./` is allowed and ignored;
//! - an element step is a namespace-prefixed name, optionally carrying an
//!   inline literal value: `mods:title='Report 1'`;
//! - an attribute step is `@name` or `@name='literal'`;
//! - a bracketed numeric suffix tags a repeated-sibling group:
//!   `mods:name[2]/mods:namePart` and `mods:name[2]/mods:role` land in the
//!   same second `mods:name`. The tag stays in the element name until
//!   [`strip_group_tags`] rewrites it back to the plain name;
//! - a bracketed sub-expression is a predicate path that must match on
//!   reuse and is created alongside the element on creation:
//!   `mods:name[mods:role/mods:roleTerm='aut']`;
//! - a leading `#` forces fresh creation, bypassing existing-content
//!   matching.
//!
//! [`realize`] scans left to right, matching the growing prefix against
//! existing content; from the first mismatch every remaining step is
//! created fresh. [`select`] evaluates the same expression read-only and
//! returns every match.
//!
//! [`realize`]: PathExpr::realize
//! [`select`]: PathExpr::select

use crate::core::error::{MetsError, MetsResult};
use crate::core::namespace::NamespaceMap;
use crate::core::xml::{NodeId, XmlTree};

/// The reserved marker that forces fresh creation.
pub const FORCE_CREATE_MARKER: char = '#';

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    /// Bypass existing-content matching and create every step fresh.
    pub forced: bool,
    /// The step sequence, left to right.
    pub steps: Vec<Step>,
}

/// One step of a path expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// An element step.
    Element(ElementStep),
    /// An attribute step.
    Attribute(AttributeStep),
}

/// An element step: prefixed name plus optional decorations.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementStep {
    /// Prefixed element name, e.g. `mods:title`.
    pub name: String,
    /// Inline literal value (`='text'`).
    pub value: Option<String>,
    /// Numeric sibling-group tag (`[2]`).
    pub group: Option<u32>,
    /// Bracketed predicate sub-expressions.
    pub predicates: Vec<PathExpr>,
}

impl ElementStep {
    /// The tag the produced element carries: the plain name, or the
    /// group-tagged form `name[n]` until the strip pass runs.
    fn tag(&self) -> String {
        match self.group {
            Some(n) => format!("{}[{}]", self.name, n),
            None => self.name.clone(),
        }
    }
}

/// An attribute step: `@name` or `@name='literal'`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeStep {
    pub name: String,
    pub value: Option<String>,
}

/// Where a realized or selected path ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathTarget {
    /// A leaf element.
    Element(NodeId),
    /// An attribute of an element; the attribute name lives in the
    /// originating expression's last step.
    Attribute(NodeId),
}

impl PathTarget {
    /// The element the target lives on.
    pub fn node(&self) -> NodeId {
        match self {
            PathTarget::Element(id) | PathTarget::Attribute(id) => *id,
        }
    }
}

impl PathExpr {
    /// Parse a path expression.
    pub fn parse(input: &str) -> MetsResult<Self> {
        let mut rest = input.trim();
        if rest.is_empty() {
            return Err(MetsError::BadPath("Empty path".to_string()));
        }

        let forced = rest.starts_with(FORCE_CREATE_MARKER);
        if forced {
            rest = &rest[FORCE_CREATE_MARKER.len_utf8()..];
        }
        rest = rest.strip_prefix("./").unwrap_or(rest);

        let raw_steps = split_steps(rest)?;
        if raw_steps.is_empty() {
            return Err(MetsError::BadPath(format!("Empty path: '{}'", input)));
        }

        let mut steps = Vec::with_capacity(raw_steps.len());
        let mut seen_attribute = false;
        for raw in raw_steps {
            let step = parse_step(&raw)?;
            if seen_attribute && matches!(step, Step::Element(_)) {
                return Err(MetsError::BadPath(format!(
                    "Element step after attribute step in '{}'",
                    input
                )));
            }
            if matches!(step, Step::Attribute(_)) {
                seen_attribute = true;
            }
            steps.push(step);
        }

        Ok(Self { forced, steps })
    }

    /// Realize this path below `ctx`, reusing the longest matching prefix
    /// and creating the missing suffix. Returns the leaf target.
    pub fn realize(
        &self,
        tree: &mut XmlTree,
        ctx: NodeId,
        namespaces: &NamespaceMap,
    ) -> MetsResult<PathTarget> {
        self.validate_prefixes(namespaces)?;

        let mut cur = ctx;
        let mut i = 0;

        if !self.forced {
            while i < self.steps.len() {
                match &self.steps[i] {
                    Step::Element(es) => {
                        let trailing = trailing_attribute_steps(&self.steps[i + 1..]);
                        match self.match_child(tree, cur, es, &trailing) {
                            Some(hit) => {
                                cur = hit;
                                i += 1;
                            }
                            None => break,
                        }
                    }
                    Step::Attribute(attr) => {
                        if attr_matches(tree, cur, attr) {
                            i += 1;
                        } else {
                            break;
                        }
                    }
                }
            }
        }

        while i < self.steps.len() {
            match &self.steps[i] {
                Step::Element(es) => {
                    let id = tree.create_element(es.tag());
                    tree.append(cur, id);
                    if let Some(value) = &es.value {
                        tree.set_text(id, value.clone());
                    }
                    for predicate in &es.predicates {
                        predicate.realize(tree, id, namespaces)?;
                    }
                    cur = id;
                }
                Step::Attribute(attr) => {
                    tree.set_attr(cur, attr.name.clone(), attr.value.clone().unwrap_or_default());
                }
            }
            i += 1;
        }

        match self.steps.last() {
            Some(Step::Attribute(_)) => Ok(PathTarget::Attribute(cur)),
            _ => Ok(PathTarget::Element(cur)),
        }
    }

    /// Evaluate this path read-only below `ctx`; every match becomes one
    /// target. The forced-create marker has no meaning here.
    pub fn select(
        &self,
        tree: &XmlTree,
        ctx: NodeId,
        namespaces: &NamespaceMap,
    ) -> MetsResult<Vec<PathTarget>> {
        self.validate_prefixes(namespaces)?;

        let mut current = vec![ctx];
        let mut last_was_attr = false;
        for step in &self.steps {
            match step {
                Step::Element(es) => {
                    let mut next = Vec::new();
                    for node in &current {
                        for child in tree.element_children(*node) {
                            if self.element_matches(tree, child, es, &[]) {
                                next.push(child);
                            }
                        }
                    }
                    current = next;
                    last_was_attr = false;
                }
                Step::Attribute(attr) => {
                    current.retain(|node| attr_matches(tree, *node, attr));
                    last_was_attr = true;
                }
            }
            if current.is_empty() {
                return Ok(Vec::new());
            }
        }

        Ok(current
            .into_iter()
            .map(|id| {
                if last_was_attr {
                    PathTarget::Attribute(id)
                } else {
                    PathTarget::Element(id)
                }
            })
            .collect())
    }

    /// Read the string value at a target produced by this expression.
    pub fn read_target(&self, tree: &XmlTree, target: PathTarget) -> String {
        match target {
            PathTarget::Element(id) => tree.text(id),
            PathTarget::Attribute(id) => self
                .last_attribute_name()
                .and_then(|name| tree.attr(id, name))
                .unwrap_or_default()
                .to_string(),
        }
    }

    /// Write a string value at a target produced by this expression.
    pub fn write_target(&self, tree: &mut XmlTree, target: PathTarget, value: &str) {
        match target {
            PathTarget::Element(id) => tree.set_text(id, value),
            PathTarget::Attribute(id) => {
                if let Some(name) = self.last_attribute_name() {
                    let name = name.to_string();
                    tree.set_attr(id, name, value);
                }
            }
        }
    }

    fn last_attribute_name(&self) -> Option<&str> {
        match self.steps.last() {
            Some(Step::Attribute(attr)) => Some(attr.name.as_str()),
            _ => None,
        }
    }

    /// Check whether the whole expression matches below `ctx` without
    /// creating anything. Used for predicate evaluation.
    fn matches(&self, tree: &XmlTree, ctx: NodeId) -> bool {
        let mut current = vec![ctx];
        for step in &self.steps {
            match step {
                Step::Element(es) => {
                    let mut next = Vec::new();
                    for node in &current {
                        for child in tree.element_children(*node) {
                            if self.element_matches(tree, child, es, &[]) {
                                next.push(child);
                            }
                        }
                    }
                    current = next;
                }
                Step::Attribute(attr) => {
                    current.retain(|node| attr_matches(tree, *node, attr));
                }
            }
            if current.is_empty() {
                return false;
            }
        }
        true
    }

    fn match_child(
        &self,
        tree: &XmlTree,
        parent: NodeId,
        step: &ElementStep,
        trailing: &[&AttributeStep],
    ) -> Option<NodeId> {
        tree.element_children(parent)
            .into_iter()
            .find(|child| self.element_matches(tree, *child, step, trailing))
    }

    fn element_matches(
        &self,
        tree: &XmlTree,
        candidate: NodeId,
        step: &ElementStep,
        trailing: &[&AttributeStep],
    ) -> bool {
        if tree.name(candidate) != Some(step.tag().as_str()) {
            return false;
        }
        if let Some(value) = &step.value {
            if tree.text(candidate) != *value {
                return false;
            }
        }
        if !step.predicates.iter().all(|p| p.matches(tree, candidate)) {
            return false;
        }
        // An element is only reusable if the attribute steps that follow it
        // already hold on it; otherwise realizing them would clobber a
        // sibling meant for a different value.
        trailing.iter().all(|attr| attr_matches(tree, candidate, attr))
    }

    fn validate_prefixes(&self, namespaces: &NamespaceMap) -> MetsResult<()> {
        for step in &self.steps {
            match step {
                Step::Element(es) => {
                    if let Some((prefix, _)) = es.name.split_once(':') {
                        namespaces.require_uri(prefix)?;
                    }
                    for predicate in &es.predicates {
                        predicate.validate_prefixes(namespaces)?;
                    }
                }
                Step::Attribute(attr) => {
                    if let Some((prefix, _)) = attr.name.split_once(':') {
                        namespaces.require_uri(prefix)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn trailing_attribute_steps(steps: &[Step]) -> Vec<&AttributeStep> {
    steps
        .iter()
        .map_while(|s| match s {
            Step::Attribute(attr) => Some(attr),
            Step::Element(_) => None,
        })
        .collect()
}

fn attr_matches(tree: &XmlTree, node: NodeId, step: &AttributeStep) -> bool {
    match (tree.attr(node, &step.name), &step.value) {
        (Some(actual), Some(expected)) => actual == expected,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Split a path into raw steps, treating `/` inside brackets or single
/// quotes as ordinary characters.
fn split_steps(path: &str) -> MetsResult<Vec<String>> {
    let mut steps = Vec::new();
    let mut current = String::new();
    let mut bracket_depth = 0usize;
    let mut in_quotes = false;

    for ch in path.chars() {
        match ch {
            '\'' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '[' if !in_quotes => {
                bracket_depth += 1;
                current.push(ch);
            }
            ']' if !in_quotes => {
                if bracket_depth == 0 {
                    return Err(MetsError::BadPath(format!("Unbalanced ']' in '{}'", path)));
                }
                bracket_depth -= 1;
                current.push(ch);
            }
            '/' if !in_quotes && bracket_depth == 0 => {
                if !current.is_empty() {
                    steps.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if in_quotes {
        return Err(MetsError::BadPath(format!("Unclosed quote in '{}'", path)));
    }
    if bracket_depth != 0 {
        return Err(MetsError::BadPath(format!("Unclosed bracket in '{}'", path)));
    }
    if !current.is_empty() {
        steps.push(current);
    }
    Ok(steps)
}

fn parse_step(raw: &str) -> MetsResult<Step> {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix('@') {
        let (name, value) = split_literal(rest)?;
        if name.is_empty() {
            return Err(MetsError::BadPath(format!("Empty attribute step '{}'", raw)));
        }
        return Ok(Step::Attribute(AttributeStep {
            name: name.to_string(),
            value,
        }));
    }

    // Element step: name, then any number of bracket groups, then an
    // optional inline literal.
    let name_end = raw
        .find(|c| c == '[' || c == '=')
        .unwrap_or(raw.len());
    let name = &raw[..name_end];
    if name.is_empty() {
        return Err(MetsError::BadPath(format!("Empty element step '{}'", raw)));
    }

    let mut group = None;
    let mut predicates = Vec::new();
    let mut rest = &raw[name_end..];
    while rest.starts_with('[') {
        let close = find_matching_bracket(rest)?;
        let content = &rest[1..close];
        if content.chars().all(|c| c.is_ascii_digit()) && !content.is_empty() {
            let n = content
                .parse::<u32>()
                .map_err(|_| MetsError::BadPath(format!("Invalid group index '{}'", content)))?;
            group = Some(n);
        } else {
            predicates.push(PathExpr::parse(content)?);
        }
        rest = &rest[close + 1..];
    }

    let (leftover, value) = split_literal(rest)?;
    if !leftover.is_empty() {
        return Err(MetsError::BadPath(format!(
            "Unexpected trailing content '{}' in step '{}'",
            leftover, raw
        )));
    }

    Ok(Step::Element(ElementStep {
        name: name.to_string(),
        value,
        group,
        predicates,
    }))
}

/// Split `name='literal'` into the name and the unquoted literal.
fn split_literal(s: &str) -> MetsResult<(&str, Option<String>)> {
    let Some(eq) = s.find('=') else {
        return Ok((s, None));
    };
    let name = &s[..eq];
    let literal = s[eq + 1..].trim();
    let inner = literal
        .strip_prefix('\'')
        .and_then(|l| l.strip_suffix('\''))
        .ok_or_else(|| {
            MetsError::BadPath(format!("Literal must be single-quoted: '{}'", literal))
        })?;
    Ok((name, Some(inner.to_string())))
}

/// Position of the `]` matching the `[` at position 0, quote-aware.
fn find_matching_bracket(s: &str) -> MetsResult<usize> {
    let mut depth = 0usize;
    let mut in_quotes = false;
    for (i, ch) in s.char_indices() {
        match ch {
            '\'' => in_quotes = !in_quotes,
            '[' if !in_quotes => depth += 1,
            ']' if !in_quotes => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(MetsError::BadPath(format!("Unclosed bracket in '{}'", s)))
}

/// Recursive post-pass rewriting group-tagged element names (`mods:name[2]`)
/// back to their plain tag names. Runs once per produced fragment, after
/// every path of the current operation has been realized.
pub fn strip_group_tags(tree: &mut XmlTree, from: NodeId) {
    let plain = tree.name(from).and_then(|name| {
        let open = name.rfind('[')?;
        let tagged = name.ends_with(']')
            && name[open + 1..name.len() - 1]
                .chars()
                .all(|c| c.is_ascii_digit());
        tagged.then(|| name[..open].to_string())
    });
    if let Some(plain) = plain {
        tree.set_name(from, plain);
    }
    for child in tree.children(from).to_vec() {
        strip_group_tags(tree, child);
    }
}
