use std::fmt;

/// The `Id` attribute of an element, classified once at parse time.
///
/// Ableton writes small decimal integers, but older or hand-edited sets
/// occasionally carry something else. Only canonical decimal strings become
/// `Numeric`, so `"007"` stays `Opaque` and round-trips verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementId {
    Numeric(u64),
    Opaque(String),
}

impl ElementId {
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<u64>() {
            Ok(n) if n.to_string() == raw => ElementId::Numeric(n),
            _ => ElementId::Opaque(raw.to_string()),
        }
    }

    pub fn as_numeric(&self) -> Option<u64> {
        match self {
            ElementId::Numeric(n) => Some(*n),
            ElementId::Opaque(_) => None,
        }
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementId::Numeric(n) => write!(f, "{n}"),
            ElementId::Opaque(s) => f.write_str(s),
        }
    }
}

impl From<u64> for ElementId {
    fn from(n: u64) -> Self {
        ElementId::Numeric(n)
    }
}

/// A child of an element: either another element or non-whitespace text.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// One XML element of a Live Set.
///
/// The `Id` attribute is held apart from the other attributes so identity
/// logic never re-parses strings; it is always serialized first, which is
/// where Ableton puts it.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    id: Option<ElementId>,
    attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            id: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// `<Tag Value="..."/>`, the format's scalar convention.
    pub fn with_value(tag: impl Into<String>, value: impl Into<String>) -> Self {
        let mut e = Self::new(tag);
        e.set_attr("Value", value);
        e
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(ElementId::Numeric(id));
        self
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.push(child);
        self
    }

    pub fn id(&self) -> Option<&ElementId> {
        self.id.as_ref()
    }

    pub fn set_id(&mut self, id: Option<ElementId>) {
        self.id = id;
    }

    /// Attribute lookup. `Id` is not stored here, see [`id`](Self::id).
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Set an attribute, keeping its position if it already exists.
    /// Setting `Id` goes through [`ElementId::parse`].
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if name == "Id" {
            self.id = Some(ElementId::parse(&value));
            return;
        }
        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let pos = self.attributes.iter().position(|(k, _)| k == name)?;
        Some(self.attributes.remove(pos).1)
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn child(&self, tag: &str) -> Option<&Element> {
        self.elements().find(|e| e.tag == tag)
    }

    pub fn child_mut(&mut self, tag: &str) -> Option<&mut Element> {
        self.elements_mut().find(|e| e.tag == tag)
    }

    /// Follow a chain of child tags, first match at each level.
    pub fn find_path(&self, path: &[&str]) -> Option<&Element> {
        path.iter().try_fold(self, |e, tag| e.child(tag))
    }

    pub fn find_path_mut(&mut self, path: &[&str]) -> Option<&mut Element> {
        let mut current = self;
        for tag in path {
            current = current.child_mut(tag)?;
        }
        Some(current)
    }

    /// Like [`find_path_mut`](Self::find_path_mut) but creates missing links.
    pub fn ensure_path(&mut self, path: &[&str]) -> &mut Element {
        let mut current = self;
        for tag in path {
            if current.child(tag).is_none() {
                current.push(Element::new(*tag));
            }
            current = match current.child_mut(tag) {
                Some(e) => e,
                None => unreachable!("child {tag} was just inserted"),
            };
        }
        current
    }

    /// `Value` attribute of the first child named `tag`.
    pub fn value_of(&self, tag: &str) -> Option<&str> {
        self.child(tag).and_then(|c| c.attr("Value"))
    }

    /// Set `Value` on the first child named `tag`, creating it if absent.
    pub fn set_value(&mut self, tag: &str, value: impl Into<String>) {
        match self.child_mut(tag) {
            Some(c) => c.set_attr("Value", value),
            None => self.push(Element::with_value(tag, value)),
        }
    }

    /// Non-whitespace text content directly under this element.
    pub fn text(&self) -> Option<&str> {
        self.children.iter().find_map(|n| match n {
            Node::Text(t) => Some(t.as_str()),
            Node::Element(_) => None,
        })
    }

    /// Pre-order traversal, starting with `self`.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }

    /// Pre-order mutable traversal, starting with `self`.
    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut Element)) {
        f(self);
        for child in self.elements_mut() {
            child.walk_mut(f);
        }
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        // Reverse so the first child is visited first.
        let children: Vec<&Element> = next.elements().collect();
        self.stack.extend(children.into_iter().rev());
        Some(next)
    }
}
