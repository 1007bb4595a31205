use std::fmt;

use quick_xml::{
    Reader as XmlReader, Writer as XmlWriter,
    events::{BytesEnd, BytesStart, BytesText, Event},
};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct XmlError(String);

impl XmlError {
    pub(crate) fn new(message: impl fmt::Display) -> Self {
        Self(message.to_string())
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Element(Element),
    Text(String),
    /// Declarations, comments, CDATA, processing instructions.
    Other(Event<'static>),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(element) => Some(element),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(name, _)| *name == key) {
            Some(existing) => existing.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(Node::as_element_mut)
    }

    pub fn find_child(&self, name: &str) -> Option<&Element> {
        self.child_elements().find(|child| child.is(name))
    }

    pub fn find_child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.child_elements_mut().find(|child| child.is(name))
    }

    /// Concatenation of the direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Replace all children with a single text node.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children.clear();
        self.children.push(Node::Text(text.into()));
    }

    /// Descendant addressed by child indices from this element; the empty path
    /// is the element itself.
    pub fn descendant_at(&self, path: &[usize]) -> Option<&Element> {
        path.iter().try_fold(self, |element, &index| {
            element.children.get(index).and_then(Node::as_element)
        })
    }

    pub fn descendant_at_mut(&mut self, path: &[usize]) -> Option<&mut Element> {
        let mut element = self;
        for &index in path {
            element = element.children.get_mut(index)?.as_element_mut()?;
        }
        Some(element)
    }

    /// Depth-first, pre-order visit of this element and its descendants.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Element)) {
        visit(self);
        for child in self.child_elements() {
            child.walk(visit);
        }
    }

    /// Every descendant (including self) with the given name.
    pub fn descendants_named<'a>(&'a self, name: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        self.walk(&mut |element| {
            if element.is(name) {
                found.push(element);
            }
        });
        found
    }
}

#[derive(Debug, Clone, Default)]
pub struct XmlDocument {
    pub nodes: Vec<Node>,
}

impl XmlDocument {
    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        let mut reader = XmlReader::from_str(xml);
        let mut buf = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut nodes: Vec<Node> = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => stack.push(element_from_start(e)?),
                Ok(Event::Empty(ref e)) => {
                    let element = element_from_start(e)?;
                    attach(&mut stack, &mut nodes, Node::Element(element));
                }
                Ok(Event::End(_)) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| XmlError::new("closing tag without an open element"))?;
                    attach(&mut stack, &mut nodes, Node::Element(element));
                }
                Ok(Event::Text(e)) => {
                    let text = e.unescape().map_err(XmlError::new)?.into_owned();
                    attach(&mut stack, &mut nodes, Node::Text(text));
                }
                Ok(Event::Eof) => break,
                Ok(other) => attach(&mut stack, &mut nodes, Node::Other(other.into_owned())),
                Err(err) => {
                    return Err(XmlError::new(format!(
                        "parse error at byte {}: {}",
                        reader.buffer_position(),
                        err
                    )));
                }
            }
            buf.clear();
        }

        if let Some(open) = stack.last() {
            return Err(XmlError::new(format!("unclosed element <{}>", open.name)));
        }

        Ok(Self { nodes })
    }

    pub fn root(&self) -> Option<&Element> {
        self.nodes.iter().find_map(Node::as_element)
    }

    pub fn root_mut(&mut self) -> Option<&mut Element> {
        self.nodes.iter_mut().find_map(Node::as_element_mut)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, XmlError> {
        let mut writer = XmlWriter::new(Vec::new());
        for node in &self.nodes {
            write_node(&mut writer, node)?;
        }
        Ok(writer.into_inner())
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element, XmlError> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attribute in start.attributes() {
        let attribute = attribute.map_err(XmlError::new)?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(XmlError::new)?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [Element], nodes: &mut Vec<Node>, node: Node) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => nodes.push(node),
    }
}

fn write_node(writer: &mut XmlWriter<Vec<u8>>, node: &Node) -> Result<(), XmlError> {
    match node {
        Node::Element(element) => {
            let mut start = BytesStart::new(element.name.as_str());
            for (key, value) in &element.attributes {
                start.push_attribute((key.as_str(), value.as_str()));
            }
            if element.children.is_empty() {
                return writer
                    .write_event(Event::Empty(start))
                    .map_err(XmlError::new);
            }
            writer
                .write_event(Event::Start(start))
                .map_err(XmlError::new)?;
            for child in &element.children {
                write_node(writer, child)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(element.name.as_str())))
                .map_err(XmlError::new)
        }
        Node::Text(text) => writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(XmlError::new),
        Node::Other(event) => writer.write_event(event.clone()).map_err(XmlError::new),
    }
}
