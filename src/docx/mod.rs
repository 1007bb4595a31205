pub mod model;
pub mod package;
pub mod xml;

pub use model::{
    FormattingDescriptor, PartReference, ReferenceKind, RunPath, Section, WordDocument,
    extract_text,
};
pub use package::{Package, Relationship};
pub use xml::{Element, Node, XmlDocument, XmlError};
