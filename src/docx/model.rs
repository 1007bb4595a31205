//! WordprocessingML view of a package: sections with their header and footer
//! parts, block containers, paragraphs and runs.

use tracing::warn;

use super::{
    package::{Package, resolve_target},
    xml::{Element, Node},
};
use crate::error::{ReportError, ReportResult};

/// Wrappers that may hold block content (paragraphs, tables, rows, cells).
const BLOCK_WRAPPERS: &[&str] = &["w:sdt", "w:sdtContent", "w:customXml"];

/// Inline wrappers that may hold runs inside a paragraph.
const RUN_CONTAINERS: &[&str] = &[
    "w:hyperlink",
    "w:ins",
    "w:smartTag",
    "w:fldSimple",
    "w:sdt",
    "w:sdtContent",
    "w:customXml",
    "w:dir",
    "w:bdo",
];

/// Run properties carried over to a reconstructed run.
const FORMATTING_WHITELIST: &[&str] = &[
    "w:rStyle",
    "w:rFonts",
    "w:b",
    "w:bCs",
    "w:i",
    "w:iCs",
    "w:u",
    "w:color",
    "w:sz",
    "w:szCs",
    "w:highlight",
    "w:strike",
    "w:caps",
];

/// Run children that may be dropped when a run is emptied of text.
const DISPOSABLE_RUN_CHILDREN: &[&str] = &["w:rPr", "w:lastRenderedPageBreak"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Default,
    First,
    Even,
}

impl ReferenceKind {
    fn from_attribute(value: Option<&str>) -> Self {
        match value {
            Some("first") => ReferenceKind::First,
            Some("even") => ReferenceKind::Even,
            _ => ReferenceKind::Default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartReference {
    pub kind: ReferenceKind,
    pub rel_id: String,
    pub part: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub headers: Vec<PartReference>,
    pub footers: Vec<PartReference>,
}

/// An opened word-processing document. Owns its package exclusively until
/// saved.
#[derive(Debug)]
pub struct WordDocument {
    package: Package,
    main_part: String,
    sections: Vec<Section>,
}

impl WordDocument {
    pub fn open(bytes: &[u8]) -> ReportResult<Self> {
        let mut package = Package::from_bytes(bytes)?;
        let main_part = package.main_document_part()?;

        let raw_sections = {
            let document = package
                .xml_mut(&main_part)
                .map_err(|err| ReportError::corrupt(&main_part, err))?
                .ok_or_else(|| ReportError::TemplateCorrupt(format!("{main_part} is missing")))?;
            let body = document
                .root()
                .and_then(|root| root.find_child("w:body"))
                .ok_or_else(|| {
                    ReportError::TemplateCorrupt(format!("{main_part} has no w:body element"))
                })?;
            collect_section_references(body)
        };

        let relationships = package.relationships(&main_part)?;
        let resolve = |(kind, rel_id): (ReferenceKind, String)| {
            let Some(rel) = relationships.iter().find(|rel| rel.id == rel_id) else {
                warn!(rel_id = %rel_id, "section references an unknown relationship");
                return None;
            };
            let part = resolve_target(&main_part, &rel.target);
            Some(PartReference { kind, rel_id, part })
        };

        let sections = raw_sections
            .into_iter()
            .map(|(headers, footers)| Section {
                headers: headers.into_iter().filter_map(resolve).collect(),
                footers: footers.into_iter().filter_map(resolve).collect(),
            })
            .collect();

        Ok(Self {
            package,
            main_part,
            sections,
        })
    }

    pub fn main_part(&self) -> &str {
        &self.main_part
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Header and footer part names in section order. A part shared by
    /// several sections is listed once per reference.
    pub fn header_footer_parts(&self) -> Vec<String> {
        self.sections
            .iter()
            .flat_map(|section| section.headers.iter().chain(&section.footers))
            .map(|reference| reference.part.clone())
            .collect()
    }

    pub fn body_mut(&mut self) -> ReportResult<&mut Element> {
        let main_part = self.main_part.clone();
        self.part_root_mut(&main_part)?
            .and_then(|root| root.find_child_mut("w:body"))
            .ok_or_else(|| ReportError::TemplateCorrupt(format!("{main_part} has no w:body element")))
    }

    /// Root element of any XML part. `Ok(None)` when the part is absent.
    pub fn part_root_mut(&mut self, name: &str) -> ReportResult<Option<&mut Element>> {
        Ok(self
            .package
            .xml_mut(name)
            .map_err(|err| ReportError::corrupt(name, err))?
            .and_then(|document| document.root_mut()))
    }

    pub fn package(&self) -> &Package {
        &self.package
    }

    pub fn package_mut(&mut self) -> &mut Package {
        &mut self.package
    }

    pub fn save(&self) -> ReportResult<Vec<u8>> {
        self.package.to_bytes()
    }
}

type RawReference = (ReferenceKind, String);

fn collect_section_references(body: &Element) -> Vec<(Vec<RawReference>, Vec<RawReference>)> {
    body.descendants_named("w:sectPr")
        .into_iter()
        .map(|section| {
            let pick = |name: &str| -> Vec<RawReference> {
                section
                    .child_elements()
                    .filter(|child| child.is(name))
                    .filter_map(|child| {
                        let rel_id = child.attribute("r:id")?.to_string();
                        Some((ReferenceKind::from_attribute(child.attribute("w:type")), rel_id))
                    })
                    .collect()
            };
            (pick("w:headerReference"), pick("w:footerReference"))
        })
        .collect()
}

/// Visit every element named `target` directly inside `container`, looking
/// through content-control and custom-XML wrappers.
fn visit_blocks(container: &mut Element, target: &str, visit: &mut dyn FnMut(&mut Element)) {
    for child in container.child_elements_mut() {
        if child.is(target) {
            visit(child);
        } else if BLOCK_WRAPPERS.contains(&child.name.as_str()) {
            visit_blocks(child, target, visit);
        }
    }
}

/// Elements the container walk descends through to reach paragraphs.
pub(crate) fn is_block_container(element: &Element) -> bool {
    matches!(element.name.as_str(), "w:body" | "w:tbl" | "w:tr" | "w:tc")
        || BLOCK_WRAPPERS.contains(&element.name.as_str())
}

/// Runs and the inline wrappers `run_paths` descends through.
pub(crate) fn is_run_or_container(element: &Element) -> bool {
    element.is("w:r") || RUN_CONTAINERS.contains(&element.name.as_str())
}

/// Paragraphs of a block container (body, cell, header, footer). Paragraphs
/// inside tables are not visited.
pub fn for_each_paragraph(container: &mut Element, visit: &mut dyn FnMut(&mut Element)) {
    visit_blocks(container, "w:p", visit);
}

/// Tables directly inside a block container.
pub fn for_each_table(container: &mut Element, visit: &mut dyn FnMut(&mut Element)) {
    visit_blocks(container, "w:tbl", visit);
}

/// Cells of a table, row by row.
pub fn for_each_cell(table: &mut Element, visit: &mut dyn FnMut(&mut Element)) {
    visit_blocks(table, "w:tr", &mut |row| visit_blocks(row, "w:tc", &mut *visit));
}

/// Child-index path from a paragraph to one of its runs.
pub type RunPath = Vec<usize>;

/// Paths of every run in a paragraph in document order, including runs inside
/// hyperlinks, revisions and inline content controls.
pub fn run_paths(paragraph: &Element) -> Vec<RunPath> {
    let mut paths = Vec::new();
    let mut prefix = Vec::new();
    collect_run_paths(paragraph, &mut prefix, &mut paths);
    paths
}

fn collect_run_paths(element: &Element, prefix: &mut Vec<usize>, paths: &mut Vec<RunPath>) {
    for (index, child) in element.children.iter().enumerate() {
        let Node::Element(child) = child else {
            continue;
        };
        prefix.push(index);
        if child.is("w:r") {
            paths.push(prefix.clone());
        } else if RUN_CONTAINERS.contains(&child.name.as_str()) {
            collect_run_paths(child, prefix, paths);
        }
        prefix.pop();
    }
}

fn is_text_break(element: &Element) -> bool {
    element.is("w:br")
        && matches!(element.attribute("w:type"), None | Some("textWrapping"))
}

fn is_text_content(element: &Element) -> bool {
    element.is("w:t") || element.is("w:tab") || element.is("w:cr") || is_text_break(element)
}

/// Visible text of a run: text nodes, tabs and line breaks.
pub fn run_text(run: &Element) -> String {
    let mut text = String::new();
    for child in run.child_elements() {
        match child.name.as_str() {
            "w:t" => text.push_str(&child.text()),
            "w:tab" => text.push('\t'),
            "w:cr" => text.push('\n'),
            "w:br" if is_text_break(child) => text.push('\n'),
            _ => {}
        }
    }
    text
}

pub fn is_text_bearing(run: &Element) -> bool {
    run.child_elements().any(is_text_content)
}

/// Remove text, tab and line-break children, keeping properties, drawings,
/// field characters and other content.
pub fn strip_text_content(run: &mut Element) {
    run.children.retain(|node| match node {
        Node::Element(element) => !is_text_content(element),
        Node::Text(text) => !text.trim().is_empty(),
        Node::Other(_) => true,
    });
}

/// True when nothing but run properties remain.
pub fn is_disposable_run(run: &Element) -> bool {
    run.children.iter().all(|node| match node {
        Node::Element(element) => DISPOSABLE_RUN_CHILDREN.contains(&element.name.as_str()),
        Node::Text(text) => text.trim().is_empty(),
        Node::Other(_) => true,
    })
}

/// Full visible text of a paragraph, the concatenation of its run texts.
pub fn paragraph_text(paragraph: &Element) -> String {
    run_paths(paragraph)
        .iter()
        .filter_map(|path| paragraph.descendant_at(path))
        .map(run_text)
        .collect()
}

/// Whitelisted copy of a run's properties.
#[derive(Debug, Clone, Default)]
pub struct FormattingDescriptor {
    properties: Vec<Element>,
}

impl FormattingDescriptor {
    pub fn from_run(run: &Element) -> Self {
        let properties = run
            .find_child("w:rPr")
            .map(|rpr| {
                rpr.child_elements()
                    .filter(|child| FORMATTING_WHITELIST.contains(&child.name.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Self { properties }
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    fn property(&self, name: &str) -> Option<&Element> {
        self.properties.iter().find(|element| element.is(name))
    }

    fn toggle(&self, name: &str) -> bool {
        self.property(name)
            .is_some_and(|element| !matches!(element.attribute("w:val"), Some("0" | "false" | "off")))
    }

    pub fn bold(&self) -> bool {
        self.toggle("w:b")
    }

    pub fn italic(&self) -> bool {
        self.toggle("w:i")
    }

    pub fn underline(&self) -> Option<&str> {
        self.property("w:u")
            .and_then(|element| element.attribute("w:val"))
            .filter(|value| *value != "none")
    }

    pub fn font_family(&self) -> Option<&str> {
        self.property("w:rFonts")
            .and_then(|element| element.attribute("w:ascii").or(element.attribute("w:hAnsi")))
    }

    /// Font size in half-points, as stored in `w:sz`.
    pub fn size(&self) -> Option<u32> {
        self.property("w:sz")
            .and_then(|element| element.attribute("w:val"))
            .and_then(|value| value.parse().ok())
    }

    pub fn color(&self) -> Option<&str> {
        self.property("w:color")
            .and_then(|element| element.attribute("w:val"))
    }

    /// `w:rPr` element for a new run, or `None` when nothing was copied.
    pub fn to_run_properties(&self) -> Option<Element> {
        if self.properties.is_empty() {
            return None;
        }
        let mut rpr = Element::new("w:rPr");
        rpr.children = self.properties.iter().cloned().map(Node::Element).collect();
        Some(rpr)
    }
}

/// Run content for `text`: `\n` becomes `w:br`, `\t` becomes `w:tab`, and
/// the rest is split into whitespace-preserving `w:t` nodes.
pub fn text_nodes_for(text: &str) -> Vec<Element> {
    let mut nodes = Vec::new();
    let mut pending = String::new();
    let flush = |pending: &mut String, nodes: &mut Vec<Element>| {
        if !pending.is_empty() {
            nodes.push(
                Element::new("w:t")
                    .with_attribute("xml:space", "preserve")
                    .with_text(std::mem::take(pending)),
            );
        }
    };

    for ch in text.chars() {
        match ch {
            '\n' => {
                flush(&mut pending, &mut nodes);
                nodes.push(Element::new("w:br"));
            }
            '\t' => {
                flush(&mut pending, &mut nodes);
                nodes.push(Element::new("w:tab"));
            }
            '\r' => {}
            other => pending.push(other),
        }
    }
    flush(&mut pending, &mut nodes);

    if nodes.is_empty() {
        nodes.push(Element::new("w:t").with_attribute("xml:space", "preserve"));
    }
    nodes
}

/// A new run carrying `formatting` and `text`.
pub fn build_run(formatting: &FormattingDescriptor, text: &str) -> Element {
    let mut run = Element::new("w:r");
    if let Some(rpr) = formatting.to_run_properties() {
        run.children.push(Node::Element(rpr));
    }
    run.children
        .extend(text_nodes_for(text).into_iter().map(Node::Element));
    run
}

/// Paragraph texts of the main document body in document order, including
/// paragraphs in tables and text boxes, followed by header and footer parts.
pub fn extract_text(bytes: &[u8]) -> ReportResult<Vec<String>> {
    let mut document = WordDocument::open(bytes)?;
    let mut paragraphs: Vec<String> = document
        .body_mut()?
        .descendants_named("w:p")
        .into_iter()
        .map(paragraph_text)
        .collect();

    let mut seen: Vec<String> = Vec::new();
    for part in document.header_footer_parts() {
        if seen.contains(&part) {
            continue;
        }
        seen.push(part.clone());
        if let Some(root) = document.part_root_mut(&part)? {
            paragraphs.extend(root.descendants_named("w:p").into_iter().map(paragraph_text));
        }
    }
    Ok(paragraphs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::xml::XmlDocument;

    fn element(xml: &str) -> Element {
        XmlDocument::parse(xml)
            .expect("parse")
            .root()
            .expect("root")
            .clone()
    }

    #[test]
    fn run_paths_descend_into_hyperlinks() {
        let paragraph = element(
            r#"<w:p><w:pPr/><w:r><w:t>a</w:t></w:r><w:hyperlink r:id="rId3"><w:r><w:t>b</w:t></w:r></w:hyperlink><w:del><w:r><w:delText>x</w:delText></w:r></w:del></w:p>"#,
        );
        assert_eq!(run_paths(&paragraph), vec![vec![1], vec![2, 0]]);
        assert_eq!(paragraph_text(&paragraph), "ab");
    }

    #[test]
    fn run_text_maps_tabs_and_breaks() {
        let run = element(
            r#"<w:r><w:t>a</w:t><w:tab/><w:t>b</w:t><w:br/><w:t>c</w:t><w:br w:type="page"/></w:r>"#,
        );
        assert_eq!(run_text(&run), "a\tb\nc");
    }

    #[test]
    fn formatting_keeps_whitelisted_properties_only() {
        let run = element(
            r#"<w:r><w:rPr><w:rFonts w:ascii="Arial"/><w:b/><w:i w:val="0"/><w:sz w:val="28"/><w:color w:val="FF0000"/><w:vertAlign w:val="superscript"/></w:rPr><w:t>x</w:t></w:r>"#,
        );
        let formatting = FormattingDescriptor::from_run(&run);
        assert!(formatting.bold());
        assert!(!formatting.italic());
        assert_eq!(formatting.font_family(), Some("Arial"));
        assert_eq!(formatting.size(), Some(28));
        assert_eq!(formatting.color(), Some("FF0000"));

        let rpr = formatting.to_run_properties().expect("rPr");
        assert!(rpr.find_child("w:vertAlign").is_none());
        assert_eq!(rpr.child_elements().count(), 5);
    }

    #[test]
    fn text_nodes_split_on_breaks_and_tabs() {
        let nodes = text_nodes_for("a\tb\r\nc");
        let names: Vec<&str> = nodes.iter().map(|node| node.name.as_str()).collect();
        assert_eq!(names, vec!["w:t", "w:tab", "w:t", "w:br", "w:t"]);
        assert_eq!(nodes[4].text(), "c");
        assert_eq!(nodes[0].attribute("xml:space"), Some("preserve"));
    }

    #[test]
    fn stripping_text_leaves_drawings() {
        let mut run = element(r#"<w:r><w:rPr><w:b/></w:rPr><w:t>a</w:t><w:drawing/></w:r>"#);
        strip_text_content(&mut run);
        assert!(!is_text_bearing(&run));
        assert!(!is_disposable_run(&run));

        let mut plain = element(r#"<w:r><w:rPr><w:b/></w:rPr><w:t>a</w:t></w:r>"#);
        strip_text_content(&mut plain);
        assert!(is_disposable_run(&plain));
    }

    #[test]
    fn block_walkers_skip_tables_and_see_through_content_controls() {
        let mut body = element(
            r#"<w:body><w:p/><w:sdt><w:sdtContent><w:p/></w:sdtContent></w:sdt><w:tbl><w:tr><w:tc><w:p/><w:tbl/></w:tc></w:tr></w:tbl></w:body>"#,
        );
        let mut paragraphs = 0;
        for_each_paragraph(&mut body, &mut |_| paragraphs += 1);
        assert_eq!(paragraphs, 2);

        let mut tables = 0;
        let mut cells = 0;
        for_each_table(&mut body, &mut |table| {
            tables += 1;
            for_each_cell(table, &mut |_| cells += 1);
        });
        assert_eq!((tables, cells), (1, 1));
    }
}
