use serde::Serialize;

use crate::{
    analysis::EssayAnalysis,
    docx::{
        Element, WordDocument,
        model::{for_each_cell, for_each_paragraph, for_each_table, run_paths, run_text},
    },
    error::ReportResult,
    tokens::{TokenMap, build_token_map, find_placeholders},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Body,
    Header,
    Footer,
    /// Floating text box inside any of the other regions.
    TextBox,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaceholderFinding {
    pub placeholder: String,
    /// Spread over more than one run; only the reconstruction tier resolves
    /// it, collapsing the paragraph's formatting.
    pub fragmented: bool,
    pub recognized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParagraphFindings {
    pub region: Region,
    pub part: String,
    pub in_table: bool,
    pub text: String,
    pub runs: Vec<String>,
    pub placeholders: Vec<PlaceholderFinding>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateReport {
    pub paragraphs: Vec<ParagraphFindings>,
}

impl TemplateReport {
    pub fn placeholders(&self) -> impl Iterator<Item = &PlaceholderFinding> {
        self.paragraphs
            .iter()
            .flat_map(|paragraph| paragraph.placeholders.iter())
    }

    pub fn fragmented_count(&self) -> usize {
        self.placeholders().filter(|found| found.fragmented).count()
    }

    pub fn unknown_placeholders(&self) -> Vec<&str> {
        let mut unknown: Vec<&str> = self
            .placeholders()
            .filter(|found| !found.recognized)
            .map(|found| found.placeholder.as_str())
            .collect();
        unknown.sort_unstable();
        unknown.dedup();
        unknown
    }
}

/// Inspect a template against the standard report token set.
pub fn inspect_template(bytes: &[u8]) -> ReportResult<TemplateReport> {
    inspect_template_with(bytes, &build_token_map(&EssayAnalysis::default()))
}

/// Inspect a template against an explicit token map.
pub fn inspect_template_with(bytes: &[u8], map: &TokenMap) -> ReportResult<TemplateReport> {
    let mut document = WordDocument::open(bytes)?;
    let mut report = TemplateReport::default();

    let main_part = document.main_part().to_string();
    let mut scope = Scope {
        region: Region::Body,
        part: &main_part,
        map,
        out: &mut report.paragraphs,
    };
    scope.walk(document.body_mut()?);

    let mut regions: Vec<(String, Region)> = Vec::new();
    for section in document.sections() {
        let headers = section.headers.iter().map(|r| (r.part.clone(), Region::Header));
        let footers = section.footers.iter().map(|r| (r.part.clone(), Region::Footer));
        for entry in headers.chain(footers) {
            if !regions.contains(&entry) {
                regions.push(entry);
            }
        }
    }

    for (part, region) in regions {
        let Some(root) = document.part_root_mut(&part)? else {
            continue;
        };
        let mut scope = Scope {
            region,
            part: &part,
            map,
            out: &mut report.paragraphs,
        };
        scope.walk(root);
    }

    Ok(report)
}

struct Scope<'a> {
    region: Region,
    part: &'a str,
    map: &'a TokenMap,
    out: &'a mut Vec<ParagraphFindings>,
}

impl Scope<'_> {
    /// Block content of `root`, then the paragraphs of every text box in it.
    fn walk(&mut self, root: &mut Element) {
        self.container(root, false);

        let mut boxes = Vec::new();
        text_box_paths(root, &mut Vec::new(), &mut boxes);
        let region = self.region;
        self.region = Region::TextBox;
        for path in boxes {
            if let Some(text_box) = root.descendant_at_mut(&path) {
                self.container(text_box, false);
            }
        }
        self.region = region;
    }

    fn container(&mut self, container: &mut Element, in_table: bool) {
        for_each_paragraph(container, &mut |paragraph| self.paragraph(paragraph, in_table));
        for_each_table(container, &mut |table| {
            for_each_cell(table, &mut |cell| self.container(cell, true));
        });
    }

    fn paragraph(&mut self, paragraph: &Element, in_table: bool) {
        let runs: Vec<String> = run_paths(paragraph)
            .iter()
            .filter_map(|path| paragraph.descendant_at(path))
            .map(run_text)
            .collect();
        let text: String = runs.concat();

        let ranges = find_placeholders(&text);
        if ranges.is_empty() {
            return;
        }

        let mut spans = Vec::with_capacity(runs.len());
        let mut offset = 0;
        for run in &runs {
            spans.push(offset..offset + run.len());
            offset += run.len();
        }

        let placeholders = ranges
            .into_iter()
            .map(|range| {
                let placeholder = text[range.clone()].to_string();
                let fragmented = !spans
                    .iter()
                    .any(|span| span.start <= range.start && range.end <= span.end);
                PlaceholderFinding {
                    recognized: self.map.get(&placeholder).is_some(),
                    placeholder,
                    fragmented,
                }
            })
            .collect();

        self.out.push(ParagraphFindings {
            region: self.region,
            part: self.part.to_string(),
            in_table,
            text,
            runs,
            placeholders,
        });
    }
}

/// Paths of every `w:txbxContent` below `element`. The VML fallback copy of
/// a shape is skipped so each text box is reported once.
fn text_box_paths(element: &Element, path: &mut Vec<usize>, found: &mut Vec<Vec<usize>>) {
    for (index, child) in element.children.iter().enumerate() {
        let Some(child) = child.as_element() else {
            continue;
        };
        if child.is("mc:Fallback") {
            continue;
        }
        path.push(index);
        if child.is("w:txbxContent") {
            found.push(path.clone());
        }
        text_box_paths(child, path, found);
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        build_package, document_xml, header_xml, paragraph, relationships_xml, section,
        simple_package, table, text_box,
    };

    #[test]
    fn reports_fragmented_and_unknown_placeholders() {
        let body = format!(
            "{}{}{}",
            paragraph(&["Aluno: {{NOME_ALUNO}}"]),
            paragraph(&["Nota: {{NOTA_", "FINAL}} {{EXTRA}}"]),
            paragraph(&["sem marcadores"]),
        );
        let report = inspect_template(&simple_package(&body)).expect("inspect");

        assert_eq!(report.paragraphs.len(), 2);
        let first = &report.paragraphs[0].placeholders[0];
        assert_eq!(first.placeholder, "{{NOME_ALUNO}}");
        assert!(!first.fragmented && first.recognized);

        let second = &report.paragraphs[1];
        assert_eq!(second.runs, vec!["Nota: {{NOTA_", "FINAL}} {{EXTRA}}"]);
        assert!(second.placeholders[0].fragmented);
        assert!(!second.placeholders[1].fragmented);
        assert_eq!(report.fragmented_count(), 1);
        assert_eq!(report.unknown_placeholders(), vec!["{{EXTRA}}"]);
    }

    #[test]
    fn locates_table_and_header_placeholders() {
        let body = format!(
            "{}{}",
            table(&[&paragraph(&["{{ANALISE_C2}}"])]),
            section("rId7", "rId8"),
        );
        let template = build_package(&[
            ("word/document.xml", document_xml(&body)),
            (
                "word/_rels/document.xml.rels",
                relationships_xml(&[("rId7", "header", "header1.xml")]),
            ),
            ("word/header1.xml", header_xml(&paragraph(&["{{NOTA_FINAL}}"]))),
        ]);
        let report = inspect_template(&template).expect("inspect");

        assert_eq!(report.paragraphs.len(), 2);
        assert_eq!(report.paragraphs[0].region, Region::Body);
        assert!(report.paragraphs[0].in_table);
        assert_eq!(report.paragraphs[1].region, Region::Header);
        assert_eq!(report.paragraphs[1].part, "word/header1.xml");
    }

    #[test]
    fn reports_split_placeholders_in_text_boxes() {
        let body = format!(
            "{}{}",
            paragraph(&["Aluno: {{NOME_ALUNO}}"]),
            text_box(&paragraph(&["Tema: {{TE", "MA}}"])),
        );
        let report = inspect_template(&simple_package(&body)).expect("inspect");

        let boxed: Vec<&ParagraphFindings> = report
            .paragraphs
            .iter()
            .filter(|paragraph| paragraph.region == Region::TextBox)
            .collect();
        assert_eq!(boxed.len(), 1);
        assert_eq!(boxed[0].part, "word/document.xml");
        assert_eq!(boxed[0].text, "Tema: {{TEMA}}");
        assert!(boxed[0].placeholders[0].fragmented);
        assert_eq!(report.fragmented_count(), 1);
    }
}
