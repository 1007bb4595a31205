//! Two-tier paragraph substitution.
//!
//! Tokens wholly inside one `w:t` node are replaced in place, leaving every
//! run and its formatting untouched. A paragraph whose original text holds a
//! token split across runs instead has its text runs collapsed into one run
//! that inherits the first run's formatting.

pub mod driver;
pub mod sweep;

use serde::Serialize;

use crate::{
    docx::{
        Element, Node,
        model::{
            FormattingDescriptor, build_run, is_disposable_run, is_text_bearing, run_paths,
            run_text, strip_text_content, text_nodes_for,
        },
    },
    tokens::{TokenHits, TokenMap},
};

pub use driver::{DriverOutput, Stage, SubstitutionDriver};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubstitutionStats {
    pub paragraphs_visited: usize,
    /// Tokens replaced in place inside a single run.
    pub run_replacements: usize,
    pub reconstructed_paragraphs: usize,
    /// Tokens replaced by the raw-node sweep.
    pub sweep_replacements: usize,
    /// Nodes or parts the sweep could not process.
    pub skipped_nodes: usize,
}

impl SubstitutionStats {
    pub fn merge(&mut self, other: SubstitutionStats) {
        self.paragraphs_visited += other.paragraphs_visited;
        self.run_replacements += other.run_replacements;
        self.reconstructed_paragraphs += other.reconstructed_paragraphs;
        self.sweep_replacements += other.sweep_replacements;
        self.skipped_nodes += other.skipped_nodes;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParagraphOutcome {
    Untouched,
    RunLevel,
    Reconstructed,
}

impl ParagraphOutcome {
    pub fn changed(self) -> bool {
        self != ParagraphOutcome::Untouched
    }
}

/// Replace tokens contained in single `w:t` nodes. Returns the number of
/// tokens replaced; the run count never changes.
pub fn substitute_runs(paragraph: &mut Element, map: &TokenMap, hits: &mut TokenHits) -> usize {
    let before = hits.total();
    for path in run_paths(paragraph) {
        if let Some(run) = paragraph.descendant_at_mut(&path) {
            substitute_run(run, map, hits);
        }
    }
    hits.total() - before
}

fn substitute_run(run: &mut Element, map: &TokenMap, hits: &mut TokenHits) {
    let mut index = 0;
    while index < run.children.len() {
        let Node::Element(text_node) = &mut run.children[index] else {
            index += 1;
            continue;
        };
        if !text_node.is("w:t") {
            index += 1;
            continue;
        }
        let Some(replaced) = map.replace_in(&text_node.text(), hits) else {
            index += 1;
            continue;
        };

        if replaced.contains(['\n', '\t']) {
            let nodes: Vec<Node> = text_nodes_for(&replaced)
                .into_iter()
                .map(Node::Element)
                .collect();
            let inserted = nodes.len();
            run.children.splice(index..=index, nodes);
            index += inserted;
        } else {
            text_node.set_text(replaced);
            text_node.set_attribute("xml:space", "preserve");
            index += 1;
        }
    }
}

/// Collapse the paragraph's text runs into one run when its full text still
/// contains tokens. Returns `false` when nothing matched.
///
/// The new run takes the place of the first text run and carries its
/// whitelisted formatting. Runs that still hold non-text content such as
/// drawings or field characters are kept.
pub fn reconstruct_paragraph(
    paragraph: &mut Element,
    map: &TokenMap,
    hits: &mut TokenHits,
) -> bool {
    let text_runs: Vec<Vec<usize>> = run_paths(paragraph)
        .into_iter()
        .filter(|path| paragraph.descendant_at(path).is_some_and(is_text_bearing))
        .collect();
    let Some(first) = text_runs.first().cloned() else {
        return false;
    };

    let full_text: String = text_runs
        .iter()
        .filter_map(|path| paragraph.descendant_at(path))
        .map(run_text)
        .collect();
    let Some(replaced) = map.replace_in(&full_text, hits) else {
        return false;
    };

    let formatting = paragraph
        .descendant_at(&first)
        .map(FormattingDescriptor::from_run)
        .unwrap_or_default();

    // Later paths first so earlier indices stay valid.
    for path in text_runs.iter().rev() {
        let Some((&index, parent_path)) = path.split_last() else {
            continue;
        };
        let Some(parent) = paragraph.descendant_at_mut(parent_path) else {
            continue;
        };
        let Some(run) = parent.children.get_mut(index).and_then(Node::as_element_mut) else {
            continue;
        };
        strip_text_content(run);
        if is_disposable_run(run) {
            parent.children.remove(index);
        }
    }

    let Some((&index, parent_path)) = first.split_last() else {
        return true;
    };
    if let Some(parent) = paragraph.descendant_at_mut(parent_path) {
        let position = index.min(parent.children.len());
        parent
            .children
            .insert(position, Node::Element(build_run(&formatting, &replaced)));
    }
    true
}

/// True when the paragraph text holds more tokens than its `w:t` nodes do
/// one by one, i.e. some token straddles a node boundary.
fn has_split_token(paragraph: &Element, map: &TokenMap) -> bool {
    let runs: Vec<&Element> = run_paths(paragraph)
        .iter()
        .filter_map(|path| paragraph.descendant_at(path))
        .collect();

    let text: String = runs.iter().copied().map(run_text).collect();
    let whole = map.find_tokens(&text).count();
    let within: usize = runs
        .iter()
        .flat_map(|run| run.child_elements().filter(|child| child.is("w:t")))
        .map(|node| {
            let text = node.text();
            map.find_tokens(&text).count()
        })
        .sum();
    whole > within
}

/// Per-paragraph substitution over one token map, accumulating hits and
/// statistics across every paragraph it is given.
#[derive(Debug)]
pub struct Substituter<'m> {
    map: &'m TokenMap,
    hits: TokenHits,
    stats: SubstitutionStats,
}

impl<'m> Substituter<'m> {
    pub fn new(map: &'m TokenMap) -> Self {
        Self {
            map,
            hits: TokenHits::default(),
            stats: SubstitutionStats::default(),
        }
    }

    pub fn map(&self) -> &'m TokenMap {
        self.map
    }

    /// Run-level pass when every token sits inside one text node,
    /// reconstruction otherwise. Both work from the paragraph's original
    /// text, so inserted values are never scanned again.
    pub fn paragraph(&mut self, paragraph: &mut Element) -> ParagraphOutcome {
        self.stats.paragraphs_visited += 1;

        if has_split_token(paragraph, self.map)
            && reconstruct_paragraph(paragraph, self.map, &mut self.hits)
        {
            self.stats.reconstructed_paragraphs += 1;
            return ParagraphOutcome::Reconstructed;
        }

        let replaced = substitute_runs(paragraph, self.map, &mut self.hits);
        self.stats.run_replacements += replaced;
        if replaced > 0 {
            ParagraphOutcome::RunLevel
        } else {
            ParagraphOutcome::Untouched
        }
    }

    pub fn hits(&self) -> &TokenHits {
        &self.hits
    }

    pub fn hits_mut(&mut self) -> &mut TokenHits {
        &mut self.hits
    }

    pub fn stats(&self) -> SubstitutionStats {
        self.stats
    }

    pub fn stats_mut(&mut self) -> &mut SubstitutionStats {
        &mut self.stats
    }

    pub fn into_parts(self) -> (TokenHits, SubstitutionStats) {
        (self.hits, self.stats)
    }
}

/// Substitute one paragraph with a fresh hit counter.
pub fn substitute_paragraph(paragraph: &mut Element, map: &TokenMap) -> ParagraphOutcome {
    Substituter::new(map).paragraph(paragraph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::{XmlDocument, model::paragraph_text};

    fn paragraph(xml: &str) -> Element {
        XmlDocument::parse(xml)
            .expect("parse")
            .root()
            .expect("root")
            .clone()
    }

    fn map() -> TokenMap {
        TokenMap::from_pairs([
            ("NOME_ALUNO", "Ana Silva"),
            ("NOTA_C1", "160"),
            ("COMENTARIOS", "linha 1\nlinha 2"),
        ])
        .expect("map")
    }

    fn run_count(paragraph: &Element) -> usize {
        run_paths(paragraph).len()
    }

    #[test]
    fn whole_token_in_one_run_keeps_runs_and_formatting() {
        let mut p = paragraph(
            r#"<w:p><w:r><w:rPr><w:b/></w:rPr><w:t>Aluno: </w:t></w:r><w:r><w:rPr><w:i/></w:rPr><w:t>{{NOME_ALUNO}}!</w:t></w:r></w:p>"#,
        );
        let outcome = substitute_paragraph(&mut p, &map());
        assert_eq!(outcome, ParagraphOutcome::RunLevel);
        assert_eq!(run_count(&p), 2);
        assert_eq!(paragraph_text(&p), "Aluno: Ana Silva!");
        let second = p.descendant_at(&[1]).expect("run");
        assert!(second.find_child("w:rPr").and_then(|rpr| rpr.find_child("w:i")).is_some());
    }

    #[test]
    fn token_split_across_two_runs_is_reconstructed() {
        let mut p = paragraph(
            r#"<w:p><w:pPr><w:jc w:val="center"/></w:pPr><w:r><w:rPr><w:b/><w:sz w:val="24"/></w:rPr><w:t xml:space="preserve">Nota {{NO</w:t></w:r><w:r><w:t>TA_C1}} pts</w:t></w:r></w:p>"#,
        );
        let before = paragraph_text(&p);
        let outcome = substitute_paragraph(&mut p, &map());

        assert_eq!(outcome, ParagraphOutcome::Reconstructed);
        assert_eq!(paragraph_text(&p), before.replace("{{NOTA_C1}}", "160"));
        assert_eq!(run_count(&p), 1);
        assert!(p.find_child("w:pPr").is_some());

        let run = p.find_child("w:r").expect("run");
        let formatting = FormattingDescriptor::from_run(run);
        assert!(formatting.bold());
        assert_eq!(formatting.size(), Some(24));
    }

    #[test]
    fn reconstruction_is_idempotent() {
        let mut p = paragraph(r#"<w:p><w:r><w:t>{{NOME_</w:t></w:r><w:r><w:t>ALUNO}}</w:t></w:r></w:p>"#);
        let map = map();
        assert_eq!(substitute_paragraph(&mut p, &map), ParagraphOutcome::Reconstructed);
        let once = paragraph_text(&p);
        assert_eq!(substitute_paragraph(&mut p, &map), ParagraphOutcome::Untouched);
        assert_eq!(paragraph_text(&p), once);
    }

    #[test]
    fn reconstruction_keeps_drawing_runs() {
        let mut p = paragraph(
            r#"<w:p><w:r><w:t>{{NOTA</w:t></w:r><w:r><w:drawing/></w:r><w:r><w:t>_C1}}</w:t><w:drawing/></w:r></w:p>"#,
        );
        assert_eq!(substitute_paragraph(&mut p, &map()), ParagraphOutcome::Reconstructed);
        assert_eq!(paragraph_text(&p), "160");
        assert_eq!(p.descendants_named("w:drawing").len(), 2);
        assert_eq!(run_count(&p), 3);
    }

    #[test]
    fn runs_inside_hyperlinks_participate() {
        let mut p = paragraph(
            r#"<w:p><w:hyperlink r:id="rId9"><w:r><w:t>{{NOME_ALUNO}}</w:t></w:r></w:hyperlink></w:p>"#,
        );
        assert_eq!(substitute_paragraph(&mut p, &map()), ParagraphOutcome::RunLevel);
        assert_eq!(paragraph_text(&p), "Ana Silva");

        let mut split = paragraph(
            r#"<w:p><w:hyperlink r:id="rId9"><w:r><w:t>{{NOME</w:t></w:r><w:r><w:t>_ALUNO}}</w:t></w:r></w:hyperlink></w:p>"#,
        );
        assert_eq!(substitute_paragraph(&mut split, &map()), ParagraphOutcome::Reconstructed);
        assert_eq!(paragraph_text(&split), "Ana Silva");
        assert_eq!(split.descendant_at(&[0, 0]).map(|e| e.name.as_str()), Some("w:r"));
    }

    #[test]
    fn multiline_values_become_breaks() {
        let mut p = paragraph(r#"<w:p><w:r><w:t>{{COMENTARIOS}}</w:t></w:r></w:p>"#);
        substitute_paragraph(&mut p, &map());
        let run = p.find_child("w:r").expect("run");
        let names: Vec<&str> = run.child_elements().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["w:t", "w:br", "w:t"]);
        assert_eq!(paragraph_text(&p), "linha 1\nlinha 2");
    }

    #[test]
    fn unknown_placeholders_are_left_alone() {
        let mut p = paragraph(r#"<w:p><w:r><w:t>{{OUTRO}}</w:t></w:r></w:p>"#);
        assert_eq!(substitute_paragraph(&mut p, &map()), ParagraphOutcome::Untouched);
        assert_eq!(paragraph_text(&p), "{{OUTRO}}");
    }

    #[test]
    fn stats_accumulate_per_tier() {
        let map = map();
        let mut substituter = Substituter::new(&map);
        let mut a = paragraph(r#"<w:p><w:r><w:t>{{NOTA_C1}} {{NOTA_C1}}</w:t></w:r></w:p>"#);
        let mut b = paragraph(r#"<w:p><w:r><w:t>{{NOTA_</w:t></w:r><w:r><w:t>C1}}</w:t></w:r></w:p>"#);
        substituter.paragraph(&mut a);
        substituter.paragraph(&mut b);

        let stats = substituter.stats();
        assert_eq!(stats.paragraphs_visited, 2);
        assert_eq!(stats.run_replacements, 2);
        assert_eq!(stats.reconstructed_paragraphs, 1);
        assert_eq!(substituter.hits().total(), 3);
    }

    #[test]
    fn inserted_values_are_not_scanned_again() {
        let map = TokenMap::from_pairs([("TEMA", "ver {{NOTA_C1}}"), ("NOTA_C1", "160")])
            .expect("map");

        let mut whole = paragraph(
            r#"<w:p><w:r><w:rPr><w:b/></w:rPr><w:t>{{TEMA}}</w:t></w:r><w:r><w:t> fim</w:t></w:r></w:p>"#,
        );
        assert_eq!(substitute_paragraph(&mut whole, &map), ParagraphOutcome::RunLevel);
        assert_eq!(paragraph_text(&whole), "ver {{NOTA_C1}} fim");
        assert_eq!(run_count(&whole), 2);

        let mut split = paragraph(r#"<w:p><w:r><w:t>{{TE</w:t></w:r><w:r><w:t>MA}}</w:t></w:r></w:p>"#);
        let mut substituter = Substituter::new(&map);
        assert_eq!(substituter.paragraph(&mut split), ParagraphOutcome::Reconstructed);
        assert_eq!(paragraph_text(&split), "ver {{NOTA_C1}}");
        assert_eq!(substituter.hits().total(), 1);
    }
}
