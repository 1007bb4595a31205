use std::ops::Range;

use tracing::warn;

use crate::{
    docx::{
        Element,
        model::{is_block_container, is_run_or_container},
    },
    tokens::{TokenHits, TokenMap},
};

const TEXT_LEAVES: &[&str] = &["w:t", "a:t"];
const PARAGRAPHS: &[&str] = &["w:p", "a:p"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub replacements: usize,
    pub skipped: usize,
}

impl SweepOutcome {
    pub fn modified(&self) -> bool {
        self.replacements > 0
    }
}

/// Where an element sits relative to the container walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Blocks,
    Paragraph,
    Run,
    /// Text node of a run the container walk already substituted.
    Walked,
    Free,
}

impl Scope {
    fn child(self, child: &Element) -> Scope {
        match self {
            Scope::Blocks if child.is("w:p") => Scope::Paragraph,
            Scope::Blocks if is_block_container(child) => Scope::Blocks,
            Scope::Paragraph | Scope::Run if is_run_or_container(child) => Scope::Run,
            Scope::Run if child.is("w:t") => Scope::Walked,
            _ => Scope::Free,
        }
    }
}

struct Leaf {
    path: Vec<usize>,
    paragraph: Option<Vec<usize>>,
}

/// Replace tokens in the text leaves below `root`.
///
/// Leaves sharing a paragraph are scanned as one string so tokens split
/// across them are found. A token's value lands in the leaf where the token
/// starts and the covered text is cut from the following leaves; text outside
/// any token stays in its own leaf. When `walked` is set the container walk
/// already processed `root`, and the text of its block paragraphs' runs is
/// left alone. A leaf that unexpectedly holds child elements is logged and
/// skipped.
pub fn sweep_element(
    root: &mut Element,
    part: &str,
    map: &TokenMap,
    hits: &mut TokenHits,
    walked: bool,
) -> SweepOutcome {
    let before = hits.total();
    let mut outcome = SweepOutcome::default();

    let scope = if walked { Scope::Blocks } else { Scope::Free };
    let mut leaves = Vec::new();
    collect_leaves(root, scope, &mut Vec::new(), None, &mut leaves);

    let mut usable = Vec::with_capacity(leaves.len());
    for leaf in leaves {
        let Some(element) = root.descendant_at(&leaf.path) else {
            continue;
        };
        if element.child_elements().next().is_some() {
            warn!(part = %part, node = %element.name, path = ?leaf.path, "skipping text node with element children");
            outcome.skipped += 1;
            continue;
        }
        usable.push(leaf);
    }

    for group in usable.chunk_by(|a, b| a.paragraph.is_some() && a.paragraph == b.paragraph) {
        sweep_group(root, group, map, hits);
    }

    outcome.replacements = hits.total() - before;
    outcome
}

fn sweep_group(root: &mut Element, group: &[Leaf], map: &TokenMap, hits: &mut TokenHits) {
    let texts: Vec<String> = group
        .iter()
        .map(|leaf| root.descendant_at(&leaf.path).map(Element::text).unwrap_or_default())
        .collect();
    let joined = texts.concat();

    let mut bounds = Vec::with_capacity(texts.len());
    let mut offset = 0;
    for text in &texts {
        bounds.push(offset..offset + text.len());
        offset += text.len();
    }

    let mut rebuilt = vec![String::new(); texts.len()];
    let mut cursor = 0;
    let mut replaced = false;
    for (start, token) in map.find_tokens(&joined) {
        let Some((canonical, value)) = map.resolve(token) else {
            continue;
        };
        let Some(owner) = bounds.iter().position(|bound| bound.contains(&start)) else {
            continue;
        };
        copy_span(&joined, cursor..start, &bounds, &mut rebuilt);
        rebuilt[owner].push_str(value);
        hits.record(canonical);
        cursor = start + token.len();
        replaced = true;
    }
    if !replaced {
        return;
    }
    copy_span(&joined, cursor..joined.len(), &bounds, &mut rebuilt);

    for ((leaf, text), original) in group.iter().zip(rebuilt).zip(&texts) {
        if text == *original {
            continue;
        }
        if let Some(element) = root.descendant_at_mut(&leaf.path) {
            set_leaf_text(element, text);
        }
    }
}

/// Hand each leaf its share of `joined[span]`.
fn copy_span(joined: &str, span: Range<usize>, bounds: &[Range<usize>], rebuilt: &mut [String]) {
    for (bound, out) in bounds.iter().zip(rebuilt.iter_mut()) {
        let start = span.start.max(bound.start);
        let end = span.end.min(bound.end);
        if start < end {
            out.push_str(&joined[start..end]);
        }
    }
}

fn set_leaf_text(element: &mut Element, text: String) {
    if element.is("w:t") {
        element.set_attribute("xml:space", "preserve");
    }
    element.set_text(text);
}

fn collect_leaves(
    element: &Element,
    scope: Scope,
    path: &mut Vec<usize>,
    paragraph: Option<&[usize]>,
    leaves: &mut Vec<Leaf>,
) {
    if TEXT_LEAVES.contains(&element.name.as_str()) {
        if scope != Scope::Walked {
            leaves.push(Leaf {
                path: path.clone(),
                paragraph: paragraph.map(<[usize]>::to_vec),
            });
        }
        return;
    }

    let own = PARAGRAPHS
        .contains(&element.name.as_str())
        .then(|| path.clone());
    let paragraph = own.as_deref().or(paragraph);

    for (index, child) in element.children.iter().enumerate() {
        let Some(child) = child.as_element() else {
            continue;
        };
        path.push(index);
        collect_leaves(child, scope.child(child), path, paragraph, leaves);
        path.pop();
    }
}
