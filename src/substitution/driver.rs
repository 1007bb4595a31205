//! Traversal driver: walks every container of one document, then sweeps the
//! raw text nodes of every part and serializes the result.

use std::collections::BTreeSet;

use tracing::{debug, error, warn};

use super::{Substituter, SubstitutionStats, sweep::sweep_element};
use crate::{
    docx::{
        Element, WordDocument,
        model::{for_each_cell, for_each_paragraph, for_each_table},
    },
    error::{PartialSubstitutionWarning, ReportError, ReportResult},
    tokens::{TokenHits, TokenMap},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    WalkBody,
    WalkTables,
    WalkSections,
    RawSweep,
    Serialize,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

#[derive(Debug)]
pub struct DriverOutput {
    pub bytes: Vec<u8>,
    pub stats: SubstitutionStats,
    pub hits: TokenHits,
    pub warnings: Vec<PartialSubstitutionWarning>,
}

/// Drives one document through every stage. A driver is single-use and owns
/// the document for the whole run.
pub struct SubstitutionDriver<'m> {
    document: WordDocument,
    substituter: Substituter<'m>,
    stage: Stage,
    visited_parts: BTreeSet<String>,
    failed_parts: BTreeSet<String>,
    bytes: Option<Vec<u8>>,
}

impl<'m> SubstitutionDriver<'m> {
    pub fn new(document: WordDocument, map: &'m TokenMap) -> Self {
        Self {
            document,
            substituter: Substituter::new(map),
            stage: Stage::Init,
            visited_parts: BTreeSet::new(),
            failed_parts: BTreeSet::new(),
            bytes: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn run(mut self) -> ReportResult<DriverOutput> {
        while !self.stage.is_terminal() {
            match self.step() {
                Ok(next) => {
                    debug!(from = ?self.stage, to = ?next, "substitution stage");
                    self.stage = next;
                }
                Err(err) => {
                    error!(stage = ?self.stage, %err, "substitution failed");
                    self.stage = Stage::Failed;
                    return Err(err);
                }
            }
        }

        let bytes = self
            .bytes
            .take()
            .ok_or_else(|| ReportError::Serialization("document was not serialized".into()))?;
        let map = self.substituter.map();
        let (hits, stats) = self.substituter.into_parts();
        let warnings = missing_tokens(map, &hits);

        Ok(DriverOutput {
            bytes,
            stats,
            hits,
            warnings,
        })
    }

    fn step(&mut self) -> ReportResult<Stage> {
        Ok(match self.stage {
            Stage::Init => Stage::WalkBody,
            Stage::WalkBody => {
                self.walk_body()?;
                Stage::WalkTables
            }
            Stage::WalkTables => {
                self.walk_tables()?;
                Stage::WalkSections
            }
            Stage::WalkSections => {
                self.walk_sections();
                Stage::RawSweep
            }
            Stage::RawSweep => {
                self.raw_sweep();
                Stage::Serialize
            }
            Stage::Serialize => {
                self.bytes = Some(self.document.save()?);
                Stage::Done
            }
            terminal @ (Stage::Done | Stage::Failed) => terminal,
        })
    }

    fn walk_body(&mut self) -> ReportResult<()> {
        let substituter = &mut self.substituter;
        let mut changed = false;
        for_each_paragraph(self.document.body_mut()?, &mut |paragraph| {
            changed |= substituter.paragraph(paragraph).changed();
        });
        self.finish_part(self.document.main_part().to_string(), changed);
        Ok(())
    }

    fn walk_tables(&mut self) -> ReportResult<()> {
        let substituter = &mut self.substituter;
        let mut changed = false;
        for_each_table(self.document.body_mut()?, &mut |table| {
            changed |= walk_table(table, substituter);
        });
        self.finish_part(self.document.main_part().to_string(), changed);
        Ok(())
    }

    fn walk_sections(&mut self) {
        for part in self.document.header_footer_parts() {
            if !self.visited_parts.insert(part.clone()) {
                debug!(part = %part, "header/footer part already processed");
                continue;
            }

            let root = match self.document.part_root_mut(&part) {
                Ok(Some(root)) => root,
                Ok(None) => {
                    warn!(part = %part, "section references a missing part");
                    continue;
                }
                Err(err) => {
                    warn!(part = %part, %err, "skipping unreadable header/footer part");
                    self.substituter.stats_mut().skipped_nodes += 1;
                    self.failed_parts.insert(part);
                    continue;
                }
            };

            let changed = walk_container(root, &mut self.substituter);
            self.finish_part(part, changed);
        }
    }

    fn raw_sweep(&mut self) {
        let parts: Vec<String> = self
            .document
            .package()
            .part_names()
            .filter(|name| name.starts_with("word/") && name.ends_with(".xml"))
            .filter(|name| !self.failed_parts.contains(*name))
            .map(str::to_string)
            .collect();

        for part in parts {
            let map = self.substituter.map();
            let walked = part == self.document.main_part() || self.visited_parts.contains(&part);
            let root = match self.document.part_root_mut(&part) {
                Ok(Some(root)) => root,
                Ok(None) => continue,
                Err(err) => {
                    warn!(part = %part, %err, "skipping unreadable part during sweep");
                    self.substituter.stats_mut().skipped_nodes += 1;
                    continue;
                }
            };

            let outcome = sweep_element(root, &part, map, self.substituter.hits_mut(), walked);
            let stats = self.substituter.stats_mut();
            stats.sweep_replacements += outcome.replacements;
            stats.skipped_nodes += outcome.skipped;
            self.finish_part(part, outcome.modified());
        }
    }

    fn finish_part(&mut self, part: String, changed: bool) {
        if changed {
            self.document.package_mut().mark_modified(&part);
        }
    }
}

/// Paragraphs and (recursively) tables of a block container.
fn walk_container(container: &mut Element, substituter: &mut Substituter<'_>) -> bool {
    let mut changed = false;
    for_each_paragraph(container, &mut |paragraph| {
        changed |= substituter.paragraph(paragraph).changed();
    });
    for_each_table(container, &mut |table| {
        changed |= walk_table(table, substituter);
    });
    changed
}

fn walk_table(table: &mut Element, substituter: &mut Substituter<'_>) -> bool {
    let mut changed = false;
    for_each_cell(table, &mut |cell| {
        changed |= walk_container(cell, substituter);
    });
    changed
}

/// Canonical tokens none of whose aliases occurred anywhere.
fn missing_tokens(map: &TokenMap, hits: &TokenHits) -> Vec<PartialSubstitutionWarning> {
    map.entries()
        .filter(|(token, _)| hits.count(token) == 0)
        .map(|(token, _)| {
            let warning = PartialSubstitutionWarning {
                token: token.clone(),
                aliases: map.aliases_of(token),
            };
            warn!(token = %token, "{warning}");
            warning
        })
        .collect()
}
