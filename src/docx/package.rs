use std::{
    borrow::Cow,
    io::{Cursor, Read, Write},
};

use zip::{CompressionMethod, ZipArchive, ZipWriter, write::SimpleFileOptions};

use super::xml::{XmlDocument, XmlError};
use crate::error::{ReportError, ReportResult};

const PACKAGE_RELS: &str = "_rels/.rels";
const DEFAULT_MAIN_PART: &str = "word/document.xml";
const OFFICE_DOCUMENT_REL: &str = "/officeDocument";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub external: bool,
}

impl Relationship {
    pub fn is_type(&self, suffix: &str) -> bool {
        self.rel_type.ends_with(suffix)
    }
}

#[derive(Debug)]
struct PackageEntry {
    name: String,
    compression: CompressionMethod,
    is_dir: bool,
    data: Vec<u8>,
    xml: Option<XmlDocument>,
    modified: bool,
}

/// An opened document package. Parts are kept as raw bytes until first
/// accessed as XML; only parts marked modified are re-serialized on save.
#[derive(Debug)]
pub struct Package {
    entries: Vec<PackageEntry>,
}

impl Package {
    pub fn from_bytes(bytes: &[u8]) -> ReportResult<Self> {
        if bytes.is_empty() {
            return Err(ReportError::TemplateNotFound {
                location: "<memory>".to_string(),
                reason: "template buffer is empty".to_string(),
            });
        }

        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|err| ReportError::corrupt("failed to open template archive", err))?;

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut file = archive
                .by_index(index)
                .map_err(|err| ReportError::corrupt("failed to read archive entry", err))?;
            let name = file.name().to_string();
            let compression = match file.compression() {
                CompressionMethod::Stored => CompressionMethod::Stored,
                _ => CompressionMethod::Deflated,
            };
            let is_dir = file.is_dir();
            let mut data = Vec::new();
            if !is_dir {
                file.read_to_end(&mut data)
                    .map_err(|err| ReportError::corrupt(&name, err))?;
            }
            entries.push(PackageEntry {
                name,
                compression,
                is_dir,
                data,
                xml: None,
                modified: false,
            });
        }

        Ok(Self { entries })
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|entry| !entry.is_dir)
            .map(|entry| entry.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    pub fn raw(&self, name: &str) -> Option<&[u8]> {
        self.entry(name).map(|entry| entry.data.as_slice())
    }

    /// Parsed XML for a part, parsing it on first access. `Ok(None)` when the
    /// part does not exist.
    pub fn xml_mut(&mut self, name: &str) -> Result<Option<&mut XmlDocument>, XmlError> {
        let Some(entry) = self.entries.iter_mut().find(|entry| entry.name == name) else {
            return Ok(None);
        };
        if entry.xml.is_none() {
            let text = std::str::from_utf8(&entry.data).map_err(XmlError::new)?;
            let text = text.strip_prefix('\u{feff}').unwrap_or(text);
            entry.xml = Some(XmlDocument::parse(text)?);
        }
        Ok(entry.xml.as_mut())
    }

    /// Flag a part so its XML tree is written back on save.
    pub fn mark_modified(&mut self, name: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.name == name) {
            entry.modified = true;
        }
    }

    pub fn is_modified(&self, name: &str) -> bool {
        self.entry(name).is_some_and(|entry| entry.modified)
    }

    /// Relationships declared by `source_part` (empty string for the package
    /// root). A missing rels part yields no relationships.
    pub fn relationships(&mut self, source_part: &str) -> ReportResult<Vec<Relationship>> {
        let rels_name = rels_part_for(source_part);
        let document = self
            .xml_mut(&rels_name)
            .map_err(|err| ReportError::corrupt(&rels_name, err))?;
        let Some(root) = document.and_then(|document| document.root()) else {
            return Ok(Vec::new());
        };

        Ok(root
            .child_elements()
            .filter(|element| element.is("Relationship"))
            .filter_map(|element| {
                Some(Relationship {
                    id: element.attribute("Id")?.to_string(),
                    rel_type: element.attribute("Type").unwrap_or_default().to_string(),
                    target: element.attribute("Target")?.to_string(),
                    external: element
                        .attribute("TargetMode")
                        .is_some_and(|mode| mode.eq_ignore_ascii_case("External")),
                })
            })
            .collect())
    }

    /// Name of the main document part, resolved through the package
    /// relationships with `word/document.xml` as fallback.
    pub fn main_document_part(&mut self) -> ReportResult<String> {
        let resolved = self
            .relationships("")?
            .into_iter()
            .find(|rel| rel.is_type(OFFICE_DOCUMENT_REL) && !rel.external)
            .map(|rel| resolve_target("", &rel.target))
            .filter(|name| self.contains(name));

        let name = resolved.unwrap_or_else(|| DEFAULT_MAIN_PART.to_string());
        if !self.contains(&name) {
            return Err(ReportError::TemplateCorrupt(format!(
                "package has no main document part ({name})"
            )));
        }
        Ok(name)
    }

    /// Re-package every entry in its original order and compression.
    pub fn to_bytes(&self) -> ReportResult<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        for entry in &self.entries {
            let options = SimpleFileOptions::default().compression_method(entry.compression);
            if entry.is_dir {
                zip.add_directory(entry.name.as_str(), options)
                    .map_err(|err| ReportError::serialization(&entry.name, err))?;
                continue;
            }

            let data: Cow<'_, [u8]> = match (&entry.xml, entry.modified) {
                (Some(document), true) => Cow::Owned(
                    document
                        .to_bytes()
                        .map_err(|err| ReportError::serialization(&entry.name, err))?,
                ),
                _ => Cow::Borrowed(&entry.data),
            };

            zip.start_file(entry.name.as_str(), options)
                .map_err(|err| ReportError::serialization(&entry.name, err))?;
            zip.write_all(&data)
                .map_err(|err| ReportError::serialization(&entry.name, err))?;
        }

        let cursor = zip
            .finish()
            .map_err(|err| ReportError::serialization("failed to finish archive", err))?;
        Ok(cursor.into_inner())
    }

    fn entry(&self, name: &str) -> Option<&PackageEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }
}

/// `word/document.xml` → `word/_rels/document.xml.rels`; `""` → `_rels/.rels`.
pub fn rels_part_for(source_part: &str) -> String {
    if source_part.is_empty() {
        return PACKAGE_RELS.to_string();
    }
    match source_part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{source_part}.rels"),
    }
}

/// Resolve a relationship target against the directory of its source part.
pub fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return normalize(Vec::new(), absolute);
    }
    let segments: Vec<&str> = source_part
        .rsplit_once('/')
        .map(|(dir, _)| dir.split('/').filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    normalize(segments, target)
}

fn normalize<'a>(mut segments: Vec<&'a str>, relative: &'a str) -> String {
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_zip(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in parts {
            zip.start_file(*name, SimpleFileOptions::default())
                .expect("zip start file");
            zip.write_all(body.as_bytes()).expect("write part");
        }
        zip.finish().expect("finish zip").into_inner()
    }

    const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/main.xml"/></Relationships>"#;

    #[test]
    fn resolves_targets_relative_to_source() {
        assert_eq!(resolve_target("word/document.xml", "header1.xml"), "word/header1.xml");
        assert_eq!(resolve_target("word/document.xml", "/word/footer2.xml"), "word/footer2.xml");
        assert_eq!(
            resolve_target("word/document.xml", "../customXml/item1.xml"),
            "customXml/item1.xml"
        );
        assert_eq!(resolve_target("", "word/document.xml"), "word/document.xml");
    }

    #[test]
    fn computes_rels_part_names() {
        assert_eq!(rels_part_for(""), "_rels/.rels");
        assert_eq!(rels_part_for("word/document.xml"), "word/_rels/document.xml.rels");
    }

    #[test]
    fn finds_main_part_through_package_rels() {
        let bytes = build_zip(&[
            ("_rels/.rels", ROOT_RELS),
            ("word/main.xml", "<w:document/>"),
        ]);
        let mut package = Package::from_bytes(&bytes).expect("package");
        assert_eq!(package.main_document_part().expect("main"), "word/main.xml");
    }

    #[test]
    fn missing_main_part_is_corrupt() {
        let bytes = build_zip(&[("word/other.xml", "<x/>")]);
        let mut package = Package::from_bytes(&bytes).expect("package");
        let err = package.main_document_part().unwrap_err();
        assert!(matches!(err, ReportError::TemplateCorrupt(_)));
    }

    #[test]
    fn rejects_empty_and_non_zip_buffers() {
        assert!(matches!(
            Package::from_bytes(&[]).unwrap_err(),
            ReportError::TemplateNotFound { .. }
        ));
        assert!(matches!(
            Package::from_bytes(b"definitely not a zip").unwrap_err(),
            ReportError::TemplateCorrupt(_)
        ));
    }

    #[test]
    fn unmodified_parts_keep_their_bytes() {
        let original = "<w:document>  <w:body/>\n</w:document>";
        let bytes = build_zip(&[("word/document.xml", original)]);
        let mut package = Package::from_bytes(&bytes).expect("package");
        package
            .xml_mut("word/document.xml")
            .expect("parse")
            .expect("present");
        assert!(!package.is_modified("word/document.xml"));
        let saved = package.to_bytes().expect("save");

        let reopened = Package::from_bytes(&saved).expect("reopen");
        assert_eq!(reopened.raw("word/document.xml"), Some(original.as_bytes()));

        package
            .xml_mut("word/document.xml")
            .expect("parse")
            .and_then(XmlDocument::root_mut)
            .expect("root")
            .set_attribute("w:conformance", "strict");
        package.mark_modified("word/document.xml");
        assert!(package.is_modified("word/document.xml"));
        let rewritten = Package::from_bytes(&package.to_bytes().expect("save")).expect("reopen");
        let part = String::from_utf8_lossy(rewritten.raw("word/document.xml").expect("part"));
        assert!(part.contains(r#"w:conformance="strict""#), "{part}");
    }
}
