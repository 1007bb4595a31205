use std::io::{Cursor, Write};

use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

const NAMESPACES: &str = concat!(
    r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" "#,
    r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" "#,
    r#"xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" "#,
    r#"xmlns:wps="http://schemas.microsoft.com/office/word/2010/wordprocessingShape" "#,
    r#"xmlns:v="urn:schemas-microsoft-com:vml""#,
);

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const REL_TYPE_BASE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/";

/// A paragraph with one plain run per fragment.
pub(crate) fn paragraph(fragments: &[&str]) -> String {
    let runs: String = fragments
        .iter()
        .map(|text| format!(r#"<w:r><w:t xml:space="preserve">{text}</w:t></w:r>"#))
        .collect();
    format!("<w:p>{runs}</w:p>")
}

pub(crate) fn table(cells: &[&str]) -> String {
    let cells: String = cells
        .iter()
        .map(|content| format!("<w:tc><w:tcPr/>{content}</w:tc>"))
        .collect();
    format!("<w:tbl><w:tblPr/><w:tr>{cells}</w:tr></w:tbl>")
}

/// A paragraph holding a floating text box with the given inner paragraphs.
pub(crate) fn text_box(inner: &str) -> String {
    format!(
        "<w:p><w:r><w:pict><v:shape><v:textbox><w:txbxContent>{inner}</w:txbxContent></v:textbox></v:shape></w:pict></w:r></w:p>"
    )
}

pub(crate) fn section(header_id: &str, footer_id: &str) -> String {
    format!(
        r#"<w:sectPr><w:headerReference w:type="default" r:id="{header_id}"/><w:footerReference w:type="default" r:id="{footer_id}"/><w:pgSz w:w="11906" w:h="16838"/></w:sectPr>"#
    )
}

pub(crate) fn document_xml(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document {NAMESPACES}><w:body>{body}</w:body></w:document>"#
    )
}

pub(crate) fn header_xml(content: &str) -> String {
    format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:hdr {NAMESPACES}>{content}</w:hdr>"#)
}

pub(crate) fn footer_xml(content: &str) -> String {
    format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:ftr {NAMESPACES}>{content}</w:ftr>"#)
}

/// `(id, type, target)` triples, where type is the last segment of the
/// relationship type URI (`header`, `footer`, ...).
pub(crate) fn relationships_xml(relationships: &[(&str, &str, &str)]) -> String {
    let entries: String = relationships
        .iter()
        .map(|(id, kind, target)| {
            format!(r#"<Relationship Id="{id}" Type="{REL_TYPE_BASE}{kind}" Target="{target}"/>"#)
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{entries}</Relationships>"#
    )
}

/// Zip the given parts, adding content types and package relationships.
/// Media parts are stored uncompressed like Word does.
pub(crate) fn build_package(parts: &[(&str, String)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let mut write = |name: &str, body: &[u8]| {
        let method = if name.starts_with("word/media/") {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        let options = SimpleFileOptions::default().compression_method(method);
        zip.start_file(name, options).expect("start zip entry");
        zip.write_all(body).expect("write zip entry");
    };

    write("[Content_Types].xml", CONTENT_TYPES.as_bytes());
    write("_rels/.rels", PACKAGE_RELS.as_bytes());
    for (name, body) in parts {
        write(name, body.as_bytes());
    }
    zip.finish().expect("finish zip").into_inner()
}

/// Package with a body and no headers or footers.
pub(crate) fn simple_package(body: &str) -> Vec<u8> {
    build_package(&[("word/document.xml", document_xml(body))])
}
