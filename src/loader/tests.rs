use super::*;
use std::fs;
use std::io::Write;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

const DOCUMENT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Quarterly report</w:t></w:r></w:p>
    <w:p/>
    <w:p>
      <w:r><w:t xml:space="preserve">Revenue grew </w:t></w:r>
      <w:r><w:t>&amp; costs fell</w:t></w:r>
    </w:p>
    <w:p><w:r><w:t>Name</w:t><w:tab/><w:t>Value</w:t><w:br/><w:t>Next line</w:t></w:r></w:p>
  </w:body>
</w:document>"#;

fn write_docx(path: &Path, document_xml: Option<&str>) {
    let file = fs::File::create(path).expect("should create docx file");
    let mut writer = zip::ZipWriter::new(file);
    writer
        .start_file("[Content_Types].xml", SimpleFileOptions::default())
        .expect("should start entry");
    writer
        .write_all(b"<Types/>")
        .expect("should write entry");
    if let Some(xml) = document_xml {
        writer
            .start_file("word/document.xml", SimpleFileOptions::default())
            .expect("should start entry");
        writer
            .write_all(xml.as_bytes())
            .expect("should write entry");
    }
    writer.finish().expect("should finish archive");
}

#[test]
fn kind_detection_ignores_case() {
    assert_eq!(
        DocumentKind::from_path(Path::new("a/Report.PDF")),
        Some(DocumentKind::Pdf)
    );
    assert_eq!(
        DocumentKind::from_path(Path::new("memo.Docx")),
        Some(DocumentKind::Docx)
    );
    assert_eq!(
        DocumentKind::from_path(Path::new("notes.txt")),
        Some(DocumentKind::Text)
    );
    assert_eq!(
        DocumentKind::from_path(Path::new("README.md")),
        Some(DocumentKind::Markdown)
    );
    assert_eq!(DocumentKind::from_path(Path::new("image.png")), None);
    assert_eq!(DocumentKind::from_path(Path::new("Makefile")), None);
}

#[test]
fn discovery_filters_and_sorts() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let root = temp_dir.path();
    fs::write(root.join("b.txt"), "b").expect("should write");
    fs::write(root.join("A.PDF"), "not really a pdf").expect("should write");
    fs::write(root.join("c.docx"), "zip").expect("should write");
    fs::write(root.join("photo.jpg"), "jpg").expect("should write");
    fs::create_dir(root.join("nested")).expect("should create dir");
    fs::write(root.join("nested/deep.txt"), "deep").expect("should write");

    let found = discover_documents(root, false).expect("discovery succeeds");
    let names: Vec<String> = found
        .iter()
        .map(|p| source_key(root, p))
        .collect();
    assert_eq!(names, vec!["A.PDF", "b.txt", "c.docx"]);

    let found = discover_documents(root, true).expect("discovery succeeds");
    let names: Vec<String> = found
        .iter()
        .map(|p| source_key(root, p))
        .collect();
    assert_eq!(names, vec!["A.PDF", "b.txt", "c.docx", "nested/deep.txt"]);
}

#[test]
fn discovery_of_missing_directory_fails() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let missing = temp_dir.path().join("nope");

    assert!(matches!(
        discover_documents(&missing, false),
        Err(LoaderError::MissingDirectory(_))
    ));
}

#[test]
fn empty_directory_discovers_nothing() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let found = discover_documents(temp_dir.path(), true).expect("discovery succeeds");
    assert!(found.is_empty());
}

#[test]
fn source_key_is_relative_and_slash_separated() {
    let root = Path::new("/data/docs");
    assert_eq!(
        source_key(root, Path::new("/data/docs/guides/intro.txt")),
        "guides/intro.txt"
    );
    assert_eq!(source_key(root, Path::new("/data/docs/a.pdf")), "a.pdf");
}

#[test]
fn text_files_are_normalized() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("notes.txt");
    fs::write(
        &path,
        "\u{feff}Line one   \r\nLine two\r\n\r\n\r\n\r\nAfter gap\n\n",
    )
    .expect("should write");

    let document = load_document(temp_dir.path(), &path).expect("text loads");

    assert_eq!(document.source, "notes.txt");
    assert_eq!(document.kind, DocumentKind::Text);
    assert_eq!(document.sections.len(), 1);
    assert_eq!(document.sections[0].page, None);
    assert_eq!(document.sections[0].text, "Line one\nLine two\n\nAfter gap");
    assert!(document.content_hash.starts_with("sha256:"));
}

#[test]
fn invalid_utf8_is_replaced() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("latin1.txt");
    fs::write(&path, b"caf\xe9 au lait").expect("should write");

    let document = load_document(temp_dir.path(), &path).expect("text loads");
    assert_eq!(document.sections[0].text, "caf\u{fffd} au lait");
}

#[test]
fn blank_file_is_empty_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("blank.txt");
    fs::write(&path, " \n\n\t\n").expect("should write");

    assert!(matches!(
        load_document(temp_dir.path(), &path),
        Err(LoaderError::Empty(_))
    ));
}

#[test]
fn unsupported_extension_is_rejected() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("data.csv");
    fs::write(&path, "a,b").expect("should write");

    assert!(matches!(
        load_document(temp_dir.path(), &path),
        Err(LoaderError::Unsupported(_))
    ));
}

#[test]
fn missing_file_is_io_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("gone.txt");

    assert!(matches!(
        load_document(temp_dir.path(), &path),
        Err(LoaderError::Io { .. })
    ));
}

#[test]
fn content_hash_tracks_bytes() {
    assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
    assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
    assert_eq!(
        content_hash(b"abc"),
        "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn markdown_is_reduced_to_text() {
    let text = markdown_to_text("# Title\n\nSome *emphasis* and `code`.\n\n- one\n- two\n");
    let normalized = normalize_text(&text);

    assert!(normalized.starts_with("Title\n\nSome emphasis and code."));
    assert!(normalized.contains("one"));
    assert!(normalized.contains("two"));
    assert!(!normalized.contains('#'));
    assert!(!normalized.contains('*'));
}

/// Minimal PDF with one line of Helvetica text per page
fn pdf_with_pages(lines: &[&str]) -> Vec<u8> {
    use std::fmt::Write as _;

    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        String::new(),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];
    let mut kids = Vec::new();
    for line in lines {
        let content = format!("BT /F1 24 Tf 72 700 Td ({}) Tj ET", line);
        let page_id = objects.len() + 1;
        kids.push(format!("{} 0 R", page_id));
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
/Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
            page_id + 1
        ));
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            content.len(),
            content
        ));
    }
    objects[1] = format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids.join(" "),
        lines.len()
    );

    let mut pdf = String::from("%PDF-1.4\n");
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        write!(pdf, "{} 0 obj\n{}\nendobj\n", i + 1, body).expect("writing to a string");
    }

    let xref_offset = pdf.len();
    write!(pdf, "xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1)
        .expect("writing to a string");
    for offset in offsets {
        write!(pdf, "{:010} 00000 n \n", offset).expect("writing to a string");
    }
    write!(
        pdf,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_offset
    )
    .expect("writing to a string");

    pdf.into_bytes()
}

#[test]
fn pdf_pages_become_numbered_sections() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("manual.pdf");
    fs::write(&path, pdf_with_pages(&["First page text", "Second page text"]))
        .expect("should write");

    let document = load_document(temp_dir.path(), &path).expect("pdf loads");

    assert_eq!(document.kind, DocumentKind::Pdf);
    assert_eq!(document.sections.len(), 2);
    assert_eq!(document.sections[0].page, Some(1));
    assert_eq!(document.sections[1].page, Some(2));
    assert!(document.sections[0].text.contains("First page text"));
    assert!(!document.sections[0].text.contains("Second"));
    assert!(document.sections[1].text.contains("Second page text"));
}

#[test]
fn corrupt_pdf_is_reported() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("broken.pdf");
    fs::write(&path, "this is not a pdf").expect("should write");

    assert!(matches!(
        load_document(temp_dir.path(), &path),
        Err(LoaderError::Pdf { .. })
    ));
}

#[test]
fn docx_paragraphs_are_separated() {
    let text = docx_paragraphs(DOCUMENT_XML).expect("xml parses");

    assert_eq!(
        text,
        "Quarterly report\n\nRevenue grew & costs fell\n\nName\tValue\nNext line"
    );
}

#[test]
fn docx_file_loads() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("report.docx");
    write_docx(&path, Some(DOCUMENT_XML));

    let document = load_document(temp_dir.path(), &path).expect("docx loads");

    assert_eq!(document.kind, DocumentKind::Docx);
    assert_eq!(document.source, "report.docx");
    assert!(document.sections[0].text.starts_with("Quarterly report\n\n"));
}

#[test]
fn docx_without_body_is_reported() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("hollow.docx");
    write_docx(&path, None);

    assert!(matches!(
        load_document(temp_dir.path(), &path),
        Err(LoaderError::Docx { .. })
    ));
}

#[test]
fn non_zip_docx_is_reported() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("plain.docx");
    fs::write(&path, "plain text pretending").expect("should write");

    assert!(matches!(
        load_document(temp_dir.path(), &path),
        Err(LoaderError::Docx { .. })
    ));
}
