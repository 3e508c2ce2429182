use std::fs;

use tl_store::{DirFileGroups, FileGroupResolver};

#[tokio::test]
async fn members_are_sorted_and_typed() {
    let root = tempfile::tempdir().unwrap();
    let group = root.path().join("fg1");
    fs::create_dir_all(&group).unwrap();
    fs::write(group.join("b.png"), [0x89, b'P', b'N', b'G']).unwrap();
    fs::write(group.join("a.txt"), "hello").unwrap();

    let files = DirFileGroups::new(root.path()).resolve("fg1").await.unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].file_name, "a.txt");
    assert_eq!(files[0].mime_type, "text/plain");
    assert_eq!(files[1].mime_type, "image/png");
    assert!(files.iter().all(|f| f.document.is_none()));
}

#[tokio::test]
async fn pdf_sidecar_is_loaded_page_by_page() {
    let root = tempfile::tempdir().unwrap();
    let group = root.path().join("fg2");
    let pages = group.join("report.pdf.pages");
    fs::create_dir_all(&pages).unwrap();
    fs::write(group.join("report.pdf"), b"%PDF-1.7").unwrap();
    fs::write(pages.join("info.json"), r#"{"title":"Q3 report","pages":2}"#).unwrap();
    fs::write(pages.join("outline.txt"), "Summary\n\nFigures\n").unwrap();
    fs::write(pages.join("page-0002.png"), b"img2").unwrap();
    fs::write(pages.join("page-0001.png"), b"img1").unwrap();
    fs::write(pages.join("page-0001.txt"), "first page").unwrap();

    let files = DirFileGroups::new(root.path()).resolve("fg2").await.unwrap();
    // The sidecar directory is not a member.
    assert_eq!(files.len(), 1);
    let pdf = &files[0];
    assert!(pdf.is_pdf_like());

    let doc = pdf.document.as_ref().unwrap();
    assert_eq!(doc.info["title"], "Q3 report");
    assert_eq!(doc.outline, vec!["Summary", "Figures"]);
    assert_eq!(doc.pages.len(), 2);
    assert_eq!(doc.pages[0].number, 1);
    assert_eq!(doc.pages[0].image, b"img1");
    assert_eq!(doc.pages[0].text, "first page");
    assert_eq!(doc.pages[1].text, "");
}

#[tokio::test]
async fn pdf_without_sidecar_has_no_document() {
    let root = tempfile::tempdir().unwrap();
    let group = root.path().join("fg3");
    fs::create_dir_all(&group).unwrap();
    fs::write(group.join("scan.pdf"), b"%PDF-1.4").unwrap();

    let files = DirFileGroups::new(root.path()).resolve("fg3").await.unwrap();
    assert_eq!(files[0].mime_type, "application/pdf");
    assert!(files[0].document.is_none());
}
