//! File groups: the binaries a `file` content part links to.
//!
//! On disk a file group is a directory `<root>/<fileGroupId>/`. Each regular
//! file in it is one member. A PDF-like member may carry a pre-rendered
//! sidecar directory `<file name>.pages/` with:
//!
//! - `info.json`: document metadata object
//! - `outline.txt`: one outline entry per line
//! - `page-NNNN.png` / `page-NNNN.txt`: page image and extracted text

use std::path::{Path, PathBuf};

use serde_json::Value;

use tl_domain::error::{Error, Result};

/// One member of a file group.
#[derive(Debug, Clone)]
pub struct FileRendition {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
    /// Page-by-page rendering, present for PDF-like files that have one.
    pub document: Option<DocumentRendition>,
}

impl FileRendition {
    pub fn is_pdf_like(&self) -> bool {
        is_pdf_like(&self.mime_type)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DocumentRendition {
    pub info: Value,
    pub outline: Vec<String>,
    pub pages: Vec<PageRendition>,
}

#[derive(Debug, Clone)]
pub struct PageRendition {
    /// 1-based page number.
    pub number: u32,
    pub image: Vec<u8>,
    pub image_mime: String,
    pub text: String,
}

pub fn is_pdf_like(mime_type: &str) -> bool {
    mime_type == "application/pdf" || mime_type.ends_with("+pdf")
}

#[async_trait::async_trait]
pub trait FileGroupResolver: Send + Sync {
    /// Members of the file group, ordered by file name.
    async fn resolve(&self, file_group_id: &str) -> Result<Vec<FileRendition>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Directory-backed resolver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolves file groups from a directory tree.
pub struct DirFileGroups {
    root: PathBuf,
}

impl DirFileGroups {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn group_dir(&self, file_group_id: &str) -> Result<PathBuf> {
        if file_group_id.is_empty()
            || file_group_id.contains(|c: char| c == '/' || c == '\\')
            || file_group_id.starts_with('.')
        {
            return Err(Error::Invalid(format!(
                "file group id {file_group_id:?} is not a plain name"
            )));
        }
        Ok(self.root.join(file_group_id))
    }
}

#[async_trait::async_trait]
impl FileGroupResolver for DirFileGroups {
    async fn resolve(&self, file_group_id: &str) -> Result<Vec<FileRendition>> {
        let dir = self.group_dir(file_group_id)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("file group {file_group_id}")));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();

        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mime_type = mime_guess::from_path(&path)
                .first_or_octet_stream()
                .essence_str()
                .to_owned();
            let data = tokio::fs::read(&path).await?;

            let document = if is_pdf_like(&mime_type) {
                let sidecar = dir.join(format!("{file_name}.pages"));
                if tokio::fs::metadata(&sidecar).await.is_ok_and(|m| m.is_dir()) {
                    Some(load_document(&sidecar).await?)
                } else {
                    None
                }
            } else {
                None
            };

            out.push(FileRendition {
                file_name,
                mime_type,
                data,
                document,
            });
        }

        tracing::debug!(file_group_id, files = out.len(), "file group resolved");
        Ok(out)
    }
}

async fn load_document(sidecar: &Path) -> Result<DocumentRendition> {
    let info = match tokio::fs::read_to_string(sidecar.join("info.json")).await {
        Ok(raw) => serde_json::from_str(&raw)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Value::Object(Default::default()),
        Err(e) => return Err(Error::Io(e)),
    };
    let outline = match tokio::fs::read_to_string(sidecar.join("outline.txt")).await {
        Ok(raw) => raw
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(Error::Io(e)),
    };

    let mut numbers = Vec::new();
    let mut entries = tokio::fs::read_dir(sidecar).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(n) = page_number(&name, ".png") {
            numbers.push(n);
        }
    }
    numbers.sort_unstable();

    let mut pages = Vec::with_capacity(numbers.len());
    for number in numbers {
        let stem = format!("page-{number:04}");
        let image = tokio::fs::read(sidecar.join(format!("{stem}.png"))).await?;
        let text = tokio::fs::read_to_string(sidecar.join(format!("{stem}.txt")))
            .await
            .unwrap_or_default();
        pages.push(PageRendition {
            number,
            image,
            image_mime: "image/png".into(),
            text,
        });
    }

    Ok(DocumentRendition {
        info,
        outline,
        pages,
    })
}

fn page_number(file_name: &str, ext: &str) -> Option<u32> {
    file_name
        .strip_prefix("page-")?
        .strip_suffix(ext)?
        .parse()
        .ok()
}
