//! CSV bulk import/export for posts.
//!
//! Import files must carry a header row naming `category`, `title`,
//! `content` and `author` (any order, extra columns ignored). Bad rows are
//! reported individually and do not abort the import. Exports are UTF-8
//! with a BOM so spreadsheet tools pick the encoding up.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::{Category, NewPost, Post};

pub const IMPORT_COLUMNS: [&str; 4] = ["category", "title", "content", "author"];
pub const EXPORT_COLUMNS: [&str; 7] = [
    "id",
    "category",
    "title",
    "content",
    "author",
    "view_count",
    "created_at",
];

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("file is not valid UTF-8")]
    Encoding,
    #[error("missing required column '{0}'")]
    MissingColumn(&'static str),
    #[error("csv parse error: {0}")]
    Parse(String),
}

/// Rows that parsed cleanly, tagged with their CSV row number so insert
/// failures can still be reported per row, plus the rows that did not.
#[derive(Debug, Default)]
pub struct ParsedImport {
    pub rows: Vec<(u64, NewPost)>,
    pub errors: Vec<String>,
}

/// Per-request import outcome returned to the admin.
#[derive(Debug, Default, Serialize, ToSchema)]
pub struct ImportReport {
    pub success_count: usize,
    pub fail_count: usize,
    pub errors: Vec<String>,
}

pub fn parse_import(input: &[u8]) -> Result<ParsedImport, ImportError> {
    let input = input.strip_prefix(UTF8_BOM).unwrap_or(input);
    let text = std::str::from_utf8(input).map_err(|_| ImportError::Encoding)?;

    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = rdr
        .headers()
        .map_err(|e| ImportError::Parse(e.to_string()))?
        .clone();
    let col = |name: &'static str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .ok_or(ImportError::MissingColumn(name))
    };
    let category_col = col("category")?;
    let title_col = col("title")?;
    let content_col = col("content")?;
    let author_col = col("author")?;

    let mut parsed = ParsedImport::default();
    for (i, record) in rdr.records().enumerate() {
        // header occupies row 1, data starts at row 2
        let row = (i as u64) + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                parsed.errors.push(format!("row {row}: {e}"));
                continue;
            }
        };
        let field = |idx: usize| record.get(idx).unwrap_or("").trim().to_string();

        let raw_category = field(category_col);
        let Some(category) = Category::parse(&raw_category) else {
            parsed
                .errors
                .push(format!("row {row}: unknown category '{raw_category}'"));
            continue;
        };
        let post = NewPost {
            category,
            title: field(title_col),
            content: field(content_col),
            author: field(author_col),
        };
        if let Err(msg) = post.validate() {
            parsed.errors.push(format!("row {row}: {msg}"));
            continue;
        }
        parsed.rows.push((row, post));
    }
    Ok(parsed)
}

pub fn export_csv(posts: &[Post]) -> Result<Vec<u8>, csv::Error> {
    let mut out = Vec::from(UTF8_BOM);
    let mut wtr = csv::Writer::from_writer(&mut out);
    wtr.write_record(EXPORT_COLUMNS)?;
    for p in posts {
        wtr.write_record(&[
            p.id.to_string(),
            p.category.as_str().to_string(),
            p.title.clone(),
            p.content.clone(),
            p.author.clone(),
            p.view_count.to_string(),
            p.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ])?;
    }
    wtr.flush()?;
    drop(wtr);
    Ok(out)
}

pub fn export_filename(now: DateTime<Utc>) -> String {
    format!("board_posts_{}.csv", now.format("%Y%m%d_%H%M%S"))
}
