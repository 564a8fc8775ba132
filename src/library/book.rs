//! Catalog book model.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a title is lent out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookType {
    /// Digital copy, any number of concurrent loans.
    Ebook,
    /// Single physical copy, one loan at a time.
    Physical,
}

impl BookType {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookType::Ebook => "EBOOK",
            BookType::Physical => "PHYSICAL",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "EBOOK" => Some(BookType::Ebook),
            "PHYSICAL" => Some(BookType::Physical),
            _ => None,
        }
    }

    /// Whether loans of this type lock the availability flag.
    pub fn is_capped(&self) -> bool {
        matches!(self, BookType::Physical)
    }
}

/// A title in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    /// Numeric catalog ID.
    pub id: i64,

    /// Book title.
    pub title: String,

    /// Author name.
    pub author: String,

    /// ISBN.
    pub isbn: Option<String>,

    /// Book description or summary.
    pub description: Option<String>,

    /// Cover image URL or path.
    pub image: Option<String>,

    /// Number of pages.
    pub pages: Option<i64>,

    /// Language name.
    pub language: Option<String>,

    /// Average rating.
    pub rating: f64,

    /// Subject/genre tags.
    pub tags: Vec<String>,

    /// Lending type.
    pub book_type: BookType,

    /// False while a physical copy is on loan.
    pub available: bool,

    /// Path to the readable file.
    #[serde(skip_serializing)]
    pub file_path: Option<PathBuf>,

    /// Creation timestamp.
    pub created_at: i64,
}

impl Book {
    /// Create a catalog entry with minimal information.
    pub fn new(id: i64, title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            author: author.into(),
            isbn: None,
            description: None,
            image: None,
            pages: None,
            language: None,
            rating: 0.0,
            tags: Vec::new(),
            book_type: BookType::Ebook,
            available: true,
            file_path: None,
            created_at: crate::db::now_timestamp(),
        }
    }

    /// Check the fields an admin must supply.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() || self.author.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Title and Author are required.".to_string(),
            ));
        }
        if let Some(pages) = self.pages
            && pages <= 0
        {
            return Err(AppError::InvalidInput(
                "Page count must be greater than 0.".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the book shares at least one tag with `tags`.
    pub fn shares_tag(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }

    /// Case-insensitive title/author match.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.title.to_lowercase().contains(&query) || self.author.to_lowercase().contains(&query)
    }
}

/// Split a comma-separated tag list.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}
