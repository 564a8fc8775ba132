//! Dashboard book suggestions.

use crate::config::RecommendationConfig;
use crate::db::Database;
use crate::error::Result;
use crate::library::book::Book;
use serde::Serialize;
use std::collections::HashSet;

/// Reason attached to top-rated fillers.
pub const TRENDING_REASON: &str = "Trending on Library";

/// A suggested book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    /// Catalog ID.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Cover image, empty if unknown.
    pub image: String,
    /// Why it was suggested.
    pub reason: String,
}

impl Recommendation {
    fn from_book(book: &Book, reason: String) -> Self {
        Self {
            id: book.id,
            title: book.title.clone(),
            image: book.image.clone().unwrap_or_default(),
            reason,
        }
    }
}

/// How the user came to a seed book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOrigin {
    /// Time was spent reading it.
    Read,
    /// It was the last book issued.
    Issued,
}

impl SeedOrigin {
    fn reason(self, title: &str) -> String {
        match self {
            SeedOrigin::Read => format!("Because you read \"{}\"", title),
            SeedOrigin::Issued => format!("Because you issued \"{}\"", title),
        }
    }
}

/// Suggestions for a user.
///
/// Seeds on the book the user spent the most time reading, falling back to
/// the most recently issued one. Books on loan or already read are skipped.
pub fn for_user(
    db: &Database,
    user_id: &str,
    config: &RecommendationConfig,
) -> Result<Vec<Recommendation>> {
    let history = db.get_reading_history(user_id)?;
    let issues = db.get_user_issues(user_id)?;

    let mut exclude: HashSet<i64> = history.iter().map(|p| p.book_id).collect();
    exclude.extend(
        issues
            .iter()
            .filter(|i| i.status.is_active())
            .map(|i| i.book_id),
    );

    let read = history.iter().find(|p| p.time_spent > 0).map(|p| p.book_id);
    let issued = issues
        .iter()
        .max_by_key(|i| (i.issue_date, i.id))
        .map(|i| i.book_id);

    let mut seeds = Vec::new();
    for (id, origin) in [(read, SeedOrigin::Read), (issued, SeedOrigin::Issued)] {
        if let Some(id) = id
            && let Some(book) = db.get_book(id)?
        {
            seeds.push((book, origin));
        }
    }
    let seeds: Vec<(&Book, SeedOrigin)> = seeds.iter().map(|(b, o)| (b, *o)).collect();

    let catalog = db.list_books()?;
    Ok(pick(&seeds, &catalog, &exclude, config))
}

/// Tag matches for the first seed that has any, topped up with the best
/// rated books.
pub fn pick(
    seeds: &[(&Book, SeedOrigin)],
    catalog: &[Book],
    exclude: &HashSet<i64>,
    config: &RecommendationConfig,
) -> Vec<Recommendation> {
    let mut picked = Vec::new();
    let mut seen: HashSet<i64> = exclude.clone();
    seen.extend(seeds.iter().map(|(seed, _)| seed.id));

    for (seed, origin) in seeds.iter().filter(|(s, _)| !s.tags.is_empty()) {
        for book in catalog {
            if picked.len() >= config.limit {
                break;
            }
            if !seen.contains(&book.id) && book.shares_tag(&seed.tags) {
                seen.insert(book.id);
                picked.push(Recommendation::from_book(book, origin.reason(&seed.title)));
            }
        }
        if !picked.is_empty() {
            break;
        }
    }

    if picked.len() < config.minimum {
        let mut rated: Vec<&Book> = catalog.iter().filter(|b| !seen.contains(&b.id)).collect();
        rated.sort_by(|a, b| b.rating.total_cmp(&a.rating).then(a.id.cmp(&b.id)));

        for book in rated.into_iter().take(config.minimum - picked.len()) {
            picked.push(Recommendation::from_book(book, TRENDING_REASON.to_string()));
        }
    }

    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(id: i64, tags: &[&str], rating: f64) -> Book {
        let mut book = Book::new(id, format!("Book {id}"), "Author");
        book.tags = tags.iter().map(|t| t.to_string()).collect();
        book.rating = rating;
        book
    }

    fn config() -> RecommendationConfig {
        RecommendationConfig::default()
    }

    #[test]
    fn test_tag_matches_come_first() {
        let seed = book(1, &["space"], 0.0);
        let catalog = vec![
            seed.clone(),
            book(2, &["space", "war"], 3.0),
            book(3, &["romance"], 5.0),
            book(4, &["space"], 1.0),
        ];

        let picked = pick(&[(&seed, SeedOrigin::Read)], &catalog, &HashSet::new(), &config());
        let ids: Vec<i64> = picked.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 4, 3]);
        assert_eq!(picked[0].reason, "Because you read \"Book 1\"");
        assert_eq!(picked[2].reason, TRENDING_REASON);
    }

    #[test]
    fn test_excluded_books_are_skipped() {
        let seed = book(1, &["space"], 0.0);
        let catalog = vec![book(2, &["space"], 4.0), book(3, &[], 2.0)];
        let exclude: HashSet<i64> = [2].into_iter().collect();

        let picked = pick(&[(&seed, SeedOrigin::Read)], &catalog, &exclude, &config());
        assert_eq!(picked.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_no_seed_returns_top_rated() {
        let catalog = vec![
            book(1, &[], 2.0),
            book(2, &[], 4.5),
            book(3, &[], 4.0),
            book(4, &[], 1.0),
        ];

        let picked = pick(&[], &catalog, &HashSet::new(), &config());
        assert_eq!(picked.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 3, 1]);
    }

    #[test]
    fn test_issued_seed_used_when_read_seed_has_no_matches() {
        let read = book(1, &["poetry"], 0.0);
        let issued = book(2, &["space"], 0.0);
        let catalog = vec![read.clone(), issued.clone(), book(3, &["space"], 1.0)];

        let seeds = [(&read, SeedOrigin::Read), (&issued, SeedOrigin::Issued)];
        let picked = pick(&seeds, &catalog, &HashSet::new(), &config());
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, 3);
        assert_eq!(picked[0].reason, "Because you issued \"Book 2\"");
    }

    #[test]
    fn test_limit_caps_tag_matches() {
        let seed = book(100, &["x"], 0.0);
        let catalog: Vec<Book> = (1..=10).map(|id| book(id, &["x"], 0.0)).collect();

        let picked = pick(&[(&seed, SeedOrigin::Read)], &catalog, &HashSet::new(), &config());
        assert_eq!(picked.len(), 5);
    }
}
