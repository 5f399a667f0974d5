//! Bulk load of a CSV dump into an empty or partially filled store.
//!
//! Files are loaded in dependency order. Ids in the files are only used to
//! wire rows together; stored rows receive fresh ids. Duplicate, dangling or
//! malformed rows are logged and skipped; storage failures abort the run.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::Role;
use crate::models::*;
use crate::repo::{Repo, RepoError};
use crate::validators;

pub const FILES: [&str; 7] = [
    "category.csv",
    "users.csv",
    "genre.csv",
    "titles.csv",
    "genre_title.csv",
    "review.csv",
    "comments.csv",
];

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("import file not found: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("cannot read {}: {source}", .file.display())]
    Csv {
        file: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error(transparent)]
    Storage(RepoError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub file: &'static str,
    pub inserted: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub files: Vec<FileReport>,
}

impl ImportReport {
    pub fn file(&self, name: &str) -> Option<&FileReport> {
        self.files.iter().find(|f| f.file == name)
    }
}

#[derive(Deserialize)]
struct TaxonRow {
    id: Id,
    name: String,
    slug: String,
}

#[derive(Deserialize)]
struct UserRow {
    id: Id,
    username: String,
    email: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    bio: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
}

#[derive(Deserialize)]
struct TitleRow {
    id: Id,
    name: String,
    year: i32,
    category: Option<Id>,
}

#[derive(Deserialize)]
struct GenreTitleRow {
    title_id: Id,
    genre_id: Id,
}

#[derive(Deserialize)]
struct ReviewRow {
    id: Id,
    title_id: Id,
    text: String,
    author: Id,
    score: i32,
    pub_date: String,
}

#[derive(Deserialize)]
struct CommentRow {
    id: Id,
    review_id: Id,
    text: String,
    author: Id,
    pub_date: String,
}

/// Accepts RFC 3339 and the naive `YYYY-MM-DD HH:MM:SS[.f]` form (read as UTC).
fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").ok().map(|n| n.and_utc()))
}

enum Outcome {
    Inserted,
    Skipped(String),
}

/// Per-file csv id -> storage id maps, shared by later files.
#[derive(Default)]
struct Ids {
    categories: HashMap<Id, Id>,
    users: HashMap<Id, Id>,
    genres: HashMap<Id, Id>,
    titles: HashMap<Id, Id>,
    reviews: HashMap<Id, Id>,
    commented: HashSet<(Id, Id)>, // (review_id, author_id)
}

struct Importer<'a> {
    repo: &'a dyn Repo,
    dir: &'a Path,
    ids: Ids,
}

fn skip(reason: impl Into<String>) -> Result<Outcome, ImportError> {
    Ok(Outcome::Skipped(reason.into()))
}

/// Conflicts and dangling references skip the row; anything else aborts.
fn soft<T>(res: Result<T, RepoError>) -> Result<Result<T, String>, ImportError> {
    match res {
        Ok(v) => Ok(Ok(v)),
        Err(RepoError::Conflict(c)) => Ok(Err(c.message().to_string())),
        Err(RepoError::NotFound) => Ok(Err("references a missing row".to_string())),
        Err(e) => Err(ImportError::Storage(e)),
    }
}

impl FileReport {
    fn record(&mut self, line: usize, outcome: Outcome) {
        match outcome {
            Outcome::Inserted => self.inserted += 1,
            Outcome::Skipped(reason) => {
                warn!(file = self.file, row = line + 1, "skipped: {reason}");
                self.skipped += 1;
            }
        }
    }
}

/// Run `$handler` over every row of `$file`, collecting a [`FileReport`].
macro_rules! load {
    ($im:expr, $file:literal, $row:ty, $handler:ident) => {{
        let mut report = FileReport { file: $file, ..Default::default() };
        for (line, row) in $im.rows::<$row>($file)?.into_iter().enumerate() {
            let outcome = match row {
                Ok(row) => $im.$handler(row).await?,
                Err(e) => Outcome::Skipped(format!("unreadable row: {e}")),
            };
            report.record(line, outcome);
        }
        info!(file = $file, inserted = report.inserted, skipped = report.skipped, "loaded");
        report
    }};
}

impl<'a> Importer<'a> {
    fn rows<R: DeserializeOwned>(&self, file: &str) -> Result<Vec<Result<R, csv::Error>>, ImportError> {
        let path = self.dir.join(file);
        let mut reader = csv::Reader::from_path(&path).map_err(|source| ImportError::Csv { file: path, source })?;
        Ok(reader.deserialize::<R>().collect())
    }

    async fn category(&mut self, row: TaxonRow) -> Result<Outcome, ImportError> {
        if let Err(e) = validators::validate_slug(&row.slug) {
            return skip(format!("category slug '{}': {e}", row.slug));
        }
        match soft(self.repo.create_category(Taxon { name: row.name, slug: row.slug.clone() }).await)? {
            Ok(c) => {
                self.ids.categories.insert(row.id, c.id);
                Ok(Outcome::Inserted)
            }
            Err(reason) => {
                if let Ok(existing) = self.repo.get_category(&row.slug).await {
                    self.ids.categories.insert(row.id, existing.id);
                }
                skip(format!("category '{}': {reason}", row.slug))
            }
        }
    }

    async fn genre(&mut self, row: TaxonRow) -> Result<Outcome, ImportError> {
        if let Err(e) = validators::validate_slug(&row.slug) {
            return skip(format!("genre slug '{}': {e}", row.slug));
        }
        match soft(self.repo.create_genre(Taxon { name: row.name, slug: row.slug.clone() }).await)? {
            Ok(g) => {
                self.ids.genres.insert(row.id, g.id);
                Ok(Outcome::Inserted)
            }
            Err(reason) => {
                if let Ok(existing) = self.repo.get_genre(&row.slug).await {
                    self.ids.genres.insert(row.id, existing.id);
                }
                skip(format!("genre '{}': {reason}", row.slug))
            }
        }
    }

    async fn user(&mut self, row: UserRow) -> Result<Outcome, ImportError> {
        if let Err(e) = validators::validate_username(&row.username) {
            return skip(format!("user '{}': {e}", row.username));
        }
        let role: Role = match row.role.parse() {
            Ok(role) => role,
            Err(e) => return skip(format!("user '{}': {e}", row.username)),
        };
        let new = NewUser {
            username: row.username.clone(),
            email: row.email.clone(),
            first_name: row.first_name,
            last_name: row.last_name,
            bio: row.bio,
            role,
            is_superuser: false,
        };
        match soft(self.repo.create_user(new).await)? {
            Ok(u) => {
                self.ids.users.insert(row.id, u.id);
                Ok(Outcome::Inserted)
            }
            Err(reason) => {
                if let Ok(existing) = self.repo.find_user(&row.username).await {
                    if existing.email == row.email {
                        self.ids.users.insert(row.id, existing.id);
                    }
                }
                skip(format!("user '{}' <{}>: {reason}", row.username, row.email))
            }
        }
    }

    async fn title(&mut self, row: TitleRow) -> Result<Outcome, ImportError> {
        if let Err(e) = validators::validate_year(row.year) {
            return skip(format!("title '{}': {e}", row.name));
        }
        let filter = TitleFilter { name: Some(row.name.clone()), year: Some(row.year), ..Default::default() };
        let existing = self.repo.list_titles(&filter, Window::all()).await.map_err(ImportError::Storage)?;
        if let Some(t) = existing.items.iter().find(|t| t.title.name == row.name) {
            self.ids.titles.insert(row.id, t.title.id);
            return skip(format!("title '{}' ({}) already exists", row.name, row.year));
        }
        let category_id = match row.category {
            None => None,
            Some(csv_id) => match self.ids.categories.get(&csv_id) {
                Some(id) => Some(*id),
                None => return skip(format!("title '{}': unknown category {csv_id}", row.name)),
            },
        };
        let new = NewTitle { name: row.name.clone(), year: row.year, description: None, category_id, genre_ids: vec![] };
        match soft(self.repo.create_title(new).await)? {
            Ok(t) => {
                self.ids.titles.insert(row.id, t.title.id);
                Ok(Outcome::Inserted)
            }
            Err(reason) => skip(format!("title '{}': {reason}", row.name)),
        }
    }

    async fn genre_title(&mut self, row: GenreTitleRow) -> Result<Outcome, ImportError> {
        let (Some(&title_id), Some(&genre_id)) = (self.ids.titles.get(&row.title_id), self.ids.genres.get(&row.genre_id)) else {
            return skip(format!("link title {} / genre {}: unknown row", row.title_id, row.genre_id));
        };
        match soft(self.repo.link_genre(GenreTitle { genre_id, title_id }).await)? {
            Ok(()) => Ok(Outcome::Inserted),
            Err(reason) => skip(format!("link title {} / genre {}: {reason}", row.title_id, row.genre_id)),
        }
    }

    async fn review(&mut self, row: ReviewRow) -> Result<Outcome, ImportError> {
        let (Some(&title_id), Some(&author_id)) = (self.ids.titles.get(&row.title_id), self.ids.users.get(&row.author)) else {
            return skip(format!("review {}: unknown title or author", row.id));
        };
        if let Err(e) = validators::validate_score(row.score) {
            return skip(format!("review {}: {e}", row.id));
        }
        let Some(pub_date) = parse_pub_date(&row.pub_date) else {
            return skip(format!("review {}: bad pub_date '{}'", row.id, row.pub_date));
        };
        let new = NewReview { title_id, author_id, text: row.text, score: row.score, pub_date: Some(pub_date) };
        match soft(self.repo.create_review(new).await)? {
            Ok(r) => {
                self.ids.reviews.insert(row.id, r.item.id);
                Ok(Outcome::Inserted)
            }
            Err(reason) => skip(format!("review {}: {reason}", row.id)),
        }
    }

    async fn comment(&mut self, row: CommentRow) -> Result<Outcome, ImportError> {
        let (Some(&review_id), Some(&author_id)) = (self.ids.reviews.get(&row.review_id), self.ids.users.get(&row.author)) else {
            return skip(format!("comment {}: unknown review or author", row.id));
        };
        if !self.ids.commented.insert((review_id, author_id)) {
            return skip(format!("comment {}: author already commented this review", row.id));
        }
        let Some(pub_date) = parse_pub_date(&row.pub_date) else {
            return skip(format!("comment {}: bad pub_date '{}'", row.id, row.pub_date));
        };
        let new = NewComment { review_id, author_id, text: row.text, pub_date: Some(pub_date) };
        match soft(self.repo.create_comment(new).await)? {
            Ok(_) => Ok(Outcome::Inserted),
            Err(reason) => skip(format!("comment {}: {reason}", row.id)),
        }
    }
}

/// Load every file in [`FILES`] from `dir`. All files must exist.
pub async fn import_dir(repo: &dyn Repo, dir: &Path) -> Result<ImportReport, ImportError> {
    if let Some(missing) = FILES.iter().map(|f| dir.join(f)).find(|p| !p.is_file()) {
        return Err(ImportError::MissingFile(missing));
    }
    let mut im = Importer { repo, dir, ids: Ids::default() };
    let files = vec![
        load!(im, "category.csv", TaxonRow, category),
        load!(im, "users.csv", UserRow, user),
        load!(im, "genre.csv", TaxonRow, genre),
        load!(im, "titles.csv", TitleRow, title),
        load!(im, "genre_title.csv", GenreTitleRow, genre_title),
        load!(im, "review.csv", ReviewRow, review),
        load!(im, "comments.csv", CommentRow, comment),
    ];
    Ok(ImportReport { files })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pub_date_formats() {
        assert!(parse_pub_date("2019-09-24T21:08:21.567Z").is_some());
        assert!(parse_pub_date("2019-09-24 21:08:21").is_some());
        assert!(parse_pub_date("yesterday").is_none());
    }
}
