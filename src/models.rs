use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Role;

pub type Id = i64;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub is_superuser: bool, // elevated flag, grants admin rights regardless of role
    pub last_login: Option<DateTime<Utc>>,
    pub date_joined: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: String,
    pub role: Role,
    pub is_superuser: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUser {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub role: Option<Role>,
}

/// Name + slug pair shared by categories and genres. Also their public
/// representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Taxon {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    pub id: Id,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub taxon: Taxon,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Genre {
    pub id: Id,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub taxon: Taxon,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Title {
    pub id: Id,
    pub name: String,
    pub year: i32,
    pub description: Option<String>,
    pub category_id: Option<Id>,
}

/// Link row between a genre and a title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct GenreTitle {
    pub genre_id: Id,
    pub title_id: Id,
}

/// Title joined with its taxonomy and aggregated rating.
#[derive(Debug, Clone)]
pub struct TitleDetail {
    pub title: Title,
    pub category: Option<Taxon>,
    pub genres: Vec<Taxon>,
    pub rating: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTitle {
    pub name: String,
    pub year: i32,
    pub description: Option<String>,
    pub category_id: Option<Id>,
    pub genre_ids: Vec<Id>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTitle {
    pub name: Option<String>,
    pub year: Option<i32>,
    pub description: Option<String>,
    pub category_id: Option<Option<Id>>,
    pub genre_ids: Option<Vec<Id>>,
}

/// Authored text shared by reviews and comments.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub text: String,
    pub author_id: Id,
    pub pub_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Review {
    pub id: Id,
    pub title_id: Id,
    pub score: i32,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub post: Post,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: Id,
    pub review_id: Id,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub post: Post,
}

/// A review or comment paired with its author's username.
#[derive(Debug, Clone)]
pub struct Authored<T> {
    pub item: T,
    pub author: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReview {
    pub title_id: Id,
    pub author_id: Id,
    pub text: String,
    pub score: i32,
    /// Server time when absent; only the importer supplies one.
    pub pub_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateReview {
    pub text: Option<String>,
    pub score: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewComment {
    pub review_id: Id,
    pub author_id: Id,
    pub text: String,
    pub pub_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateComment {
    pub text: Option<String>,
}

/// Offset/limit slice of a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: usize,
    pub limit: usize,
}

impl Window {
    pub fn all() -> Self {
        Self { offset: 0, limit: usize::MAX }
    }
}

#[derive(Debug, Clone)]
pub struct Slice<T> {
    pub total: usize,
    pub items: Vec<T>,
}

impl<T> Slice<T> {
    /// Cut a fully materialised, already ordered list.
    pub fn cut(all: Vec<T>, window: Window) -> Self {
        let total = all.len();
        let items = all.into_iter().skip(window.offset).take(window.limit).collect();
        Self { total, items }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Slice<U> {
        Slice { total: self.total, items: self.items.into_iter().map(f).collect() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TitleOrder {
    #[default]
    YearDesc,
    Year,
    Name,
    NameDesc,
    CategorySlug,
    CategorySlugDesc,
    GenreSlug,
    GenreSlugDesc,
}

impl TitleOrder {
    /// Parses `name`, `-year`, `category__slug` ...; unknown keys fall back to
    /// the default ordering.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("year") => TitleOrder::Year,
            Some("-year") => TitleOrder::YearDesc,
            Some("name") => TitleOrder::Name,
            Some("-name") => TitleOrder::NameDesc,
            Some("category__slug") => TitleOrder::CategorySlug,
            Some("-category__slug") => TitleOrder::CategorySlugDesc,
            Some("genre__slug") => TitleOrder::GenreSlug,
            Some("-genre__slug") => TitleOrder::GenreSlugDesc,
            _ => TitleOrder::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TitleFilter {
    pub category: Option<String>,
    pub genre: Option<String>,
    pub name: Option<String>,
    pub year: Option<i32>,
    pub order: TitleOrder,
}
