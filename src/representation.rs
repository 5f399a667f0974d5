//! Request payloads and response bodies.

use actix_web::HttpRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::auth::Role;
use crate::error::ApiError;
use crate::models::*;
use crate::validators;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

/// Payload checks beyond what `#[derive(Validate)]` covers.
pub trait Checked: Validate {
    fn extra(&self, _errors: &mut ValidationErrors) {}
}

fn push(errors: &mut ValidationErrors, field: &'static str, result: Result<(), ValidationError>) {
    if let Err(e) = result {
        errors.add(field, e);
    }
}

/// Run derive and custom validation, merging field errors.
pub fn checked<T: Checked>(payload: T) -> Result<T, ApiError> {
    let mut errors = payload.validate().err().unwrap_or_else(ValidationErrors::new);
    payload.extra(&mut errors);
    if errors.errors().is_empty() {
        Ok(payload)
    } else {
        Err(errors.into())
    }
}

/// Distinguishes an absent field from an explicit `null`.
fn nullable<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

// ---------------------------------------------------------------- auth

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct SignupRequest {
    #[validate(length(min = 1, max = 150))]
    pub username: String,
    #[validate(email, length(max = 254))]
    pub email: String,
}

impl Checked for SignupRequest {
    fn extra(&self, errors: &mut ValidationErrors) {
        push(errors, "username", validators::validate_username(&self.username));
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct TokenRequest {
    #[validate(length(min = 1, max = 150))]
    pub username: String,
    #[validate(length(min = 1))]
    pub confirmation_code: String,
}

impl Checked for TokenRequest {}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
}

// ---------------------------------------------------------------- users

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserRead {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: String,
    pub role: Role,
}

impl From<User> for UserRead {
    fn from(u: User) -> Self {
        Self { username: u.username, email: u.email, first_name: u.first_name, last_name: u.last_name, bio: u.bio, role: u.role }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UserCreate {
    #[validate(length(min = 1, max = 150))]
    pub username: String,
    #[validate(email, length(max = 254))]
    pub email: String,
    #[serde(default)]
    #[validate(length(max = 150))]
    pub first_name: String,
    #[serde(default)]
    #[validate(length(max = 150))]
    pub last_name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub role: Role,
}

impl Checked for UserCreate {
    fn extra(&self, errors: &mut ValidationErrors) {
        push(errors, "username", validators::validate_username(&self.username));
    }
}

impl From<UserCreate> for NewUser {
    fn from(p: UserCreate) -> Self {
        NewUser {
            username: p.username,
            email: p.email,
            first_name: p.first_name,
            last_name: p.last_name,
            bio: p.bio,
            role: p.role,
            is_superuser: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UserUpdate {
    #[validate(length(min = 1, max = 150))]
    pub username: Option<String>,
    #[validate(email, length(max = 254))]
    pub email: Option<String>,
    #[validate(length(max = 150))]
    pub first_name: Option<String>,
    #[validate(length(max = 150))]
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub role: Option<Role>,
}

impl Checked for UserUpdate {
    fn extra(&self, errors: &mut ValidationErrors) {
        if let Some(name) = &self.username {
            push(errors, "username", validators::validate_username(name));
        }
    }
}

impl From<UserUpdate> for UpdateUser {
    fn from(p: UserUpdate) -> Self {
        UpdateUser {
            username: p.username,
            email: p.email,
            first_name: p.first_name,
            last_name: p.last_name,
            bio: p.bio,
            role: p.role,
        }
    }
}

// ---------------------------------------------------------------- taxonomy

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct TaxonCreate {
    #[validate(length(min = 1, max = 256))]
    pub name: String,
    #[validate(length(min = 1, max = 50))]
    pub slug: String,
}

impl Checked for TaxonCreate {
    fn extra(&self, errors: &mut ValidationErrors) {
        push(errors, "slug", validators::validate_slug(&self.slug));
    }
}

impl From<TaxonCreate> for Taxon {
    fn from(p: TaxonCreate) -> Self {
        Taxon { name: p.name, slug: p.slug }
    }
}

// ---------------------------------------------------------------- titles

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TitleRead {
    pub id: Id,
    pub name: String,
    pub year: i32,
    /// Mean review score, one decimal; `null` without reviews.
    pub rating: Option<f64>,
    pub description: Option<String>,
    pub genre: Vec<Taxon>,
    pub category: Option<Taxon>,
}

impl From<TitleDetail> for TitleRead {
    fn from(d: TitleDetail) -> Self {
        Self {
            id: d.title.id,
            name: d.title.name,
            year: d.title.year,
            rating: d.rating,
            description: d.title.description,
            genre: d.genres,
            category: d.category,
        }
    }
}

/// Category and genres are given by slug.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct TitleCreate {
    #[validate(length(min = 1, max = 256))]
    pub name: String,
    pub year: i32,
    pub description: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub genre: Vec<String>,
}

impl Checked for TitleCreate {
    fn extra(&self, errors: &mut ValidationErrors) {
        push(errors, "year", validators::validate_year(self.year));
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct TitleUpdate {
    #[validate(length(min = 1, max = 256))]
    pub name: Option<String>,
    pub year: Option<i32>,
    pub description: Option<String>,
    /// `null` clears the category.
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<String>)]
    pub category: Option<Option<String>>,
    pub genre: Option<Vec<String>>,
}

impl Checked for TitleUpdate {
    fn extra(&self, errors: &mut ValidationErrors) {
        if let Some(year) = self.year {
            push(errors, "year", validators::validate_year(year));
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TitleQuery {
    /// Category slug.
    pub category: Option<String>,
    /// Genre slug.
    pub genre: Option<String>,
    /// Case-insensitive substring of the name.
    pub name: Option<String>,
    pub year: Option<i32>,
    /// `name`, `year`, `category__slug` or `genre__slug`, optionally prefixed with `-`.
    pub ordering: Option<String>,
}

impl From<TitleQuery> for TitleFilter {
    fn from(q: TitleQuery) -> Self {
        TitleFilter {
            order: TitleOrder::parse(q.ordering.as_deref()),
            category: q.category.filter(|s| !s.is_empty()),
            genre: q.genre.filter(|s| !s.is_empty()),
            name: q.name.filter(|s| !s.is_empty()),
            year: q.year,
        }
    }
}

// ---------------------------------------------------------------- feedback

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReviewRead {
    pub id: Id,
    pub text: String,
    pub author: String,
    pub score: i32,
    pub pub_date: DateTime<Utc>,
}

impl From<Authored<Review>> for ReviewRead {
    fn from(a: Authored<Review>) -> Self {
        Self { id: a.item.id, text: a.item.post.text, author: a.author, score: a.item.score, pub_date: a.item.post.pub_date }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ReviewCreate {
    #[validate(length(min = 1))]
    pub text: String,
    #[validate(range(min = 1, max = 10))]
    pub score: i32,
}

impl Checked for ReviewCreate {}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct ReviewUpdate {
    #[validate(length(min = 1))]
    pub text: Option<String>,
    #[validate(range(min = 1, max = 10))]
    pub score: Option<i32>,
}

impl Checked for ReviewUpdate {}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommentRead {
    pub id: Id,
    pub text: String,
    pub author: String,
    pub pub_date: DateTime<Utc>,
    pub review: Id,
}

impl From<Authored<Comment>> for CommentRead {
    fn from(a: Authored<Comment>) -> Self {
        Self { id: a.item.id, text: a.item.post.text, author: a.author, pub_date: a.item.post.pub_date, review: a.item.review_id }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CommentCreate {
    #[validate(length(min = 1))]
    pub text: String,
}

impl Checked for CommentCreate {}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct CommentUpdate {
    #[validate(length(min = 1))]
    pub text: Option<String>,
}

impl Checked for CommentUpdate {}

// ---------------------------------------------------------------- paging

#[derive(Debug, Clone, Copy, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// Case-insensitive substring match.
    pub search: Option<String>,
}

impl SearchQuery {
    pub fn term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

impl PageParams {
    pub fn window(&self) -> Window {
        Window {
            offset: self.offset.unwrap_or(0),
            limit: self.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[aliases(
    UserPage = Page<UserRead>,
    TaxonPage = Page<Taxon>,
    TitlePage = Page<TitleRead>,
    ReviewPage = Page<ReviewRead>,
    CommentPage = Page<CommentRead>
)]
pub struct Page<T> {
    pub count: usize,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

/// Absolute request URL split into base and the query pairs other than
/// `limit`/`offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUrl {
    base: String,
    query: Vec<(String, String)>,
}

impl PageUrl {
    pub fn new(base: impl Into<String>, query_string: &str) -> Self {
        let query = query_string
            .split('&')
            .filter(|kv| !kv.is_empty())
            .filter_map(|kv| {
                let (k, v) = kv.split_once('=').unwrap_or((kv, ""));
                let k = urlencoding::decode(&k.replace('+', " ")).ok()?.into_owned();
                let v = urlencoding::decode(&v.replace('+', " ")).ok()?.into_owned();
                (k != "limit" && k != "offset").then_some((k, v))
            })
            .collect();
        Self { base: base.into(), query }
    }

    pub fn from_request(req: &HttpRequest) -> Self {
        let info = req.connection_info();
        Self::new(format!("{}://{}{}", info.scheme(), info.host(), req.path()), req.query_string())
    }

    fn with(&self, limit: usize, offset: Option<usize>) -> String {
        let mut pairs: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        pairs.push(format!("limit={limit}"));
        if let Some(offset) = offset {
            pairs.push(format!("offset={offset}"));
        }
        format!("{}?{}", self.base, pairs.join("&"))
    }
}

impl<T> Page<T> {
    pub fn new<S>(slice: Slice<S>, window: Window, url: &PageUrl) -> Self
    where
        T: From<S>,
    {
        let Window { offset, limit } = window;
        let next = (offset.saturating_add(limit) < slice.total).then(|| url.with(limit, Some(offset + limit)));
        let previous = (offset > 0).then(|| {
            if offset <= limit {
                url.with(limit, None)
            } else {
                url.with(limit, Some(offset - limit))
            }
        });
        Page { count: slice.total, next, previous, results: slice.items.into_iter().map(T::from).collect() }
    }
}
