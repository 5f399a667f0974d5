use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::AppConfig;
use crate::models::*;

/// Uniqueness constraints of the storage schema. Names match the DDL in
/// `migrations/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    UsersUsername,
    UsersEmail,
    UsersUsernameEmail,
    CategoriesSlug,
    GenresSlug,
    GenreTitlePair,
    ReviewsTitleAuthor,
}

impl Constraint {
    const ALL: [Constraint; 7] = [
        Constraint::UsersUsername,
        Constraint::UsersEmail,
        Constraint::UsersUsernameEmail,
        Constraint::CategoriesSlug,
        Constraint::GenresSlug,
        Constraint::GenreTitlePair,
        Constraint::ReviewsTitleAuthor,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Constraint::UsersUsername => "users_username_key",
            Constraint::UsersEmail => "users_email_key",
            Constraint::UsersUsernameEmail => "users_username_email_key",
            Constraint::CategoriesSlug => "categories_slug_key",
            Constraint::GenresSlug => "genres_slug_key",
            Constraint::GenreTitlePair => "genre_title_pair_key",
            Constraint::ReviewsTitleAuthor => "reviews_title_author_key",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Request field the violation is reported against.
    pub const fn field(self) -> &'static str {
        match self {
            Constraint::UsersUsername | Constraint::UsersUsernameEmail => "username",
            Constraint::UsersEmail => "email",
            Constraint::CategoriesSlug | Constraint::GenresSlug => "slug",
            Constraint::GenreTitlePair => "genre",
            Constraint::ReviewsTitleAuthor => "non_field_errors",
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            Constraint::UsersUsername | Constraint::UsersUsernameEmail => "This username is already taken",
            Constraint::UsersEmail => "This email is already registered",
            Constraint::CategoriesSlug => "A category with this slug already exists",
            Constraint::GenresSlug => "A genre with this slug already exists",
            Constraint::GenreTitlePair => "The genre is already linked to this title",
            Constraint::ReviewsTitleAuthor => "You have already reviewed this title",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("constraint {} violated", .0.name())]
    Conflict(Constraint),
    #[error("storage failure: {0}")]
    Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Mean of review scores rounded to one decimal place.
pub fn round_rating(mean: f64) -> f64 {
    (mean * 10.0).round() / 10.0
}

pub fn average_rating(scores: impl IntoIterator<Item = i32>) -> Option<f64> {
    let (sum, n) = scores.into_iter().fold((0i64, 0i64), |(s, n), x| (s + i64::from(x), n + 1));
    (n > 0).then(|| round_rating(sum as f64 / n as f64))
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn list_users(&self, search: Option<&str>, window: Window) -> RepoResult<Slice<User>>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    async fn find_user(&self, username: &str) -> RepoResult<User>;
    async fn find_user_by_email(&self, email: &str) -> RepoResult<User>;
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<User>;
    async fn record_login(&self, id: Id, at: DateTime<Utc>) -> RepoResult<User>;
    /// Also removes the user's reviews and comments.
    async fn delete_user(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait CategoryRepo: Send + Sync {
    async fn list_categories(&self, search: Option<&str>, window: Window) -> RepoResult<Slice<Category>>;
    async fn get_category(&self, slug: &str) -> RepoResult<Category>;
    async fn create_category(&self, new: Taxon) -> RepoResult<Category>;
    /// Titles in the category survive with no category.
    async fn delete_category(&self, slug: &str) -> RepoResult<()>;
}

#[async_trait]
pub trait GenreRepo: Send + Sync {
    async fn list_genres(&self, search: Option<&str>, window: Window) -> RepoResult<Slice<Genre>>;
    async fn get_genre(&self, slug: &str) -> RepoResult<Genre>;
    async fn create_genre(&self, new: Taxon) -> RepoResult<Genre>;
    /// Drops the genre's title links; titles survive.
    async fn delete_genre(&self, slug: &str) -> RepoResult<()>;
}

#[async_trait]
pub trait TitleRepo: Send + Sync {
    async fn list_titles(&self, filter: &TitleFilter, window: Window) -> RepoResult<Slice<TitleDetail>>;
    async fn get_title(&self, id: Id) -> RepoResult<TitleDetail>;
    async fn create_title(&self, new: NewTitle) -> RepoResult<TitleDetail>;
    async fn update_title(&self, id: Id, upd: UpdateTitle) -> RepoResult<TitleDetail>;
    async fn link_genre(&self, link: GenreTitle) -> RepoResult<()>;
    /// Cascades to genre links, reviews and their comments.
    async fn delete_title(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait ReviewRepo: Send + Sync {
    async fn list_reviews(&self, title_id: Id, window: Window) -> RepoResult<Slice<Authored<Review>>>;
    async fn get_review(&self, title_id: Id, id: Id) -> RepoResult<Authored<Review>>;
    async fn find_review_by_author(&self, title_id: Id, author_id: Id) -> RepoResult<Option<Review>>;
    async fn create_review(&self, new: NewReview) -> RepoResult<Authored<Review>>;
    async fn update_review(&self, title_id: Id, id: Id, upd: UpdateReview) -> RepoResult<Authored<Review>>;
    /// Cascades to the review's comments.
    async fn delete_review(&self, title_id: Id, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn list_comments(&self, review_id: Id, window: Window) -> RepoResult<Slice<Authored<Comment>>>;
    async fn get_comment(&self, review_id: Id, id: Id) -> RepoResult<Authored<Comment>>;
    async fn create_comment(&self, new: NewComment) -> RepoResult<Authored<Comment>>;
    async fn update_comment(&self, review_id: Id, id: Id, upd: UpdateComment) -> RepoResult<Authored<Comment>>;
    async fn delete_comment(&self, review_id: Id, id: Id) -> RepoResult<()>;
}

pub trait Repo: UserRepo + CategoryRepo + GenreRepo + TitleRepo + ReviewRepo + CommentRepo {}

impl<T> Repo for T where T: UserRepo + CategoryRepo + GenreRepo + TitleRepo + ReviewRepo + CommentRepo {}

#[cfg(not(any(feature = "inmem-store", feature = "postgres-store")))]
compile_error!("enable one of the `inmem-store` or `postgres-store` features");

/// Build the storage backend selected at compile time. Postgres wins when
/// both features are enabled.
#[cfg(feature = "postgres-store")]
pub async fn from_config(config: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use sqlx::postgres::PgPoolOptions;
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set for postgres-store"))?;
    let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Using Postgres repository backend");
    Ok(Arc::new(pg::PgRepo::new(pool)))
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
pub async fn from_config(config: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    tracing::info!(dir = %config.data_dir.display(), "Using in-memory repository backend");
    Ok(Arc::new(inmem::InMemRepo::open(&config.data_dir)))
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::{BTreeMap, BTreeSet};
    use std::path::{Path, PathBuf};
    use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

    const SNAPSHOT_FILE: &str = "state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: BTreeMap<Id, User>,
        categories: BTreeMap<Id, Category>,
        genres: BTreeMap<Id, Genre>,
        titles: BTreeMap<Id, Title>,
        genre_titles: BTreeSet<(Id, Id)>, // (title_id, genre_id)
        reviews: BTreeMap<Id, Review>,
        comments: BTreeMap<Id, Comment>,
        next_id: Id,
    }

    impl State {
        fn next_id(&mut self) -> Id {
            self.next_id += 1;
            self.next_id
        }

        fn username(&self, id: Id) -> String {
            self.users.get(&id).map(|u| u.username.clone()).unwrap_or_default()
        }

        fn authored<T: Clone>(&self, item: &T, author_id: Id) -> Authored<T> {
            Authored { item: item.clone(), author: self.username(author_id) }
        }

        fn genres_of(&self, title_id: Id) -> Vec<&Genre> {
            let mut genres: Vec<&Genre> = self
                .genre_titles
                .range((title_id, Id::MIN)..=(title_id, Id::MAX))
                .filter_map(|(_, g)| self.genres.get(g))
                .collect();
            genres.sort_by(|a, b| a.taxon.name.cmp(&b.taxon.name));
            genres
        }

        fn detail(&self, title: &Title) -> TitleDetail {
            TitleDetail {
                title: title.clone(),
                category: title
                    .category_id
                    .and_then(|id| self.categories.get(&id))
                    .map(|c| c.taxon.clone()),
                genres: self.genres_of(title.id).into_iter().map(|g| g.taxon.clone()).collect(),
                rating: average_rating(
                    self.reviews.values().filter(|r| r.title_id == title.id).map(|r| r.score),
                ),
            }
        }

        fn check_user_unique(&self, username: &str, email: &str, except: Option<Id>) -> RepoResult<()> {
            let others = || self.users.values().filter(|u| Some(u.id) != except);
            if others().any(|u| u.username == username) {
                return Err(RepoError::Conflict(Constraint::UsersUsername));
            }
            if others().any(|u| u.email == email) {
                return Err(RepoError::Conflict(Constraint::UsersEmail));
            }
            Ok(())
        }

        fn check_genres(&self, ids: &[Id]) -> RepoResult<()> {
            if ids.iter().all(|id| self.genres.contains_key(id)) {
                Ok(())
            } else {
                Err(RepoError::NotFound)
            }
        }

        fn check_category(&self, id: Option<Id>) -> RepoResult<()> {
            match id {
                Some(id) if !self.categories.contains_key(&id) => Err(RepoError::NotFound),
                _ => Ok(()),
            }
        }

        fn remove_review(&mut self, id: Id) {
            self.reviews.remove(&id);
            self.comments.retain(|_, c| c.review_id != id);
        }

        fn review_in(&self, title_id: Id, id: Id) -> RepoResult<&Review> {
            self.reviews
                .get(&id)
                .filter(|r| r.title_id == title_id)
                .ok_or(RepoError::NotFound)
        }

        fn comment_in(&self, review_id: Id, id: Id) -> RepoResult<&Comment> {
            self.comments
                .get(&id)
                .filter(|c| c.review_id == review_id)
                .ok_or(RepoError::NotFound)
        }
    }

    fn contains_ci(haystack: &str, needle: &str) -> bool {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    }

    /// Taxonomy lists are ordered by name, descending.
    fn taxon_slice<T: Clone>(
        items: impl Iterator<Item = T>,
        taxon: impl Fn(&T) -> &Taxon,
        search: Option<&str>,
        window: Window,
    ) -> Slice<T> {
        let mut all: Vec<T> = items
            .filter(|t| search.map_or(true, |q| contains_ci(&taxon(t).name, q)))
            .collect();
        all.sort_by(|a, b| taxon(b).name.cmp(&taxon(a).name));
        Slice::cut(all, window)
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        /// Store without persistence.
        pub fn ephemeral() -> Self {
            Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None }
        }

        /// Store persisted as a JSON snapshot inside `dir`, loaded if present.
        pub fn open(dir: &Path) -> Self {
            let path = dir.join(SNAPSHOT_FILE);
            let state = Self::load_state_from(&path);
            Self { state: Arc::new(RwLock::new(state)), snapshot_path: Some(Arc::new(path)) }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        tracing::info!("Loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse snapshot '{}': {e}. Starting empty.", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    tracing::info!("No snapshot at '{}': {e}. Starting empty.", path.display());
                    State::default()
                }
            }
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        /// Write the snapshot. Called with the write lock held so snapshots land in mutation order.
        fn persist(&self, state: &State) {
            let Some(path) = self.snapshot_path.as_deref() else { return };
            let bytes = match serde_json::to_vec_pretty(state) {
                Ok(bytes) => bytes,
                Err(e) => return tracing::error!("Failed to encode snapshot: {e}"),
            };
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            let tmp = path.with_extension("json.tmp");
            if let Err(e) = std::fs::write(&tmp, bytes).and_then(|_| std::fs::rename(&tmp, path)) {
                tracing::error!("Failed to write snapshot '{}': {e}", path.display());
            }
        }

        /// Run a mutation and persist it under the same write lock.
        fn mutate<T>(&self, f: impl FnOnce(&mut State) -> RepoResult<T>) -> RepoResult<T> {
            let mut s = self.write()?;
            let out = f(&mut s)?;
            self.persist(&s);
            Ok(out)
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::ephemeral()
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn list_users(&self, search: Option<&str>, window: Window) -> RepoResult<Slice<User>> {
            let s = self.read()?;
            let all = s
                .users
                .values()
                .filter(|u| search.map_or(true, |q| contains_ci(&u.username, q)))
                .cloned()
                .collect();
            Ok(Slice::cut(all, window))
        }

        async fn get_user(&self, id: Id) -> RepoResult<User> {
            self.read()?.users.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn find_user(&self, username: &str) -> RepoResult<User> {
            let s = self.read()?;
            s.users.values().find(|u| u.username == username).cloned().ok_or(RepoError::NotFound)
        }

        async fn find_user_by_email(&self, email: &str) -> RepoResult<User> {
            let s = self.read()?;
            s.users.values().find(|u| u.email == email).cloned().ok_or(RepoError::NotFound)
        }

        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            self.mutate(|s| {
                s.check_user_unique(&new.username, &new.email, None)?;
                let id = s.next_id();
                let user = User {
                    id,
                    username: new.username,
                    email: new.email,
                    first_name: new.first_name,
                    last_name: new.last_name,
                    bio: new.bio,
                    role: new.role,
                    is_superuser: new.is_superuser,
                    last_login: None,
                    date_joined: Utc::now(),
                };
                s.users.insert(id, user.clone());
                Ok(user)
            })
        }

        async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<User> {
            self.mutate(|s| {
                let current = s.users.get(&id).ok_or(RepoError::NotFound)?;
                let username = upd.username.as_deref().unwrap_or(&current.username).to_string();
                let email = upd.email.as_deref().unwrap_or(&current.email).to_string();
                s.check_user_unique(&username, &email, Some(id))?;

                let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
                user.username = username;
                user.email = email;
                if let Some(v) = upd.first_name { user.first_name = v; }
                if let Some(v) = upd.last_name { user.last_name = v; }
                if let Some(v) = upd.bio { user.bio = v; }
                if let Some(v) = upd.role { user.role = v; }
                Ok(user.clone())
            })
        }

        async fn record_login(&self, id: Id, at: DateTime<Utc>) -> RepoResult<User> {
            self.mutate(|s| {
                let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
                user.last_login = Some(at);
                Ok(user.clone())
            })
        }

        async fn delete_user(&self, id: Id) -> RepoResult<()> {
            self.mutate(|s| {
                s.users.remove(&id).ok_or(RepoError::NotFound)?;
                let authored: Vec<Id> = s.reviews.values().filter(|r| r.post.author_id == id).map(|r| r.id).collect();
                for review_id in authored {
                    s.remove_review(review_id);
                }
                s.comments.retain(|_, c| c.post.author_id != id);
                Ok(())
            })
        }
    }

    #[async_trait]
    impl CategoryRepo for InMemRepo {
        async fn list_categories(&self, search: Option<&str>, window: Window) -> RepoResult<Slice<Category>> {
            let s = self.read()?;
            Ok(taxon_slice(s.categories.values().cloned(), |c| &c.taxon, search, window))
        }

        async fn get_category(&self, slug: &str) -> RepoResult<Category> {
            let s = self.read()?;
            s.categories.values().find(|c| c.taxon.slug == slug).cloned().ok_or(RepoError::NotFound)
        }

        async fn create_category(&self, new: Taxon) -> RepoResult<Category> {
            self.mutate(|s| {
                if s.categories.values().any(|c| c.taxon.slug == new.slug) {
                    return Err(RepoError::Conflict(Constraint::CategoriesSlug));
                }
                let id = s.next_id();
                let category = Category { id, taxon: new };
                s.categories.insert(id, category.clone());
                Ok(category)
            })
        }

        async fn delete_category(&self, slug: &str) -> RepoResult<()> {
            self.mutate(|s| {
                let id = s
                    .categories
                    .values()
                    .find(|c| c.taxon.slug == slug)
                    .map(|c| c.id)
                    .ok_or(RepoError::NotFound)?;
                s.categories.remove(&id);
                for title in s.titles.values_mut().filter(|t| t.category_id == Some(id)) {
                    title.category_id = None;
                }
                Ok(())
            })
        }
    }

    #[async_trait]
    impl GenreRepo for InMemRepo {
        async fn list_genres(&self, search: Option<&str>, window: Window) -> RepoResult<Slice<Genre>> {
            let s = self.read()?;
            Ok(taxon_slice(s.genres.values().cloned(), |g| &g.taxon, search, window))
        }

        async fn get_genre(&self, slug: &str) -> RepoResult<Genre> {
            let s = self.read()?;
            s.genres.values().find(|g| g.taxon.slug == slug).cloned().ok_or(RepoError::NotFound)
        }

        async fn create_genre(&self, new: Taxon) -> RepoResult<Genre> {
            self.mutate(|s| {
                if s.genres.values().any(|g| g.taxon.slug == new.slug) {
                    return Err(RepoError::Conflict(Constraint::GenresSlug));
                }
                let id = s.next_id();
                let genre = Genre { id, taxon: new };
                s.genres.insert(id, genre.clone());
                Ok(genre)
            })
        }

        async fn delete_genre(&self, slug: &str) -> RepoResult<()> {
            self.mutate(|s| {
                let id = s
                    .genres
                    .values()
                    .find(|g| g.taxon.slug == slug)
                    .map(|g| g.id)
                    .ok_or(RepoError::NotFound)?;
                s.genres.remove(&id);
                s.genre_titles.retain(|(_, genre_id)| *genre_id != id);
                Ok(())
            })
        }
    }

    #[async_trait]
    impl TitleRepo for InMemRepo {
        async fn list_titles(&self, filter: &TitleFilter, window: Window) -> RepoResult<Slice<TitleDetail>> {
            let s = self.read()?;
            let mut all: Vec<TitleDetail> = s
                .titles
                .values()
                .filter(|t| filter.year.map_or(true, |y| t.year == y))
                .filter(|t| filter.name.as_deref().map_or(true, |q| contains_ci(&t.name, q)))
                .map(|t| s.detail(t))
                .filter(|d| {
                    filter
                        .category
                        .as_deref()
                        .map_or(true, |slug| d.category.as_ref().is_some_and(|c| c.slug == slug))
                })
                .filter(|d| filter.genre.as_deref().map_or(true, |slug| d.genres.iter().any(|g| g.slug == slug)))
                .collect();

            let category_slug = |d: &TitleDetail| d.category.as_ref().map(|c| c.slug.clone());
            let genre_slug = |d: &TitleDetail| d.genres.iter().map(|g| g.slug.clone()).min();
            all.sort_by(|a, b| {
                let ord = match filter.order {
                    TitleOrder::Year => a.title.year.cmp(&b.title.year),
                    TitleOrder::YearDesc => b.title.year.cmp(&a.title.year),
                    TitleOrder::Name => a.title.name.cmp(&b.title.name),
                    TitleOrder::NameDesc => b.title.name.cmp(&a.title.name),
                    TitleOrder::CategorySlug => category_slug(a).cmp(&category_slug(b)),
                    TitleOrder::CategorySlugDesc => category_slug(b).cmp(&category_slug(a)),
                    TitleOrder::GenreSlug => genre_slug(a).cmp(&genre_slug(b)),
                    TitleOrder::GenreSlugDesc => genre_slug(b).cmp(&genre_slug(a)),
                };
                ord.then(a.title.id.cmp(&b.title.id))
            });
            Ok(Slice::cut(all, window))
        }

        async fn get_title(&self, id: Id) -> RepoResult<TitleDetail> {
            let s = self.read()?;
            s.titles.get(&id).map(|t| s.detail(t)).ok_or(RepoError::NotFound)
        }

        async fn create_title(&self, new: NewTitle) -> RepoResult<TitleDetail> {
            self.mutate(|s| {
                s.check_category(new.category_id)?;
                s.check_genres(&new.genre_ids)?;
                let id = s.next_id();
                let title = Title {
                    id,
                    name: new.name,
                    year: new.year,
                    description: new.description,
                    category_id: new.category_id,
                };
                s.titles.insert(id, title.clone());
                s.genre_titles.extend(new.genre_ids.into_iter().map(|g| (id, g)));
                Ok(s.detail(&title))
            })
        }

        async fn update_title(&self, id: Id, upd: UpdateTitle) -> RepoResult<TitleDetail> {
            self.mutate(|s| {
                if !s.titles.contains_key(&id) {
                    return Err(RepoError::NotFound);
                }
                if let Some(category_id) = upd.category_id {
                    s.check_category(category_id)?;
                }
                if let Some(ref genre_ids) = upd.genre_ids {
                    s.check_genres(genre_ids)?;
                }

                let title = s.titles.get_mut(&id).ok_or(RepoError::NotFound)?;
                if let Some(name) = upd.name { title.name = name; }
                if let Some(year) = upd.year { title.year = year; }
                if let Some(description) = upd.description { title.description = Some(description); }
                if let Some(category_id) = upd.category_id { title.category_id = category_id; }
                let title = title.clone();

                if let Some(genre_ids) = upd.genre_ids {
                    s.genre_titles.retain(|(t, _)| *t != id);
                    s.genre_titles.extend(genre_ids.into_iter().map(|g| (id, g)));
                }
                Ok(s.detail(&title))
            })
        }

        async fn link_genre(&self, link: GenreTitle) -> RepoResult<()> {
            self.mutate(|s| {
                if !s.titles.contains_key(&link.title_id) || !s.genres.contains_key(&link.genre_id) {
                    return Err(RepoError::NotFound);
                }
                if !s.genre_titles.insert((link.title_id, link.genre_id)) {
                    return Err(RepoError::Conflict(Constraint::GenreTitlePair));
                }
                Ok(())
            })
        }

        async fn delete_title(&self, id: Id) -> RepoResult<()> {
            self.mutate(|s| {
                s.titles.remove(&id).ok_or(RepoError::NotFound)?;
                s.genre_titles.retain(|(t, _)| *t != id);
                let reviews: Vec<Id> = s.reviews.values().filter(|r| r.title_id == id).map(|r| r.id).collect();
                for review_id in reviews {
                    s.remove_review(review_id);
                }
                Ok(())
            })
        }
    }

    #[async_trait]
    impl ReviewRepo for InMemRepo {
        async fn list_reviews(&self, title_id: Id, window: Window) -> RepoResult<Slice<Authored<Review>>> {
            let s = self.read()?;
            if !s.titles.contains_key(&title_id) {
                return Err(RepoError::NotFound);
            }
            let mut all: Vec<&Review> = s.reviews.values().filter(|r| r.title_id == title_id).collect();
            all.sort_by(|a, b| b.post.pub_date.cmp(&a.post.pub_date).then(b.id.cmp(&a.id)));
            let all = all.into_iter().map(|r| s.authored(r, r.post.author_id)).collect();
            Ok(Slice::cut(all, window))
        }

        async fn get_review(&self, title_id: Id, id: Id) -> RepoResult<Authored<Review>> {
            let s = self.read()?;
            let review = s.review_in(title_id, id)?;
            Ok(s.authored(review, review.post.author_id))
        }

        async fn find_review_by_author(&self, title_id: Id, author_id: Id) -> RepoResult<Option<Review>> {
            let s = self.read()?;
            Ok(s
                .reviews
                .values()
                .find(|r| r.title_id == title_id && r.post.author_id == author_id)
                .cloned())
        }

        async fn create_review(&self, new: NewReview) -> RepoResult<Authored<Review>> {
            self.mutate(|s| {
                if !s.titles.contains_key(&new.title_id) || !s.users.contains_key(&new.author_id) {
                    return Err(RepoError::NotFound);
                }
                if s.reviews.values().any(|r| r.title_id == new.title_id && r.post.author_id == new.author_id) {
                    return Err(RepoError::Conflict(Constraint::ReviewsTitleAuthor));
                }
                let id = s.next_id();
                let review = Review {
                    id,
                    title_id: new.title_id,
                    score: new.score,
                    post: Post {
                        text: new.text,
                        author_id: new.author_id,
                        pub_date: new.pub_date.unwrap_or_else(Utc::now),
                    },
                };
                s.reviews.insert(id, review.clone());
                Ok(s.authored(&review, review.post.author_id))
            })
        }

        async fn update_review(&self, title_id: Id, id: Id, upd: UpdateReview) -> RepoResult<Authored<Review>> {
            self.mutate(|s| {
                s.review_in(title_id, id)?;
                let review = s.reviews.get_mut(&id).ok_or(RepoError::NotFound)?;
                if let Some(text) = upd.text { review.post.text = text; }
                if let Some(score) = upd.score { review.score = score; }
                let review = review.clone();
                Ok(s.authored(&review, review.post.author_id))
            })
        }

        async fn delete_review(&self, title_id: Id, id: Id) -> RepoResult<()> {
            self.mutate(|s| {
                s.review_in(title_id, id)?;
                s.remove_review(id);
                Ok(())
            })
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn list_comments(&self, review_id: Id, window: Window) -> RepoResult<Slice<Authored<Comment>>> {
            let s = self.read()?;
            if !s.reviews.contains_key(&review_id) {
                return Err(RepoError::NotFound);
            }
            let mut all: Vec<&Comment> = s.comments.values().filter(|c| c.review_id == review_id).collect();
            all.sort_by(|a, b| b.post.pub_date.cmp(&a.post.pub_date).then(b.id.cmp(&a.id)));
            let all = all.into_iter().map(|c| s.authored(c, c.post.author_id)).collect();
            Ok(Slice::cut(all, window))
        }

        async fn get_comment(&self, review_id: Id, id: Id) -> RepoResult<Authored<Comment>> {
            let s = self.read()?;
            let comment = s.comment_in(review_id, id)?;
            Ok(s.authored(comment, comment.post.author_id))
        }

        async fn create_comment(&self, new: NewComment) -> RepoResult<Authored<Comment>> {
            self.mutate(|s| {
                if !s.reviews.contains_key(&new.review_id) || !s.users.contains_key(&new.author_id) {
                    return Err(RepoError::NotFound);
                }
                let id = s.next_id();
                let comment = Comment {
                    id,
                    review_id: new.review_id,
                    post: Post {
                        text: new.text,
                        author_id: new.author_id,
                        pub_date: new.pub_date.unwrap_or_else(Utc::now),
                    },
                };
                s.comments.insert(id, comment.clone());
                Ok(s.authored(&comment, comment.post.author_id))
            })
        }

        async fn update_comment(&self, review_id: Id, id: Id, upd: UpdateComment) -> RepoResult<Authored<Comment>> {
            self.mutate(|s| {
                s.comment_in(review_id, id)?;
                let comment = s.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
                if let Some(text) = upd.text { comment.post.text = text; }
                let comment = comment.clone();
                Ok(s.authored(&comment, comment.post.author_id))
            })
        }

        async fn delete_comment(&self, review_id: Id, id: Id) -> RepoResult<()> {
            self.mutate(|s| {
                s.comment_in(review_id, id)?;
                s.comments.remove(&id);
                Ok(())
            })
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use std::collections::HashMap;
    use sqlx::{Pool, Postgres};

    const USER_COLUMNS: &str =
        "id, username, email, first_name, last_name, bio, role, is_superuser, last_login, date_joined";

    const TITLE_SELECT: &str = r#"
        SELECT t.id, t.name, t.year, t.description, t.category_id,
               c.name AS category_name, c.slug AS category_slug,
               (SELECT AVG(r.score)::float8 FROM reviews r WHERE r.title_id = t.id) AS rating
        FROM titles t
        LEFT JOIN categories c ON c.id = t.category_id
    "#;

    const TITLE_WHERE: &str = r#"
        WHERE ($1::text IS NULL OR c.slug = $1)
          AND ($2::text IS NULL OR EXISTS (
                SELECT 1 FROM genre_title gt JOIN genres g ON g.id = gt.genre_id
                WHERE gt.title_id = t.id AND g.slug = $2))
          AND ($3::text IS NULL OR strpos(lower(t.name), lower($3)) > 0)
          AND ($4::int IS NULL OR t.year = $4)
    "#;

    const REVIEW_SELECT: &str = r#"
        SELECT r.id, r.title_id, r.score, r.text, r.author_id, r.pub_date, u.username AS author
        FROM reviews r JOIN users u ON u.id = r.author_id
    "#;

    const COMMENT_SELECT: &str = r#"
        SELECT c.id, c.review_id, c.text, c.author_id, c.pub_date, u.username AS author
        FROM comments c JOIN users u ON u.id = c.author_id
    "#;

    fn map_err(e: sqlx::Error) -> RepoError {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) => {
                if db.is_unique_violation() {
                    match db.constraint().and_then(Constraint::from_name) {
                        Some(c) => RepoError::Conflict(c),
                        None => RepoError::Internal(db.to_string()),
                    }
                } else if db.is_foreign_key_violation() {
                    RepoError::NotFound
                } else {
                    RepoError::Internal(db.to_string())
                }
            }
            other => RepoError::Internal(other.to_string()),
        }
    }

    fn limit(window: Window) -> (i64, i64) {
        (
            i64::try_from(window.limit).unwrap_or(i64::MAX),
            i64::try_from(window.offset).unwrap_or(i64::MAX),
        )
    }

    fn order_clause(order: TitleOrder) -> &'static str {
        match order {
            TitleOrder::YearDesc => "t.year DESC, t.id",
            TitleOrder::Year => "t.year, t.id",
            TitleOrder::Name => "t.name, t.id",
            TitleOrder::NameDesc => "t.name DESC, t.id",
            TitleOrder::CategorySlug => "c.slug NULLS FIRST, t.id",
            TitleOrder::CategorySlugDesc => "c.slug DESC NULLS LAST, t.id",
            TitleOrder::GenreSlug => {
                "(SELECT MIN(g.slug) FROM genre_title gt JOIN genres g ON g.id = gt.genre_id WHERE gt.title_id = t.id) NULLS FIRST, t.id"
            }
            TitleOrder::GenreSlugDesc => {
                "(SELECT MIN(g.slug) FROM genre_title gt JOIN genres g ON g.id = gt.genre_id WHERE gt.title_id = t.id) DESC NULLS LAST, t.id"
            }
        }
    }

    #[derive(sqlx::FromRow)]
    struct TitleRow {
        #[sqlx(flatten)]
        title: Title,
        category_name: Option<String>,
        category_slug: Option<String>,
        rating: Option<f64>,
    }

    #[derive(sqlx::FromRow)]
    struct AuthoredReviewRow {
        #[sqlx(flatten)]
        review: Review,
        author: String,
    }

    #[derive(sqlx::FromRow)]
    struct AuthoredCommentRow {
        #[sqlx(flatten)]
        comment: Comment,
        author: String,
    }

    impl From<AuthoredReviewRow> for Authored<Review> {
        fn from(row: AuthoredReviewRow) -> Self {
            Authored { item: row.review, author: row.author }
        }
    }

    impl From<AuthoredCommentRow> for Authored<Comment> {
        fn from(row: AuthoredCommentRow) -> Self {
            Authored { item: row.comment, author: row.author }
        }
    }

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool }
        }

        async fn details(&self, rows: Vec<TitleRow>) -> RepoResult<Vec<TitleDetail>> {
            let ids: Vec<Id> = rows.iter().map(|r| r.title.id).collect();
            let links = sqlx::query_as::<_, (Id, String, String)>(
                "SELECT gt.title_id, g.name, g.slug FROM genre_title gt JOIN genres g ON g.id = gt.genre_id \
                 WHERE gt.title_id = ANY($1) ORDER BY g.name",
            )
            .bind(&ids)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            let mut genres: HashMap<Id, Vec<Taxon>> = HashMap::new();
            for (title_id, name, slug) in links {
                genres.entry(title_id).or_default().push(Taxon { name, slug });
            }
            Ok(rows
                .into_iter()
                .map(|row| TitleDetail {
                    genres: genres.remove(&row.title.id).unwrap_or_default(),
                    category: row
                        .category_name
                        .zip(row.category_slug)
                        .map(|(name, slug)| Taxon { name, slug }),
                    rating: row.rating.map(round_rating),
                    title: row.title,
                })
                .collect())
        }

        async fn title_detail(&self, id: Id) -> RepoResult<TitleDetail> {
            let row = sqlx::query_as::<_, TitleRow>(&format!("{TITLE_SELECT} WHERE t.id = $1"))
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
            self.details(vec![row]).await?.pop().ok_or(RepoError::NotFound)
        }

        async fn ensure_exists(&self, table: &'static str, id: Id) -> RepoResult<()> {
            let found: bool = sqlx::query_scalar(&format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE id = $1)"))
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
            if found { Ok(()) } else { Err(RepoError::NotFound) }
        }

        async fn taxa<T>(&self, table: &'static str, search: Option<&str>, window: Window) -> RepoResult<Slice<T>>
        where
            T: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin,
        {
            let (lim, off) = limit(window);
            let filter = "WHERE ($1::text IS NULL OR strpos(lower(name), lower($1)) > 0)";
            let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} {filter}"))
                .bind(search)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
            let items = sqlx::query_as::<_, T>(&format!(
                "SELECT id, name, slug FROM {table} {filter} ORDER BY name DESC, id LIMIT $2 OFFSET $3"
            ))
            .bind(search)
            .bind(lim)
            .bind(off)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            Ok(Slice { total: total as usize, items })
        }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn list_users(&self, search: Option<&str>, window: Window) -> RepoResult<Slice<User>> {
            let (lim, off) = limit(window);
            let filter = "WHERE ($1::text IS NULL OR strpos(lower(username), lower($1)) > 0)";
            let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM users {filter}"))
                .bind(search)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
            let items = sqlx::query_as::<_, User>(&format!(
                "SELECT {USER_COLUMNS} FROM users {filter} ORDER BY id LIMIT $2 OFFSET $3"
            ))
            .bind(search)
            .bind(lim)
            .bind(off)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            Ok(Slice { total: total as usize, items })
        }

        async fn get_user(&self, id: Id) -> RepoResult<User> {
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn find_user(&self, username: &str) -> RepoResult<User> {
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1"))
                .bind(username)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn find_user_by_email(&self, email: &str) -> RepoResult<User> {
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
                .bind(email)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            sqlx::query_as::<_, User>(&format!(
                "INSERT INTO users (username, email, first_name, last_name, bio, role, is_superuser) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7) RETURNING {USER_COLUMNS}"
            ))
            .bind(&new.username)
            .bind(&new.email)
            .bind(&new.first_name)
            .bind(&new.last_name)
            .bind(&new.bio)
            .bind(new.role.as_str())
            .bind(new.is_superuser)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<User> {
            sqlx::query_as::<_, User>(&format!(
                "UPDATE users SET username = COALESCE($2, username), email = COALESCE($3, email), \
                 first_name = COALESCE($4, first_name), last_name = COALESCE($5, last_name), \
                 bio = COALESCE($6, bio), role = COALESCE($7, role) WHERE id = $1 RETURNING {USER_COLUMNS}"
            ))
            .bind(id)
            .bind(upd.username.as_deref())
            .bind(upd.email.as_deref())
            .bind(upd.first_name.as_deref())
            .bind(upd.last_name.as_deref())
            .bind(upd.bio.as_deref())
            .bind(upd.role.map(|r| r.as_str()))
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn record_login(&self, id: Id, at: DateTime<Utc>) -> RepoResult<User> {
            sqlx::query_as::<_, User>(&format!(
                "UPDATE users SET last_login = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
            ))
            .bind(id)
            .bind(at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn delete_user(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            if res.rows_affected() == 0 { Err(RepoError::NotFound) } else { Ok(()) }
        }
    }

    #[async_trait]
    impl CategoryRepo for PgRepo {
        async fn list_categories(&self, search: Option<&str>, window: Window) -> RepoResult<Slice<Category>> {
            self.taxa("categories", search, window).await
        }

        async fn get_category(&self, slug: &str) -> RepoResult<Category> {
            sqlx::query_as::<_, Category>("SELECT id, name, slug FROM categories WHERE slug = $1")
                .bind(slug)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn create_category(&self, new: Taxon) -> RepoResult<Category> {
            sqlx::query_as::<_, Category>("INSERT INTO categories (name, slug) VALUES ($1,$2) RETURNING id, name, slug")
                .bind(&new.name)
                .bind(&new.slug)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn delete_category(&self, slug: &str) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM categories WHERE slug = $1")
                .bind(slug)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            if res.rows_affected() == 0 { Err(RepoError::NotFound) } else { Ok(()) }
        }
    }

    #[async_trait]
    impl GenreRepo for PgRepo {
        async fn list_genres(&self, search: Option<&str>, window: Window) -> RepoResult<Slice<Genre>> {
            self.taxa("genres", search, window).await
        }

        async fn get_genre(&self, slug: &str) -> RepoResult<Genre> {
            sqlx::query_as::<_, Genre>("SELECT id, name, slug FROM genres WHERE slug = $1")
                .bind(slug)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn create_genre(&self, new: Taxon) -> RepoResult<Genre> {
            sqlx::query_as::<_, Genre>("INSERT INTO genres (name, slug) VALUES ($1,$2) RETURNING id, name, slug")
                .bind(&new.name)
                .bind(&new.slug)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn delete_genre(&self, slug: &str) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM genres WHERE slug = $1")
                .bind(slug)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            if res.rows_affected() == 0 { Err(RepoError::NotFound) } else { Ok(()) }
        }
    }

    #[async_trait]
    impl TitleRepo for PgRepo {
        async fn list_titles(&self, filter: &TitleFilter, window: Window) -> RepoResult<Slice<TitleDetail>> {
            let (lim, off) = limit(window);
            let total: i64 = sqlx::query_scalar(&format!(
                "SELECT COUNT(*) FROM titles t LEFT JOIN categories c ON c.id = t.category_id {TITLE_WHERE}"
            ))
            .bind(filter.category.as_deref())
            .bind(filter.genre.as_deref())
            .bind(filter.name.as_deref())
            .bind(filter.year)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
            let rows = sqlx::query_as::<_, TitleRow>(&format!(
                "{TITLE_SELECT} {TITLE_WHERE} ORDER BY {} LIMIT $5 OFFSET $6",
                order_clause(filter.order)
            ))
            .bind(filter.category.as_deref())
            .bind(filter.genre.as_deref())
            .bind(filter.name.as_deref())
            .bind(filter.year)
            .bind(lim)
            .bind(off)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            Ok(Slice { total: total as usize, items: self.details(rows).await? })
        }

        async fn get_title(&self, id: Id) -> RepoResult<TitleDetail> {
            self.title_detail(id).await
        }

        async fn create_title(&self, new: NewTitle) -> RepoResult<TitleDetail> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            let id: Id = sqlx::query_scalar(
                "INSERT INTO titles (name, year, description, category_id) VALUES ($1,$2,$3,$4) RETURNING id",
            )
            .bind(&new.name)
            .bind(new.year)
            .bind(new.description.as_deref())
            .bind(new.category_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_err)?;
            for genre_id in &new.genre_ids {
                sqlx::query("INSERT INTO genre_title (genre_id, title_id) VALUES ($1,$2) ON CONFLICT DO NOTHING")
                    .bind(genre_id)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_err)?;
            }
            tx.commit().await.map_err(map_err)?;
            self.title_detail(id).await
        }

        async fn update_title(&self, id: Id, upd: UpdateTitle) -> RepoResult<TitleDetail> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            let res = sqlx::query(
                "UPDATE titles SET name = COALESCE($2, name), year = COALESCE($3, year), \
                 description = COALESCE($4, description), \
                 category_id = CASE WHEN $5 THEN $6 ELSE category_id END WHERE id = $1",
            )
            .bind(id)
            .bind(upd.name.as_deref())
            .bind(upd.year)
            .bind(upd.description.as_deref())
            .bind(upd.category_id.is_some())
            .bind(upd.category_id.flatten())
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            if let Some(genre_ids) = upd.genre_ids {
                sqlx::query("DELETE FROM genre_title WHERE title_id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_err)?;
                for genre_id in genre_ids {
                    sqlx::query("INSERT INTO genre_title (genre_id, title_id) VALUES ($1,$2) ON CONFLICT DO NOTHING")
                        .bind(genre_id)
                        .bind(id)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_err)?;
                }
            }
            tx.commit().await.map_err(map_err)?;
            self.title_detail(id).await
        }

        async fn link_genre(&self, link: GenreTitle) -> RepoResult<()> {
            sqlx::query("INSERT INTO genre_title (genre_id, title_id) VALUES ($1,$2)")
                .bind(link.genre_id)
                .bind(link.title_id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            Ok(())
        }

        async fn delete_title(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM titles WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            if res.rows_affected() == 0 { Err(RepoError::NotFound) } else { Ok(()) }
        }
    }

    #[async_trait]
    impl ReviewRepo for PgRepo {
        async fn list_reviews(&self, title_id: Id, window: Window) -> RepoResult<Slice<Authored<Review>>> {
            self.ensure_exists("titles", title_id).await?;
            let (lim, off) = limit(window);
            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews WHERE title_id = $1")
                .bind(title_id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
            let rows = sqlx::query_as::<_, AuthoredReviewRow>(&format!(
                "{REVIEW_SELECT} WHERE r.title_id = $1 ORDER BY r.pub_date DESC, r.id DESC LIMIT $2 OFFSET $3"
            ))
            .bind(title_id)
            .bind(lim)
            .bind(off)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            Ok(Slice { total: total as usize, items: rows.into_iter().map(Into::into).collect() })
        }

        async fn get_review(&self, title_id: Id, id: Id) -> RepoResult<Authored<Review>> {
            sqlx::query_as::<_, AuthoredReviewRow>(&format!("{REVIEW_SELECT} WHERE r.title_id = $1 AND r.id = $2"))
                .bind(title_id)
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map(Into::into)
                .map_err(map_err)
        }

        async fn find_review_by_author(&self, title_id: Id, author_id: Id) -> RepoResult<Option<Review>> {
            sqlx::query_as::<_, Review>(
                "SELECT id, title_id, score, text, author_id, pub_date FROM reviews WHERE title_id = $1 AND author_id = $2",
            )
            .bind(title_id)
            .bind(author_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn create_review(&self, new: NewReview) -> RepoResult<Authored<Review>> {
            let id: Id = sqlx::query_scalar(
                "INSERT INTO reviews (title_id, author_id, text, score, pub_date) \
                 VALUES ($1,$2,$3,$4,COALESCE($5, now())) RETURNING id",
            )
            .bind(new.title_id)
            .bind(new.author_id)
            .bind(&new.text)
            .bind(new.score)
            .bind(new.pub_date)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
            self.get_review(new.title_id, id).await
        }

        async fn update_review(&self, title_id: Id, id: Id, upd: UpdateReview) -> RepoResult<Authored<Review>> {
            let res = sqlx::query(
                "UPDATE reviews SET text = COALESCE($3, text), score = COALESCE($4, score) WHERE title_id = $1 AND id = $2",
            )
            .bind(title_id)
            .bind(id)
            .bind(upd.text.as_deref())
            .bind(upd.score)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            self.get_review(title_id, id).await
        }

        async fn delete_review(&self, title_id: Id, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM reviews WHERE title_id = $1 AND id = $2")
                .bind(title_id)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            if res.rows_affected() == 0 { Err(RepoError::NotFound) } else { Ok(()) }
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn list_comments(&self, review_id: Id, window: Window) -> RepoResult<Slice<Authored<Comment>>> {
            self.ensure_exists("reviews", review_id).await?;
            let (lim, off) = limit(window);
            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE review_id = $1")
                .bind(review_id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
            let rows = sqlx::query_as::<_, AuthoredCommentRow>(&format!(
                "{COMMENT_SELECT} WHERE c.review_id = $1 ORDER BY c.pub_date DESC, c.id DESC LIMIT $2 OFFSET $3"
            ))
            .bind(review_id)
            .bind(lim)
            .bind(off)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            Ok(Slice { total: total as usize, items: rows.into_iter().map(Into::into).collect() })
        }

        async fn get_comment(&self, review_id: Id, id: Id) -> RepoResult<Authored<Comment>> {
            sqlx::query_as::<_, AuthoredCommentRow>(&format!("{COMMENT_SELECT} WHERE c.review_id = $1 AND c.id = $2"))
                .bind(review_id)
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map(Into::into)
                .map_err(map_err)
        }

        async fn create_comment(&self, new: NewComment) -> RepoResult<Authored<Comment>> {
            let id: Id = sqlx::query_scalar(
                "INSERT INTO comments (review_id, author_id, text, pub_date) \
                 VALUES ($1,$2,$3,COALESCE($4, now())) RETURNING id",
            )
            .bind(new.review_id)
            .bind(new.author_id)
            .bind(&new.text)
            .bind(new.pub_date)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
            self.get_comment(new.review_id, id).await
        }

        async fn update_comment(&self, review_id: Id, id: Id, upd: UpdateComment) -> RepoResult<Authored<Comment>> {
            let res = sqlx::query("UPDATE comments SET text = COALESCE($3, text) WHERE review_id = $1 AND id = $2")
                .bind(review_id)
                .bind(id)
                .bind(upd.text.as_deref())
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            self.get_comment(review_id, id).await
        }

        async fn delete_comment(&self, review_id: Id, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM comments WHERE review_id = $1 AND id = $2")
                .bind(review_id)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            if res.rows_affected() == 0 { Err(RepoError::NotFound) } else { Ok(()) }
        }
    }
}
