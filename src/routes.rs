use std::collections::BTreeSet;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use tracing::{info, warn};

use crate::auth::{Actor, Identity, TokenIssuer};
use crate::config::AppConfig;
use crate::confirmation::{ConfirmationCodes, HmacCodes};
use crate::error::{ApiError, ApiErrorBody};
use crate::mailer::{build_mailer, confirmation_email, Mailer};
use crate::models::*;
use crate::policy::{self, Operation};
use crate::repo::{Constraint, Repo, RepoError, RepoResult};
use crate::representation::*;

pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub tokens: TokenIssuer,
    pub codes: Arc<dyn ConfirmationCodes>,
    pub mailer: Arc<dyn Mailer>,
    pub mail_from: String,
}

impl AppState {
    pub fn new(config: &AppConfig, repo: Arc<dyn Repo>) -> anyhow::Result<Self> {
        let codes = HmacCodes::new(config.jwt_secret.as_bytes(), config.confirmation_ttl_secs)
            .map_err(|e| anyhow::anyhow!("confirmation key: {e}"))?;
        Ok(Self {
            repo,
            tokens: TokenIssuer::new(&config.jwt_secret, config.token_ttl),
            codes: Arc::new(codes),
            mailer: build_mailer(config),
            mail_from: config.mail_from.clone(),
        })
    }
}

/// Cross-origin access is granted to `FRONTEND_URL` only.
pub fn cors(frontend_url: Option<&str>) -> Cors {
    let cors = Cors::default()
        .allow_any_header()
        .allowed_methods(["GET", "POST", "PATCH", "DELETE", "OPTIONS"])
        .max_age(3600);
    match frontend_url {
        Some(origin) => cors.allowed_origin(origin),
        None => cors,
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| ApiError::field("body", err.to_string()).into()))
        .app_data(web::QueryConfig::default().error_handler(|err, _req| ApiError::field("query", err.to_string()).into()))
        .app_data(web::PathConfig::default().error_handler(|_err, _req| ApiError::NotFound.into()))
        .service(
            web::scope("/api/v1")
                .service(web::resource("/auth/signup").route(web::post().to(signup)))
                .service(web::resource("/auth/token").route(web::post().to(obtain_token)))
                .service(
                    web::resource("/users")
                        .route(web::get().to(list_users))
                        .route(web::post().to(create_user)),
                )
                // must precede /users/{username}
                .service(
                    web::resource("/users/me")
                        .route(web::get().to(get_me))
                        .route(web::patch().to(update_me)),
                )
                .service(
                    web::resource("/users/{username}")
                        .route(web::get().to(get_user))
                        .route(web::patch().to(update_user))
                        .route(web::delete().to(delete_user)),
                )
                .service(
                    web::resource("/categories")
                        .route(web::get().to(list_categories))
                        .route(web::post().to(create_category)),
                )
                .service(web::resource("/categories/{slug}").route(web::delete().to(delete_category)))
                .service(
                    web::resource("/genres")
                        .route(web::get().to(list_genres))
                        .route(web::post().to(create_genre)),
                )
                .service(web::resource("/genres/{slug}").route(web::delete().to(delete_genre)))
                .service(
                    web::resource("/titles")
                        .route(web::get().to(list_titles))
                        .route(web::post().to(create_title)),
                )
                .service(
                    web::resource("/titles/{title_id}")
                        .route(web::get().to(get_title))
                        .route(web::patch().to(update_title))
                        .route(web::delete().to(delete_title)),
                )
                .service(
                    web::resource("/titles/{title_id}/reviews")
                        .route(web::get().to(list_reviews))
                        .route(web::post().to(create_review)),
                )
                .service(
                    web::resource("/titles/{title_id}/reviews/{review_id}")
                        .route(web::get().to(get_review))
                        .route(web::patch().to(update_review))
                        .route(web::delete().to(delete_review)),
                )
                .service(
                    web::resource("/titles/{title_id}/reviews/{review_id}/comments")
                        .route(web::get().to(list_comments))
                        .route(web::post().to(create_comment)),
                )
                .service(
                    web::resource("/titles/{title_id}/reviews/{review_id}/comments/{comment_id}")
                        .route(web::get().to(get_comment))
                        .route(web::patch().to(update_comment))
                        .route(web::delete().to(delete_comment)),
                ),
        );
}

/// `NotFound` becomes `None`; other storage errors propagate.
fn optional<T>(res: RepoResult<T>) -> Result<Option<T>, ApiError> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(RepoError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn conflict(c: Constraint) -> ApiError {
    RepoError::Conflict(c).into()
}

/// Identity required before the target is loaded; role checks come after.
fn signed_in(actor: &Actor) -> Result<&Identity, ApiError> {
    actor.identity().ok_or(ApiError::Unauthorized)
}

// ------------------------------------------------------------------ auth

#[utoipa::path(
    post,
    path = "/api/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 200, description = "Confirmation code sent", body = SignupRequest),
        (status = 400, description = "Invalid or already used username/email", body = ApiErrorBody)
    ),
    tag = "auth"
)]
pub async fn signup(data: web::Data<AppState>, payload: web::Json<SignupRequest>) -> Result<HttpResponse, ApiError> {
    let payload = checked(payload.into_inner())?;
    let by_name = optional(data.repo.find_user(&payload.username).await)?;
    let by_email = optional(data.repo.find_user_by_email(&payload.email).await)?;

    let user = match (by_name, by_email) {
        (Some(existing), _) if existing.email == payload.email => existing,
        (_, Some(_)) => return Err(conflict(Constraint::UsersEmail)),
        (Some(_), None) => return Err(conflict(Constraint::UsersUsername)),
        (None, None) => {
            let new = NewUser { username: payload.username.clone(), email: payload.email.clone(), ..Default::default() };
            let user = data.repo.create_user(new).await?;
            info!(user = %user.username, "signup: new user");
            user
        }
    };

    let email = confirmation_email(&data.mail_from, &user.email, &data.codes.issue(&user));
    let mailer = data.mailer.clone();
    actix_web::rt::spawn(async move {
        if let Err(e) = mailer.send(&email).await {
            warn!(to = %email.to, "confirmation mail failed: {e}");
        }
    });
    Ok(HttpResponse::Ok().json(payload))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/token",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Bearer token issued", body = TokenResponse),
        (status = 400, description = "Invalid confirmation code", body = ApiErrorBody),
        (status = 404, description = "Unknown user", body = ApiErrorBody)
    ),
    tag = "auth"
)]
pub async fn obtain_token(data: web::Data<AppState>, payload: web::Json<TokenRequest>) -> Result<HttpResponse, ApiError> {
    let payload = checked(payload.into_inner())?;
    let user = data.repo.find_user(&payload.username).await?;
    if !data.codes.verify(&user, &payload.confirmation_code) {
        warn!(user = %user.username, "token: confirmation code rejected");
        return Err(ApiError::InvalidCredentials);
    }
    let user = data.repo.record_login(user.id, Utc::now()).await?;
    let token = data.tokens.issue(&user).map_err(|e| {
        tracing::error!("token encoding failed: {e}");
        ApiError::Internal
    })?;
    info!(user = %user.username, "token issued");
    Ok(HttpResponse::Ok().json(TokenResponse { token }))
}

// ------------------------------------------------------------------ users

#[utoipa::path(
    get,
    path = "/api/v1/users",
    params(PageParams, SearchQuery),
    responses(
        (status = 200, description = "Users page", body = UserPage),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admins only")
    ),
    tag = "users"
)]
pub async fn list_users(
    req: HttpRequest,
    actor: Actor,
    data: web::Data<AppState>,
    page: web::Query<PageParams>,
    search: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    policy::authorize(&actor, Operation::ManageUsers)?;
    let window = page.window();
    let slice = data.repo.list_users(search.term(), window).await?;
    Ok(HttpResponse::Ok().json(Page::<UserRead>::new(slice, window, &PageUrl::from_request(&req))))
}

#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = UserCreate,
    responses(
        (status = 201, description = "User created", body = UserRead),
        (status = 400, description = "Invalid input or duplicate", body = ApiErrorBody),
        (status = 403, description = "Admins only")
    ),
    tag = "users"
)]
pub async fn create_user(
    actor: Actor,
    data: web::Data<AppState>,
    payload: web::Json<UserCreate>,
) -> Result<HttpResponse, ApiError> {
    policy::authorize(&actor, Operation::ManageUsers)?;
    let payload = checked(payload.into_inner())?;
    let user = data.repo.create_user(payload.into()).await?;
    Ok(HttpResponse::Created().json(UserRead::from(user)))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{username}",
    params(("username" = String, Path, description = "Username")),
    responses((status = 200, body = UserRead), (status = 403), (status = 404)),
    tag = "users"
)]
pub async fn get_user(actor: Actor, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    policy::authorize(&actor, Operation::ManageUsers)?;
    let user = data.repo.find_user(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(UserRead::from(user)))
}

#[utoipa::path(
    patch,
    path = "/api/v1/users/{username}",
    params(("username" = String, Path, description = "Username")),
    request_body = UserUpdate,
    responses((status = 200, body = UserRead), (status = 400, body = ApiErrorBody), (status = 403), (status = 404)),
    tag = "users"
)]
pub async fn update_user(
    actor: Actor,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UserUpdate>,
) -> Result<HttpResponse, ApiError> {
    policy::authorize(&actor, Operation::ManageUsers)?;
    let payload = checked(payload.into_inner())?;
    let user = data.repo.find_user(&path.into_inner()).await?;
    let user = data.repo.update_user(user.id, payload.into()).await?;
    Ok(HttpResponse::Ok().json(UserRead::from(user)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/{username}",
    params(("username" = String, Path, description = "Username")),
    responses((status = 204, description = "Deleted with their reviews and comments"), (status = 403), (status = 404)),
    tag = "users"
)]
pub async fn delete_user(actor: Actor, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    policy::authorize(&actor, Operation::ManageUsers)?;
    let user = data.repo.find_user(&path.into_inner()).await?;
    data.repo.delete_user(user.id).await?;
    info!(user = %user.username, "user deleted");
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    responses((status = 200, body = UserRead), (status = 401)),
    tag = "users"
)]
pub async fn get_me(actor: Actor, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let me = policy::require(&actor, Operation::AccessOwnProfile)?;
    let user = data.repo.get_user(me.id).await?;
    Ok(HttpResponse::Ok().json(UserRead::from(user)))
}

/// Same as the admin update except that `role` is ignored.
#[utoipa::path(
    patch,
    path = "/api/v1/users/me",
    request_body = UserUpdate,
    responses((status = 200, body = UserRead), (status = 400, body = ApiErrorBody), (status = 401)),
    tag = "users"
)]
pub async fn update_me(
    actor: Actor,
    data: web::Data<AppState>,
    payload: web::Json<UserUpdate>,
) -> Result<HttpResponse, ApiError> {
    let me = policy::require(&actor, Operation::AccessOwnProfile)?;
    let payload = checked(payload.into_inner())?;
    let mut upd = UpdateUser::from(payload);
    upd.role = None;
    let user = data.repo.update_user(me.id, upd).await?;
    Ok(HttpResponse::Ok().json(UserRead::from(user)))
}

// ------------------------------------------------------------------ categories & genres

#[utoipa::path(
    get,
    path = "/api/v1/categories",
    params(PageParams, SearchQuery),
    responses((status = 200, body = TaxonPage)),
    tag = "catalogue"
)]
pub async fn list_categories(
    req: HttpRequest,
    data: web::Data<AppState>,
    page: web::Query<PageParams>,
    search: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    let window = page.window();
    let slice = data.repo.list_categories(search.term(), window).await?;
    let slice = slice.map(|c| c.taxon);
    Ok(HttpResponse::Ok().json(Page::<Taxon>::new(slice, window, &PageUrl::from_request(&req))))
}

#[utoipa::path(
    post,
    path = "/api/v1/categories",
    request_body = TaxonCreate,
    responses((status = 201, body = Taxon), (status = 400, body = ApiErrorBody), (status = 401), (status = 403)),
    tag = "catalogue"
)]
pub async fn create_category(
    actor: Actor,
    data: web::Data<AppState>,
    payload: web::Json<TaxonCreate>,
) -> Result<HttpResponse, ApiError> {
    policy::authorize(&actor, Operation::ManageCatalogue)?;
    let payload = checked(payload.into_inner())?;
    if optional(data.repo.get_category(&payload.slug).await)?.is_some() {
        return Err(conflict(Constraint::CategoriesSlug));
    }
    let category = data.repo.create_category(payload.into()).await?;
    Ok(HttpResponse::Created().json(category.taxon))
}

#[utoipa::path(
    delete,
    path = "/api/v1/categories/{slug}",
    params(("slug" = String, Path, description = "Category slug")),
    responses((status = 204, description = "Deleted; titles keep no category"), (status = 401), (status = 403), (status = 404)),
    tag = "catalogue"
)]
pub async fn delete_category(actor: Actor, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    policy::authorize(&actor, Operation::ManageCatalogue)?;
    data.repo.delete_category(&path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/genres",
    params(PageParams, SearchQuery),
    responses((status = 200, body = TaxonPage)),
    tag = "catalogue"
)]
pub async fn list_genres(
    req: HttpRequest,
    data: web::Data<AppState>,
    page: web::Query<PageParams>,
    search: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    let window = page.window();
    let slice = data.repo.list_genres(search.term(), window).await?;
    let slice = slice.map(|g| g.taxon);
    Ok(HttpResponse::Ok().json(Page::<Taxon>::new(slice, window, &PageUrl::from_request(&req))))
}

#[utoipa::path(
    post,
    path = "/api/v1/genres",
    request_body = TaxonCreate,
    responses((status = 201, body = Taxon), (status = 400, body = ApiErrorBody), (status = 401), (status = 403)),
    tag = "catalogue"
)]
pub async fn create_genre(
    actor: Actor,
    data: web::Data<AppState>,
    payload: web::Json<TaxonCreate>,
) -> Result<HttpResponse, ApiError> {
    policy::authorize(&actor, Operation::ManageCatalogue)?;
    let payload = checked(payload.into_inner())?;
    if optional(data.repo.get_genre(&payload.slug).await)?.is_some() {
        return Err(conflict(Constraint::GenresSlug));
    }
    let genre = data.repo.create_genre(payload.into()).await?;
    Ok(HttpResponse::Created().json(genre.taxon))
}

#[utoipa::path(
    delete,
    path = "/api/v1/genres/{slug}",
    params(("slug" = String, Path, description = "Genre slug")),
    responses((status = 204, description = "Deleted; titles keep their other genres"), (status = 401), (status = 403), (status = 404)),
    tag = "catalogue"
)]
pub async fn delete_genre(actor: Actor, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    policy::authorize(&actor, Operation::ManageCatalogue)?;
    data.repo.delete_genre(&path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ------------------------------------------------------------------ titles

async fn resolve_category(data: &AppState, slug: Option<&str>) -> Result<Option<Id>, ApiError> {
    let Some(slug) = slug else { return Ok(None) };
    match optional(data.repo.get_category(slug).await)? {
        Some(c) => Ok(Some(c.id)),
        None => Err(ApiError::field("category", format!("Unknown category slug '{slug}'"))),
    }
}

async fn resolve_genres(data: &AppState, slugs: &[String]) -> Result<Vec<Id>, ApiError> {
    let mut ids = Vec::with_capacity(slugs.len());
    let mut unknown = Vec::new();
    for slug in slugs.iter().collect::<BTreeSet<_>>() {
        match optional(data.repo.get_genre(slug).await)? {
            Some(g) => ids.push(g.id),
            None => unknown.push(format!("Unknown genre slug '{slug}'")),
        }
    }
    if unknown.is_empty() {
        Ok(ids)
    } else {
        Err(ApiError::Validation([("genre".to_string(), unknown)].into()))
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/titles",
    params(PageParams, TitleQuery),
    responses((status = 200, body = TitlePage)),
    tag = "titles"
)]
pub async fn list_titles(
    req: HttpRequest,
    data: web::Data<AppState>,
    page: web::Query<PageParams>,
    query: web::Query<TitleQuery>,
) -> Result<HttpResponse, ApiError> {
    let window = page.window();
    let filter = TitleFilter::from(query.into_inner());
    let slice = data.repo.list_titles(&filter, window).await?;
    Ok(HttpResponse::Ok().json(Page::<TitleRead>::new(slice, window, &PageUrl::from_request(&req))))
}

#[utoipa::path(
    post,
    path = "/api/v1/titles",
    request_body = TitleCreate,
    responses((status = 201, body = TitleRead), (status = 400, body = ApiErrorBody), (status = 401), (status = 403)),
    tag = "titles"
)]
pub async fn create_title(
    actor: Actor,
    data: web::Data<AppState>,
    payload: web::Json<TitleCreate>,
) -> Result<HttpResponse, ApiError> {
    policy::authorize(&actor, Operation::ManageCatalogue)?;
    let payload = checked(payload.into_inner())?;
    let new = NewTitle {
        category_id: resolve_category(&data, payload.category.as_deref()).await?,
        genre_ids: resolve_genres(&data, &payload.genre).await?,
        name: payload.name,
        year: payload.year,
        description: payload.description,
    };
    let title = data.repo.create_title(new).await?;
    Ok(HttpResponse::Created().json(TitleRead::from(title)))
}

#[utoipa::path(
    get,
    path = "/api/v1/titles/{title_id}",
    params(("title_id" = Id, Path, description = "Title id")),
    responses((status = 200, body = TitleRead), (status = 404)),
    tag = "titles"
)]
pub async fn get_title(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let title = data.repo.get_title(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(TitleRead::from(title)))
}

#[utoipa::path(
    patch,
    path = "/api/v1/titles/{title_id}",
    params(("title_id" = Id, Path, description = "Title id")),
    request_body = TitleUpdate,
    responses((status = 200, body = TitleRead), (status = 400, body = ApiErrorBody), (status = 401), (status = 403), (status = 404)),
    tag = "titles"
)]
pub async fn update_title(
    actor: Actor,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<TitleUpdate>,
) -> Result<HttpResponse, ApiError> {
    policy::authorize(&actor, Operation::ManageCatalogue)?;
    let payload = checked(payload.into_inner())?;
    let category_id = match payload.category {
        Some(slug) => Some(resolve_category(&data, slug.as_deref()).await?),
        None => None,
    };
    let genre_ids = match payload.genre {
        Some(slugs) => Some(resolve_genres(&data, &slugs).await?),
        None => None,
    };
    let upd = UpdateTitle { name: payload.name, year: payload.year, description: payload.description, category_id, genre_ids };
    let title = data.repo.update_title(path.into_inner(), upd).await?;
    Ok(HttpResponse::Ok().json(TitleRead::from(title)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/titles/{title_id}",
    params(("title_id" = Id, Path, description = "Title id")),
    responses((status = 204, description = "Deleted with its reviews and comments"), (status = 401), (status = 403), (status = 404)),
    tag = "titles"
)]
pub async fn delete_title(actor: Actor, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    policy::authorize(&actor, Operation::ManageCatalogue)?;
    data.repo.delete_title(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ------------------------------------------------------------------ reviews

#[utoipa::path(
    get,
    path = "/api/v1/titles/{title_id}/reviews",
    params(("title_id" = Id, Path, description = "Title id"), PageParams),
    responses((status = 200, body = ReviewPage), (status = 404)),
    tag = "reviews"
)]
pub async fn list_reviews(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    page: web::Query<PageParams>,
) -> Result<HttpResponse, ApiError> {
    let window = page.window();
    let slice = data.repo.list_reviews(path.into_inner(), window).await?;
    Ok(HttpResponse::Ok().json(Page::<ReviewRead>::new(slice, window, &PageUrl::from_request(&req))))
}

#[utoipa::path(
    post,
    path = "/api/v1/titles/{title_id}/reviews",
    params(("title_id" = Id, Path, description = "Title id")),
    request_body = ReviewCreate,
    responses(
        (status = 201, body = ReviewRead),
        (status = 400, description = "Invalid input or title already reviewed", body = ApiErrorBody),
        (status = 401),
        (status = 404)
    ),
    tag = "reviews"
)]
pub async fn create_review(
    actor: Actor,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ReviewCreate>,
) -> Result<HttpResponse, ApiError> {
    let me = policy::require(&actor, Operation::CreateFeedback)?;
    let payload = checked(payload.into_inner())?;
    let title_id = path.into_inner();
    data.repo.get_title(title_id).await?;
    if data.repo.find_review_by_author(title_id, me.id).await?.is_some() {
        return Err(conflict(Constraint::ReviewsTitleAuthor));
    }
    let review = data
        .repo
        .create_review(NewReview { title_id, author_id: me.id, text: payload.text, score: payload.score, pub_date: None })
        .await?;
    Ok(HttpResponse::Created().json(ReviewRead::from(review)))
}

#[utoipa::path(
    get,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}",
    params(("title_id" = Id, Path, description = "Title id"), ("review_id" = Id, Path, description = "Review id")),
    responses((status = 200, body = ReviewRead), (status = 404)),
    tag = "reviews"
)]
pub async fn get_review(data: web::Data<AppState>, path: web::Path<(Id, Id)>) -> Result<HttpResponse, ApiError> {
    let (title_id, review_id) = path.into_inner();
    let review = data.repo.get_review(title_id, review_id).await?;
    Ok(HttpResponse::Ok().json(ReviewRead::from(review)))
}

#[utoipa::path(
    patch,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}",
    params(("title_id" = Id, Path, description = "Title id"), ("review_id" = Id, Path, description = "Review id")),
    request_body = ReviewUpdate,
    responses((status = 200, body = ReviewRead), (status = 400, body = ApiErrorBody), (status = 401), (status = 403), (status = 404)),
    tag = "reviews"
)]
pub async fn update_review(
    actor: Actor,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id)>,
    payload: web::Json<ReviewUpdate>,
) -> Result<HttpResponse, ApiError> {
    signed_in(&actor)?;
    let (title_id, review_id) = path.into_inner();
    let current = data.repo.get_review(title_id, review_id).await?;
    policy::authorize(&actor, Operation::ModifyFeedback { author: current.item.post.author_id })?;
    let payload = checked(payload.into_inner())?;
    let upd = UpdateReview { text: payload.text, score: payload.score };
    let review = data.repo.update_review(title_id, review_id, upd).await?;
    Ok(HttpResponse::Ok().json(ReviewRead::from(review)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}",
    params(("title_id" = Id, Path, description = "Title id"), ("review_id" = Id, Path, description = "Review id")),
    responses((status = 204), (status = 401), (status = 403), (status = 404)),
    tag = "reviews"
)]
pub async fn delete_review(actor: Actor, data: web::Data<AppState>, path: web::Path<(Id, Id)>) -> Result<HttpResponse, ApiError> {
    signed_in(&actor)?;
    let (title_id, review_id) = path.into_inner();
    let current = data.repo.get_review(title_id, review_id).await?;
    policy::authorize(&actor, Operation::ModifyFeedback { author: current.item.post.author_id })?;
    data.repo.delete_review(title_id, review_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ------------------------------------------------------------------ comments

#[utoipa::path(
    get,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}/comments",
    params(("title_id" = Id, Path, description = "Title id"), ("review_id" = Id, Path, description = "Review id"), PageParams),
    responses((status = 200, body = CommentPage), (status = 404)),
    tag = "comments"
)]
pub async fn list_comments(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id)>,
    page: web::Query<PageParams>,
) -> Result<HttpResponse, ApiError> {
    let (title_id, review_id) = path.into_inner();
    data.repo.get_review(title_id, review_id).await?;
    let window = page.window();
    let slice = data.repo.list_comments(review_id, window).await?;
    Ok(HttpResponse::Ok().json(Page::<CommentRead>::new(slice, window, &PageUrl::from_request(&req))))
}

#[utoipa::path(
    post,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}/comments",
    params(("title_id" = Id, Path, description = "Title id"), ("review_id" = Id, Path, description = "Review id")),
    request_body = CommentCreate,
    responses((status = 201, body = CommentRead), (status = 400, body = ApiErrorBody), (status = 401), (status = 404)),
    tag = "comments"
)]
pub async fn create_comment(
    actor: Actor,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id)>,
    payload: web::Json<CommentCreate>,
) -> Result<HttpResponse, ApiError> {
    let me = policy::require(&actor, Operation::CreateFeedback)?;
    let payload = checked(payload.into_inner())?;
    let (title_id, review_id) = path.into_inner();
    data.repo.get_review(title_id, review_id).await?;
    let comment = data
        .repo
        .create_comment(NewComment { review_id, author_id: me.id, text: payload.text, pub_date: None })
        .await?;
    Ok(HttpResponse::Created().json(CommentRead::from(comment)))
}

#[utoipa::path(
    get,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
    params(("title_id" = Id, Path, description = "Title id"), ("review_id" = Id, Path, description = "Review id"), ("comment_id" = Id, Path, description = "Comment id")),
    responses((status = 200, body = CommentRead), (status = 404)),
    tag = "comments"
)]
pub async fn get_comment(data: web::Data<AppState>, path: web::Path<(Id, Id, Id)>) -> Result<HttpResponse, ApiError> {
    let (title_id, review_id, comment_id) = path.into_inner();
    data.repo.get_review(title_id, review_id).await?;
    let comment = data.repo.get_comment(review_id, comment_id).await?;
    Ok(HttpResponse::Ok().json(CommentRead::from(comment)))
}

#[utoipa::path(
    patch,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
    params(("title_id" = Id, Path, description = "Title id"), ("review_id" = Id, Path, description = "Review id"), ("comment_id" = Id, Path, description = "Comment id")),
    request_body = CommentUpdate,
    responses((status = 200, body = CommentRead), (status = 400, body = ApiErrorBody), (status = 401), (status = 403), (status = 404)),
    tag = "comments"
)]
pub async fn update_comment(
    actor: Actor,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id, Id)>,
    payload: web::Json<CommentUpdate>,
) -> Result<HttpResponse, ApiError> {
    signed_in(&actor)?;
    let (title_id, review_id, comment_id) = path.into_inner();
    data.repo.get_review(title_id, review_id).await?;
    let current = data.repo.get_comment(review_id, comment_id).await?;
    policy::authorize(&actor, Operation::ModifyFeedback { author: current.item.post.author_id })?;
    let payload = checked(payload.into_inner())?;
    let comment = data.repo.update_comment(review_id, comment_id, UpdateComment { text: payload.text }).await?;
    Ok(HttpResponse::Ok().json(CommentRead::from(comment)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
    params(("title_id" = Id, Path, description = "Title id"), ("review_id" = Id, Path, description = "Review id"), ("comment_id" = Id, Path, description = "Comment id")),
    responses((status = 204), (status = 401), (status = 403), (status = 404)),
    tag = "comments"
)]
pub async fn delete_comment(
    actor: Actor,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id, Id)>,
) -> Result<HttpResponse, ApiError> {
    signed_in(&actor)?;
    let (title_id, review_id, comment_id) = path.into_inner();
    data.repo.get_review(title_id, review_id).await?;
    let current = data.repo.get_comment(review_id, comment_id).await?;
    policy::authorize(&actor, Operation::ModifyFeedback { author: current.item.post.author_id })?;
    data.repo.delete_comment(review_id, comment_id).await?;
    Ok(HttpResponse::NoContent().finish())
}
