use crate::auth::Role;
use crate::error::ApiErrorBody;
use crate::models::Taxon;
use crate::representation::*;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::signup,
        crate::routes::obtain_token,
        crate::routes::list_users,
        crate::routes::create_user,
        crate::routes::get_me,
        crate::routes::update_me,
        crate::routes::get_user,
        crate::routes::update_user,
        crate::routes::delete_user,
        crate::routes::list_categories,
        crate::routes::create_category,
        crate::routes::delete_category,
        crate::routes::list_genres,
        crate::routes::create_genre,
        crate::routes::delete_genre,
        crate::routes::list_titles,
        crate::routes::create_title,
        crate::routes::get_title,
        crate::routes::update_title,
        crate::routes::delete_title,
        crate::routes::list_reviews,
        crate::routes::create_review,
        crate::routes::get_review,
        crate::routes::update_review,
        crate::routes::delete_review,
        crate::routes::list_comments,
        crate::routes::create_comment,
        crate::routes::get_comment,
        crate::routes::update_comment,
        crate::routes::delete_comment,
    ),
    components(schemas(
        Role, Taxon, ApiErrorBody,
        SignupRequest, TokenRequest, TokenResponse,
        UserRead, UserCreate, UserUpdate,
        TaxonCreate, TitleRead, TitleCreate, TitleUpdate,
        ReviewRead, ReviewCreate, ReviewUpdate,
        CommentRead, CommentCreate, CommentUpdate,
        UserPage, TaxonPage, TitlePage, ReviewPage, CommentPage
    )),
    tags(
        (name = "auth", description = "Signup and token exchange"),
        (name = "users", description = "User administration and own profile"),
        (name = "catalogue", description = "Categories and genres"),
        (name = "titles", description = "Reviewable works"),
        (name = "reviews", description = "Reviews of a title"),
        (name = "comments", description = "Comments on a review"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_resource() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for p in [
            "/api/v1/auth/signup",
            "/api/v1/users/me",
            "/api/v1/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
        ] {
            assert!(paths.iter().any(|k| k.as_str() == p), "{p} missing");
        }
    }

    #[test]
    fn path_parameters_are_described() {
        let doc = ApiDoc::openapi();
        let item = &doc.paths.paths["/api/v1/titles/{title_id}/reviews/{review_id}/comments/{comment_id}"];
        let get = &item.operations[&utoipa::openapi::PathItemType::Get];
        let params = get.parameters.as_ref().expect("parameters");
        let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["title_id", "review_id", "comment_id"]);
        assert!(params.iter().all(|p| p.description.is_some()));
    }
}
