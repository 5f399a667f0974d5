#![cfg(feature = "inmem-store")]

mod common;

use actix_web::{test, App};
use chrono::Datelike;
use serde_json::{json, Value};

use ratedb::auth::Role;
use ratedb::{config, cors};
use ratedb::repo::{CommentRepo, UserRepo};

/// Send a request and return the status code and decoded JSON body.
macro_rules! send {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.to_request()).await;
        let status = resp.status().as_u16();
        let body = test::read_body(resp).await;
        let json: Value = if body.is_empty() { Value::Null } else { serde_json::from_slice(&body).unwrap() };
        (status, json)
    }};
}

fn get(uri: &str) -> test::TestRequest {
    test::TestRequest::get().uri(uri)
}

fn post(uri: &str, auth: Option<&str>, body: Value) -> test::TestRequest {
    let req = test::TestRequest::post().uri(uri).set_json(body);
    match auth {
        Some(a) => req.insert_header(("Authorization", a.to_string())),
        None => req,
    }
}

fn patch(uri: &str, auth: Option<&str>, body: Value) -> test::TestRequest {
    let req = test::TestRequest::patch().uri(uri).set_json(body);
    match auth {
        Some(a) => req.insert_header(("Authorization", a.to_string())),
        None => req,
    }
}

fn delete(uri: &str, auth: &str) -> test::TestRequest {
    test::TestRequest::delete().uri(uri).insert_header(("Authorization", auth.to_string()))
}

fn this_year() -> i32 {
    chrono::Utc::now().year()
}

#[actix_web::test]
async fn signup_then_token_then_profile() {
    let (repo, state) = common::state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

    let (status, body) = send!(app, post("/api/v1/auth/signup", None, json!({"username": "reader", "email": "reader@example.com"})));
    assert_eq!(status, 200);
    assert_eq!(body, json!({"username": "reader", "email": "reader@example.com"}));

    let user = repo.find_user("reader").await.unwrap();
    let code = state.codes.issue(&user);

    let (status, _) = send!(app, post("/api/v1/auth/token", None, json!({"username": "reader", "confirmation_code": "1-deadbeef"})));
    assert_eq!(status, 400);

    let (status, body) = send!(app, post("/api/v1/auth/token", None, json!({"username": "reader", "confirmation_code": code})));
    assert_eq!(status, 200);
    let token = body["token"].as_str().unwrap().to_string();

    // single use: login moved last_login
    let (status, _) = send!(app, post("/api/v1/auth/token", None, json!({"username": "reader", "confirmation_code": code})));
    assert_eq!(status, 400);

    let (status, me) = send!(app, get("/api/v1/users/me").insert_header(("Authorization", format!("Bearer {token}"))));
    assert_eq!(status, 200);
    assert_eq!(me["username"], "reader");
    assert_eq!(me["role"], "user");
}

#[actix_web::test]
async fn token_for_unknown_user_is_404() {
    let (_repo, state) = common::state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;
    let (status, _) = send!(app, post("/api/v1/auth/token", None, json!({"username": "ghost", "confirmation_code": "x"})));
    assert_eq!(status, 404);
}

#[actix_web::test]
async fn signup_conflicts_and_validation() {
    let (_repo, state) = common::state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;
    common::member(&state, "alice", Role::User).await;

    // exact pair is reused
    let (status, _) = send!(app, post("/api/v1/auth/signup", None, json!({"username": "alice", "email": "alice@example.com"})));
    assert_eq!(status, 200);

    let (status, body) = send!(app, post("/api/v1/auth/signup", None, json!({"username": "bob", "email": "alice@example.com"})));
    assert_eq!(status, 400);
    assert!(body["fields"]["email"].is_array());

    let (status, body) = send!(app, post("/api/v1/auth/signup", None, json!({"username": "alice", "email": "other@example.com"})));
    assert_eq!(status, 400);
    assert!(body["fields"]["username"].is_array());

    let (status, body) = send!(app, post("/api/v1/auth/signup", None, json!({"username": "me", "email": "me@example.com"})));
    assert_eq!(status, 400);
    assert!(body["fields"]["username"].is_array());

    let (status, body) = send!(app, post("/api/v1/auth/signup", None, json!({"username": "bad name!", "email": "b@example.com"})));
    assert_eq!(status, 400);
    let msg = body["fields"]["username"][0].as_str().unwrap();
    assert!(msg.contains('!'), "{msg}");

    let (status, _) = send!(app, post("/api/v1/auth/signup", None, json!({"username": "carol", "email": "not-an-email"})));
    assert_eq!(status, 400);
}

#[actix_web::test]
async fn catalogue_writes_are_admin_only() {
    let (_repo, state) = common::state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;
    let (_, admin) = common::member(&state, "admin", Role::Admin).await;
    let (_, user) = common::member(&state, "user", Role::User).await;
    let (_, moderator) = common::member(&state, "mod", Role::Moderator).await;
    let film = json!({"name": "Film", "slug": "film"});

    let (status, _) = send!(app, post("/api/v1/categories", None, film.clone()));
    assert_eq!(status, 401);
    let (status, _) = send!(app, post("/api/v1/categories", Some(&user), film.clone()));
    assert_eq!(status, 403);
    let (status, _) = send!(app, post("/api/v1/categories", Some(&moderator), film.clone()));
    assert_eq!(status, 403);
    let (status, body) = send!(app, post("/api/v1/categories", Some(&admin), film.clone()));
    assert_eq!(status, 201);
    assert_eq!(body, film);

    let (status, body) = send!(app, post("/api/v1/categories", Some(&admin), json!({"name": "Other", "slug": "film"})));
    assert_eq!(status, 400);
    assert!(body["fields"]["slug"].is_array());

    let (status, _) = send!(app, post("/api/v1/genres", Some(&admin), json!({"name": "Bad", "slug": "bad slug"})));
    assert_eq!(status, 400);

    let (status, body) = send!(app, get("/api/v1/categories"));
    assert_eq!(status, 200);
    assert_eq!(body["count"], 1);
    assert_eq!(body["results"][0]["slug"], "film");
    assert!(body["next"].is_null());
}

#[actix_web::test]
async fn superuser_flag_grants_admin_rights() {
    let (repo, state) = common::state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;
    let user = repo
        .create_user(ratedb::models::NewUser {
            username: "root".into(),
            email: "root@example.com".into(),
            is_superuser: true,
            ..Default::default()
        })
        .await
        .unwrap();
    let auth = format!("Bearer {}", state.tokens.issue(&user).unwrap());
    let (status, _) = send!(app, post("/api/v1/genres", Some(&auth), json!({"name": "Rock", "slug": "rock"})));
    assert_eq!(status, 201);
}

#[actix_web::test]
async fn rating_is_mean_and_reviews_are_unique_per_author() {
    let (_repo, state) = common::state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;
    let (_, admin) = common::member(&state, "admin", Role::Admin).await;
    let (_, u1) = common::member(&state, "u1", Role::User).await;
    let (_, u2) = common::member(&state, "u2", Role::User).await;

    send!(app, post("/api/v1/categories", Some(&admin), json!({"name": "Book", "slug": "book"})));
    send!(app, post("/api/v1/genres", Some(&admin), json!({"name": "Drama", "slug": "drama"})));
    let (status, title) = send!(app, post(
        "/api/v1/titles",
        Some(&admin),
        json!({"name": "War and Peace", "year": 1869, "category": "book", "genre": ["drama"], "description": "long"})
    ));
    assert_eq!(status, 201);
    assert!(title["rating"].is_null());
    assert_eq!(title["category"], json!({"name": "Book", "slug": "book"}));
    assert_eq!(title["genre"], json!([{"name": "Drama", "slug": "drama"}]));
    let id = title["id"].as_i64().unwrap();

    let reviews = format!("/api/v1/titles/{id}/reviews");
    let (status, review) = send!(app, post(&reviews, Some(&u1), json!({"text": "good", "score": 8, "author": "u2"})));
    assert_eq!(status, 201);
    assert_eq!(review["author"], "u1");
    let (status, _) = send!(app, post(&reviews, Some(&u2), json!({"text": "great", "score": 10})));
    assert_eq!(status, 201);

    let (status, body) = send!(app, post(&reviews, Some(&u1), json!({"text": "again", "score": 3})));
    assert_eq!(status, 400);
    assert!(body["fields"]["non_field_errors"].is_array());

    let (status, _) = send!(app, post(&reviews, Some(&u2), json!({"text": "x", "score": 11})));
    assert_eq!(status, 400);
    let (status, _) = send!(app, post(&reviews, None, json!({"text": "x", "score": 5})));
    assert_eq!(status, 401);

    let (_, title) = send!(app, get(&format!("/api/v1/titles/{id}")));
    assert_eq!(title["rating"].as_f64(), Some(9.0));

    let (_, page) = send!(app, get(&reviews));
    assert_eq!(page["count"], 2);
    // newest first
    assert_eq!(page["results"][0]["author"], "u2");
}

#[actix_web::test]
async fn deleting_a_title_removes_reviews_and_comments() {
    let (repo, state) = common::state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;
    let (_, admin) = common::member(&state, "admin", Role::Admin).await;
    let (_, user) = common::member(&state, "user", Role::User).await;

    let (_, title) = send!(app, post("/api/v1/titles", Some(&admin), json!({"name": "T", "year": 2000})));
    let id = title["id"].as_i64().unwrap();
    let (_, review) = send!(app, post(&format!("/api/v1/titles/{id}/reviews"), Some(&user), json!({"text": "r", "score": 5})));
    let rid = review["id"].as_i64().unwrap();
    let comments = format!("/api/v1/titles/{id}/reviews/{rid}/comments");
    let (status, comment) = send!(app, post(&comments, Some(&user), json!({"text": "c", "review": 999})));
    assert_eq!(status, 201);
    assert_eq!(comment["review"], rid);

    let (status, _) = send!(app, delete(&format!("/api/v1/titles/{id}"), &admin));
    assert_eq!(status, 204);

    let (status, _) = send!(app, get(&format!("/api/v1/titles/{id}/reviews/{rid}")));
    assert_eq!(status, 404);
    assert!(repo.list_comments(rid, ratedb::models::Window::all()).await.is_err());
}

#[actix_web::test]
async fn comment_path_must_match_review_title() {
    let (_repo, state) = common::state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;
    let (_, admin) = common::member(&state, "admin", Role::Admin).await;
    let (_, user) = common::member(&state, "user", Role::User).await;

    let (_, a) = send!(app, post("/api/v1/titles", Some(&admin), json!({"name": "A", "year": 2000})));
    let (_, b) = send!(app, post("/api/v1/titles", Some(&admin), json!({"name": "B", "year": 2001})));
    let (a, b) = (a["id"].as_i64().unwrap(), b["id"].as_i64().unwrap());
    let (_, review) = send!(app, post(&format!("/api/v1/titles/{a}/reviews"), Some(&user), json!({"text": "r", "score": 5})));
    let rid = review["id"].as_i64().unwrap();

    let (status, _) = send!(app, get(&format!("/api/v1/titles/{b}/reviews/{rid}/comments")));
    assert_eq!(status, 404);
    let (status, _) = send!(app, post(&format!("/api/v1/titles/{b}/reviews/{rid}/comments"), Some(&user), json!({"text": "c"})));
    assert_eq!(status, 404);
}

#[actix_web::test]
async fn category_and_genre_deletion_keep_titles() {
    let (_repo, state) = common::state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;
    let (_, admin) = common::member(&state, "admin", Role::Admin).await;

    send!(app, post("/api/v1/categories", Some(&admin), json!({"name": "Film", "slug": "film"})));
    send!(app, post("/api/v1/genres", Some(&admin), json!({"name": "Comedy", "slug": "comedy"})));
    send!(app, post("/api/v1/genres", Some(&admin), json!({"name": "Drama", "slug": "drama"})));
    let (_, title) = send!(app, post(
        "/api/v1/titles",
        Some(&admin),
        json!({"name": "T", "year": 1999, "category": "film", "genre": ["comedy", "drama"]})
    ));
    let id = title["id"].as_i64().unwrap();

    let (status, _) = send!(app, delete("/api/v1/categories/film", &admin));
    assert_eq!(status, 204);
    let (status, _) = send!(app, delete("/api/v1/genres/comedy", &admin));
    assert_eq!(status, 204);
    let (status, _) = send!(app, delete("/api/v1/genres/comedy", &admin));
    assert_eq!(status, 404);

    let (status, title) = send!(app, get(&format!("/api/v1/titles/{id}")));
    assert_eq!(status, 200);
    assert!(title["category"].is_null());
    assert_eq!(title["genre"], json!([{"name": "Drama", "slug": "drama"}]));
}

#[actix_web::test]
async fn feedback_edit_rights() {
    let (_repo, state) = common::state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;
    let (_, admin) = common::member(&state, "admin", Role::Admin).await;
    let (_, author) = common::member(&state, "author", Role::User).await;
    let (_, other) = common::member(&state, "other", Role::User).await;
    let (_, moderator) = common::member(&state, "mod", Role::Moderator).await;

    let (_, title) = send!(app, post("/api/v1/titles", Some(&admin), json!({"name": "T", "year": 2010})));
    let id = title["id"].as_i64().unwrap();
    let (_, review) = send!(app, post(&format!("/api/v1/titles/{id}/reviews"), Some(&author), json!({"text": "mine", "score": 6})));
    let uri = format!("/api/v1/titles/{id}/reviews/{}", review["id"]);

    let (status, _) = send!(app, patch(&uri, None, json!({"text": "anon"})));
    assert_eq!(status, 401);
    let (status, _) = send!(app, patch(&uri, Some(&other), json!({"text": "hijack"})));
    assert_eq!(status, 403);
    let (status, _) = send!(app, delete(&uri, &other));
    assert_eq!(status, 403);

    let (status, body) = send!(app, patch(&uri, Some(&author), json!({"score": 7})));
    assert_eq!(status, 200);
    assert_eq!(body["score"], 7);
    assert_eq!(body["text"], "mine");

    let (status, body) = send!(app, patch(&uri, Some(&moderator), json!({"text": "moderated"})));
    assert_eq!(status, 200);
    assert_eq!(body["text"], "moderated");
    assert_eq!(body["author"], "author");

    let missing = format!("/api/v1/titles/{id}/reviews/424242");
    let (status, _) = send!(app, patch(&missing, Some(&other), json!({"text": "x"})));
    assert_eq!(status, 404);

    let (status, _) = send!(app, delete(&uri, &author));
    assert_eq!(status, 204);
}

#[actix_web::test]
async fn patch_me_keeps_role() {
    let (_repo, state) = common::state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;
    let (_, user) = common::member(&state, "plain", Role::User).await;

    let (status, body) = send!(app, patch("/api/v1/users/me", Some(&user), json!({"role": "admin", "bio": "hello"})));
    assert_eq!(status, 200);
    assert_eq!(body["role"], "user");
    assert_eq!(body["bio"], "hello");

    // still not an admin
    let (status, _) = send!(app, get("/api/v1/users").insert_header(("Authorization", user.clone())));
    assert_eq!(status, 403);
    let (status, _) = send!(app, get("/api/v1/users/me"));
    assert_eq!(status, 401);
}

#[actix_web::test]
async fn admin_manages_users() {
    let (_repo, state) = common::state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;
    let (_, admin) = common::member(&state, "admin", Role::Admin).await;

    let (status, body) = send!(app, post(
        "/api/v1/users",
        Some(&admin),
        json!({"username": "newbie", "email": "newbie@example.com", "role": "moderator"})
    ));
    assert_eq!(status, 201);
    assert_eq!(body["role"], "moderator");

    let (status, _) = send!(app, post("/api/v1/users", Some(&admin), json!({"username": "newbie", "email": "x@example.com"})));
    assert_eq!(status, 400);

    let (status, body) = send!(app, get("/api/v1/users?search=new").insert_header(("Authorization", admin.clone())));
    assert_eq!(status, 200);
    assert_eq!(body["count"], 1);

    let (status, body) = send!(app, patch("/api/v1/users/newbie", Some(&admin), json!({"role": "admin"})));
    assert_eq!(status, 200);
    assert_eq!(body["role"], "admin");

    let (status, _) = send!(app, delete("/api/v1/users/newbie", &admin));
    assert_eq!(status, 204);
    let (status, _) = send!(app, get("/api/v1/users/newbie").insert_header(("Authorization", admin.clone())));
    assert_eq!(status, 404);
}

#[actix_web::test]
async fn title_year_bounds() {
    let (_repo, state) = common::state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;
    let (_, admin) = common::member(&state, "admin", Role::Admin).await;

    let (status, body) = send!(app, post("/api/v1/titles", Some(&admin), json!({"name": "Zero", "year": 0})));
    assert_eq!(status, 400);
    assert!(body["fields"]["year"].is_array());
    let (status, _) = send!(app, post("/api/v1/titles", Some(&admin), json!({"name": "Future", "year": this_year() + 1})));
    assert_eq!(status, 400);
    let (status, title) = send!(app, post("/api/v1/titles", Some(&admin), json!({"name": "Now", "year": this_year()})));
    assert_eq!(status, 201);

    let uri = format!("/api/v1/titles/{}", title["id"]);
    let (status, _) = send!(app, patch(&uri, Some(&admin), json!({"year": this_year() + 1})));
    assert_eq!(status, 400);
}

#[actix_web::test]
async fn unknown_slugs_on_title_write() {
    let (_repo, state) = common::state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;
    let (_, admin) = common::member(&state, "admin", Role::Admin).await;

    let (status, body) = send!(app, post("/api/v1/titles", Some(&admin), json!({"name": "T", "year": 2000, "genre": ["nope"]})));
    assert_eq!(status, 400);
    assert!(body["fields"]["genre"].is_array());
    let (status, body) = send!(app, post("/api/v1/titles", Some(&admin), json!({"name": "T", "year": 2000, "category": "nope"})));
    assert_eq!(status, 400);
    assert!(body["fields"]["category"].is_array());
}

#[actix_web::test]
async fn title_filters_ordering_and_pages() {
    let (_repo, state) = common::state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;
    let (_, admin) = common::member(&state, "admin", Role::Admin).await;
    send!(app, post("/api/v1/genres", Some(&admin), json!({"name": "Sci-Fi", "slug": "sci-fi"})));
    for (name, year, genre) in [("Star Wars", 1977, vec!["sci-fi"]), ("Alien", 1979, vec!["sci-fi"]), ("Casablanca", 1942, vec![])] {
        let (status, _) = send!(app, post("/api/v1/titles", Some(&admin), json!({"name": name, "year": year, "genre": genre})));
        assert_eq!(status, 201);
    }

    let (_, page) = send!(app, get("/api/v1/titles?limit=2"));
    assert_eq!(page["count"], 3);
    assert_eq!(page["results"].as_array().unwrap().len(), 2);
    assert_eq!(page["results"][0]["name"], "Alien"); // year descending
    let next = page["next"].as_str().unwrap();
    assert!(next.ends_with("/api/v1/titles?limit=2&offset=2"), "{next}");
    assert!(page["previous"].is_null());

    let (_, page) = send!(app, get("/api/v1/titles?limit=2&offset=2"));
    assert_eq!(page["results"][0]["name"], "Casablanca");
    assert!(page["next"].is_null());
    assert!(page["previous"].as_str().unwrap().ends_with("/api/v1/titles?limit=2"));

    let (_, page) = send!(app, get("/api/v1/titles?name=STAR"));
    assert_eq!(page["count"], 1);
    let (_, page) = send!(app, get("/api/v1/titles?genre=sci-fi&ordering=name"));
    assert_eq!(page["count"], 2);
    assert_eq!(page["results"][0]["name"], "Alien");
    let (_, page) = send!(app, get("/api/v1/titles?year=1942"));
    assert_eq!(page["results"][0]["name"], "Casablanca");
    let (_, page) = send!(app, get("/api/v1/titles?ordering=-name"));
    assert_eq!(page["results"][0]["name"], "Star Wars");
}

#[actix_web::test]
async fn malformed_requests() {
    let (_repo, state) = common::state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;
    let (_, admin) = common::member(&state, "admin", Role::Admin).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/genres")
        .insert_header(("Authorization", admin.clone()))
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{not json");
    let (status, body) = send!(app, req);
    assert_eq!(status, 400);
    assert!(body["error"].is_string());

    let (status, _) = send!(app, get("/api/v1/titles/abc"));
    assert_eq!(status, 404);
    let (status, _) = send!(app, get("/api/v1/titles?year=abc"));
    assert_eq!(status, 400);
    let (status, _) = send!(app, get("/api/v1/users/me").insert_header(("Authorization", "Bearer garbage")));
    assert_eq!(status, 401);
}

#[actix_web::test]
async fn cors_allows_only_the_configured_frontend() {
    let (_repo, state) = common::state();
    let app = test::init_service(
        App::new().wrap(cors(Some("https://ratedb.example"))).app_data(state.clone()).configure(config),
    )
    .await;

    let req = get("/api/v1/genres").insert_header(("Origin", "https://ratedb.example")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("access-control-allow-origin").unwrap(), "https://ratedb.example");

    let req = get("/api/v1/genres").insert_header(("Origin", "http://localhost:5173")).to_request();
    // actix-cors answers a foreign origin with an error response
    if let Ok(resp) = test::try_call_service(&app, req).await {
        assert!(resp.headers().get("access-control-allow-origin").is_none());
    }
}
