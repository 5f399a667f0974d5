#![allow(dead_code)]

use std::sync::Arc;

use actix_web::web;
use ratedb::{
    auth::{Role, TokenIssuer},
    confirmation::HmacCodes,
    mailer::LogMailer,
    models::{NewUser, User},
    repo::{inmem::InMemRepo, UserRepo},
    AppState,
};

pub const SECRET: &str = "test-secret-must-be-32-bytes-long!!";

/// Fresh ephemeral store plus the application state wrapping it.
pub fn state() -> (Arc<InMemRepo>, web::Data<AppState>) {
    let repo = Arc::new(InMemRepo::ephemeral());
    let state = AppState {
        repo: repo.clone(),
        tokens: TokenIssuer::new(SECRET, chrono::Duration::minutes(150)),
        codes: Arc::new(HmacCodes::new(SECRET.as_bytes(), 3 * 24 * 3600).unwrap()),
        mailer: Arc::new(LogMailer),
        mail_from: "admin@ratedb.local".into(),
    };
    (repo, web::Data::new(state))
}

/// Create a user with `role` and return it with a ready `Authorization` value.
pub async fn member(state: &AppState, username: &str, role: Role) -> (User, String) {
    let user = state
        .repo
        .create_user(NewUser {
            username: username.into(),
            email: format!("{username}@example.com"),
            role,
            ..Default::default()
        })
        .await
        .unwrap();
    let token = state.tokens.issue(&user).unwrap();
    (user, format!("Bearer {token}"))
}
