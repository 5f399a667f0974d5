#![cfg(feature = "postgres-store")]

// Runs against DATABASE_URL; skipped when it is unset. Tables are truncated.

use ratedb::{
    models::*,
    repo::{pg::PgRepo, Constraint, RepoError},
};
use ratedb::repo::{CategoryRepo, CommentRepo, GenreRepo, ReviewRepo, TitleRepo, UserRepo};
use sqlx::postgres::PgPoolOptions;

async fn repo() -> Option<PgRepo> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL unset, skipping");
        return None;
    };
    let pool = PgPoolOptions::new().max_connections(2).connect(&url).await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    sqlx::query("TRUNCATE users, categories, genres, titles, genre_title, reviews, comments RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .unwrap();
    Some(PgRepo::new(pool))
}

fn taxon(name: &str, slug: &str) -> Taxon {
    Taxon { name: name.into(), slug: slug.into() }
}

#[tokio::test]
#[serial_test::serial]
async fn constraints_map_to_conflicts() {
    let Some(r) = repo().await else { return };
    r.create_user(NewUser { username: "a".into(), email: "a@x.io".into(), ..Default::default() })
        .await
        .unwrap();
    let err = r
        .create_user(NewUser { username: "a".into(), email: "b@x.io".into(), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict(Constraint::UsersUsername)));
    let err = r
        .create_user(NewUser { username: "b".into(), email: "a@x.io".into(), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict(Constraint::UsersEmail)));

    r.create_genre(taxon("Rock", "rock")).await.unwrap();
    let err = r.create_genre(taxon("Rock 2", "rock")).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict(Constraint::GenresSlug)));
}

#[tokio::test]
#[serial_test::serial]
async fn titles_reviews_and_cascades() {
    let Some(r) = repo().await else { return };
    let u1 = r
        .create_user(NewUser { username: "u1".into(), email: "u1@x.io".into(), ..Default::default() })
        .await
        .unwrap();
    let u2 = r
        .create_user(NewUser { username: "u2".into(), email: "u2@x.io".into(), ..Default::default() })
        .await
        .unwrap();
    let film = r.create_category(taxon("Film", "film")).await.unwrap();
    let drama = r.create_genre(taxon("Drama", "drama")).await.unwrap();
    let t = r
        .create_title(NewTitle {
            name: "Heat".into(),
            year: 1995,
            description: None,
            category_id: Some(film.id),
            genre_ids: vec![drama.id],
        })
        .await
        .unwrap();
    let id = t.title.id;
    assert_eq!(t.genres, vec![taxon("Drama", "drama")]);

    let review = r
        .create_review(NewReview { title_id: id, author_id: u1.id, text: "a".into(), score: 7, pub_date: None })
        .await
        .unwrap();
    r.create_review(NewReview { title_id: id, author_id: u2.id, text: "b".into(), score: 8, pub_date: None })
        .await
        .unwrap();
    let err = r
        .create_review(NewReview { title_id: id, author_id: u1.id, text: "c".into(), score: 1, pub_date: None })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict(Constraint::ReviewsTitleAuthor)));
    assert_eq!(r.get_title(id).await.unwrap().rating, Some(7.5));

    let filter = TitleFilter { genre: Some("drama".into()), name: Some("HE".into()), ..Default::default() };
    assert_eq!(r.list_titles(&filter, Window::all()).await.unwrap().total, 1);

    r.create_comment(NewComment { review_id: review.item.id, author_id: u2.id, text: "c".into(), pub_date: None })
        .await
        .unwrap();

    r.delete_category("film").await.unwrap();
    assert!(r.get_title(id).await.unwrap().category.is_none());

    r.delete_title(id).await.unwrap();
    assert!(matches!(r.get_review(id, review.item.id).await, Err(RepoError::NotFound)));
    assert!(matches!(r.list_comments(review.item.id, Window::all()).await, Err(RepoError::NotFound)));
}
