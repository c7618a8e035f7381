#![cfg(feature = "inmem-store")]

use actix_web::{test, App};
use corkboard::auth::{create_jwt, Role};
use corkboard::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use corkboard::repo::inmem::InMemRepo;
use corkboard::storage::build_attachment_store;
use corkboard::{config, AppState};
use serde_json::json;
use serial_test::serial;
use std::sync::Arc;

// Helper to ensure JWT secret present & unique temp dirs per test
fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    std::env::set_var("CORKBOARD_DATA_DIR", tempfile::tempdir().unwrap().path());
    std::env::set_var("UPLOAD_DIR", tempfile::tempdir().unwrap().path());
}

fn admin_token() -> String { create_jwt("1", vec![Role::Admin]).unwrap() }
fn user_token() -> String { create_jwt("2", vec![Role::User]).unwrap() }

fn state() -> AppState {
    AppState {
        repo: Arc::new(InMemRepo::new()),
        attachment_store: build_attachment_store(),
        rate_limiter: None,
    }
}

#[actix_web::test]
#[serial]
async fn test_comment_create_reply_and_ordering() {
    setup_env();
    let app = test::init_service(
        App::new().app_data(actix_web::web::Data::new(state())).configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .set_json(&json!({"category":"free","title":"Thread","content":"c","author":"op"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let post: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let post_id = post["id"].as_i64().unwrap();

    // two top-level comments
    let req = test::TestRequest::post()
        .uri("/api/v1/comments")
        .set_json(&json!({"post_id":post_id,"parent_id":null,"content":"first","author":"a"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let c1: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert!(c1["parent_id"].is_null());
    assert!(c1.get("author_ip").is_none());

    let req = test::TestRequest::post()
        .uri("/api/v1/comments")
        .set_json(&json!({"post_id":post_id,"parent_id":null,"content":"second","author":"b"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let c2: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();

    // reply to the first, created after the second
    let req = test::TestRequest::post()
        .uri("/api/v1/comments")
        .set_json(&json!({"post_id":post_id,"parent_id":c1["id"],"content":"re: first","author":"c"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let reply: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(reply["parent_id"], c1["id"]);

    // listing keeps the reply under its parent
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/posts/{post_id}/comments"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let list: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let ids: Vec<i64> = list.as_array().unwrap().iter().map(|c| c["id"].as_i64().unwrap()).collect();
    assert_eq!(
        ids,
        vec![c1["id"].as_i64().unwrap(), reply["id"].as_i64().unwrap(), c2["id"].as_i64().unwrap()]
    );

    // the detail view carries the same comments and the count
    let req = test::TestRequest::get().uri(&format!("/api/v1/posts/{post_id}")).to_request();
    let resp = test::call_service(&app, req).await;
    let detail: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(detail["comment_count"], 3);
    assert_eq!(detail["comments"].as_array().unwrap().len(), 3);
}

#[actix_web::test]
#[serial]
async fn test_comment_invariants() {
    setup_env();
    let app = test::init_service(
        App::new().app_data(actix_web::web::Data::new(state())).configure(config),
    )
    .await;

    // two posts to cross-link against
    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .set_json(&json!({"category":"free","title":"P1","content":"c","author":"op"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let p1: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let p1_id = p1["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .set_json(&json!({"category":"free","title":"P2","content":"c","author":"op"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let p2: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let p2_id = p2["id"].as_i64().unwrap();

    // blank content
    let req = test::TestRequest::post()
        .uri("/api/v1/comments")
        .set_json(&json!({"post_id":p1_id,"parent_id":null,"content":" ","author":"a"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // unknown post
    let req = test::TestRequest::post()
        .uri("/api/v1/comments")
        .set_json(&json!({"post_id":9999,"parent_id":null,"content":"x","author":"a"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    // seed a parent on p1 and a reply under it
    let req = test::TestRequest::post()
        .uri("/api/v1/comments")
        .set_json(&json!({"post_id":p1_id,"parent_id":null,"content":"parent","author":"a"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let parent: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let parent_id = parent["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri("/api/v1/comments")
        .set_json(&json!({"post_id":p1_id,"parent_id":parent_id,"content":"reply","author":"b"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let reply: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();

    // parent must belong to the same post
    let req = test::TestRequest::post()
        .uri("/api/v1/comments")
        .set_json(&json!({"post_id":p2_id,"parent_id":parent_id,"content":"wrong post","author":"b"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // one level of nesting only: no replies to replies
    let req = test::TestRequest::post()
        .uri("/api/v1/comments")
        .set_json(&json!({"post_id":p1_id,"parent_id":reply["id"],"content":"too deep","author":"b"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // replies to a deleted parent are refused
    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/comments/{parent_id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let req = test::TestRequest::post()
        .uri("/api/v1/comments")
        .set_json(&json!({"post_id":p1_id,"parent_id":parent_id,"content":"orphan","author":"b"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    // comments on a deleted post are refused
    let req = test::TestRequest::delete().uri(&format!("/api/v1/posts/{p2_id}")).to_request();
    test::call_service(&app, req).await;
    let req = test::TestRequest::post()
        .uri("/api/v1/comments")
        .set_json(&json!({"post_id":p2_id,"parent_id":null,"content":"late","author":"a"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
#[serial]
async fn test_comment_update_delete_restore() {
    setup_env();
    let app = test::init_service(
        App::new().app_data(actix_web::web::Data::new(state())).configure(config),
    )
    .await;
    let admin = admin_token();
    let user = user_token();

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .set_json(&json!({"category":"free","title":"P","content":"c","author":"op"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let post: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let post_id = post["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri("/api/v1/comments")
        .set_json(&json!({"post_id":post_id,"parent_id":null,"content":"original","author":"a"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let comment: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let cid = comment["id"].as_i64().unwrap();

    // content-only edit, the author stays
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/comments/{cid}"))
        .set_json(&json!({"content":"edited"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let upd: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(upd["content"], "edited");
    assert_eq!(upd["author"], "a");

    // blank edit is refused
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/comments/{cid}"))
        .set_json(&json!({"content":"  "}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // delete hides it from listings
    let req = test::TestRequest::delete().uri(&format!("/api/v1/comments/{cid}")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/posts/{post_id}/comments"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let list: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(list.as_array().unwrap().len(), 0);

    // deleted comments refuse edits and repeat deletes
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/comments/{cid}"))
        .set_json(&json!({"content":"zombie"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let req = test::TestRequest::delete().uri(&format!("/api/v1/comments/{cid}")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    // admins may list deleted rows on the comment endpoint
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/posts/{post_id}/comments?include_deleted=1"))
        .insert_header(("Authorization", format!("Bearer {admin}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let list: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert!(!list[0]["deleted_at"].is_null());

    // restore is admin-only
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/admin/comments/{cid}/restore"))
        .insert_header(("Authorization", format!("Bearer {user}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/admin/comments/{cid}/restore"))
        .insert_header(("Authorization", format!("Bearer {admin}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/posts/{post_id}/comments"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let list: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["content"], "edited");
}

#[actix_web::test]
#[serial]
async fn test_comments_hidden_with_deleted_post() {
    setup_env();
    let app = test::init_service(
        App::new().app_data(actix_web::web::Data::new(state())).configure(config),
    )
    .await;
    let admin = admin_token();

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .set_json(&json!({"category":"free","title":"Doomed","content":"c","author":"op"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let post: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let post_id = post["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri("/api/v1/comments")
        .set_json(&json!({"post_id":post_id,"parent_id":null,"content":"hi","author":"a"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    let req = test::TestRequest::delete().uri(&format!("/api/v1/posts/{post_id}")).to_request();
    test::call_service(&app, req).await;

    // the comment endpoint follows the post's visibility
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/posts/{post_id}/comments"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/posts/{post_id}/comments?include_deleted=1"))
        .insert_header(("Authorization", format!("Bearer {admin}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let list: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[actix_web::test]
#[serial]
async fn test_rate_limit_comment_creation() {
    setup_env();
    // only 1 comment per large window so the second is immediately denied
    let cfg = RateLimitConfig {
        post_limit: 100,
        post_window: std::time::Duration::from_secs(300),
        comment_limit: 1,
        comment_window: std::time::Duration::from_secs(60),
        upload_limit: 100,
        upload_window: std::time::Duration::from_secs(3600),
    };
    let limiter = RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg);
    let state = AppState {
        repo: Arc::new(InMemRepo::new()),
        attachment_store: build_attachment_store(),
        rate_limiter: Some(limiter),
    };
    let app = test::init_service(
        App::new().app_data(actix_web::web::Data::new(state)).configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .set_json(&json!({"category":"free","title":"P","content":"c","author":"op"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let post: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let post_id = post["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri("/api/v1/comments")
        .set_json(&json!({"post_id":post_id,"parent_id":null,"content":"one","author":"a"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201, "first comment allowed");

    let req = test::TestRequest::post()
        .uri("/api/v1/comments")
        .set_json(&json!({"post_id":post_id,"parent_id":null,"content":"two","author":"a"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 429, "second comment should be rate limited");
}
