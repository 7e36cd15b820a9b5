mod common;

use common::{register_user, spawn_app};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};

use bikeroutes::auth::Claims;

// --- Registration ---

#[tokio::test]
async fn register_returns_session_and_access_token_works() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let session = register_user(&client, &app, "rider@example.com", "correct horse battery staple").await;

    assert!(session["access_token"].is_string());
    assert!(session["refresh_token"].is_string());
    assert_eq!(session["token_type"], "bearer");
    assert_eq!(session["user"]["email"], "rider@example.com");

    let me = client
        .get(format!("{}/api/auth/me", app.address))
        .bearer_auth(session["access_token"].as_str().unwrap())
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, me.status().as_u16());
    let body: Value = me.json().await.unwrap();
    assert_eq!(body["email"], "rider@example.com");
    assert_eq!(body["id"], session["user"]["id"]);
}

#[tokio::test]
async fn register_normalizes_email_and_rejects_duplicates() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    register_user(&client, &app, "Rider@Example.com", "correct horse battery staple").await;

    // Same email, different case: still a duplicate.
    let response = client
        .post(format!("{}/api/auth/register", app.address))
        .json(&json!({ "email": "rider@example.com", "password": "another password 42" }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(409, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "email_already_registered");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = 'rider@example.com'")
        .fetch_one(&app.db_pool)
        .await
        .expect("Failed to count users");
    assert_eq!(count, 1);
}

#[tokio::test]
async fn register_rejects_invalid_input() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let cases = vec![
        (json!({ "email": "notanemail", "password": "long enough password" }), "invalid email"),
        (json!({ "email": "a@b.c", "password": "short" }), "password too short"),
        (
            json!({ "email": "a@b.c", "password": "p".repeat(129) }),
            "password too long",
        ),
    ];

    for (body, reason) in cases {
        let response = client
            .post(format!("{}/api/auth/register", app.address))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request.");
        assert_eq!(400, response.status().as_u16(), "should reject: {}", reason);
    }
}

// --- Login ---

#[tokio::test]
async fn login_returns_session_for_valid_credentials() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    register_user(&client, &app, "rider@example.com", "correct horse battery staple").await;

    let response = client
        .post(format!("{}/api/auth/login", app.address))
        .json(&json!({ "email": "rider@example.com", "password": "correct horse battery staple" }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, response.status().as_u16());
    let session: Value = response.json().await.unwrap();
    assert!(session["access_token"].is_string());
    assert!(session["refresh_token"].is_string());
}

#[tokio::test]
async fn login_rejects_wrong_password_and_unknown_email_identically() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    register_user(&client, &app, "rider@example.com", "correct horse battery staple").await;

    for body in [
        json!({ "email": "rider@example.com", "password": "wrong password here" }),
        json!({ "email": "nobody@example.com", "password": "correct horse battery staple" }),
    ] {
        let response = client
            .post(format!("{}/api/auth/login", app.address))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request.");

        assert_eq!(401, response.status().as_u16());
        let error: Value = response.json().await.unwrap();
        assert_eq!(error["code"], "invalid_credentials");
    }
}

#[tokio::test]
async fn login_with_correct_password_on_inactive_account_is_forbidden() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    register_user(&client, &app, "rider@example.com", "correct horse battery staple").await;

    sqlx::query("UPDATE users SET is_active = FALSE WHERE email = 'rider@example.com'")
        .execute(&app.db_pool)
        .await
        .expect("Failed to deactivate user");

    let response = client
        .post(format!("{}/api/auth/login", app.address))
        .json(&json!({ "email": "rider@example.com", "password": "correct horse battery staple" }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(403, response.status().as_u16());
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "inactive_user");
}

// --- /auth/me ---

#[tokio::test]
async fn me_without_credential_is_unauthorized() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/auth/me", app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(401, response.status().as_u16());
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "not_authenticated");
}

#[tokio::test]
async fn me_with_garbage_token_is_unauthorized() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/auth/me", app.address))
        .header("Authorization", "Bearer invalid.token.here")
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(401, response.status().as_u16());
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "invalid_token");
}

#[tokio::test]
async fn me_with_expired_token_is_unauthorized() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let session = register_user(&client, &app, "rider@example.com", "correct horse battery staple").await;
    let user_id: uuid::Uuid = session["user"]["id"].as_str().unwrap().parse().unwrap();

    // Same secret, but the expiry is in the past.
    let mut claims = Claims::access(user_id, 15);
    claims.iat -= 7200;
    claims.exp = claims.iat + 60;
    let expired = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(app.settings.jwt.secret.as_bytes()),
    )
    .unwrap();

    let response = client
        .get(format!("{}/api/auth/me", app.address))
        .bearer_auth(expired)
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(401, response.status().as_u16());
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "token_expired");
}

// --- Refresh rotation ---

async fn refresh(client: &reqwest::Client, address: &str, token: &str) -> reqwest::Response {
    client
        .post(format!("{}/api/auth/refresh", address))
        .json(&json!({ "refresh_token": token }))
        .send()
        .await
        .expect("Failed to execute request.")
}

#[tokio::test]
async fn refresh_rotates_the_token() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let session = register_user(&client, &app, "rider@example.com", "correct horse battery staple").await;
    let old_token = session["refresh_token"].as_str().unwrap();

    let response = refresh(&client, &app.address, old_token).await;
    assert_eq!(200, response.status().as_u16());

    let rotated: Value = response.json().await.unwrap();
    assert_ne!(
        old_token,
        rotated["refresh_token"].as_str().unwrap(),
        "refresh token should be rotated on each use"
    );
    assert_eq!(rotated["user"]["email"], "rider@example.com");
}

#[tokio::test]
async fn reusing_a_rotated_token_kills_the_whole_session() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let first = register_user(&client, &app, "rider@example.com", "correct horse battery staple").await;
    let token_a = first["refresh_token"].as_str().unwrap();

    let second: Value = refresh(&client, &app.address, token_a).await.json().await.unwrap();
    let token_b = second["refresh_token"].as_str().unwrap();

    // Replaying the rotated token is a reuse event...
    let reused = refresh(&client, &app.address, token_a).await;
    assert_eq!(401, reused.status().as_u16());
    let error: Value = reused.json().await.unwrap();
    assert_eq!(error["code"], "refresh_reuse_detected");

    // ...which revokes the currently active token too: full re-auth required.
    let follow_up = refresh(&client, &app.address, token_b).await;
    assert_eq!(401, follow_up.status().as_u16());
}

#[tokio::test]
async fn unknown_refresh_token_is_rejected() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = refresh(
        &client,
        &app.address,
        "definitely-not-a-token-that-was-ever-issued-by-this-server",
    )
    .await;

    assert_eq!(401, response.status().as_u16());
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "invalid_refresh_token");
}

#[tokio::test]
async fn expired_refresh_token_is_rejected_without_side_effects() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let session = register_user(&client, &app, "rider@example.com", "correct horse battery staple").await;

    sqlx::query("UPDATE refresh_tokens SET expires_at = now() - interval '1 day'")
        .execute(&app.db_pool)
        .await
        .expect("Failed to expire token");

    let response = refresh(&client, &app.address, session["refresh_token"].as_str().unwrap()).await;
    assert_eq!(401, response.status().as_u16());
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "refresh_expired");

    // Expiry is not a reuse event: nothing got revoked.
    let revoked: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM refresh_tokens WHERE revoked_at IS NOT NULL")
            .fetch_one(&app.db_pool)
            .await
            .unwrap();
    assert_eq!(revoked, 0);
}

#[tokio::test]
async fn refresh_for_deactivated_user_is_rejected() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let session = register_user(&client, &app, "rider@example.com", "correct horse battery staple").await;

    sqlx::query("UPDATE users SET is_active = FALSE WHERE email = 'rider@example.com'")
        .execute(&app.db_pool)
        .await
        .expect("Failed to deactivate user");

    let response = refresh(&client, &app.address, session["refresh_token"].as_str().unwrap()).await;
    assert_eq!(401, response.status().as_u16());
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "user_not_found");
}

#[tokio::test]
async fn concurrent_refresh_rotates_at_most_once() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let session = register_user(&client, &app, "rider@example.com", "correct horse battery staple").await;
    let token = session["refresh_token"].as_str().unwrap();

    let (first, second) = tokio::join!(
        refresh(&client, &app.address, token),
        refresh(&client, &app.address, token)
    );

    let statuses = [first.status().as_u16(), second.status().as_u16()];
    let successes = statuses.iter().filter(|&&s| s == 200).count();
    let failures = statuses.iter().filter(|&&s| s == 401).count();

    assert_eq!(successes, 1, "exactly one caller wins the rotation: {:?}", statuses);
    assert_eq!(failures, 1, "the loser takes the reuse-detected path: {:?}", statuses);
}

// --- Abuse protection on the auth scope ---

#[tokio::test]
async fn auth_endpoints_are_rate_limited() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let limit = app.settings.rate_limit.auth_requests_per_minute;
    let mut throttled = false;
    for _ in 0..limit + 5 {
        let response = client
            .post(format!("{}/api/auth/login", app.address))
            .json(&json!({ "email": "x@example.com", "password": "whatever password" }))
            .send()
            .await
            .expect("Failed to execute request.");
        if response.status().as_u16() == 429 {
            let error: Value = response.json().await.unwrap();
            assert_eq!(error["code"], "rate_limit_exceeded");
            throttled = true;
            break;
        }
    }

    assert!(throttled, "bursting past {} requests should hit the limiter", limit);
}

#[tokio::test]
async fn oversized_auth_payloads_are_rejected() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let huge = "x".repeat(app.settings.rate_limit.max_content_length as usize + 1);
    let response = client
        .post(format!("{}/api/auth/register", app.address))
        .json(&json!({ "email": "a@b.c", "password": huge }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(413, response.status().as_u16());
}
