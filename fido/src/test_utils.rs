//! Test utilities for integration testing (available with `test-utils` feature).

use crate::{
    config::{CacheBackend, CacheConfig, Config, EmailConfig, EmailTransportKind, QueueConfig},
    crypto::FieldCipher,
    db::{
        handlers::{Repository, Users},
        models::users::{UserCreateDBRequest, UserDBResponse},
    },
};
use axum_test::TestServer;
use sqlx::PgPool;
use std::time::Duration;

/// Base64 of the 32 ASCII bytes `0123456789abcdef0123456789abcdef`
pub const TEST_ENCRYPTION_KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";

pub fn test_cipher() -> FieldCipher {
    FieldCipher::from_key(TEST_ENCRYPTION_KEY).expect("test key is valid")
}

/// The whole app on `pool`, with the settlement worker running
pub async fn create_test_app(pool: PgPool) -> (TestServer, crate::BackgroundServices) {
    let config = create_test_config();

    let app = crate::Application::new_with_pool(config, Some(pool))
        .await
        .expect("Failed to create application");

    app.into_test_server()
}

/// Self-contained config: memory cache, no Redis, no queue, emails written to a temp directory
pub fn create_test_config() -> Config {
    let temp_dir = std::env::temp_dir().join(format!("fido-test-emails-{}", std::process::id()));

    Config {
        port: 0,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        encryption_key: Some(TEST_ENCRYPTION_KEY.to_string()),
        email: EmailConfig {
            transport: EmailTransportKind::File,
            file_path: temp_dir.to_string_lossy().to_string(),
            enable_notifications: false,
            ..Default::default()
        },
        cache: CacheConfig {
            backend: CacheBackend::Memory,
            // Short, so tests polling for settlement never wait on a cached entry for long
            default_ttl: Duration::from_secs(1),
            max_capacity: 1_000,
        },
        queue: QueueConfig {
            enabled: false,
            ..Default::default()
        },
        enable_metrics: false,
        enable_otel_export: false,
        ..Default::default()
    }
}

/// Insert a user with a unique email and the given balance in cents
pub async fn create_test_user(pool: &PgPool, balance: i64) -> UserDBResponse {
    let cipher = test_cipher();
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let mut users_repo = Users::new(&mut conn, &cipher);
    let suffix: u64 = rand::random();

    let user_create = UserCreateDBRequest {
        full_name: format!("Test User {suffix:x}"),
        email: Some(format!("testuser_{suffix:x}@example.com")),
        balance,
    };

    users_repo.create(&user_create).await.expect("Failed to create test user")
}
