//! Database operations for `social_handles` and owner resolution.

use pulseboard_core::Platform;
use sqlx::PgPool;

use crate::DbError;

/// A row from `social_handles`.
///
/// `user_id` is `None` for handles that have not been mapped to an internal
/// owner; their posts are still stored, but no snapshot can be attributed.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HandleRow {
    pub id: i64,
    pub user_id: Option<i64>,
    pub platform: String,
    pub username: String,
    pub is_active: bool,
}

/// Lists active handles for a platform, sorted and deduplicated by username.
///
/// This is the orchestrator's sweep order: a stable sort means the offset
/// cursor resumes deterministically across invocations.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_handles(pool: &PgPool, platform: Platform) -> Result<Vec<HandleRow>, DbError> {
    let rows = sqlx::query_as::<_, HandleRow>(
        "SELECT DISTINCT ON (username) id, user_id, platform, username, is_active \
         FROM social_handles \
         WHERE platform = $1 AND is_active = TRUE \
         ORDER BY username ASC, id ASC",
    )
    .bind(platform.as_str())
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Resolves the owner for one handle, if mapped.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn resolve_owner(
    pool: &PgPool,
    platform: Platform,
    username: &str,
) -> Result<Option<i64>, DbError> {
    let user_id: Option<Option<i64>> = sqlx::query_scalar(
        "SELECT user_id FROM social_handles WHERE platform = $1 AND username = $2",
    )
    .bind(platform.as_str())
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(user_id.flatten())
}

/// Lists the usernames of every handle mapped to an owner on one platform.
///
/// Used by the snapshot writer to sum across all of an owner's accounts.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_owner_usernames(
    pool: &PgPool,
    user_id: i64,
    platform: Platform,
) -> Result<Vec<String>, DbError> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT username FROM social_handles \
         WHERE user_id = $1 AND platform = $2 AND is_active = TRUE \
         ORDER BY username",
    )
    .bind(user_id)
    .bind(platform.as_str())
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_user(pool: &PgPool, name: &str) -> i64 {
        sqlx::query_scalar::<_, i64>("INSERT INTO users (display_name) VALUES ($1) RETURNING id")
            .bind(name)
            .fetch_one(pool)
            .await
            .expect("seed user")
    }

    async fn seed_handle(pool: &PgPool, user_id: Option<i64>, platform: &str, username: &str) {
        sqlx::query("INSERT INTO social_handles (user_id, platform, username) VALUES ($1, $2, $3)")
            .bind(user_id)
            .bind(platform)
            .bind(username)
            .execute(pool)
            .await
            .expect("seed handle");
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn list_handles_is_sorted_and_platform_scoped(pool: PgPool) {
        let owner = seed_user(&pool, "Owner").await;
        seed_handle(&pool, Some(owner), "tiktok", "zed").await;
        seed_handle(&pool, Some(owner), "tiktok", "alice").await;
        seed_handle(&pool, None, "instagram", "alice").await;

        let rows = list_handles(&pool, Platform::TikTok).await.expect("list");
        let names: Vec<&str> = rows.iter().map(|r| r.username.as_str()).collect();
        assert_eq!(names, vec!["alice", "zed"]);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn resolve_owner_distinguishes_unmapped(pool: PgPool) {
        let owner = seed_user(&pool, "Owner").await;
        seed_handle(&pool, Some(owner), "tiktok", "alice").await;
        seed_handle(&pool, None, "tiktok", "stray").await;

        assert_eq!(
            resolve_owner(&pool, Platform::TikTok, "alice")
                .await
                .expect("resolve"),
            Some(owner)
        );
        assert_eq!(
            resolve_owner(&pool, Platform::TikTok, "stray")
                .await
                .expect("resolve"),
            None
        );
        assert_eq!(
            resolve_owner(&pool, Platform::TikTok, "missing")
                .await
                .expect("resolve"),
            None
        );
    }
}
