//! Table-driven tracker/ad/analytics host allow-list (spec §9 redesign
//! flag: "keep it table-driven so the set can evolve without code changes
//! to the network-idle algorithm").

use std::collections::HashSet;
use std::sync::Arc;

use sqlx::PgPool;

/// Seeded on first boot if the table is empty; afterwards the table is the
/// source of truth and this list is never consulted again.
const SEED_HOSTS: &[&str] = &[
    "www.google-analytics.com",
    "analytics.google.com",
    "www.googletagmanager.com",
    "connect.facebook.net",
    "www.facebook.com",
    "platform.twitter.com",
    "analytics.twitter.com",
    "cdn.segment.com",
    "api.segment.io",
    "stats.wp.com",
    "pixel.wp.com",
    "doubleclick.net",
    "googlesyndication.com",
    "googleadservices.com",
    "hotjar.com",
    "static.hotjar.com",
    "cdn.amplitude.com",
    "sentry.io",
    "browser.sentry-cdn.com",
];

pub async fn ensure_seeded(pool: &PgPool) -> sqlx::Result<()> {
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM tracker_hosts")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(());
    }
    for host in SEED_HOSTS {
        sqlx::query("INSERT INTO tracker_hosts (host) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(host)
            .execute(pool)
            .await?;
    }
    Ok(())
}

pub async fn load(pool: &PgPool) -> sqlx::Result<Arc<HashSet<String>>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT host FROM tracker_hosts")
        .fetch_all(pool)
        .await?;
    Ok(Arc::new(rows.into_iter().map(|(h,)| h).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_list_is_non_empty_and_lowercase() {
        assert!(!SEED_HOSTS.is_empty());
        for host in SEED_HOSTS {
            assert_eq!(*host, host.to_lowercase());
        }
    }
}
