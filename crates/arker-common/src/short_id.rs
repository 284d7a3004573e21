//! 7-character base62 short IDs for captures (spec §4.7).

use rand::Rng;
use sqlx::PgPool;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const LENGTH: usize = 7;
/// Collision probability is negligible below this many captures; bail out
/// rather than loop forever if something is badly wrong with the table.
const MAX_ATTEMPTS: u32 = 20;

fn generate() -> String {
    let mut rng = rand::rng();
    (0..LENGTH)
        .map(|_| {
            let idx = rng.random_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

/// Allocate a short ID guaranteed unique against `captures.short_id` at the
/// moment of allocation (invariant 5). Retries on collision.
pub async fn allocate(pool: &PgPool) -> sqlx::Result<String> {
    for _ in 0..MAX_ATTEMPTS {
        let candidate = generate();
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM captures WHERE short_id = $1)",
        )
        .bind(&candidate)
        .fetch_one(pool)
        .await?;
        if !exists {
            return Ok(candidate);
        }
        tracing::warn!(candidate, "short_id collision, retrying");
    }
    Err(sqlx::Error::Protocol(
        "short_id allocator exhausted retries".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_seven_base62_chars() {
        for _ in 0..100 {
            let id = generate();
            assert_eq!(id.len(), LENGTH);
            assert!(id.chars().all(|c| ALPHABET.contains(&(c as u8))));
        }
    }

    #[test]
    fn generated_ids_are_not_trivially_constant() {
        let a = generate();
        let b = generate();
        // Vanishingly unlikely to collide; a failure here means the RNG is broken.
        assert_ne!(a, b);
    }
}
