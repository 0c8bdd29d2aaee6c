//! Deadline helpers shared by the link and proximity event loops.

use tokio::time::Instant;

/// Sleep until `deadline`, or forever if there is none.
///
/// Used as a `tokio::select!` branch; the loop re-reads its deadline every
/// iteration, so a cancelled deadline is simply never awaited again.
pub async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The earlier of two optional deadlines.
#[must_use]
pub fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_earliest() {
        let now = Instant::now();
        let later = now + Duration::from_secs(1);
        assert_eq!(earliest(Some(now), Some(later)), Some(now));
        assert_eq!(earliest(None, Some(later)), Some(later));
        assert_eq!(earliest(Some(now), None), Some(now));
        assert_eq!(earliest(None, None), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_until_opt_fires_at_deadline() {
        let start = Instant::now();
        sleep_until_opt(Some(start + Duration::from_secs(3))).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_millis(3010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_until_opt_without_deadline_never_fires() {
        let outcome =
            tokio::time::timeout(Duration::from_secs(60), sleep_until_opt(None)).await;
        assert!(outcome.is_err());
    }
}
