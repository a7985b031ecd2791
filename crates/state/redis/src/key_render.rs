/// Apply the configured key prefix to a logical KV key, so multiple
/// deployments can share one Redis instance without collisions.
#[must_use]
pub fn render_key(prefix: &str, key: &str) -> String {
    format!("{prefix}:{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_key() {
        assert_eq!(render_key("warden", "budget:app:acme:daily:19123"), "warden:budget:app:acme:daily:19123");
    }
}
