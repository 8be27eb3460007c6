use std::sync::Mutex;

use http::Uri;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Bucket key for a request target. Requests without a host share the empty key.
pub(crate) fn host_key(uri: &Uri) -> String {
    uri.host()
        .map(|host| host.trim_end_matches('.').to_ascii_lowercase())
        .unwrap_or_default()
}

pub(crate) fn duration_nanos(duration: std::time::Duration) -> u64 {
    duration.as_nanos().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::host_key;

    #[test]
    fn host_key_lowercases_and_drops_port() {
        let uri: http::Uri = "https://MAPI.Storyblok.com:443/v1/spaces"
            .parse()
            .expect("uri should parse");
        assert_eq!(host_key(&uri), "mapi.storyblok.com");
    }

    #[test]
    fn host_key_is_empty_for_relative_uri() {
        let uri: http::Uri = "/v1/spaces".parse().expect("uri should parse");
        assert_eq!(host_key(&uri), "");
    }
}
