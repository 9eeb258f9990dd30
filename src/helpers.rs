use std::collections::HashMap;

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Query parameters of a request target like `/callback?code=x&state=y`.
pub fn extract_parameters(url: &str) -> HashMap<String, String> {
    let Some((_, query)) = url.split_once('?') else {
        return HashMap::new();
    };
    let query = query.split('#').next().unwrap_or_default();

    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| {
            let value = urlencoding::decode(v)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| v.to_string());
            (k.to_string(), value)
        })
        .collect()
}

pub fn get_rand_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}
