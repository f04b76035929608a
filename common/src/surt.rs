use lazy_regex::regex;
use url::{form_urlencoded, Host, Url};

/// Canonical SURT url key: host labels reversed and comma-joined, an
/// optional explicit port, `)`, the path, and the query pairs decoded,
/// lowercased, sorted by name, and re-encoded. Index lines start with this
/// key, so equal-url records cluster lexicographically.
pub fn surt(url: &Url) -> String {
    let mut key = String::with_capacity(url.as_str().len());

    if let Some(host) = url.host_str() {
        let host = if matches!(url.host(), Some(Host::Domain(_))) {
            strip_www(host)
        } else {
            host
        };

        let mut labels: Vec<&str> = host.split('.').collect();
        labels.reverse();
        key.push_str(&labels.join(","));
    }

    if let Some(port) = url.port() {
        let mut itoa_buffer = itoa::Buffer::new();
        key.push(':');
        key.push_str(itoa_buffer.format(port));
    }

    key.push(')');
    key.push_str(url.path());

    if let Some(query) = canonical_query(url) {
        key.push('?');
        key.push_str(&query);
    }

    key
}

/// `www.` / `www7.` prefixes carry no identity; the key ignores them.
fn strip_www(host: &str) -> &str {
    regex!(r#"^www\d*\."#)
        .find(host)
        .map_or(host, |m| &host[m.end()..])
}

fn canonical_query(url: &Url) -> Option<String> {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| (name.to_lowercase(), value.to_lowercase()))
        .collect();

    if pairs.is_empty() {
        return None;
    }
    pairs.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut encoder = form_urlencoded::Serializer::new(String::new());
    encoder.extend_pairs(pairs);
    let encoded = encoder.finish();

    (!encoded.is_empty()).then_some(encoded)
}

/// Lexicographic half-open range covering every index line for a url key.
/// Lines look like `<urlkey> <timestamp> {..}`, so `key + ' '` is the lowest
/// possible line and `key + '!'` (the next byte up) bounds it from above.
pub fn surt_range(urlkey: &str) -> (String, String) {
    (format!("{urlkey} "), format!("{urlkey}!"))
}
