use url::Url;

#[derive(thiserror::Error, Debug)]
#[error("invalid url {url:?}: {reason}")]
pub struct InvalidUrl {
    pub url: String,
    reason: String,
}

/// Canonicalize a URL into a stable, comparable form.
///
/// Applies the following transformations:
/// - Lowercases the scheme and hostname
/// - Drops default ports (http:80, https:443)
/// - Removes trailing slashes from the path (preserves root `/`)
/// - Sorts query parameters by key (stable, duplicates keep their order)
/// - Converts protocol-relative URLs to https
///
/// Normalizing an already-normalized URL is a no-op. Structurally malformed
/// input is an error; callers in the scrape pipeline treat it as a fetch
/// failure.
pub fn normalize_url(raw: &str) -> Result<String, InvalidUrl> {
    // Handle protocol-relative URLs
    let to_parse = if raw.starts_with("//") {
        format!("https:{raw}")
    } else {
        raw.to_string()
    };

    // Url::parse already case-folds the scheme and host and strips default
    // ports, per the URL spec.
    let mut parsed = Url::parse(&to_parse).map_err(|err| InvalidUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })?;

    // Reorder query parameters so equivalent URLs compare equal
    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        parsed.set_query(Some(&query));
    }

    // Strip trailing slashes from the path (but keep root `/`)
    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
    }

    Ok(parsed.to_string())
}
