//! Shared argument checks for the AnyCrawl tools.

use std::ops::RangeInclusive;

use url::Url;

use crate::api::ScrapeOptions;
use crate::error::FieldError;

/// Page load timeout bounds, in milliseconds
pub const PAGE_TIMEOUT_MS: RangeInclusive<u64> = 1..=600_000;

/// Extra wait after load, in milliseconds
pub const WAIT_FOR_MS: RangeInclusive<u64> = 0..=60_000;

/// Requires an absolute http(s) URL.
pub fn check_http_url(field: &str, value: &str, errors: &mut Vec<FieldError>) {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {}
        Ok(url) => errors.push(FieldError::new(
            field,
            format!("unsupported URL scheme '{}', expected http or https", url.scheme()),
        )),
        Err(e) => errors.push(FieldError::new(field, format!("invalid URL: {}", e))),
    }
}

pub fn check_not_blank(field: &str, value: &str, errors: &mut Vec<FieldError>) {
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, "must not be empty"));
    }
}

pub fn check_range<T>(
    field: &str,
    value: Option<T>,
    range: RangeInclusive<T>,
    errors: &mut Vec<FieldError>,
) where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if let Some(v) = value
        && !range.contains(&v)
    {
        errors.push(FieldError::new(
            field,
            format!(
                "must be between {} and {} (got {})",
                range.start(),
                range.end(),
                v
            ),
        ));
    }
}

/// Job ids end up in request paths, so only id-shaped values pass.
pub fn check_job_id(value: &str, errors: &mut Vec<FieldError>) {
    if value.is_empty() {
        errors.push(FieldError::new("job_id", "must not be empty"));
    } else if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        errors.push(FieldError::new(
            "job_id",
            "may only contain letters, digits, '-' and '_'",
        ));
    }
}

/// Checks every per-page option, naming fields under `prefix` when nested.
pub fn check_scrape_options(prefix: &str, options: &ScrapeOptions, errors: &mut Vec<FieldError>) {
    let field = |name: &str| {
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", prefix, name)
        }
    };
    check_range(&field("timeout"), options.timeout, PAGE_TIMEOUT_MS, errors);
    check_range(&field("wait_for"), options.wait_for, WAIT_FOR_MS, errors);
    if let Some(proxy) = &options.proxy {
        match Url::parse(proxy) {
            Ok(_) => {}
            Err(e) => errors.push(FieldError::new(field("proxy"), format!("invalid URL: {}", e))),
        }
    }
    if let Some(formats) = &options.formats
        && formats.is_empty()
    {
        errors.push(FieldError::new(field("formats"), "must list at least one format"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_checks() {
        let mut errors = Vec::new();
        check_http_url("url", "https://example.com/a?b=1", &mut errors);
        assert!(errors.is_empty());

        check_http_url("url", "ftp://example.com", &mut errors);
        check_http_url("url", "not a url", &mut errors);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].to_string().starts_with("url: unsupported URL scheme 'ftp'"));
    }

    #[test]
    fn test_range_skips_absent_values() {
        let mut errors = Vec::new();
        check_range("limit", None::<u32>, 1..=100, &mut errors);
        check_range("limit", Some(100u32), 1..=100, &mut errors);
        assert!(errors.is_empty());

        check_range("limit", Some(0u32), 1..=100, &mut errors);
        assert_eq!(
            errors[0].to_string(),
            "limit: must be between 1 and 100 (got 0)"
        );
    }

    #[test]
    fn test_job_id_rejects_path_characters() {
        let mut errors = Vec::new();
        check_job_id("7f3c-aa_01", &mut errors);
        assert!(errors.is_empty());
        check_job_id("../admin", &mut errors);
        check_job_id("", &mut errors);
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_nested_option_fields_are_prefixed() {
        let options = ScrapeOptions {
            wait_for: Some(120_000),
            ..Default::default()
        };
        let mut errors = Vec::new();
        check_scrape_options("scrape_options", &options, &mut errors);
        assert_eq!(errors[0].field, "scrape_options.wait_for");
    }
}
