//! Strip redirect provenance from responses before they are persisted

use crate::cache::AssetResponse;

/// Produce the copy of `response` that is safe to store and replay.
///
/// The body is reference-counted, so the copy is cheap and both the caller
/// and the store can consume it independently. A redirected response is
/// rebuilt with the same body, headers, status and status text but without
/// the redirect flag or the final URL.
pub fn normalize(response: &AssetResponse) -> AssetResponse {
    let copy = response.clone();
    if !copy.redirected {
        return copy;
    }

    AssetResponse {
        url: String::new(),
        status: copy.status,
        status_text: copy.status_text,
        headers: copy.headers,
        body: copy.body,
        redirected: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redirected_response() -> AssetResponse {
        AssetResponse {
            url: "http://cdn.test/x.3f2a.js".to_string(),
            status: 200,
            status_text: "OK".to_string(),
            headers: vec![
                ("content-type".to_string(), "text/javascript".to_string()),
                ("Set-Cookie".to_string(), "a=1".to_string()),
                ("set-cookie".to_string(), "b=2".to_string()),
            ],
            body: b"\x00binary\xffbody".to_vec().into(),
            redirected: true,
        }
    }

    #[test]
    fn test_plain_response_is_unchanged() {
        let mut response = redirected_response();
        response.redirected = false;

        assert_eq!(normalize(&response), response);
    }

    #[test]
    fn test_redirected_response_loses_provenance() {
        let response = redirected_response();
        let normalized = normalize(&response);

        assert!(!normalized.redirected);
        assert!(normalized.url.is_empty());
        assert_eq!(normalized.status, response.status);
        assert_eq!(normalized.status_text, response.status_text);
        assert_eq!(normalized.headers, response.headers);
        assert_eq!(normalized.body, response.body);
    }

    #[test]
    fn test_original_is_left_intact() {
        let response = redirected_response();
        let _ = normalize(&response);

        assert!(response.redirected);
        assert_eq!(response.url, "http://cdn.test/x.3f2a.js");
    }

    #[test]
    fn test_error_statuses_are_preserved() {
        let response = AssetResponse {
            redirected: true,
            ..AssetResponse::new(404, "Not Found", "missing")
        };
        let normalized = normalize(&response);

        assert_eq!(normalized.status, 404);
        assert_eq!(normalized.status_text, "Not Found");
        assert_eq!(normalized.body, "missing");
    }
}
