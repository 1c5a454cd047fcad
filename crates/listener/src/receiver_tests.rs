use super::*;

fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        map.insert(*name, HeaderValue::from_str(value).unwrap());
    }
    map
}

#[test]
fn test_json_body_is_the_payload() {
    let map = headers(&[("content-type", "application/json")]);
    assert_eq!(
        extract_payload(&map, br#"{"zen":"ok"}"#).unwrap(),
        r#"{"zen":"ok"}"#
    );
}

#[test]
fn test_form_body_yields_payload_field() {
    let map = headers(&[("content-type", "application/x-www-form-urlencoded")]);
    let body = b"payload=%7B%22ref%22%3A%22refs%2Fheads%2Fmain%22%7D";
    assert_eq!(
        extract_payload(&map, body).unwrap(),
        r#"{"ref":"refs/heads/main"}"#
    );
}

#[test]
fn test_form_without_payload_field_is_rejected() {
    let map = headers(&[("content-type", "application/x-www-form-urlencoded")]);
    assert!(matches!(
        extract_payload(&map, b"other=1"),
        Err(ReceiveError::MalformedPayload { .. })
    ));
}

#[test]
fn test_non_json_body_is_rejected() {
    assert!(matches!(
        extract_payload(&HeaderMap::new(), b"hello"),
        Err(ReceiveError::MalformedPayload { .. })
    ));
    assert!(matches!(
        extract_payload(&HeaderMap::new(), b""),
        Err(ReceiveError::MalformedPayload { .. })
    ));
}

#[test]
fn test_origin_prefers_forwarded_for() {
    let forwarded = headers(&[
        ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
        ("host", "ci.example.com"),
    ]);
    assert_eq!(origin(&forwarded), "203.0.113.7");
    assert_eq!(origin(&headers(&[("host", "ci.example.com")])), "ci.example.com");
    assert_eq!(origin(&HeaderMap::new()), "unknown");
}
