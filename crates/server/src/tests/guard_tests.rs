use super::*;

fn signed_in() -> TransportSession {
    TransportSession::from_cookie_header("voiceops_auth=true; voiceops_user=Mr.+Raghavendra")
}

#[test]
fn classifies_routes_by_first_matching_rule() {
    assert_eq!(classify("/"), RouteClass::PublicPage);
    assert_eq!(classify("/auth"), RouteClass::PublicPage);
    assert_eq!(classify("/api/auth"), RouteClass::PublicApi);
    assert_eq!(classify("/api/auth/office-access"), RouteClass::PublicApi);
    assert_eq!(classify("/dashboard"), RouteClass::ProtectedPage);
    assert_eq!(classify("/controls/lights"), RouteClass::ProtectedPage);
    assert_eq!(classify("/api/devices/control"), RouteClass::ProtectedApi);
    assert_eq!(classify("/favicon.ico"), RouteClass::PublicPage);
}

#[test]
fn anonymous_page_visit_redirects_to_auth_with_return_path() {
    let anonymous = TransportSession::default();
    assert_eq!(
        decide("/dashboard", &anonymous),
        GuardDecision::Redirect("/auth?redirect=/dashboard".into())
    );
    assert_eq!(
        decide("/controls", &anonymous),
        GuardDecision::Redirect("/auth?redirect=/controls".into())
    );
}

#[test]
fn anonymous_api_call_is_rejected_not_redirected() {
    assert_eq!(
        decide("/api/devices/control", &TransportSession::default()),
        GuardDecision::Reject
    );
}

#[test]
fn public_routes_pass_without_session() {
    let anonymous = TransportSession::default();
    for path in ["/", "/auth", "/api/auth", "/robots.txt"] {
        assert_eq!(decide(path, &anonymous), GuardDecision::Pass, "{path}");
    }
}

#[test]
fn signed_in_visitor_skips_auth_page() {
    assert_eq!(
        decide("/auth", &signed_in()),
        GuardDecision::Redirect("/dashboard".into())
    );
    assert_eq!(decide("/dashboard", &signed_in()), GuardDecision::Pass);
    assert_eq!(decide("/api/devices/fan", &signed_in()), GuardDecision::Pass);
}

#[test]
fn flag_without_user_is_not_a_session() {
    let flag_only = TransportSession::from_cookie_header("voiceops_auth=true");
    assert_eq!(decide("/api/devices/fan", &flag_only), GuardDecision::Reject);
    let empty_user = TransportSession::from_cookie_header("voiceops_auth=true; voiceops_user=");
    assert_eq!(decide("/api/devices/fan", &empty_user), GuardDecision::Reject);
    let wrong_flag =
        TransportSession::from_cookie_header("voiceops_auth=yes; voiceops_user=someone");
    assert_eq!(
        decide("/auth", &wrong_flag),
        GuardDecision::Pass
    );
}

#[test]
fn return_path_escapes_query_delimiters() {
    assert_eq!(
        decide("/controls/a&b", &TransportSession::default()),
        GuardDecision::Redirect("/auth?redirect=/controls/a%26b".into())
    );
}

#[test]
fn multiple_cookie_headers_are_merged() {
    let mut headers = HeaderMap::new();
    headers.append(header::COOKIE, "voiceops_auth=true".parse().expect("header"));
    headers.append(header::COOKIE, "voiceops_user=alice".parse().expect("header"));
    assert!(session_from_headers(&headers).is_authenticated());
}
