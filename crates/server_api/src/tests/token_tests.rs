use super::*;
use jsonwebtoken::{decode, DecodingKey, Validation};

#[test]
fn token_claims_carry_identity_and_issuer() {
    let cfg = SessionTokenConfig {
        issuer: "door".into(),
        secret: "s3cret".into(),
        ttl_seconds: 120,
    };
    let identity = Identity::new("qr-user", "Mr. Raghavendra", "qr-authenticated");
    let (token, expires_at) = mint_session_token(&cfg, &identity).expect("token");

    let decoded = decode::<serde_json::Value>(
        &token,
        &DecodingKey::from_secret(cfg.secret.as_bytes()),
        &Validation::default(),
    )
    .expect("decode");

    assert_eq!(decoded.claims["iss"], "door");
    assert_eq!(decoded.claims["sub"], "user:qr-user");
    assert_eq!(decoded.claims["name"], "Mr. Raghavendra");
    assert_eq!(decoded.claims["exp"], expires_at.timestamp());
}

#[test]
fn default_ttl_is_one_week() {
    let identity = Identity::new("u", "U", "qr-authenticated");
    let before = Utc::now();
    let (_, expires_at) =
        mint_session_token(&SessionTokenConfig::default(), &identity).expect("token");
    let ttl = expires_at - before;
    assert!(ttl >= Duration::days(7) - Duration::seconds(5));
    assert!(ttl <= Duration::days(7) + Duration::seconds(5));
}

#[test]
fn wrong_secret_fails_verification() {
    let identity = Identity::new("u", "U", "qr-authenticated");
    let (token, _) = mint_session_token(&SessionTokenConfig::default(), &identity).expect("token");
    let result = decode::<serde_json::Value>(
        &token,
        &DecodingKey::from_secret(b"other"),
        &Validation::default(),
    );
    assert!(result.is_err());
}
