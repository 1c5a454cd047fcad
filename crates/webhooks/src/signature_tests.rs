use super::*;
use crate::identifiers::CredentialRef;

const SECRET: &str = "It's a Secret to Everybody";
const PAYLOAD: &[u8] = b"Hello, World!";

fn secret_config(env: &str, algorithm: SignatureAlgorithm) -> HookSecretConfig {
    HookSecretConfig {
        credential: CredentialRef::new(env).unwrap(),
        algorithm,
    }
}

#[test]
fn test_sign_matches_published_sha256_vector() {
    assert_eq!(
        sign(PAYLOAD, SECRET, SignatureAlgorithm::Sha256),
        "757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"
    );
}

#[test]
fn test_sign_is_deterministic() {
    for algorithm in [SignatureAlgorithm::Sha1, SignatureAlgorithm::Sha256] {
        assert_eq!(
            sign(PAYLOAD, SECRET, algorithm),
            sign(PAYLOAD, SECRET, algorithm)
        );
    }
    assert_eq!(sign(PAYLOAD, SECRET, SignatureAlgorithm::Sha1).len(), 40);
    assert_eq!(sign(PAYLOAD, SECRET, SignatureAlgorithm::Sha256).len(), 64);
}

#[test]
fn test_verify_accepts_own_output_with_and_without_prefix() {
    for algorithm in [SignatureAlgorithm::Sha1, SignatureAlgorithm::Sha256] {
        let digest = sign(PAYLOAD, SECRET, algorithm);
        assert!(verify(PAYLOAD, SECRET, algorithm, &digest));
        assert!(verify(PAYLOAD, SECRET, algorithm, &algorithm.header_value(&digest)));
    }
}

#[test]
fn test_verify_rejects_any_single_byte_payload_mutation() {
    let digest = sign(PAYLOAD, SECRET, SignatureAlgorithm::Sha256);
    for i in 0..PAYLOAD.len() {
        let mut mutated = PAYLOAD.to_vec();
        mutated[i] ^= 0x01;
        assert!(
            !verify(&mutated, SECRET, SignatureAlgorithm::Sha256, &digest),
            "mutation at byte {i} was accepted"
        );
    }
}

#[test]
fn test_verify_rejects_any_single_character_digest_mutation() {
    let digest = sign(PAYLOAD, SECRET, SignatureAlgorithm::Sha256);
    for i in 0..digest.len() {
        let mut chars: Vec<char> = digest.chars().collect();
        chars[i] = if chars[i] == '0' { '1' } else { '0' };
        let mutated: String = chars.into_iter().collect();
        assert!(
            !verify(PAYLOAD, SECRET, SignatureAlgorithm::Sha256, &mutated),
            "digest mutation at {i} was accepted"
        );
    }
}

#[test]
fn test_verify_rejects_wrong_secret_wrong_algorithm_and_garbage() {
    let digest = sign(PAYLOAD, SECRET, SignatureAlgorithm::Sha256);
    assert!(!verify(PAYLOAD, "other", SignatureAlgorithm::Sha256, &digest));
    assert!(!verify(PAYLOAD, SECRET, SignatureAlgorithm::Sha1, &digest));
    assert!(!verify(PAYLOAD, SECRET, SignatureAlgorithm::Sha256, "not-hex"));
    assert!(!verify(PAYLOAD, SECRET, SignatureAlgorithm::Sha256, ""));
}

#[test]
fn test_algorithm_headers_and_prefixes() {
    assert_eq!(SignatureAlgorithm::Sha1.header_name(), "X-Hub-Signature");
    assert_eq!(SignatureAlgorithm::Sha256.header_name(), "X-Hub-Signature-256");
    assert_eq!(SignatureAlgorithm::Sha1.digest_prefix(), "sha1=");
    assert_eq!(SignatureAlgorithm::default(), SignatureAlgorithm::Sha256);
}

#[test]
fn test_select_secret_prefers_target_over_global() {
    let target = secret_config("TARGET_SECRET", SignatureAlgorithm::Sha1);
    let global = secret_config("GLOBAL_SECRET", SignatureAlgorithm::Sha256);

    assert_eq!(select_secret(Some(&target), Some(&global)), Some(&target));
    assert_eq!(select_secret(None, Some(&global)), Some(&global));
    assert_eq!(select_secret(Some(&target), None), Some(&target));
    assert_eq!(select_secret(None, None), None);
}

#[test]
fn test_verifier_without_secret_accepts_everything() {
    let verifier = SignatureVerifier::permissive();
    assert_eq!(verifier.verify(PAYLOAD, None), Ok(Verification::Skipped));
    assert_eq!(verifier.verify(PAYLOAD, Some("sha256=00")), Ok(Verification::Skipped));
}

#[test]
fn test_verifier_with_secret_requires_a_matching_header() {
    let verifier = SignatureVerifier::new(Some(SECRET.to_string()), SignatureAlgorithm::Sha256);
    let header = SignatureAlgorithm::Sha256.header_value(&sign(PAYLOAD, SECRET, SignatureAlgorithm::Sha256));

    assert_eq!(verifier.verify(PAYLOAD, Some(&header)), Ok(Verification::Verified));
    assert_eq!(
        verifier.verify(PAYLOAD, None),
        Err(SignatureError::MissingSignature {
            header: "X-Hub-Signature-256"
        })
    );
    assert_eq!(
        verifier.verify(b"tampered", Some(&header)),
        Err(SignatureError::Mismatch {
            header: "X-Hub-Signature-256"
        })
    );
}

#[test]
fn test_verifier_debug_redacts_secret() {
    let verifier = SignatureVerifier::new(Some("hunter2".to_string()), SignatureAlgorithm::Sha1);
    let shown = format!("{verifier:?}");
    assert!(!shown.contains("hunter2"));
    assert!(shown.contains("REDACTED"));
}
