mod common;

use chrono::{TimeZone, Utc};
use common::{build_pki, ca_params, test_logger};
use pki_store::chain::build_chain_at;
use pki_store::{build_chain, Certificate, ChainStatus, ChainVerifier, StoreError, TrustFailure};

fn thumbprints(chain: &[Certificate]) -> Vec<String> {
    chain.iter().map(|c| c.thumbprint().to_string()).collect()
}

#[test]
fn test_build_chain_orders_leaf_to_root() {
    let pki = build_pki();
    let candidates = vec![pki.root.duplicate(), pki.intermediate.duplicate()];

    let chain = build_chain(&pki.leaf, &candidates).expect("chain");
    assert_eq!(
        thumbprints(&chain),
        vec![
            pki.leaf.thumbprint().to_string(),
            pki.intermediate.thumbprint().to_string(),
            pki.root.thumbprint().to_string(),
        ]
    );
}

#[test]
fn test_build_chain_ignores_candidate_order_and_noise() {
    let pki = build_pki();
    let forward = vec![
        pki.orphan.duplicate(),
        pki.root.duplicate(),
        pki.expired_leaf.duplicate(),
        pki.intermediate.duplicate(),
        pki.root.duplicate(),
    ];
    let mut reversed: Vec<Certificate> = forward.iter().map(Certificate::duplicate).collect();
    reversed.reverse();

    let a = build_chain(&pki.leaf, &forward).expect("forward");
    let b = build_chain(&pki.leaf, &reversed).expect("reversed");
    assert_eq!(thumbprints(&a), thumbprints(&b));
    assert_eq!(a.len(), 3);
}

#[test]
fn test_self_issued_leaf_is_its_own_chain() {
    let pki = build_pki();
    let chain = build_chain(&pki.root, &[]).expect("root chain");
    assert_eq!(chain.len(), 1);
    assert!(chain[0].equals(&pki.root));
}

#[test]
fn test_missing_issuer_is_chain_incomplete() {
    let pki = build_pki();
    let result = build_chain(&pki.leaf, &[pki.root.duplicate()]);
    match result {
        Err(StoreError::ChainIncomplete(name)) => assert!(name.contains("Test Intermediate")),
        other => panic!("expected ChainIncomplete, got {other:?}"),
    }

    assert!(matches!(
        build_chain(&pki.orphan, &[pki.root.duplicate(), pki.intermediate.duplicate()]),
        Err(StoreError::ChainIncomplete(_))
    ));
}

#[test]
fn test_verify_trusted_chain() {
    let pki = build_pki();
    let verifier = ChainVerifier::with_defaults(&test_logger());
    let chain = build_chain(&pki.leaf, &[pki.root.duplicate(), pki.intermediate.duplicate()]).expect("chain");

    let status = verifier
        .verify_chain(&chain, &[pki.crl_empty.duplicate()])
        .expect("verify");
    assert_eq!(status, ChainStatus::Trusted);
}

#[test]
fn test_verify_reports_revoked_leaf() {
    let pki = build_pki();
    let verifier = ChainVerifier::with_defaults(&test_logger());
    let chain = build_chain(&pki.leaf, &[pki.root.duplicate(), pki.intermediate.duplicate()]).expect("chain");

    let status = verifier
        .verify_chain(&chain, &[pki.crl_revoking_leaf.duplicate()])
        .expect("verify");
    match status.failure() {
        Some(TrustFailure::Revoked { serial, .. }) => assert_eq!(serial, pki.leaf.serial_number()),
        other => panic!("expected revocation, got {other:?}"),
    }
    assert!(matches!(status.into_result(), Err(StoreError::Revoked { .. })));
}

#[test]
fn test_verify_reports_expired_leaf() {
    let pki = build_pki();
    let verifier = ChainVerifier::with_defaults(&test_logger());
    let chain =
        build_chain(&pki.expired_leaf, &[pki.root.duplicate(), pki.intermediate.duplicate()]).expect("chain");

    let status = verifier.verify_chain(&chain, &[]).expect("verify");
    assert!(matches!(status.failure(), Some(TrustFailure::Expired { .. })));
}

#[test]
fn test_verify_before_validity_is_not_yet_valid() {
    let pki = build_pki();
    let verifier = ChainVerifier::with_defaults(&test_logger());
    let early = Utc.with_ymd_and_hms(2010, 6, 1, 0, 0, 0).single().expect("date");
    let chain = build_chain_at(&pki.leaf, &[pki.root.duplicate(), pki.intermediate.duplicate()], early)
        .expect("chain");

    let status = verifier.verify_chain_at(&chain, &[], early).expect("verify");
    assert!(matches!(status.failure(), Some(TrustFailure::NotYetValid { .. })));
}

#[test]
fn test_verify_detects_wrong_issuer_signature() {
    let pki = build_pki();
    let verifier = ChainVerifier::with_defaults(&test_logger());
    // Leaf followed directly by the root: names do not link
    let chain = vec![pki.leaf.duplicate(), pki.root.duplicate()];

    let status = verifier.verify_chain(&chain, &[]).expect("verify");
    assert!(matches!(status.failure(), Some(TrustFailure::SignatureInvalid { .. })));
}

#[test]
fn test_verify_chain_without_root_is_incomplete() {
    let pki = build_pki();
    let verifier = ChainVerifier::with_defaults(&test_logger());
    let chain = vec![pki.leaf.duplicate(), pki.intermediate.duplicate()];

    let status = verifier.verify_chain(&chain, &[]).expect("verify");
    assert!(matches!(status.failure(), Some(TrustFailure::Incomplete { .. })));
    assert!(matches!(verifier.verify_chain(&[], &[]), Err(StoreError::ChainIncomplete(_))));
}

#[test]
fn test_verify_certificate_builds_and_checks() {
    let pki = build_pki();
    let verifier = ChainVerifier::with_defaults(&test_logger());
    let candidates = vec![pki.intermediate.duplicate(), pki.root.duplicate()];

    assert!(verifier
        .verify_certificate(&pki.leaf, &candidates, &[])
        .expect("verify")
        .is_trusted());
    assert!(!verifier
        .verify_certificate(&pki.leaf, &candidates, &[pki.crl_revoking_leaf.duplicate()])
        .expect("verify")
        .is_trusted());
}

#[test]
fn test_parallel_verification() {
    let pki = std::sync::Arc::new(build_pki());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pki = pki.clone();
            std::thread::spawn(move || {
                let verifier = ChainVerifier::with_defaults(&test_logger());
                let candidates = vec![pki.intermediate.duplicate(), pki.root.duplicate()];
                verifier
                    .verify_certificate(&pki.leaf, &candidates, &[pki.crl_empty.duplicate()])
                    .expect("verify")
                    .is_trusted()
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().expect("thread"));
    }
}

#[test]
fn test_cross_signed_pair_is_chain_cycle() {
    let mut params_a = rcgen::CertificateParams::new(Vec::new());
    params_a.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
    params_a.distinguished_name.push(rcgen::DnType::CommonName, "Cycle A");
    params_a.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let mut params_b = rcgen::CertificateParams::new(Vec::new());
    params_b.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
    params_b.distinguished_name.push(rcgen::DnType::CommonName, "Cycle B");
    params_b.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);

    let a = rcgen::Certificate::from_params(params_a).expect("a");
    let b = rcgen::Certificate::from_params(params_b).expect("b");
    let a_by_b = Certificate::from_der(a.serialize_der_with_signer(&b).expect("a by b")).expect("parse a");
    let b_by_a = Certificate::from_der(b.serialize_der_with_signer(&a).expect("b by a")).expect("parse b");

    let candidates = vec![a_by_b.duplicate(), b_by_a.duplicate()];
    assert!(matches!(
        build_chain(&a_by_b, &candidates),
        Err(StoreError::ChainCycle(_))
    ));
}

/// Root, two intermediates sharing one subject and key, and a leaf issued
/// under that subject. Returns `(leaf, root, first, second)`.
fn twin_intermediates(
    first: (i32, i32),
    second: (i32, i32),
) -> (Certificate, Certificate, Certificate, Certificate) {
    let root = rcgen::Certificate::from_params(ca_params("Twin Root", 1)).expect("root");

    let mut params = ca_params("Twin Intermediate", 2);
    params.not_before = rcgen::date_time_ymd(first.0, 1, 1);
    params.not_after = rcgen::date_time_ymd(first.1, 1, 1);
    let a = rcgen::Certificate::from_params(params).expect("first");

    let mut params = ca_params("Twin Intermediate", 3);
    params.not_before = rcgen::date_time_ymd(second.0, 1, 1);
    params.not_after = rcgen::date_time_ymd(second.1, 1, 1);
    params.key_pair = Some(rcgen::KeyPair::from_der(&a.serialize_private_key_der()).expect("shared key"));
    let b = rcgen::Certificate::from_params(params).expect("second");

    let mut params = rcgen::CertificateParams::new(vec!["twin.test.invalid".to_string()]);
    params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
    params.distinguished_name.push(rcgen::DnType::CommonName, "Twin Leaf");
    params.not_before = rcgen::date_time_ymd(2021, 6, 1);
    params.not_after = rcgen::date_time_ymd(2040, 1, 1);
    let leaf = rcgen::Certificate::from_params(params).expect("leaf");

    let parse = |der: Vec<u8>| Certificate::from_der(der).expect("parse");
    (
        parse(leaf.serialize_der_with_signer(&a).expect("leaf der")),
        parse(root.serialize_der().expect("root der")),
        parse(a.serialize_der_with_signer(&root).expect("first der")),
        parse(b.serialize_der_with_signer(&root).expect("second der")),
    )
}

fn chosen_issuer(leaf: &Certificate, candidates: Vec<Certificate>) -> Certificate {
    let mut reversed: Vec<Certificate> = candidates.iter().map(Certificate::duplicate).collect();
    reversed.reverse();
    let forward = build_chain(leaf, &candidates).expect("forward");
    let backward = build_chain(leaf, &reversed).expect("reversed");
    assert_eq!(thumbprints(&forward), thumbprints(&backward));
    assert_eq!(forward.len(), 3);
    forward[1].duplicate()
}

#[test]
fn test_tie_break_prefers_currently_valid_issuer() {
    let (leaf, root, expired, valid) = twin_intermediates((2019, 2021), (2020, 2045));
    let chosen = chosen_issuer(&leaf, vec![root.duplicate(), expired.duplicate(), valid.duplicate()]);
    assert!(chosen.equals(&valid));
    assert!(!chosen.equals(&expired));
}

#[test]
fn test_tie_break_prefers_latest_not_before() {
    let (leaf, root, older, newer) = twin_intermediates((2020, 2045), (2022, 2045));
    let chosen = chosen_issuer(&leaf, vec![root.duplicate(), older.duplicate(), newer.duplicate()]);
    assert!(chosen.equals(&newer));
}

#[test]
fn test_parsed_names_and_crl_identity() {
    let pki = build_pki();
    assert_eq!(pki.leaf.organization_name(), Some("Test PKI"));
    assert_eq!(pki.crl_empty.issuer_friendly_name(), "Test Intermediate");
    assert_eq!(pki.crl_from_root.issuer_friendly_name(), "Test Root");

    assert!(pki.crl_empty.equals(&pki.crl_empty.duplicate()));
    assert!(!pki.crl_empty.equals(&pki.crl_stale));
    assert!(pki.crl_empty == pki.crl_empty.duplicate());
}
