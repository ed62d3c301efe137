//! End-to-end signing and verification over real images.

use pgp::composed::{KeyType, SecretKeyParamsBuilder, SignedPublicKey, SignedSecretKey};
use pgp::types::{KeyTrait, SecretKeyTrait};
use rand::SeedableRng;
use similar_asserts::assert_eq;

use sif::{
    AddOpts, Buffer, CreateOpts, DataType, DescriptorInput, FsType, HashType, Image, LinkTarget,
    PartType, Selector,
};
use sif_integrity::dsse::{Ed25519Signer, Ed25519Verifier, Signer as DsseSigner};
use sif_integrity::{Error, Signer, SignerOpts, Verifier, VerifierOpts};

fn pgp_key(seed: u64) -> (SignedSecretKey, SignedPublicKey) {
    let rng = rand::rngs::StdRng::seed_from_u64(seed);
    let params = SecretKeyParamsBuilder::default()
        .key_type(KeyType::Rsa(2048))
        .can_sign(true)
        .primary_user_id("Test Key <test@sif.test>".into())
        .build()
        .unwrap();
    let secret = params.generate_with_rng(rng).unwrap();
    let secret = secret.sign(String::new).unwrap();
    let public = secret.public_key().sign(&secret, String::new).unwrap();
    (secret, public)
}

fn one_group_image() -> Image<Buffer> {
    Image::create(
        Buffer::new(),
        CreateOpts::new().deterministic().with_descriptors(vec![
            DescriptorInput::new(DataType::Generic, &b"object one"[..])
                .with_name("one")
                .with_group_id(1),
            DescriptorInput::new(DataType::Generic, &b"object two"[..])
                .with_name("two")
                .with_group_id(1),
        ]),
    )
    .unwrap()
}

fn ed25519_pair(seed: u8) -> (Ed25519Signer, Ed25519Verifier) {
    let signer = Ed25519Signer::new(&[seed; 32]);
    let public: [u8; 32] = signer.public_key().try_into().unwrap();
    (signer, Ed25519Verifier::new(&public).unwrap())
}

fn pad_entity(fingerprint: &[u8]) -> [u8; sif::ENTITY_LEN] {
    let mut entity = [0u8; sif::ENTITY_LEN];
    entity[..fingerprint.len()].copy_from_slice(fingerprint);
    entity
}

#[test]
fn pgp_sign_verify_roundtrip() {
    let (secret, public) = pgp_key(1);
    let mut img = one_group_image();

    Signer::new(&mut img, SignerOpts::new().with_entity(secret).deterministic())
        .unwrap()
        .sign()
        .unwrap();

    // The signature object is ungrouped, group-linked, and records the
    // hash type and signing entity.
    let sig = img
        .descriptor(&Selector::new().with_data_type(DataType::Signature))
        .unwrap();
    assert_eq!(sig.group_id(), 0);
    assert_eq!(sig.link(), Some(LinkTarget::Group(1)));
    let (hash, entity) = sig.signature_metadata().unwrap();
    assert_eq!(hash, HashType::Sha256);
    assert_eq!(entity, pad_entity(&public.fingerprint()));

    let mut verifier = Verifier::new(
        &img,
        VerifierOpts::new().with_keyring(vec![public.clone()]),
    )
    .unwrap();
    verifier.verify().unwrap();

    assert_eq!(
        verifier.any_signed_by().unwrap(),
        vec![pad_entity(&public.fingerprint())]
    );
}

#[test]
fn corrupted_payload_fails_with_digest_mismatch() {
    let (secret, public) = pgp_key(2);
    let mut img = one_group_image();
    Signer::new(&mut img, SignerOpts::new().with_entity(secret).deterministic())
        .unwrap()
        .sign()
        .unwrap();

    // Flip one byte of a signed payload behind the handle's back.
    let target = img.descriptor(&Selector::new().with_id(1)).unwrap();
    let offset = target.offset() as usize;
    let mut bytes = img.into_store().unwrap().into_vec();
    bytes[offset] ^= 0x01;
    let img = Image::load(Buffer::from_vec(bytes), sif::LoadOpts::new()).unwrap();

    let mut verifier =
        Verifier::new(&img, VerifierOpts::new().with_keyring(vec![public])).unwrap();
    match verifier.verify() {
        Err(e @ Error::SignatureNotValid { .. }) => {
            assert!(matches!(e.signature_cause(), Error::DigestMismatch));
        }
        other => panic!("expected SignatureNotValid, got {other:?}"),
    }
}

#[test]
fn corrupted_signature_fails() {
    let (secret, public) = pgp_key(3);
    let mut img = one_group_image();
    Signer::new(&mut img, SignerOpts::new().with_entity(secret).deterministic())
        .unwrap()
        .sign()
        .unwrap();

    let sig = img
        .descriptor(&Selector::new().with_data_type(DataType::Signature))
        .unwrap();
    // Corrupt a byte inside the armored envelope body.
    let offset = sig.offset() as usize + 100;
    let mut bytes = img.into_store().unwrap().into_vec();
    bytes[offset] = bytes[offset].wrapping_add(1);
    let img = Image::load(Buffer::from_vec(bytes), sif::LoadOpts::new()).unwrap();

    let mut verifier =
        Verifier::new(&img, VerifierOpts::new().with_keyring(vec![public])).unwrap();
    assert!(matches!(
        verifier.verify(),
        Err(Error::SignatureNotValid { .. })
    ));
}

#[test]
fn dsse_sign_verify_roundtrip() {
    let (signer, verifier) = ed25519_pair(1);
    let mut img = one_group_image();

    Signer::new(
        &mut img,
        SignerOpts::new()
            .with_signers(vec![Box::new(signer)])
            .deterministic(),
    )
    .unwrap()
    .sign()
    .unwrap();

    let sig = img
        .descriptor(&Selector::new().with_data_type(DataType::Signature))
        .unwrap();
    let (hash, _) = sig.signature_metadata().unwrap();
    assert_eq!(hash, HashType::Sha256);

    let mut v = Verifier::new(
        &img,
        VerifierOpts::new().with_dsse_verifiers(vec![Box::new(verifier)]),
    )
    .unwrap();
    v.verify().unwrap();
}

#[test]
fn dsse_wrong_key_fails_envelope_verification() {
    let (signer, _) = ed25519_pair(2);
    let (_, other_verifier) = ed25519_pair(3);
    let mut img = one_group_image();
    Signer::new(
        &mut img,
        SignerOpts::new()
            .with_signers(vec![Box::new(signer)])
            .deterministic(),
    )
    .unwrap()
    .sign()
    .unwrap();

    let mut v = Verifier::new(
        &img,
        VerifierOpts::new().with_dsse_verifiers(vec![Box::new(other_verifier)]),
    )
    .unwrap();
    match v.verify() {
        Err(e @ Error::SignatureNotValid { .. }) => {
            assert!(matches!(e.signature_cause(), Error::VerifyEnvelopeFailed));
        }
        other => panic!("expected SignatureNotValid, got {other:?}"),
    }
}

#[test]
fn subset_verification() {
    let (secret, public) = pgp_key(4);
    let mut img = one_group_image();

    // Sign only object 1 (an explicit subset of group 1).
    Signer::new(
        &mut img,
        SignerOpts::new()
            .with_entity(secret)
            .objects([1])
            .deterministic(),
    )
    .unwrap()
    .sign()
    .unwrap();

    // Requesting the covered object succeeds.
    let mut v = Verifier::new(
        &img,
        VerifierOpts::new()
            .with_keyring(vec![public.clone()])
            .object(1),
    )
    .unwrap();
    v.verify().unwrap();

    // Requesting an uncovered object fails: the signature's covered set
    // is not a superset of the request.
    let mut v = Verifier::new(
        &img,
        VerifierOpts::new().with_keyring(vec![public.clone()]).object(2),
    )
    .unwrap();
    match v.verify() {
        Err(e @ Error::SignatureNotValid { .. }) => {
            assert!(matches!(e.signature_cause(), Error::ObjectNotSigned(2)));
        }
        other => panic!("expected SignatureNotValid, got {other:?}"),
    }

    // A whole-group check against the subset signature also fails.
    let mut v = Verifier::new(
        &img,
        VerifierOpts::new().with_keyring(vec![public]).group(1),
    )
    .unwrap();
    assert!(matches!(
        v.verify(),
        Err(Error::SignatureNotValid { .. })
    ));
}

#[test]
fn group_signature_covers_object_subset_requests() {
    let (secret, public) = pgp_key(5);
    let mut img = one_group_image();
    Signer::new(&mut img, SignerOpts::new().with_entity(secret).deterministic())
        .unwrap()
        .sign()
        .unwrap();

    // The group signature covers {1, 2}; requesting just {2} succeeds and
    // reports only the requested descriptor as verified.
    let mut seen = Vec::new();
    {
        let mut v = Verifier::new(
            &img,
            VerifierOpts::new()
                .with_keyring(vec![public])
                .object(2)
                .callback(|r| {
                    seen.push(r.verified.iter().map(|d| d.id()).collect::<Vec<_>>());
                    false
                }),
        )
        .unwrap();
        v.verify().unwrap();
    }
    assert_eq!(seen, vec![vec![2]]);
}

#[test]
fn callback_can_suppress_unknown_issuer() {
    let (secret, _) = pgp_key(6);
    let mut img = one_group_image();
    Signer::new(&mut img, SignerOpts::new().with_entity(secret).deterministic())
        .unwrap()
        .sign()
        .unwrap();

    // Empty keyring: every signature fails with UnknownIssuer unless the
    // callback suppresses it.
    let mut seen = 0;
    {
        let mut v = Verifier::new(
            &img,
            VerifierOpts::new().callback(|r| {
                seen += 1;
                assert_eq!(r.signature.data_type(), DataType::Signature);
                matches!(
                    r.error.as_ref().map(Error::signature_cause),
                    Some(Error::UnknownIssuer)
                )
            }),
        )
        .unwrap();
        v.verify().unwrap();
    }
    assert_eq!(seen, 1);
}

#[test]
fn no_key_material_rejected() {
    let (secret, _) = pgp_key(7);
    let mut img = one_group_image();
    Signer::new(&mut img, SignerOpts::new().with_entity(secret).deterministic())
        .unwrap()
        .sign()
        .unwrap();

    let mut v = Verifier::new(&img, VerifierOpts::new()).unwrap();
    assert!(matches!(v.verify(), Err(Error::NoKeyMaterial)));

    // Signing without key material is also rejected.
    let mut img = one_group_image();
    assert!(matches!(
        Signer::new(&mut img, SignerOpts::new()),
        Err(Error::NoKeyMaterial)
    ));
}

#[test]
fn unsigned_image_reports_signature_not_found() {
    let (_, public) = pgp_key(8);
    let img = one_group_image();
    let mut v = Verifier::new(&img, VerifierOpts::new().with_keyring(vec![public])).unwrap();
    assert!(matches!(
        v.verify(),
        Err(Error::SignatureNotFound { id: 1, is_group: true })
    ));
    assert!(v.any_signed_by().is_err());
}

#[test]
fn any_and_all_signed_by_aggregation() {
    let (secret_a, public_a) = pgp_key(9);
    let (secret_b, public_b) = pgp_key(10);

    // Group 1 signed by A; group 2 signed by A and B.
    let mut img = Image::create(
        Buffer::new(),
        CreateOpts::new().deterministic().with_descriptors(vec![
            DescriptorInput::new(DataType::Generic, &b"g1"[..]).with_group_id(1),
            DescriptorInput::new(DataType::Generic, &b"g2"[..]).with_group_id(2),
        ]),
    )
    .unwrap();

    Signer::new(
        &mut img,
        SignerOpts::new().with_entity(secret_a).deterministic(),
    )
    .unwrap()
    .sign()
    .unwrap();
    Signer::new(
        &mut img,
        SignerOpts::new().with_entity(secret_b).group(2).deterministic(),
    )
    .unwrap()
    .sign()
    .unwrap();

    let v = Verifier::new(
        &img,
        VerifierOpts::new().with_keyring(vec![public_a.clone(), public_b.clone()]),
    )
    .unwrap();

    let fp_a = pad_entity(&public_a.fingerprint());
    let fp_b = pad_entity(&public_b.fingerprint());

    let mut want_any = vec![fp_a, fp_b];
    want_any.sort_unstable();
    assert_eq!(v.any_signed_by().unwrap(), want_any);
    assert_eq!(v.all_signed_by().unwrap(), vec![fp_a]);
}

#[test]
fn legacy_object_verification() {
    let (secret, public) = pgp_key(11);

    // Build a legacy-signed image by hand: partition object plus a
    // clearsigned SIFHASH digest linked to it.
    let part = DescriptorInput::new(DataType::Partition, &b"legacy payload"[..])
        .with_partition_metadata(FsType::Squash, PartType::PrimSys, sif::Arch::Amd64)
        .unwrap();
    let mut img = Image::create(
        Buffer::new(),
        CreateOpts::new().deterministic().with_descriptors(vec![part]),
    )
    .unwrap();

    let digest = {
        use sha2::{Digest, Sha256};
        hex::encode(Sha256::digest(b"legacy payload"))
    };
    let body = format!("SIFHASH:\n{digest}");
    let envelope = pgp::cleartext::CleartextSignedMessage::sign(&body, &secret, String::new)
        .unwrap()
        .to_armored_string(pgp::ArmorOptions::default())
        .unwrap();

    let sig = DescriptorInput::new(DataType::Signature, envelope.as_bytes())
        .no_group()
        .with_linked_id(1)
        .with_signature_metadata(HashType::Sha256, &public.fingerprint())
        .unwrap();
    img.add_object(sig, AddOpts::new().deterministic()).unwrap();

    // Default legacy mode verifies the primary partition.
    let mut v = Verifier::new(
        &img,
        VerifierOpts::new().with_keyring(vec![public.clone()]).legacy(),
    )
    .unwrap();
    v.verify().unwrap();
    drop(v);

    // legacy_all covers every data object.
    let mut v = Verifier::new(
        &img,
        VerifierOpts::new().with_keyring(vec![public.clone()]).legacy_all(),
    )
    .unwrap();
    v.verify().unwrap();
    drop(v);

    // Corrupting the payload breaks the digest.
    let target = img.descriptor(&Selector::new().with_id(1)).unwrap();
    let offset = target.offset() as usize;
    let mut bytes = img.into_store().unwrap().into_vec();
    bytes[offset] ^= 0xff;
    let img = Image::load(Buffer::from_vec(bytes), sif::LoadOpts::new()).unwrap();

    let mut v = Verifier::new(
        &img,
        VerifierOpts::new().with_keyring(vec![public]).legacy(),
    )
    .unwrap();
    match v.verify() {
        Err(e @ Error::SignatureNotValid { .. }) => {
            assert!(matches!(e.signature_cause(), Error::DigestMismatch));
        }
        other => panic!("expected SignatureNotValid, got {other:?}"),
    }
}

#[test]
fn verifier_rejects_bad_targets() {
    let (_, public) = pgp_key(12);
    let img = one_group_image();

    assert!(matches!(
        Verifier::new(
            &img,
            VerifierOpts::new().with_keyring(vec![public.clone()]).group(9)
        ),
        Err(Error::GroupNotFound(9))
    ));
    assert!(matches!(
        Verifier::new(
            &img,
            VerifierOpts::new().with_keyring(vec![public.clone()]).object(9)
        ),
        Err(Error::Sif(sif::Error::ObjectNotFound))
    ));
    assert!(matches!(
        Verifier::new(
            &img,
            VerifierOpts::new().with_keyring(vec![public]).object(0)
        ),
        Err(Error::Sif(sif::Error::InvalidObjectId))
    ));
}
