// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests for the signature contract.

use proptest::prelude::*;
use ytk_permit::KeyRing;

proptest! {
    /// Sign-then-verify holds for arbitrary messages and secrets.
    #[test]
    fn sign_verify_round_trip(
        message in ".{0,120}",
        secret in "[a-zA-Z0-9_-]{1,40}",
    ) {
        let ring = KeyRing::single(1, secret);
        let signature = ring.sign(&message);
        prop_assert_eq!(signature.len(), 64);
        prop_assert!(signature.bytes().all(|b| b.is_ascii_hexdigit()));
        prop_assert!(!signature.bytes().any(|b| b.is_ascii_uppercase()));
        prop_assert_eq!(ring.verify(&message, &signature), Ok(1));
    }

    /// Any single-byte corruption of the message breaks verification.
    #[test]
    fn corrupted_message_fails(
        message in "[a-z0-9:]{5,60}",
        index in 0usize..60,
        replacement in proptest::char::range('A', 'Z'),
    ) {
        let ring = KeyRing::single(1, "test-secret-v1");
        let signature = ring.sign(&message);

        let index = index % message.len();
        let mut corrupted: Vec<char> = message.chars().collect();
        prop_assume!(corrupted[index] != replacement);
        corrupted[index] = replacement;
        let corrupted: String = corrupted.into_iter().collect();

        prop_assert!(ring.verify(&corrupted, &signature).is_err());
    }

    /// Signatures under different secrets never verify against each other.
    #[test]
    fn wrong_key_fails(
        message in ".{0,80}",
        secret_a in "[a-z]{4,20}",
        secret_b in "[a-z]{4,20}",
    ) {
        prop_assume!(secret_a != secret_b);
        let a = KeyRing::single(1, secret_a);
        let b = KeyRing::single(1, secret_b);
        let signature = a.sign(&message);
        prop_assert!(b.verify(&message, &signature).is_err());
    }
}
