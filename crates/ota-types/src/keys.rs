//! Key hygiene for caller-supplied strings used as map keys.

/// Meta-key names that must never be accepted as collaborator emails.
///
/// Collaborator maps are keyed by email and travel through JSON consumers
/// that treat these names specially.
pub const RESERVED_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Returns `true` if `key` equals one of [`RESERVED_KEYS`].
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Case-folded form of an email used for lookups.
///
/// The display form keeps the casing the account registered with.
pub fn fold_email(email: &str) -> String {
    email.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reserved_keys_are_rejected() {
        for key in RESERVED_KEYS {
            assert!(is_reserved_key(key));
        }
        assert!(!is_reserved_key("dev@example.com"));
        assert!(!is_reserved_key("__PROTO__"));
    }

    proptest! {
        #[test]
        fn case_variants_fold_to_same_key(local in "[a-zA-Z]{1,12}", domain in "[a-zA-Z]{1,8}") {
            let email = format!("{local}@{domain}.com");
            prop_assert_eq!(fold_email(&email.to_uppercase()), fold_email(&email));
            prop_assert_eq!(fold_email(&email.to_lowercase()), fold_email(&email));
        }
    }
}
