use rand::distributions::Alphanumeric;
use rand::Rng;

pub const JOIN_CODE_LEN: usize = 10;

/// Random join code over the 62-symbol alphanumeric alphabet. At 10
/// characters a collision against the unique index is vanishingly rare;
/// the insert would surface one as a database error.
pub fn generate_join_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(JOIN_CODE_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_codes_are_alphanumeric_and_sized() {
        for _ in 0..100 {
            let code = generate_join_code();
            assert_eq!(code.len(), JOIN_CODE_LEN);
            assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn join_codes_vary() {
        let a = generate_join_code();
        let b = generate_join_code();
        assert_ne!(a, b);
    }
}
