//! DNS challenge records proving control of a site's domain

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Random password for sites set up without one
pub fn generate_password() -> String {
    Uuid::new_v4().to_string()
}

/// Hex SHA-256 of "<host> <password>", the value the server looks up in DNS
pub fn challenge_digest(host: &str, password: &str) -> String {
    let digest = Sha256::digest(format!("{} {}", host, password).as_bytes());
    format!("{:x}", digest)
}

/// Zone file line publishing the challenge for `host`
pub fn zone_record(host: &str, digest: &str) -> String {
    format!("_git-pages-challenge.{}. 3600 IN TXT \"{}\"", host, digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_sha256_of_host_and_password() {
        let expected = format!("{:x}", Sha256::digest(b"example.org secret"));
        assert_eq!(challenge_digest("example.org", "secret"), expected);
        assert_ne!(challenge_digest("example.org", "other"), expected);
    }

    #[test]
    fn test_zone_record_format() {
        assert_eq!(
            zone_record("example.org", "abcd"),
            "_git-pages-challenge.example.org. 3600 IN TXT \"abcd\""
        );
    }

    #[test]
    fn test_generated_passwords_differ() {
        let a = generate_password();
        assert_eq!(a.len(), 36);
        assert_ne!(a, generate_password());
    }
}
