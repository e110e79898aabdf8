mod checksum;

pub use checksum::{
    sha256_hex, verify, verify_with_policy, DigestCheck, DigestPolicy, IntegrityError,
};

#[cfg(test)]
mod tests;
