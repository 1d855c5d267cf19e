use rand::{rngs::OsRng, RngCore};

/// Symbols a generated short code is drawn from.
pub const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Largest multiple of the alphabet size that fits in a byte. Bytes at or
/// above it are discarded so every symbol stays equally likely.
const ACCEPT_BELOW: u8 = (256 / ALPHABET.len() * ALPHABET.len()) as u8;

/// Generate a random alphanumeric code of exactly `len` characters using the
/// operating system's CSPRNG.
pub fn generate(len: usize) -> Result<String, rand::Error> {
    generate_with(&mut OsRng, len)
}

fn generate_with<R: RngCore>(rng: &mut R, len: usize) -> Result<String, rand::Error> {
    let mut code = String::with_capacity(len);
    let mut buf = [0u8; 32];

    while code.len() < len {
        rng.try_fill_bytes(&mut buf)?;
        for &byte in buf.iter().filter(|&&b| b < ACCEPT_BELOW) {
            if code.len() == len {
                break;
            }
            code.push(ALPHABET[byte as usize % ALPHABET.len()] as char);
        }
    }

    Ok(code)
}

/// Client-chosen codes: 3 to 20 letters, digits, hyphens or underscores.
pub fn is_valid_custom_code(code: &str) -> bool {
    (3..=20).contains(&code.len())
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
