use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};

/// Bytes of entropy per token; encodes to 43 URL-safe characters.
const TOKEN_BYTES: usize = 32;

/// Generates an opaque, unguessable token. Used for both email
/// verification tokens and session identifiers.
pub fn generate() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut buf);
    Base64UrlUnpadded::encode_string(&buf)
}
