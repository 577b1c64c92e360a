//! Key schedule and deterministic nonce construction.
//!
//! All keys are derived from the connection's shared secret via
//! HKDF-SHA256 with per-direction, per-purpose info strings, so the two
//! directions of a connection never share key material.

use chacha20poly1305::{Key, XNonce};
use hkdf::Hkdf;
use sha2::Sha256;

use courier_types::{Direction, SharedSecret, TransportId};

use crate::TAG_LENGTH;

const HKDF_SALT: &[u8] = b"courier-frame-v1";

fn expand(secret: &SharedSecret, info: &[u8]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), secret.as_bytes());
    let mut out = [0u8; 32];
    hkdf.expand(info, &mut out)
        .expect("HKDF expand should not fail with valid lengths");
    out
}

fn direction_info(direction: Direction, purpose: &[u8]) -> Vec<u8> {
    let label: &[u8] = match direction {
        Direction::Initiator => b"initiator",
        Direction::Responder => b"responder",
    };
    let mut info = Vec::with_capacity(label.len() + 1 + purpose.len());
    info.extend_from_slice(label);
    info.push(b'-');
    info.extend_from_slice(purpose);
    info
}

/// Derive the frame encryption key for one direction.
pub(crate) fn derive_frame_key(secret: &SharedSecret, direction: Direction) -> Key {
    Key::from(expand(secret, &direction_info(direction, b"frame-key")))
}

/// Derive the connection tag key for one direction.
fn derive_tag_key(secret: &SharedSecret, direction: Direction) -> [u8; 32] {
    expand(secret, &direction_info(direction, b"tag-key"))
}

/// Compute the connection tag for one direction of a connection.
///
/// The tag is written before the first frame and lets a peer recognise
/// which contact, transport and connection number a stream belongs to
/// without decrypting anything. An external connection recogniser can
/// compute candidate tags for every expected connection and match against
/// the first [`TAG_LENGTH`] bytes it reads.
pub fn connection_tag(
    secret: &SharedSecret,
    direction: Direction,
    transport: TransportId,
    connection: u64,
) -> [u8; TAG_LENGTH] {
    let key = derive_tag_key(secret, direction);
    let mut hasher = blake3::Hasher::new_keyed(&key);
    hasher.update(&[direction.flag()]);
    hasher.update(&transport.value().to_be_bytes());
    hasher.update(&connection.to_be_bytes());
    let hash = hasher.finalize();
    let mut tag = [0u8; TAG_LENGTH];
    tag.copy_from_slice(&hash.as_bytes()[..TAG_LENGTH]);
    tag
}

/// Build the deterministic nonce for one frame.
///
/// Layout: direction flag (1) | transport id (2) | connection number (8) |
/// frame counter (8) | zero padding (5). Unique per frame and per
/// direction for the lifetime of the connection.
pub(crate) fn frame_nonce(
    direction: Direction,
    transport: TransportId,
    connection: u64,
    counter: u64,
) -> XNonce {
    let mut nonce = [0u8; 24];
    nonce[0] = direction.flag();
    nonce[1..3].copy_from_slice(&transport.value().to_be_bytes());
    nonce[3..11].copy_from_slice(&connection.to_be_bytes());
    nonce[11..19].copy_from_slice(&counter.to_be_bytes());
    XNonce::from(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> SharedSecret {
        SharedSecret::new([9u8; 32])
    }

    #[test]
    fn directions_get_distinct_keys() {
        let s = secret();
        assert_ne!(
            derive_frame_key(&s, Direction::Initiator),
            derive_frame_key(&s, Direction::Responder)
        );
        assert_ne!(
            derive_tag_key(&s, Direction::Initiator),
            derive_tag_key(&s, Direction::Responder)
        );
    }

    #[test]
    fn tag_is_deterministic_and_direction_bound() {
        let s = secret();
        let t = TransportId::new(999);
        let a = connection_tag(&s, Direction::Initiator, t, 1234);
        let b = connection_tag(&s, Direction::Initiator, t, 1234);
        let c = connection_tag(&s, Direction::Responder, t, 1234);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, connection_tag(&s, Direction::Initiator, t, 1235));
    }

    #[test]
    fn nonces_differ_per_counter_and_direction() {
        let t = TransportId::new(1);
        let n0 = frame_nonce(Direction::Initiator, t, 7, 0);
        let n1 = frame_nonce(Direction::Initiator, t, 7, 1);
        let r0 = frame_nonce(Direction::Responder, t, 7, 0);
        assert_ne!(n0, n1);
        assert_ne!(n0, r0);
    }
}
