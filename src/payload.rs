//! Request payload generation.

use chrono::Local;
use rand::distributions::{Alphanumeric, Uniform};
use rand::Rng;

const ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ID_LEN: usize = 8;

/// Bounds on the random filler length, inclusive.
pub const MIN_FILLER: usize = 100;
pub const MAX_FILLER: usize = 500;

fn timestamp() -> String {
    Local::now().format("%Y%m%d%H%M%S").to_string()
}

/// `REQ_<id>_<timestamp>_<filler>`, with a random 8-character id and
/// 100 to 500 random alphanumerics of filler.
pub fn request_payload<R: Rng + ?Sized>(rng: &mut R) -> String {
    let id_chars = Uniform::from(0..ID_CHARSET.len());
    let id: String = (0..ID_LEN)
        .map(|_| ID_CHARSET[rng.sample(id_chars)] as char)
        .collect();

    let filler_len = rng.gen_range(MIN_FILLER..=MAX_FILLER);
    let filler: String = (0..filler_len)
        .map(|_| rng.sample(Alphanumeric) as char)
        .collect();

    format!("REQ_{id}_{}_{filler}", timestamp())
}

/// Fixed payload sent by the diagnostic probe.
pub fn probe_payload() -> String {
    format!("TEST_REQUEST_{}_HELLO_NICE_PROXY", timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_request_payload_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let payload = request_payload(&mut rng);
            let parts: Vec<&str> = payload.splitn(4, '_').collect();
            assert_eq!(parts.len(), 4, "{payload}");
            assert_eq!(parts[0], "REQ");

            assert_eq!(parts[1].len(), ID_LEN);
            assert!(parts[1]
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));

            assert_eq!(parts[2].len(), 14);
            assert!(parts[2].bytes().all(|b| b.is_ascii_digit()));

            assert!((MIN_FILLER..=MAX_FILLER).contains(&parts[3].len()));
            assert!(parts[3].bytes().all(|b| b.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_request_payload_varies() {
        let mut rng = StdRng::seed_from_u64(11);
        let a = request_payload(&mut rng);
        let b = request_payload(&mut rng);
        assert_ne!(a, b);
    }

    #[test]
    fn test_probe_payload() {
        let payload = probe_payload();
        assert!(payload.starts_with("TEST_REQUEST_"));
        assert!(payload.ends_with("_HELLO_NICE_PROXY"));
        assert_eq!(payload.len(), "TEST_REQUEST_".len() + 14 + "_HELLO_NICE_PROXY".len());
    }
}
