//! Match share codes (`CSGO-xxxxx-xxxxx-xxxxx-xxxxx-xxxxx`).
//!
//! A share code is a 25-digit base-57 number, least significant digit first,
//! holding 18 big-endian bytes:
//!
//! ```text
//! bytes 0..8    match id        (little-endian u64)
//! bytes 8..16   reservation id  (little-endian u64)
//! bytes 16..18  TV port         (little-endian u16)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ShareCodeError;
use crate::types::MatchId;

const DICTIONARY: &[u8; 57] = b"ABCDEFGHJKLMNOPQRSTUVWXYZabcdefhijkmnopqrstuvwxyz23456789";
const PREFIX: &str = "CSGO";
const GROUPS: usize = 5;
const GROUP_LEN: usize = 5;
const PAYLOAD_BYTES: usize = 18;

/// Fields packed into a share code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedShareCode {
    pub match_id: MatchId,
    pub reservation_id: u64,
    pub tv_port: u16,
}

/// A syntactically valid share code. Decoding can still overflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShareCode(String);

impl ShareCode {
    /// Validate `raw` against `CSGO(-?[dict]{5}){5}`.
    pub fn parse(raw: &str) -> Result<Self, ShareCodeError> {
        let trimmed = raw.trim();
        digits_of(trimmed)?;
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn decode(&self) -> Result<DecodedShareCode, ShareCodeError> {
        let digits = digits_of(&self.0)?;
        let mut bytes = [0u8; PAYLOAD_BYTES];
        for &digit in digits.iter().rev() {
            let mut carry = u32::from(digit);
            for byte in bytes.iter_mut().rev() {
                let v = u32::from(*byte) * DICTIONARY.len() as u32 + carry;
                *byte = (v & 0xff) as u8;
                carry = v >> 8;
            }
            if carry != 0 {
                return Err(ShareCodeError::Overflow(self.0.clone()));
            }
        }

        let mut match_id = [0u8; 8];
        match_id.copy_from_slice(&bytes[0..8]);
        let mut reservation_id = [0u8; 8];
        reservation_id.copy_from_slice(&bytes[8..16]);
        let tv_port = [bytes[16], bytes[17]];

        Ok(DecodedShareCode {
            match_id: MatchId(u64::from_le_bytes(match_id)),
            reservation_id: u64::from_le_bytes(reservation_id),
            tv_port: u16::from_le_bytes(tv_port),
        })
    }

    /// Shorthand for `decode()?.match_id`.
    pub fn match_id(&self) -> Result<MatchId, ShareCodeError> {
        self.decode().map(|d| d.match_id)
    }

    pub fn encode(decoded: &DecodedShareCode) -> Self {
        let mut bytes = [0u8; PAYLOAD_BYTES];
        bytes[0..8].copy_from_slice(&decoded.match_id.0.to_le_bytes());
        bytes[8..16].copy_from_slice(&decoded.reservation_id.to_le_bytes());
        bytes[16..18].copy_from_slice(&decoded.tv_port.to_le_bytes());

        let mut out = String::with_capacity(PREFIX.len() + GROUPS * (GROUP_LEN + 1));
        out.push_str(PREFIX);
        for i in 0..GROUPS * GROUP_LEN {
            if i % GROUP_LEN == 0 {
                out.push('-');
            }
            let mut rem = 0u32;
            for byte in bytes.iter_mut() {
                let v = (rem << 8) | u32::from(*byte);
                *byte = (v / DICTIONARY.len() as u32) as u8;
                rem = v % DICTIONARY.len() as u32;
            }
            out.push(DICTIONARY[rem as usize] as char);
        }
        Self(out)
    }
}

impl fmt::Display for ShareCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for ShareCode {
    type Error = ShareCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ShareCode> for String {
    fn from(code: ShareCode) -> Self {
        code.0
    }
}

/// Dictionary indices of the 25 payload characters, in written order.
fn digits_of(code: &str) -> Result<Vec<u8>, ShareCodeError> {
    let malformed = || ShareCodeError::Malformed(code.to_owned());
    let rest = code.strip_prefix(PREFIX).ok_or_else(malformed)?;
    let mut chars = rest.chars().peekable();
    let mut digits = Vec::with_capacity(GROUPS * GROUP_LEN);

    for _ in 0..GROUPS {
        if chars.peek() == Some(&'-') {
            chars.next();
        }
        for _ in 0..GROUP_LEN {
            let c = chars.next().ok_or_else(malformed)?;
            let idx = DICTIONARY
                .iter()
                .position(|&d| char::from(d) == c)
                .ok_or_else(malformed)?;
            digits.push(idx as u8);
        }
    }

    if chars.next().is_some() {
        return Err(malformed());
    }
    Ok(digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_share_code() {
        let code = ShareCode::parse("CSGO-GADqf-jjyJ8-cSP2r-smZRo-TO2xK").unwrap();
        let decoded = code.decode().unwrap();
        assert_eq!(decoded.match_id, MatchId(3230642215713767580));
        assert_eq!(decoded.reservation_id, 3230647599455273103);
        assert_eq!(decoded.tv_port, 55788);
    }

    #[test]
    fn encode_reproduces_known_share_code() {
        let decoded = DecodedShareCode {
            match_id: MatchId(3230642215713767580),
            reservation_id: 3230647599455273103,
            tv_port: 55788,
        };
        assert_eq!(
            ShareCode::encode(&decoded).as_str(),
            "CSGO-GADqf-jjyJ8-cSP2r-smZRo-TO2xK"
        );
    }

    #[test]
    fn dashes_are_optional() {
        let code = ShareCode::parse("CSGOGADqfjjyJ8cSP2rsmZRoTO2xK").unwrap();
        assert_eq!(code.match_id().unwrap(), MatchId(3230642215713767580));
    }

    #[test]
    fn rejects_wrong_prefix_length_and_alphabet() {
        assert!(ShareCode::parse("CSGX-GADqf-jjyJ8-cSP2r-smZRo-TO2xK").is_err());
        assert!(ShareCode::parse("CSGO-GADqf-jjyJ8-cSP2r-smZRo").is_err());
        assert!(ShareCode::parse("CSGO-GADqf-jjyJ8-cSP2r-smZRo-TO2xKA").is_err());
        // `I`, `l` and `0` are not in the dictionary.
        assert!(ShareCode::parse("CSGO-IADqf-jjyJ8-cSP2r-smZRo-TO2xK").is_err());
        assert!(ShareCode::parse("n/a").is_err());
    }

    #[test]
    fn overflowing_payload_is_an_error() {
        let code = ShareCode::parse("CSGO-99999-99999-99999-99999-99999").unwrap();
        assert!(matches!(code.decode(), Err(ShareCodeError::Overflow(_))));
    }

    #[test]
    fn small_match_ids_survive_encoding() {
        for id in [1u64, 2, 3, 7, 100] {
            let code = ShareCode::encode(&DecodedShareCode {
                match_id: MatchId(id),
                reservation_id: 42,
                tv_port: 7,
            });
            assert_eq!(code.match_id().unwrap(), MatchId(id));
        }
    }
}
