//! APNs binary protocol frames (command 2) and error responses (command 8).

use serde::{Deserialize, Serialize};

use crate::error::PushError;

const SEND_COMMAND: u8 = 2;
const ERROR_COMMAND: u8 = 8;

const DEVICE_TOKEN_ITEM: u8 = 1;
const PAYLOAD_ITEM: u8 = 2;
const IDENTIFIER_ITEM: u8 = 3;
const EXPIRY_ITEM: u8 = 4;
const PRIORITY_ITEM: u8 = 5;

pub const DEVICE_TOKEN_LEN: usize = 32;
pub const MAX_PAYLOAD_LEN: usize = 2048;

/// Length of an error response read back from the gateway.
pub const ERROR_RESPONSE_LEN: usize = 6;

/// Error-response status for an invalid device token.
pub const STATUS_INVALID_TOKEN: u8 = 8;

/// Immediate delivery priority.
pub const PRIORITY_IMMEDIATE: u8 = 10;

/// A notification addressed to any number of device tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApnsNotification {
    /// Echoed back in error responses.
    pub identifier: u32,
    /// UNIX seconds after which APNs may discard the notification; 0 = deliver once or drop.
    pub expiry: u32,
    pub priority: u8,
    /// JSON payload (the `aps` dictionary plus custom keys).
    pub payload: Vec<u8>,
}

impl ApnsNotification {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            identifier: 0,
            expiry: 0,
            priority: PRIORITY_IMMEDIATE,
            payload: payload.into(),
        }
    }

    /// Encode the frame for one device.
    ///
    /// Fails when the token is not 32 hex-encoded bytes or the payload is too large.
    pub fn to_frame(&self, device_token: &str) -> Result<Vec<u8>, PushError> {
        let token = decode_token(device_token)?;
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(PushError::Payload(format!(
                "APNs payload is {} bytes, limit is {}",
                self.payload.len(),
                MAX_PAYLOAD_LEN
            )));
        }

        let mut items = Vec::with_capacity(3 * 5 + DEVICE_TOKEN_LEN + self.payload.len() + 4 + 4 + 1);
        push_item(&mut items, DEVICE_TOKEN_ITEM, &token);
        push_item(&mut items, PAYLOAD_ITEM, &self.payload);
        push_item(&mut items, IDENTIFIER_ITEM, &self.identifier.to_be_bytes());
        push_item(&mut items, EXPIRY_ITEM, &self.expiry.to_be_bytes());
        push_item(&mut items, PRIORITY_ITEM, &[self.priority]);

        let mut frame = Vec::with_capacity(5 + items.len());
        frame.push(SEND_COMMAND);
        frame.extend_from_slice(&(items.len() as u32).to_be_bytes());
        frame.extend_from_slice(&items);
        Ok(frame)
    }
}

fn push_item(buf: &mut Vec<u8>, id: u8, data: &[u8]) {
    buf.push(id);
    buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
    buf.extend_from_slice(data);
}

fn decode_token(device_token: &str) -> Result<Vec<u8>, PushError> {
    let token = hex::decode(device_token.trim())
        .map_err(|e| PushError::InvalidToken(format!("{}: {}", device_token, e)))?;
    if token.len() != DEVICE_TOKEN_LEN {
        return Err(PushError::InvalidToken(format!(
            "{}: expected {} bytes, got {}",
            device_token,
            DEVICE_TOKEN_LEN,
            token.len()
        )));
    }
    Ok(token)
}

/// Sent by the gateway just before it closes a connection it rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResponse {
    pub status: u8,
    pub identifier: u32,
}

impl ErrorResponse {
    pub fn parse(buf: &[u8]) -> Option<Self> {
        match buf {
            [ERROR_COMMAND, status, a, b, c, d, ..] => Some(Self {
                status: *status,
                identifier: u32::from_be_bytes([*a, *b, *c, *d]),
            }),
            _ => None,
        }
    }

    /// Map to an attempt result: status 0 is no error, an invalid token will never succeed.
    pub fn into_result(self) -> Result<(), PushError> {
        match self.status {
            0 => Ok(()),
            STATUS_INVALID_TOKEN => Err(PushError::NoRetry(format!(
                "APNs rejected device token (notification {})",
                self.identifier
            ))),
            status => Err(PushError::ApnsStatus {
                status,
                identifier: self.identifier,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20";

    #[test]
    fn test_frame_layout() {
        let notification = ApnsNotification {
            identifier: 0x01020304,
            expiry: 0x0a0b0c0d,
            priority: 10,
            payload: br#"{"aps":{}}"#.to_vec(),
        };
        let frame = notification.to_frame(TOKEN).unwrap();

        assert_eq!(frame[0], 2);
        let len = u32::from_be_bytes(frame[1..5].try_into().unwrap()) as usize;
        assert_eq!(len, frame.len() - 5);

        // device token
        assert_eq!(&frame[5..8], &[1, 0, 32]);
        assert_eq!(frame[8], 0x01);
        assert_eq!(frame[39], 0x20);

        // payload
        let payload_start = 40;
        assert_eq!(&frame[payload_start..payload_start + 3], &[2, 0, 10]);
        assert_eq!(&frame[payload_start + 3..payload_start + 13], br#"{"aps":{}}"#);

        // identifier, expiry, priority
        let rest = &frame[payload_start + 13..];
        assert_eq!(rest, &[3, 0, 4, 1, 2, 3, 4, 4, 0, 4, 10, 11, 12, 13, 5, 0, 1, 10]);
    }

    #[test]
    fn test_invalid_tokens() {
        let notification = ApnsNotification::new(b"{}".to_vec());
        assert!(matches!(
            notification.to_frame("not-hex"),
            Err(PushError::InvalidToken(_))
        ));
        assert!(matches!(
            notification.to_frame("abcd"),
            Err(PushError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_payload_limit() {
        let notification = ApnsNotification::new(vec![b'x'; MAX_PAYLOAD_LEN + 1]);
        assert!(notification.to_frame(TOKEN).is_err());
        let notification = ApnsNotification::new(vec![b'x'; MAX_PAYLOAD_LEN]);
        assert!(notification.to_frame(TOKEN).is_ok());
    }

    #[test]
    fn test_parse_error_response() {
        let parsed = ErrorResponse::parse(&[8, 7, 0, 0, 1, 0]).unwrap();
        assert_eq!(parsed.status, 7);
        assert_eq!(parsed.identifier, 256);

        assert!(ErrorResponse::parse(&[2, 7, 0, 0, 1, 0]).is_none());
        assert!(ErrorResponse::parse(&[8, 7]).is_none());
    }

    #[test]
    fn test_error_response_classification() {
        let ok = ErrorResponse { status: 0, identifier: 1 };
        assert!(ok.into_result().is_ok());

        let invalid = ErrorResponse { status: STATUS_INVALID_TOKEN, identifier: 1 };
        assert!(matches!(invalid.into_result(), Err(PushError::NoRetry(_))));

        let shutdown = ErrorResponse { status: 10, identifier: 1 };
        assert!(matches!(
            shutdown.into_result(),
            Err(PushError::ApnsStatus { status: 10, identifier: 1 })
        ));
    }
}
