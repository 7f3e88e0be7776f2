use crate::errors::KafkaErrorCode;
use crate::wire_record;
use bytes::{BufMut, Bytes, BytesMut};

pub const PLAIN_MECHANISM: &str = "PLAIN";

wire_record! {
    /// SaslHandshake v1
    pub struct SaslHandshakeRequest {
        pub mechanism: String,
    }
}

wire_record! {
    pub struct SaslHandshakeResponse {
        pub error_code: KafkaErrorCode,
        /// Mechanisms the broker has enabled
        pub mechanisms: Vec<String>,
    }
}

wire_record! {
    /// SaslAuthenticate v0
    pub struct SaslAuthenticateRequest {
        pub auth_bytes: Bytes,
    }
}

wire_record! {
    pub struct SaslAuthenticateResponse {
        pub error_code: KafkaErrorCode,
        pub error_message: Option<String>,
        pub auth_bytes: Bytes,
    }
}

impl SaslAuthenticateRequest {
    /// PLAIN token `\0username\0password` with no authorization id
    pub fn plain(username: &str, password: &str) -> Self {
        let mut token = BytesMut::with_capacity(username.len() + password.len() + 2);
        token.put_u8(0);
        token.put_slice(username.as_bytes());
        token.put_u8(0);
        token.put_slice(password.as_bytes());
        SaslAuthenticateRequest {
            auth_bytes: token.freeze(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_token_layout() {
        let request = SaslAuthenticateRequest::plain("alice", "s3cret");
        assert_eq!(request.auth_bytes.as_ref(), b"\0alice\0s3cret");
    }
}
