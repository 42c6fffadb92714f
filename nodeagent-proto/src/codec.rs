//! JSON codec for message-oriented transports.
//!
//! Each message is one JSON object carried in one transport message
//! (a WebSocket text message on the wire).

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Result;

/// Encodes `msg` as a JSON text payload.
pub fn encode(msg: &impl Serialize) -> Result<String> {
    Ok(serde_json::to_string(msg)?)
}

/// Decodes a message from a JSON text payload.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
    Ok(serde_json::from_str(text)?)
}

/// Decodes a message from a JSON payload carried as raw bytes.
pub fn decode_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommandStart, Request, Response};

    #[test]
    fn start_message_wire_shape() {
        let req = Request::Start(
            CommandStart::new("echo")
                .args(vec!["hi".into()])
                .env(vec!["PATH=/usr/bin".into()])
                .working_dir("/tmp"),
        );

        let text = encode(&req).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "command": "echo",
                "args": ["hi"],
                "env": ["PATH=/usr/bin"],
                "workingDir": "/tmp",
            })
        );

        let decoded: Request = decode(&text).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn stdin_chunks_are_base64() {
        let text = encode(&Request::Stdin(b"hello".to_vec())).unwrap();
        assert_eq!(text, r#"{"stdin":"aGVsbG8="}"#);
        assert_eq!(
            decode::<Request>(&text).unwrap(),
            Request::Stdin(b"hello".to_vec())
        );

        let done = encode(&Request::StdinDone).unwrap();
        assert_eq!(done, r#"{"stdinDone":true}"#);
        assert_eq!(decode::<Request>(&done).unwrap(), Request::StdinDone);
    }

    #[test]
    fn rejects_mixed_request() {
        let err = decode::<Request>(r#"{"command":"ls","stdinDone":true}"#).unwrap_err();
        assert!(err.to_string().contains("mixes"), "{err}");

        let err = decode::<Request>(r#"{"stdin":"aGk=","args":["x"]}"#).unwrap_err();
        assert!(err.to_string().contains("mixes"), "{err}");
    }

    #[test]
    fn rejects_empty_request() {
        let err = decode::<Request>("{}").unwrap_err();
        assert!(err.to_string().contains("no fields"), "{err}");
    }

    #[test]
    fn response_may_combine_signals() {
        let resp = Response::stdout_chunk("out")
            .with_stderr("err")
            .with_stdout_done()
            .with_stderr_done()
            .with_exit(3);

        let text = encode(&resp).unwrap();
        let decoded: Response = decode(&text).unwrap();
        assert_eq!(decoded, resp);
        assert_eq!(decoded.stdout.as_deref(), Some(&b"out"[..]));
        assert_eq!(decoded.exit_code, 3);
    }

    #[test]
    fn response_tolerates_nulls_and_unknown_fields() {
        let decoded: Response = decode(concat!(
            r#"{"stdout":null,"stdoutDone":false,"stderr":"ZXJy","#,
            r#""exited":false,"exitCode":0,"extra":1}"#,
        ))
        .unwrap();
        assert_eq!(decoded.stdout, None);
        assert_eq!(decoded.stderr.as_deref(), Some(&b"err"[..]));
        assert!(!decoded.exited);
    }

    #[test]
    fn rejects_bad_base64() {
        assert!(decode::<Response>(r#"{"stdout":"not base64!"}"#).is_err());
    }

    #[test]
    fn decodes_binary_payload() {
        let decoded: Response = decode_slice(br#"{"exited":true,"exitCode":7}"#).unwrap();
        assert_eq!(decoded, Response::exit(7));
    }
}
