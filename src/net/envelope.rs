//! Text envelope exchanged between clients through the relay.
//!
//! ```text
//! <method> <target>\n<sender>\n\n<payload>
//! ```
//!
//! The method set is closed and decoded once, here, into [`Method`].

use crate::net::error::ParseError;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;

/// Sender name the relay uses for its own replies.
pub const SERVER_NAME: &str = "server";

const HEADER_END: &str = "\n\n";

/// Operation carried by a request and echoed by its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Ask the peer for a fresh qubit stream.
    Get,
    /// Disclose the initiator's bases; answered with coincidence indices.
    Basis,
    /// Disclose the check sample; answered with `True`/`False`.
    Check,
    /// Enciphered chat text, no reply.
    Msg,
    /// Leave the relay.
    Dc,
}

impl Opcode {
    pub fn as_str(self) -> &'static str {
        match self {
            Opcode::Get => "GET",
            Opcode::Basis => "BASIS",
            Opcode::Check => "CHECK",
            Opcode::Msg => "MSG",
            Opcode::Dc => "DC",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Opcode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Opcode::Get),
            "BASIS" => Ok(Opcode::Basis),
            "CHECK" => Ok(Opcode::Check),
            "MSG" => Ok(Opcode::Msg),
            "DC" => Ok(Opcode::Dc),
            other => Err(ParseError::UnknownMethod(other.to_string())),
        }
    }
}

/// Envelope method: a request, or a `RES`/`ERR` reply to one.
///
/// Replies without an opcode are the relay's answers to the connection
/// handshake and to envelopes it could not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Request(Opcode),
    Response(Option<Opcode>),
    Error(Option<Opcode>),
}

impl Method {
    /// The opcode a request carries or a reply refers to.
    pub fn opcode(self) -> Option<Opcode> {
        match self {
            Method::Request(op) => Some(op),
            Method::Response(op) | Method::Error(op) => op,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (prefix, op) = match self {
            Method::Request(op) => return f.write_str(op.as_str()),
            Method::Response(op) => ("RES", op),
            Method::Error(op) => ("ERR", op),
        };
        match op {
            Some(op) => write!(f, "{prefix} {op}"),
            None => f.write_str(prefix),
        }
    }
}

impl FromStr for Method {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, rest) = match s.split_once(' ') {
            Some((prefix, rest)) => (prefix, Some(rest)),
            None => (s, None),
        };

        match (prefix, rest) {
            ("RES", rest) => Ok(Method::Response(rest.map(str::parse::<Opcode>).transpose()?)),
            ("ERR", rest) => Ok(Method::Error(rest.map(str::parse::<Opcode>).transpose()?)),
            (_, None) => Ok(Method::Request(s.parse()?)),
            _ => Err(ParseError::UnknownMethod(s.to_string())),
        }
    }
}

/// One relay message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub method: Method,
    pub target: String,
    pub sender: String,
    pub payload: String,
}

impl Envelope {
    pub fn new(
        method: Method,
        target: impl Into<String>,
        sender: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            method,
            target: target.into(),
            sender: sender.into(),
            payload: payload.into(),
        }
    }

    pub fn request(
        opcode: Opcode,
        target: impl Into<String>,
        sender: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self::new(Method::Request(opcode), target, sender, payload)
    }

    /// `RES` reply addressed back to the sender of `self`.
    pub fn reply(&self, payload: impl Into<String>) -> Self {
        Self::new(
            Method::Response(self.method.opcode()),
            self.sender.clone(),
            self.target.clone(),
            payload,
        )
    }

    /// `ERR` reply addressed back to the sender of `self`.
    pub fn error_reply(&self, reason: impl Into<String>) -> Self {
        Self::new(
            Method::Error(self.method.opcode()),
            self.sender.clone(),
            self.target.clone(),
            reason,
        )
    }

    pub fn to_bytes(&self) -> Bytes {
        let method = self.method.to_string();
        let mut buf = BytesMut::with_capacity(
            method.len() + self.target.len() + self.sender.len() + self.payload.len() + 4,
        );
        buf.put_slice(method.as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(self.target.as_bytes());
        buf.put_u8(b'\n');
        buf.put_slice(self.sender.as_bytes());
        buf.put_slice(HEADER_END.as_bytes());
        buf.put_slice(self.payload.as_bytes());
        buf.freeze()
    }

    /// Parses one envelope. The first blank line ends the header; anything
    /// after it is payload, verbatim.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;

        let (header, payload) = text.split_once(HEADER_END).ok_or(ParseError::MissingBody)?;
        let (first, sender) = header.split_once('\n').ok_or(ParseError::MalformedHeader)?;
        if sender.contains('\n') {
            return Err(ParseError::MalformedHeader);
        }
        let (method, target) = first.rsplit_once(' ').ok_or(ParseError::MissingTarget)?;

        Ok(Self {
            method: method.parse()?,
            target: target.to_string(),
            sender: sender.to_string(),
            payload: payload.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_round_trip() {
        let ops = [Opcode::Get, Opcode::Basis, Opcode::Check, Opcode::Msg, Opcode::Dc];
        for op in ops {
            for method in [Method::Request(op), Method::Response(Some(op)), Method::Error(Some(op))] {
                assert_eq!(method.to_string().parse::<Method>().unwrap(), method);
            }
        }
        assert_eq!("RES".parse::<Method>().unwrap(), Method::Response(None));
        assert_eq!("ERR".parse::<Method>().unwrap(), Method::Error(None));
        assert_eq!(Method::Response(Some(Opcode::Basis)).to_string(), "RES BASIS");
    }

    #[test]
    fn unknown_methods_are_rejected() {
        for bad in ["PUT", "RES PUT", "get", "RES GET X", "", "OK GET"] {
            assert!(bad.parse::<Method>().is_err(), "{bad:?} parsed");
        }
    }

    #[test]
    fn serializes_exact_grammar() {
        let envelope = Envelope::request(Opcode::Basis, "bob", "alice", "0110");
        assert_eq!(&envelope.to_bytes()[..], b"BASIS bob\nalice\n\n0110");

        let reply = envelope.reply("0,3");
        assert_eq!(&reply.to_bytes()[..], b"RES BASIS alice\nbob\n\n0,3");
    }

    #[test]
    fn parses_reply_with_prefix() {
        let envelope = Envelope::parse(b"RES CHECK alice\nbob\n\nTrue").unwrap();
        assert_eq!(envelope.method, Method::Response(Some(Opcode::Check)));
        assert_eq!(envelope.target, "alice");
        assert_eq!(envelope.sender, "bob");
        assert_eq!(envelope.payload, "True");
    }

    #[test]
    fn bare_error_has_empty_target() {
        let envelope = Envelope::new(Method::Error(None), "", SERVER_NAME, "in use");
        let bytes = envelope.to_bytes();
        assert_eq!(&bytes[..], b"ERR \nserver\n\nin use");
        assert_eq!(Envelope::parse(&bytes).unwrap(), envelope);
    }

    #[test]
    fn payload_keeps_everything_after_first_blank_line() {
        let envelope = Envelope::request(Opcode::Msg, "bob", "alice", "a\n\nb\n");
        let parsed = Envelope::parse(&envelope.to_bytes()).unwrap();
        assert_eq!(parsed.payload, "a\n\nb\n");

        let check = Envelope::parse(b"CHECK bob\nalice\n\n1,4\n0,1").unwrap();
        assert_eq!(check.payload, "1,4\n0,1");
    }

    #[test]
    fn malformed_envelopes_are_rejected() {
        assert!(matches!(
            Envelope::parse(b"GET bob\nalice"),
            Err(ParseError::MissingBody)
        ));
        assert!(matches!(
            Envelope::parse(b"GET bob\n\npayload"),
            Err(ParseError::MalformedHeader)
        ));
        assert!(matches!(
            Envelope::parse(b"GET\nalice\n\n"),
            Err(ParseError::MissingTarget)
        ));
        assert!(matches!(
            Envelope::parse(b"GET bob\nalice\nextra\n\n"),
            Err(ParseError::MalformedHeader)
        ));
        assert!(matches!(
            Envelope::parse(b"FETCH bob\nalice\n\n"),
            Err(ParseError::UnknownMethod(_))
        ));
        assert!(matches!(
            Envelope::parse(&[0xff, 0xfe, b'\n', b'\n']),
            Err(ParseError::NotUtf8)
        ));
    }
}
