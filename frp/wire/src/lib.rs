//! The control-plane wire format.
//!
//! Every frame is `[1 byte type tag][8 byte big-endian length][length bytes
//! payload]`. The payload is a self-describing (field name -> value)
//! serialization of one of the closed set of [`Message`] kinds.

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

mod message;

pub use message::{
    Login, LoginResp, NewProxy, NewProxyResp, NewVisitorConn, NewVisitorConnResp, NewWorkConn,
    Ping, Pong, ProxyKind, ReqWorkConn, StartWorkConn, UdpPacket,
};

/// Largest payload this codec will allocate for. Guards against a
/// corrupt/hostile length field trying to make us allocate gigabytes.
const MAX_PAYLOAD_LEN: u64 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown message type tag {0}")]
    UnknownTag(u8),

    #[error("frame length {0} exceeds maximum of {MAX_PAYLOAD_LEN}")]
    LengthOverflow(u64),

    #[error("short read: connection closed before a full frame arrived")]
    ShortRead(#[source] io::Error),

    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

macro_rules! message_enum {
    ($($tag:literal => $variant:ident($ty:ty)),+ $(,)?) => {
        /// One of the closed set of control-plane message kinds.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Message {
            $($variant($ty)),+
        }

        impl Message {
            fn tag(&self) -> u8 {
                match self {
                    $(Message::$variant(_) => $tag),+
                }
            }

            fn kind_from_tag(tag: u8) -> Option<&'static str> {
                match tag {
                    $($tag => Some(stringify!($variant))),+,
                    _ => None,
                }
            }
        }

        $(
            impl From<$ty> for Message {
                fn from(v: $ty) -> Self {
                    Message::$variant(v)
                }
            }
        )+
    };
}

message_enum! {
    1  => Login(Login),
    2  => LoginResp(LoginResp),
    3  => NewProxy(NewProxy),
    4  => NewProxyResp(NewProxyResp),
    5  => CloseProxy(CloseProxyMsg),
    6  => NewWorkConn(NewWorkConn),
    7  => ReqWorkConn(ReqWorkConn),
    8  => StartWorkConn(StartWorkConn),
    9  => NewVisitorConn(NewVisitorConn),
    10 => NewVisitorConnResp(NewVisitorConnResp),
    11 => Ping(Ping),
    12 => Pong(Pong),
    13 => UdpPacket(UdpPacket),
}

/// `CloseProxy` carries a single field, kept as its own type so `message.rs`
/// doesn't need a one-off struct import at the top level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseProxyMsg {
    pub proxy_name: String,
}

impl Message {
    /// Reads exactly one frame from `r`. Does not consume more than the
    /// frame's declared length.
    pub async fn read<R>(r: &mut R) -> Result<Message, Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut head = [0u8; 9];
        r.read_exact(&mut head).await.map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::ShortRead(e)
            } else {
                Error::Io(e)
            }
        })?;
        let tag = head[0];
        let len = u64::from_be_bytes(head[1..9].try_into().expect("9-byte head"));
        if len > MAX_PAYLOAD_LEN {
            return Err(Error::LengthOverflow(len));
        }
        if Message::kind_from_tag(tag).is_none() {
            // Still drain the declared payload so a concurrent reader of
            // the same stream (there shouldn't be one, but we don't trust
            // that) doesn't desync on the next frame.
            let mut sink = vec![0u8; len as usize];
            let _ = r.read_exact(&mut sink).await;
            return Err(Error::UnknownTag(tag));
        }

        let mut payload = vec![0u8; len as usize];
        r.read_exact(&mut payload).await.map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::ShortRead(e)
            } else {
                Error::Io(e)
            }
        })?;

        decode(tag, &payload)
    }

    /// Writes this message as a single frame. Buffers the whole frame
    /// before issuing one `write_all` so a concurrent reader of the same
    /// stream never observes a partial frame.
    pub async fn write<W>(&self, w: &mut W) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin,
    {
        let payload = encode(self)?;
        let mut buf = Vec::with_capacity(9 + payload.len());
        buf.push(self.tag());
        buf.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        buf.extend_from_slice(&payload);
        w.write_all(&buf).await?;
        w.flush().await?;
        Ok(())
    }
}

fn encode(msg: &Message) -> Result<Vec<u8>, Error> {
    let v = match msg {
        Message::Login(m) => serde_json::to_vec(m),
        Message::LoginResp(m) => serde_json::to_vec(m),
        Message::NewProxy(m) => serde_json::to_vec(m),
        Message::NewProxyResp(m) => serde_json::to_vec(m),
        Message::CloseProxy(m) => serde_json::to_vec(m),
        Message::NewWorkConn(m) => serde_json::to_vec(m),
        Message::ReqWorkConn(m) => serde_json::to_vec(m),
        Message::StartWorkConn(m) => serde_json::to_vec(m),
        Message::NewVisitorConn(m) => serde_json::to_vec(m),
        Message::NewVisitorConnResp(m) => serde_json::to_vec(m),
        Message::Ping(m) => serde_json::to_vec(m),
        Message::Pong(m) => serde_json::to_vec(m),
        Message::UdpPacket(m) => serde_json::to_vec(m),
    };
    Ok(v?)
}

fn decode(tag: u8, payload: &[u8]) -> Result<Message, Error> {
    Ok(match tag {
        1 => Message::Login(serde_json::from_slice(payload)?),
        2 => Message::LoginResp(serde_json::from_slice(payload)?),
        3 => Message::NewProxy(serde_json::from_slice(payload)?),
        4 => Message::NewProxyResp(serde_json::from_slice(payload)?),
        5 => Message::CloseProxy(serde_json::from_slice(payload)?),
        6 => Message::NewWorkConn(serde_json::from_slice(payload)?),
        7 => Message::ReqWorkConn(serde_json::from_slice(payload)?),
        8 => Message::StartWorkConn(serde_json::from_slice(payload)?),
        9 => Message::NewVisitorConn(serde_json::from_slice(payload)?),
        10 => Message::NewVisitorConnResp(serde_json::from_slice(payload)?),
        11 => Message::Ping(serde_json::from_slice(payload)?),
        12 => Message::Pong(serde_json::from_slice(payload)?),
        13 => Message::UdpPacket(serde_json::from_slice(payload)?),
        other => return Err(Error::UnknownTag(other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn roundtrip(msg: Message) {
        let mut buf = Vec::new();
        msg.write(&mut buf).await.expect("write");
        let mut cursor = Cursor::new(buf);
        let decoded = Message::read(&mut cursor).await.expect("read");
        assert_eq!(msg, decoded);
    }

    #[tokio::test]
    async fn roundtrips_every_kind() {
        roundtrip(Message::Login(Login {
            version: "0.52.0".into(),
            hostname: "box".into(),
            os: "linux".into(),
            arch: "amd64".into(),
            user: "alice".into(),
            privilege_key: "deadbeef".into(),
            timestamp: 1_700_000_000,
            run_id: String::new(),
            pool_count: 5,
        }))
        .await;

        roundtrip(Message::LoginResp(LoginResp {
            version: "0.52.0".into(),
            run_id: "r-1".into(),
            server_udp_port: 0,
            error: String::new(),
        }))
        .await;

        roundtrip(Message::NewProxy(NewProxy {
            proxy_name: "tcp-echo".into(),
            proxy_type: ProxyKind::Tcp,
            use_encryption: false,
            use_compression: false,
            remote_port: 6000,
            custom_domains: vec![],
            subdomain: String::new(),
            locations: vec![],
            http_user: String::new(),
            http_pwd: String::new(),
            host_header_rewrite: String::new(),
            sk: String::new(),
        }))
        .await;

        roundtrip(Message::NewProxyResp(NewProxyResp {
            proxy_name: "tcp-echo".into(),
            remote_port: 6000,
            error: String::new(),
        }))
        .await;

        roundtrip(Message::CloseProxy(CloseProxyMsg {
            proxy_name: "tcp-echo".into(),
        }))
        .await;

        roundtrip(Message::NewWorkConn(NewWorkConn {
            run_id: "r-1".into(),
            timestamp: 1_700_000_000,
            privilege_key: "deadbeef".into(),
        }))
        .await;

        roundtrip(Message::ReqWorkConn(ReqWorkConn {})).await;

        roundtrip(Message::StartWorkConn(StartWorkConn {
            proxy_name: "tcp-echo".into(),
            src_addr: "203.0.113.1".into(),
            src_port: 51234,
            dst_addr: "10.0.0.5".into(),
            dst_port: 8080,
            use_encryption: false,
            use_compression: false,
        }))
        .await;

        roundtrip(Message::NewVisitorConn(NewVisitorConn {
            proxy_name: "stcp-db".into(),
            sign_key: "abc123".into(),
            timestamp: 1_700_000_000,
            use_encryption: true,
            use_compression: false,
        }))
        .await;

        roundtrip(Message::NewVisitorConnResp(NewVisitorConnResp {
            proxy_name: "stcp-db".into(),
            error: String::new(),
        }))
        .await;

        roundtrip(Message::Ping(Ping {
            timestamp: 1_700_000_000,
        }))
        .await;

        roundtrip(Message::Pong(Pong {
            error: String::new(),
        }))
        .await;

        roundtrip(Message::UdpPacket(UdpPacket {
            content: vec![1, 2, 3, 4],
            remote_addr: "203.0.113.1:9".into(),
            laddr: "10.0.0.5:9".into(),
        }))
        .await;
    }

    #[tokio::test]
    async fn rejects_unknown_tag() {
        let mut buf = Vec::new();
        buf.push(250u8);
        buf.extend_from_slice(&4u64.to_be_bytes());
        buf.extend_from_slice(b"\"ok\"");
        let mut cursor = Cursor::new(buf);
        let err = Message::read(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Error::UnknownTag(250)));
    }

    #[tokio::test]
    async fn rejects_length_overflow() {
        let mut buf = Vec::new();
        buf.push(1u8);
        buf.extend_from_slice(&(MAX_PAYLOAD_LEN + 1).to_be_bytes());
        let mut cursor = Cursor::new(buf);
        let err = Message::read(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Error::LengthOverflow(_)));
    }

    #[tokio::test]
    async fn rejects_short_read() {
        let mut buf = Vec::new();
        buf.push(1u8);
        buf.extend_from_slice(&100u64.to_be_bytes());
        buf.extend_from_slice(b"short");
        let mut cursor = Cursor::new(buf);
        let err = Message::read(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Error::ShortRead(_)));
    }

    #[tokio::test]
    async fn rejects_malformed_payload() {
        let mut buf = Vec::new();
        buf.push(1u8);
        let payload = b"not json";
        buf.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        buf.extend_from_slice(payload);
        let mut cursor = Cursor::new(buf);
        let err = Message::read(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
