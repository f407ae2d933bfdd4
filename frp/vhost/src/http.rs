use base64::Engine;
use bytes::BytesMut;
use frp_io::{Detect, DetectError};

/// Buffers just enough of an inbound request to read its `Host` header,
/// without consuming anything — the bytes are replayed to whatever handles
/// the request next via the `PrefixedIo` [`frp_io::detect`] hands back.
#[derive(Default)]
pub struct DetectHost;

impl Detect for DetectHost {
    type Protocol = HostAndPath;

    fn detect(&self, buf: &[u8]) -> Result<Option<HostAndPath>, DetectError> {
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(buf) {
            Ok(httparse::Status::Complete(_)) => {
                let host = req
                    .headers
                    .iter()
                    .find(|h| h.name.eq_ignore_ascii_case("host"))
                    .and_then(|h| std::str::from_utf8(h.value).ok())
                    .map(str::to_string);
                let authorization = req
                    .headers
                    .iter()
                    .find(|h| h.name.eq_ignore_ascii_case("authorization"))
                    .and_then(|h| std::str::from_utf8(h.value).ok())
                    .map(str::to_string);
                let path = req.path.unwrap_or("/").to_string();
                match host {
                    Some(host) => Ok(Some(HostAndPath {
                        host,
                        path,
                        authorization,
                    })),
                    None => Err(DetectError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "request has no Host header",
                    ))),
                }
            }
            Ok(httparse::Status::Partial) => Ok(None),
            Err(error) => Err(DetectError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                error,
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAndPath {
    pub host: String,
    pub path: String,
    /// The request's `Authorization` header, if any — consulted by routes
    /// that carry `http_user`/`http_pwd` (spec.md §4.8 step 5).
    pub authorization: Option<String>,
}

/// Checks an HTTP `Authorization: Basic ...` header against a route's
/// configured credentials. A route with an empty `user` requires no
/// authentication at all.
pub fn check_basic_auth(authorization: Option<&str>, user: &str, password: &str) -> bool {
    if user.is_empty() && password.is_empty() {
        return true;
    }
    let Some(header) = authorization else {
        return false;
    };
    let Some(encoded) = header.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    match decoded.split_once(':') {
        Some((u, p)) => u == user && p == password,
        None => false,
    }
}

/// Rewrites the `Host:` header line in place within a buffered request,
/// preserving every other byte — the optional `host_header_rewrite` an
/// HTTP proxy may carry (spec.md §4.7). A no-op if no `Host:` line is
/// found (the caller already rejected the request in that case).
pub fn rewrite_host_header(buf: &mut BytesMut, new_host: &str) {
    let Some(start) = find_host_line(buf) else {
        return;
    };
    let line_end = buf[start..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| start + p)
        .unwrap_or(buf.len());

    let mut rebuilt = BytesMut::with_capacity(buf.len() + new_host.len());
    rebuilt.extend_from_slice(&buf[..start]);
    rebuilt.extend_from_slice(b"Host: ");
    rebuilt.extend_from_slice(new_host.as_bytes());
    rebuilt.extend_from_slice(&buf[line_end..]);
    *buf = rebuilt;
}

fn find_host_line(buf: &[u8]) -> Option<usize> {
    let mut offset = 0;
    while offset < buf.len() {
        let rest = &buf[offset..];
        if rest.len() >= 5 && rest[..5].eq_ignore_ascii_case(b"Host:") {
            return Some(offset);
        }
        match rest.windows(2).position(|w| w == b"\r\n") {
            Some(p) => offset += p + 2,
            None => break,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_host_and_path_once_headers_complete() {
        let req = b"GET /api/v2/users HTTP/1.1\r\nHost: api.example.com\r\n\r\n";
        let result = DetectHost.detect(req).unwrap().unwrap();
        assert_eq!(result.host, "api.example.com");
        assert_eq!(result.path, "/api/v2/users");
    }

    #[test]
    fn partial_request_asks_for_more_bytes() {
        let req = b"GET /api HTTP/1.1\r\nHost: api.ex";
        assert_eq!(DetectHost.detect(req).unwrap(), None);
    }

    #[test]
    fn missing_host_header_is_an_error() {
        let req = b"GET / HTTP/1.1\r\n\r\n";
        assert!(DetectHost.detect(req).is_err());
    }

    #[test]
    fn extracts_authorization_header_when_present() {
        let req = b"GET / HTTP/1.1\r\nHost: api.example.com\r\nAuthorization: Basic dTpw\r\n\r\n";
        let result = DetectHost.detect(req).unwrap().unwrap();
        assert_eq!(result.authorization.as_deref(), Some("Basic dTpw"));
    }

    #[test]
    fn basic_auth_not_required_when_route_has_no_credentials() {
        assert!(check_basic_auth(None, "", ""));
    }

    #[test]
    fn basic_auth_rejects_missing_header_when_required() {
        assert!(!check_basic_auth(None, "alice", "hunter2"));
    }

    #[test]
    fn basic_auth_accepts_correct_credentials() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("alice:hunter2");
        let header = format!("Basic {encoded}");
        assert!(check_basic_auth(Some(&header), "alice", "hunter2"));
    }

    #[test]
    fn basic_auth_rejects_wrong_password() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("alice:wrong");
        let header = format!("Basic {encoded}");
        assert!(!check_basic_auth(Some(&header), "alice", "hunter2"));
    }

    #[test]
    fn rewrites_host_header_preserving_rest_of_request() {
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\nHost: public.example.com\r\nAccept: */*\r\n\r\n"[..]);
        rewrite_host_header(&mut buf, "internal.local:8080");
        assert_eq!(
            &buf[..],
            &b"GET / HTTP/1.1\r\nHost: internal.local:8080\r\nAccept: */*\r\n\r\n"[..]
        );
    }

    #[test]
    fn rewrite_is_a_no_op_without_a_host_header() {
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\n\r\n"[..]);
        rewrite_host_header(&mut buf, "internal.local");
        assert_eq!(&buf[..], &b"GET / HTTP/1.1\r\n\r\n"[..]);
    }
}
