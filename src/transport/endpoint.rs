//! Endpoint discovery from the first outbound command
//!
//! Transports hold no endpoint knowledge until the first command arrives. The
//! request line of that command names the target:
//!
//! ```text
//! OPTIONS rtsp://192.168.0.3:554/axis-media/media.amp?resolution=176x144 RTSP/1.0
//! CSeq: 1
//! ```

use std::fmt;

use url::{Host, Url};

use crate::error::TunnelError;

/// Where a transport connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Hostname or IP literal (IPv6 without brackets)
    pub host: String,
    pub port: u16,
    /// Path including the query string
    pub path: String,
}

impl Endpoint {
    /// Parse the request line of an RTSP command
    pub fn from_request(request: &[u8], default_port: u16) -> Result<Self, TunnelError> {
        let line_end = request
            .iter()
            .position(|&b| b == b'\r' || b == b'\n')
            .unwrap_or(request.len());
        let line = std::str::from_utf8(&request[..line_end])
            .map_err(|_| TunnelError::InvalidRequestLine)?;

        let mut tokens = line.split_whitespace();
        let _method = tokens.next().ok_or(TunnelError::InvalidRequestLine)?;
        let url = tokens.next().ok_or(TunnelError::InvalidRequestLine)?;

        Self::from_url(url, default_port)
    }

    /// Parse an absolute URL
    pub fn from_url(url: &str, default_port: u16) -> Result<Self, TunnelError> {
        let parsed = Url::parse(url).map_err(|_| TunnelError::InvalidUrl(url.to_string()))?;

        let host = match parsed.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(TunnelError::MissingHost),
        };

        let mut path = match parsed.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            host,
            port: parsed.port().unwrap_or(default_port),
            path,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{DEFAULT_HTTP_PORT, DEFAULT_RTSP_PORT};

    #[test]
    fn test_parse_request_line() {
        let request = b"OPTIONS rtsp://192.168.0.3:8554/axis-media/media.amp?resolution=176x144&fps=1 RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let endpoint = Endpoint::from_request(request, DEFAULT_RTSP_PORT).unwrap();

        assert_eq!(endpoint.host, "192.168.0.3");
        assert_eq!(endpoint.port, 8554);
        assert_eq!(endpoint.path, "/axis-media/media.amp?resolution=176x144&fps=1");
    }

    #[test]
    fn test_default_port() {
        let endpoint =
            Endpoint::from_request(b"OPTIONS rtsp://camera RTSP/1.0\r\n", DEFAULT_RTSP_PORT)
                .unwrap();
        assert_eq!(endpoint.host, "camera");
        assert_eq!(endpoint.port, 554);
        assert_eq!(endpoint.path, "/");

        let endpoint =
            Endpoint::from_request(b"DESCRIBE rtsp://camera/live RTSP/1.0", DEFAULT_HTTP_PORT)
                .unwrap();
        assert_eq!(endpoint.port, 80);
    }

    #[test]
    fn test_ipv6_host() {
        let endpoint = Endpoint::from_url("rtsp://[::1]:8554/stream", DEFAULT_RTSP_PORT).unwrap();
        assert_eq!(endpoint.host, "::1");
        assert_eq!(endpoint.to_string(), "[::1]:8554");
    }

    #[test]
    fn test_invalid_request_line() {
        assert_eq!(
            Endpoint::from_request(b"OPTIONS\r\n", DEFAULT_RTSP_PORT),
            Err(TunnelError::InvalidRequestLine)
        );
        assert_eq!(
            Endpoint::from_request(b"", DEFAULT_RTSP_PORT),
            Err(TunnelError::InvalidRequestLine)
        );
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            Endpoint::from_request(b"OPTIONS * RTSP/1.0\r\n", DEFAULT_RTSP_PORT),
            Err(TunnelError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_missing_host() {
        assert_eq!(
            Endpoint::from_request(b"OPTIONS rtsp:/stream RTSP/1.0\r\n", DEFAULT_RTSP_PORT),
            Err(TunnelError::MissingHost)
        );
    }
}
