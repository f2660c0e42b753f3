//! Same-host direct invocation
//!
//! When a tool server is hosted by this very process, going through the
//! network would make the process call itself and can deadlock a worker pool.
//! A registered [`LocalToolHost`] short-circuits those calls.

use crate::Result;
use crate::connection::ConnectionSpec;
use crate::transport::{ToolCallResult, ToolDescriptor};
use serde_json::Value;
use url::{Host, Url};

/// In-process tool implementation
#[cfg_attr(test, mockall::automock)]
pub trait LocalToolHost: Send + Sync {
    fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    fn call_tool(&self, name: &str, arguments: &Value) -> Result<ToolCallResult>;
}

/// Whether `url` points at this process
///
/// Loopback and unspecified addresses count, as does a host equal to
/// `host_identity` (compared case-insensitively, with or without port).
pub fn is_same_host(url: &str, host_identity: Option<&str>) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };

    let loopback = match parsed.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback() || ip.is_unspecified(),
        Some(Host::Ipv6(ip)) => ip.is_loopback() || ip.is_unspecified(),
        None => false,
    };
    if loopback {
        return true;
    }

    let (Some(identity), Some(host)) = (host_identity, parsed.host_str()) else {
        return false;
    };
    let identity = identity.trim();

    if identity.eq_ignore_ascii_case(host) {
        return true;
    }

    parsed
        .port_or_known_default()
        .is_some_and(|port| identity.eq_ignore_ascii_case(&format!("{host}:{port}")))
}

/// Whether a built connection targets this process; pipe servers never do
pub fn is_same_host_spec(spec: &ConnectionSpec, host_identity: Option<&str>) -> bool {
    spec.url().is_some_and(|url| is_same_host(url, host_identity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::PipeSpec;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[test]
    fn test_loopback_hosts() {
        for url in [
            "http://localhost:8000/tools",
            "http://LOCALHOST/tools",
            "http://127.0.0.1:9000",
            "http://[::1]:8080/mcp",
            "http://0.0.0.0/x",
        ] {
            assert!(is_same_host(url, None), "{url}");
        }
    }

    #[test]
    fn test_remote_hosts() {
        assert!(!is_same_host("http://tools.example.com/mcp", None));
        assert!(!is_same_host("http://10.0.0.5/mcp", None));
        assert!(!is_same_host("not a url", None));
    }

    #[test]
    fn test_host_identity() {
        let identity = Some("erp.internal");
        assert!(is_same_host("https://erp.internal/api/tools", identity));
        assert!(is_same_host("https://ERP.internal/api/tools", identity));
        assert!(!is_same_host("https://other.internal/api/tools", identity));

        let with_port = Some("erp.internal:8000");
        assert!(is_same_host("http://erp.internal:8000/tools", with_port));
        assert!(!is_same_host("http://erp.internal:9000/tools", with_port));
    }

    #[test]
    fn test_pipe_is_never_same_host() {
        let spec = ConnectionSpec::Pipe(PipeSpec {
            command: "localhost".to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            timeout: Duration::from_secs(1),
        });
        assert!(!is_same_host_spec(&spec, Some("localhost")));
    }

    #[test]
    fn test_mock_host() {
        let mut host = MockLocalToolHost::new();
        host.expect_list_tools()
            .returning(|| Ok(vec![ToolDescriptor::new("ping", "", json!({"type": "object"}))]));
        host.expect_call_tool()
            .withf(|name, _| name == "ping")
            .times(1)
            .returning(|_, _| Ok(ToolCallResult::text("pong")));

        assert_eq!(host.list_tools().unwrap()[0].name, "ping");
        let result = host.call_tool("ping", &json!({})).unwrap();
        assert_eq!(result.joined_text(), "pong");
    }
}
