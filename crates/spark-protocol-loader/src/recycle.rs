//! 连接回收钩子：记录非协议原因导致的连接终止。

use std::time::Duration;

use tracing::warn;

use crate::connection::Connection;

/// 连接拆除时调用；仅在同时给出连接与非空原因时记录日志。
///
/// 每个协议自行管理其每连接状态，这里不做任何协议相关清理。
pub fn recycle(conn: Option<&dyn Connection>, connected_for: Duration, reason: Option<&str>) {
    let (Some(conn), Some(reason)) = (conn, reason) else {
        return;
    };
    if reason.is_empty() {
        return;
    }
    warn!(
        target: "spark::protload",
        elapsed_ms = connected_for.as_millis() as u64,
        "{} terminated {}",
        conn.id(),
        reason
    );
}

#[cfg(test)]
mod tests {
    use std::{borrow::Cow, io, sync::Arc};

    use tracing_test::traced_test;

    use super::*;
    use crate::protocol::Protocol;

    struct Quiet;

    impl Connection for Quiet {
        fn id(&self) -> Cow<'_, str> {
            Cow::Borrowed("anon.7:42@client.example")
        }

        fn peek(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn upgrade_to_tls(&mut self) -> bool {
            false
        }

        fn is_tls(&self) -> bool {
            false
        }

        fn is_flawed(&self) -> bool {
            false
        }

        fn set_failure_reason(&mut self, _reason: Cow<'static, str>) {}

        fn failure_reason(&self) -> Option<&str> {
            None
        }

        fn attach_protocol(&mut self, _protocol: Arc<dyn Protocol>) {}

        fn set_protocol_name(&mut self, _name: Arc<str>) {}

        fn activate(&mut self) -> bool {
            true
        }
    }

    #[test]
    #[traced_test]
    fn reason_is_logged_with_connection_identity() {
        recycle(
            Some(&Quiet),
            Duration::from_millis(1500),
            Some("matching protocol not found"),
        );
        assert!(logs_contain(
            "anon.7:42@client.example terminated matching protocol not found"
        ));
        assert!(logs_contain("elapsed_ms=1500"));
        assert!(!logs_contain("conn="));
    }

    #[test]
    #[traced_test]
    fn silent_without_reason() {
        recycle(Some(&Quiet), Duration::ZERO, None);
        recycle(Some(&Quiet), Duration::ZERO, Some(""));
        recycle(None, Duration::ZERO, Some("reset"));
        assert!(!logs_contain("terminated"));
    }
}
