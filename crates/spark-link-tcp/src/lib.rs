#![doc = r#"
# spark-link-tcp

## 设计动机（Why）
- **协作实现**：为 `spark-protocol-loader` 的 `Connection` 契约提供一个真实的阻塞式 TCP 实现，
  让匹配、原地 TLS 升级与回收钩子可以在真实套接字上端到端运行；
- **热更新**：TLS 配置放在 `ArcSwap` 中，替换证书不影响已经握手的连接。

## 核心契约（What）
- [`TcpLink`]：升级前以 `MSG_PEEK` 窥视首部，升级后窥视解密数据；实现 `std::io::{Read, Write}`；
- [`TlsUpgrader`]：监听器级别的 `rustls::ServerConfig` 快照容器；
- [`LinkListener`] 与 [`dispatch`]：接受连接、执行匹配、失败时调用回收钩子。

## 风险与考量（Trade-offs）
- 每条连接独占一个线程；探测阶段的阻塞上限取决于 `with_probe_timeout`；
- TLS 握手算法完全交给 `rustls`，这里只负责驱动记录层读写。
"#]

mod error;
mod link;
mod serve;
mod upgrader;

pub use error::{LinkError, OperationKind};
pub use link::TcpLink;
pub use serve::{LinkListener, dispatch, dispatch_on};
pub use upgrader::TlsUpgrader;
