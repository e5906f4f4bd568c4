//! 协议实现需要满足的契约，以及注册时传递给协议的共享配置块。

use std::sync::Arc;

use crate::connection::Connection;

/// 单个应用层协议实现。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 装载器只关心三件事：这条连接是不是你的、接管后处理首个请求、汇报统计；
///   协议自身的解析与服务逻辑全部留在实现内部。
///
/// ## 契约 (What)
/// - `match_probe`：非破坏性探测，只允许窥视/消费足以识别自身帧格式的字节；返回 `Some` 表示认领，
///   返回的实例（可以是注册实例本身，也可以是每连接新建的实例）将被挂载到连接上；
///   若探测发现传输层不可恢复的问题，应在返回 `None` 前让连接进入“flawed”状态；
/// - `process`：处理首个请求，返回值由协议定义，装载器原样透传；
/// - `write_statistics`：向 `buf` 写入统计信息并返回字节数；`buf` 为 `None` 时只返回所需长度。
///
/// ## 注意事项 (Trade-offs)
/// - 实例在注册后存活至进程结束，注册表不会单独释放它们。
pub trait Protocol: Send + Sync + 'static {
    /// 探测连接是否属于本协议。
    fn match_probe(&self, conn: &mut dyn Connection) -> Option<Arc<dyn Protocol>>;

    /// 处理首个请求。
    fn process(&self, conn: &mut dyn Connection) -> i32;

    /// 写入统计信息。
    fn write_statistics(&self, buf: Option<&mut [u8]>, sync: bool) -> usize;
}

/// 每次注册传给协议入口点的共享配置块。
///
/// - `port`：默认/已配置的监听端口；端口发现入口缺失时以它为准（负值视作 0）；
/// - `server_name`：宿主标识，供协议生成日志或统计前缀。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub port: i32,
    pub server_name: Arc<str>,
}

impl ProtocolConfig {
    pub fn new(port: i32, server_name: impl Into<Arc<str>>) -> Self {
        Self {
            port,
            server_name: server_name.into(),
        }
    }

    /// 入口点缺失时采用的端口。
    pub fn default_port(&self) -> i32 {
        self.port.max(0)
    }

    /// 复制配置并替换端口。
    pub fn with_port(&self, port: i32) -> Self {
        Self {
            port,
            server_name: self.server_name.clone(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self::new(-1, "spark")
    }
}
