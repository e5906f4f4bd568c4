use std::{borrow::Cow, io, sync::Arc};

use crate::protocol::Protocol;

/// 新接受的传输连接在匹配阶段所需的最小接口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 连接由外部传输层拥有，装载器只在一次匹配过程中借用它；
/// - 把“窥视首批字节”“原地升级 TLS”“生命周期标志”收敛为同步方法，匹配循环本身不挂起，
///   阻塞仅发生在该连接所在的工作线程内。
///
/// ## 契约说明（What）
/// - `peek`：读取但不消费可用字节，供协议探测；
/// - `upgrade_to_tls`：在原连接上完成安全升级，失败返回 `false`；
/// - `is_flawed`：探测过程中是否检测到不可恢复的传输问题（区别于“不是我的协议”）；
/// - `set_failure_reason`/`failure_reason`：记录供日志使用的人类可读原因；
/// - `attach_protocol`/`set_protocol_name`：匹配成功后挂载协议；
/// - `activate`：就绪握手或注册 I/O 就绪追踪，失败返回 `false`。
///
/// ## 风险提示（Trade-offs）
/// - 升级与探测的超时由传输层/协议负责，装载器只传播失败或 flawed 信号。
pub trait Connection: Send {
    /// 用于日志的连接标识。
    fn id(&self) -> Cow<'_, str>;

    /// 窥视可用字节。
    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// 执行 TLS 升级。
    fn upgrade_to_tls(&mut self) -> bool;

    /// 连接是否已完成 TLS 升级。
    fn is_tls(&self) -> bool;

    /// 连接是否已被标记为不可恢复。
    fn is_flawed(&self) -> bool;

    /// 记录失败原因。
    fn set_failure_reason(&mut self, reason: Cow<'static, str>);

    /// 读取已记录的失败原因。
    fn failure_reason(&self) -> Option<&str>;

    /// 挂载匹配到的协议实例。
    fn attach_protocol(&mut self, protocol: Arc<dyn Protocol>);

    /// 记录协议名，用于日志与统计。
    fn set_protocol_name(&mut self, name: Arc<str>);

    /// 激活连接。
    fn activate(&mut self) -> bool;
}
