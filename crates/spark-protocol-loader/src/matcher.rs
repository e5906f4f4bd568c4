//! # ConnectionMatcher：每条新连接走一遍候选列表
//!
//! ## 核心意图（Why）
//! - 这是整个装载器唯一的热路径：每条连接执行一次（而不是每个字节），代价为
//!   O(该端口候选数)，上界由注册表容量决定；
//! - 匹配过程从不 panic 或向上抛出异常，所有失败都编码为终态 + 连接上的原因字符串。
//!
//! ## 状态机（What）
//! ```text
//! Scanning ──Upgrade──▶ Upgrading ──ok──▶ Scanning
//!    │                      └──fail──▶ Aborted
//!    ├──probe 命中──▶ Matched ──activate 失败──▶ Aborted
//!    ├──probe 落空且连接 flawed──▶ Aborted
//!    └──End──▶ Unmatched
//! ```
//! - 升级失败不会再尝试剩余候选；
//! - 升级前段落中一旦连接被标记为 flawed 立即终止，不会再给升级路径机会；
//! - 命中后依次挂载协议、记录协议名、激活连接，再把首个请求交给协议处理，
//!   其返回值即本次匹配的结果。

use std::{borrow::Cow, sync::Arc};

use tracing::{debug, trace, warn};

use crate::{
    connection::Connection,
    dispatcher::{Candidate, PortDispatcher},
    error::ConnectionError,
    protocol::Protocol,
    registry::{ProtocolRegistry, RegisteredProtocol},
};

const FLAWED_REASON: &str = "connection flawed during protocol match";

/// 匹配状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchState {
    Scanning,
    Upgrading,
    Matched,
    Unmatched,
    Aborted,
}

impl MatchState {
    /// 是否为终态。
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MatchState::Matched | MatchState::Unmatched | MatchState::Aborted
        )
    }
}

/// 一次匹配过程：借用调度器与注册表，持续时间不超过一条连接的匹配。
#[derive(Clone, Copy, Debug)]
pub struct ConnectionMatcher<'a> {
    dispatcher: &'a PortDispatcher,
    registry: &'a ProtocolRegistry,
}

impl<'a> ConnectionMatcher<'a> {
    pub fn new(dispatcher: &'a PortDispatcher, registry: &'a ProtocolRegistry) -> Self {
        Self {
            dispatcher,
            registry,
        }
    }

    /// 为连接选出协议、挂载、激活并处理首个请求。
    ///
    /// 成功时返回协议 `process` 的结果；失败时连接上已记录原因。
    pub fn run(&self, conn: &mut dyn Connection) -> Result<i32, ConnectionError> {
        let (slot, protocol) = match self.select(conn) {
            Ok(found) => found,
            Err(err) => return Err(self.reject(conn, err)),
        };

        conn.attach_protocol(protocol.clone());
        conn.set_protocol_name(slot.name().clone());
        debug!(
            target: "spark::protload",
            port = self.dispatcher.port(),
            protocol = %slot.name(),
            "matched port protocol"
        );

        if !conn.activate() {
            self.transition(conn, MatchState::Matched, MatchState::Aborted);
            return Err(self.reject(conn, ConnectionError::ActivationFailed));
        }

        Ok(protocol.process(conn))
    }

    fn select(
        &self,
        conn: &mut dyn Connection,
    ) -> Result<(&'a RegisteredProtocol, Arc<dyn Protocol>), ConnectionError> {
        let mut state = MatchState::Scanning;

        for candidate in self.dispatcher.candidates() {
            match *candidate {
                Candidate::Upgrade => {
                    state = self.transition(conn, state, MatchState::Upgrading);
                    if !conn.upgrade_to_tls() {
                        self.transition(conn, state, MatchState::Aborted);
                        return Err(ConnectionError::UpgradeFailed);
                    }
                    state = self.transition(conn, state, MatchState::Scanning);
                }
                Candidate::Slot(index) => {
                    let Some(slot) = self.registry.get(index) else {
                        warn!(
                            target: "spark::protload",
                            port = self.dispatcher.port(),
                            slot = index,
                            "dispatcher refers to a slot missing from the registry"
                        );
                        continue;
                    };
                    if let Some(protocol) = slot.instance().match_probe(conn) {
                        self.transition(conn, state, MatchState::Matched);
                        return Ok((slot, protocol));
                    }
                    if conn.is_flawed() {
                        self.transition(conn, state, MatchState::Aborted);
                        let reason = conn
                            .failure_reason()
                            .map_or(Cow::Borrowed(FLAWED_REASON), |reason| {
                                Cow::Owned(reason.to_owned())
                            });
                        return Err(ConnectionError::Flawed { reason });
                    }
                }
                Candidate::End => break,
            }
        }

        self.transition(conn, state, MatchState::Unmatched);
        Err(ConnectionError::NoMatch)
    }

    fn transition(&self, conn: &dyn Connection, from: MatchState, to: MatchState) -> MatchState {
        trace!(
            target: "spark::protload",
            conn = %conn.id(),
            port = self.dispatcher.port(),
            ?from,
            ?to,
            "match.state"
        );
        to
    }

    /// 在连接上记录失败原因；探测已写入的原因保持不变。
    fn reject(&self, conn: &mut dyn Connection, err: ConnectionError) -> ConnectionError {
        let keep_existing =
            matches!(err, ConnectionError::Flawed { .. }) && conn.failure_reason().is_some();
        if !keep_existing {
            conn.set_failure_reason(err.reason());
        }
        debug!(
            target: "spark::protload",
            conn = %conn.id(),
            port = self.dispatcher.port(),
            %err,
            "connection rejected"
        );
        err
    }
}

impl PortDispatcher {
    /// 对新接受的连接执行一次匹配，见 [`ConnectionMatcher::run`]。
    pub fn process(
        &self,
        registry: &ProtocolRegistry,
        conn: &mut dyn Connection,
    ) -> Result<i32, ConnectionError> {
        ConnectionMatcher::new(self, registry).run(conn)
    }
}
