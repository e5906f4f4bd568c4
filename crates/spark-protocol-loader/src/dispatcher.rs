//! # PortDispatcher：每个监听端口一份候选列表
//!
//! ## 核心意图（Why）
//! - 连接到来时不必再扫描整个注册表：构建期就把该端口的协议排好顺序；
//! - 无需 TLS 的协议先于 TLS 升级尝试，明文连接不用为升级付出代价；
//!   升级之后的扫描重新覆盖该端口的**全部**协议，因为加密连接仍可能说一个容忍明文的协议。
//!
//! ## 列表形态（What）
//! ```text
//! [非 TLS 槽位..., (Upgrade, 全部槽位...)?, End]
//! ```
//! - 非 TLS 槽位按注册顺序；
//! - 若该端口存在 TLS 协议，恰好一个 [`Candidate::Upgrade`]，随后按注册顺序列出该端口全部槽位；
//! - 以 [`Candidate::End`] 结尾；没有任何协议的端口只含 `End`，对每条连接都给出“无匹配”。
//!
//! 构建后不可变；调度器只持有槽位下标，注册表从不删除条目，因此下标始终有效。

use std::fmt;

use tracing::debug;

use crate::registry::ProtocolRegistry;

/// 候选列表条目。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Candidate {
    /// 注册表槽位下标。
    Slot(usize),
    /// 执行 TLS 升级。
    Upgrade,
    /// 列表结束。
    End,
}

/// 监听端口的调度器。
#[derive(Clone, PartialEq, Eq)]
pub struct PortDispatcher {
    port: u16,
    candidates: Vec<Candidate>,
}

impl PortDispatcher {
    /// 根据注册表内容为 `port` 构建候选列表。构建不会失败。
    pub fn new(registry: &ProtocolRegistry, port: u16) -> Self {
        let mut candidates = Vec::with_capacity(registry.len() * 2 + 1);
        let mut needs_upgrade = false;

        for (index, slot) in registry.iter().enumerate() {
            if slot.port() != port {
                continue;
            }
            if slot.requires_tls() {
                needs_upgrade = true;
            } else {
                candidates.push(Candidate::Slot(index));
            }
        }

        if needs_upgrade {
            candidates.push(Candidate::Upgrade);
            candidates.extend(
                registry
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| slot.port() == port)
                    .map(|(index, _)| Candidate::Slot(index)),
            );
        }

        candidates.push(Candidate::End);
        debug!(target: "spark::protload", port, candidates = ?candidates, "built port dispatcher");
        Self { port, candidates }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// 候选列表，总以 [`Candidate::End`] 结尾。
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// 以协议名渲染候选列表，供运维查看。
    pub fn describe(&self, registry: &ProtocolRegistry) -> String {
        let names: Vec<String> = self
            .candidates
            .iter()
            .filter_map(|candidate| match candidate {
                Candidate::Slot(index) => Some(
                    registry
                        .get(*index)
                        .map_or_else(|| format!("#{index}"), |slot| slot.name().to_string()),
                ),
                Candidate::Upgrade => Some("<tls>".to_owned()),
                Candidate::End => None,
            })
            .collect();
        format!("port {}: [{}]", self.port, names.join(", "))
    }
}

impl fmt::Debug for PortDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortDispatcher")
            .field("port", &self.port)
            .field("candidates", &self.candidates)
            .finish()
    }
}

/// 按端口索引的调度器集合，每个出现过的端口一份。
#[derive(Clone, Debug, Default)]
pub struct DispatcherSet {
    dispatchers: Vec<PortDispatcher>,
}

impl DispatcherSet {
    /// 为注册表中出现过的每个端口构建调度器，顺序与端口首次注册顺序一致。
    pub fn build(registry: &ProtocolRegistry) -> Self {
        Self {
            dispatchers: registry
                .ports()
                .into_iter()
                .map(|port| PortDispatcher::new(registry, port))
                .collect(),
        }
    }

    pub fn get(&self, port: u16) -> Option<&PortDispatcher> {
        self.dispatchers
            .iter()
            .find(|dispatcher| dispatcher.port() == port)
    }

    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.dispatchers.iter().map(PortDispatcher::port)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PortDispatcher> {
        self.dispatchers.iter()
    }

    pub fn len(&self) -> usize {
        self.dispatchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatchers.is_empty()
    }
}
