//! # ProtocolRegistry：进程内协议注册表
//!
//! ## 核心意图（Why）
//! - 以单一有序序列保存 `{name, port, requires_tls, instance}`，取代按下标并行维护的多个数组，
//!   避免它们彼此错位；
//! - 注册表是显式持有的对象而非全局状态：测试可以并行构造多个互不干扰的注册表。
//!
//! ## 生命周期（What）
//! - 创建时为空；启动阶段只追加；服务阶段只读。调用方需保证所有注册与调度器构建
//!   在接受第一条连接前完成，`&mut self` 注册接口在编译期保证了注册本身的串行化；
//! - 槽位下标单调分配且永不复用，第 N 次成功注册占用下标 N-1；
//! - 容量默认 [`PROTO_MAX`]，超限是硬错误而非静默截断，已注册槽位不受影响。

use std::{fmt, sync::Arc};

use tracing::{debug, error, info};

use crate::{
    error::RegistryError,
    factory::ProtocolFactory,
    protocol::{Protocol, ProtocolConfig},
};

/// 默认的最大注册协议数。
pub const PROTO_MAX: usize = 8;

/// 可配置容量的上限；配置中的 `proto_max` 不得超过该值。
pub const PROTO_LIMIT: usize = 127;

/// 已注册的协议槽位。
#[derive(Clone)]
pub struct RegisteredProtocol {
    name: Arc<str>,
    port: u16,
    requires_tls: bool,
    instance: Arc<dyn Protocol>,
}

impl RegisteredProtocol {
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn requires_tls(&self) -> bool {
        self.requires_tls
    }

    pub fn instance(&self) -> &Arc<dyn Protocol> {
        &self.instance
    }
}

impl fmt::Debug for RegisteredProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredProtocol")
            .field("name", &self.name)
            .field("port", &self.port)
            .field("requires_tls", &self.requires_tls)
            .finish_non_exhaustive()
    }
}

/// 一次注册请求。
#[derive(Clone, Copy, Debug)]
pub struct Registration<'a> {
    /// 模块名；`None` 表示进程内建协议。
    pub module: Option<&'a str>,
    pub name: &'a str,
    /// 协议自定义的参数串，装载器不解释其格式。
    pub params: &'a str,
    pub config: &'a ProtocolConfig,
    /// 匹配前是否必须完成 TLS 升级。
    pub requires_tls: bool,
}

impl<'a> Registration<'a> {
    /// 内建协议的注册请求。
    pub fn builtin(name: &'a str, config: &'a ProtocolConfig) -> Self {
        Self {
            module: None,
            name,
            params: "",
            config,
            requires_tls: false,
        }
    }

    /// 模块协议的注册请求。
    pub fn from_module(module: &'a str, name: &'a str, config: &'a ProtocolConfig) -> Self {
        Self {
            module: Some(module),
            ..Self::builtin(name, config)
        }
    }

    pub fn with_params(mut self, params: &'a str) -> Self {
        self.params = params;
        self
    }

    pub fn with_tls(mut self, requires_tls: bool) -> Self {
        self.requires_tls = requires_tls;
        self
    }
}

/// 协议注册表。
pub struct ProtocolRegistry {
    factory: ProtocolFactory,
    capacity: usize,
    slots: Vec<RegisteredProtocol>,
}

impl ProtocolRegistry {
    /// 默认容量的空注册表。
    pub fn new(factory: ProtocolFactory) -> Self {
        Self::with_capacity(factory, PROTO_MAX)
    }

    /// 指定容量的空注册表。容量只是注册上限，槽位随注册增长，不预先分配。
    pub fn with_capacity(factory: ProtocolFactory, capacity: usize) -> Self {
        Self {
            factory,
            capacity,
            slots: Vec::new(),
        }
    }

    /// 注册一个协议并返回其槽位下标。
    ///
    /// # 教案式注释
    /// - **逻辑 (How)**：
    ///   1. 容量检查，超限记录日志并拒绝；
    ///   2. 端口发现（可能触发模块载入），负值或越界即失败；
    ///   3. 实例化；
    ///   4. 追加槽位。
    /// - **契约 (What)**：前三步全部成功前不会修改注册表，因此失败无需回滚。
    pub fn register(&mut self, registration: Registration<'_>) -> Result<usize, RegistryError> {
        let Registration {
            module,
            name,
            params,
            config,
            requires_tls,
        } = registration;

        debug!(target: "spark::protload", protocol = name, "getting protocol object");

        if self.slots.len() >= self.capacity {
            error!(
                target: "spark::protload",
                protocol = name,
                limit = self.capacity,
                "too many protocols have been defined"
            );
            return Err(RegistryError::CapacityExceeded {
                limit: self.capacity,
            });
        }

        let port = self.discover_port(registration)?;
        let instance = self
            .factory
            .instantiate_protocol(module, name, params, config)
            .inspect_err(|err| {
                error!(target: "spark::protload", protocol = name, %err, "protocol could not be loaded");
            })?;

        let index = self.slots.len();
        self.slots.push(RegisteredProtocol {
            name: Arc::from(name),
            port,
            requires_tls,
            instance,
        });
        info!(
            target: "spark::protload",
            protocol = name,
            port,
            tls = requires_tls,
            slot = index,
            "registered protocol"
        );
        Ok(index)
    }

    /// 端口发现，返回可监听的端口号。
    pub fn discover_port(&self, registration: Registration<'_>) -> Result<u16, RegistryError> {
        let port = self.factory.discover_port(
            registration.module,
            registration.name,
            registration.params,
            registration.config,
        )?;
        u16::try_from(port).map_err(|_| RegistryError::InvalidPort {
            protocol: registration.name.to_owned(),
            port,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, index: usize) -> Option<&RegisteredProtocol> {
        self.slots.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredProtocol> {
        self.slots.iter()
    }

    /// 出现过的端口，按首次注册顺序去重。
    pub fn ports(&self) -> Vec<u16> {
        let mut ports = Vec::new();
        for slot in &self.slots {
            if !ports.contains(&slot.port) {
                ports.push(slot.port);
            }
        }
        ports
    }

    pub fn factory(&self) -> &ProtocolFactory {
        &self.factory
    }
}

impl fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("capacity", &self.capacity)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}
