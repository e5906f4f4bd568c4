//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义协议装载器对外暴露的错误语义，区分“启动期注册失败”与“连接期匹配失败”两大类；
//! - 启动期错误同步返回给调用方，由其决定终止启动还是跳过该协议；连接期错误从不越过匹配边界
//!   panic，而是编码为终态并在连接上记录原因。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，兼容 `std::error::Error`；
//! - 每个变体提供稳定错误码（`code()`），便于日志检索与告警聚合。

use std::borrow::Cow;

use thiserror::Error;

/// 注册阶段（协议实例化、端口发现、模块解析）的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：注册只在启动期发生，任一失败都只影响当前这次注册，已注册的协议继续可用；
/// - **契约 (What)**：注册流程在三步全部成功前不会追加槽位，因此返回任何变体都意味着注册表保持原样；
/// - **风险 (Trade-offs)**：`String` 上下文带来少量堆分配，换取日志中可直接阅读的模块与协议名。
#[derive(Debug, Error)]
pub enum RegistryError {
    /// 注册表已满，拒绝继续注册。
    #[error("too many protocols have been defined (limit {limit})")]
    CapacityExceeded { limit: usize },

    /// 模块表已满，无法再载入新的模块。
    #[error("too many protocol modules have been loaded (limit {limit})")]
    ModuleTableFull { limit: usize },

    /// 模块无法载入或与当前进程不兼容。
    #[error("protocol module `{module}` could not be loaded: {source}")]
    ModuleLoad {
        module: String,
        #[source]
        source: ModuleLoadError,
    },

    /// 实例化时发现模块并未经端口发现载入。
    #[error("protocol module `{module}` was lost during loading")]
    ModuleNotLoaded { module: String },

    /// 必需的入口点缺失。
    #[error("entry point `{symbol}` not found in `{module}`")]
    EntryPointMissing { module: String, symbol: &'static str },

    /// 端口发现返回负值。
    #[error("protocol `{protocol}` port number could not be determined")]
    PortUndeterminable { protocol: String },

    /// 端口超出可监听范围。
    #[error("protocol `{protocol}` requested invalid port {port}")]
    InvalidPort { protocol: String, port: i32 },

    /// 入口点执行后未返回协议实例。
    #[error("protocol `{protocol}` could not be loaded")]
    InstantiationFailed { protocol: String },
}

impl RegistryError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::CapacityExceeded { .. } => "protload.registry.capacity",
            RegistryError::ModuleTableFull { .. } => "protload.module.capacity",
            RegistryError::ModuleLoad { .. } => "protload.module.load",
            RegistryError::ModuleNotLoaded { .. } => "protload.module.lost",
            RegistryError::EntryPointMissing { .. } => "protload.module.entry_point",
            RegistryError::PortUndeterminable { .. } => "protload.port.undeterminable",
            RegistryError::InvalidPort { .. } => "protload.port.invalid",
            RegistryError::InstantiationFailed { .. } => "protload.protocol.instantiate",
        }
    }
}

/// 模块装载设施报告的失败原因。
#[derive(Debug, Error)]
pub enum ModuleLoadError {
    /// 模块文件不存在或动态链接失败。
    #[error("{detail}")]
    Open { detail: String },

    /// 模块未导出 ABI 指纹符号，无法判断兼容性。
    #[error("module does not export `{symbol}`")]
    MissingVersion { symbol: &'static str },

    /// 模块的 ABI 指纹（装载器版本、编译器版本、目标）与宿主不一致。
    #[error("incompatible {category} module: expected ABI `{expected}`, found `{found}`")]
    Incompatible {
        category: &'static str,
        expected: String,
        found: String,
    },
}

/// 连接匹配失败的终态。
///
/// # 教案式说明
/// - **意图 (Why)**：连接级失败可恢复：调用方关闭连接，服务器继续运行；
/// - **契约 (What)**：返回任一变体前，匹配器已经通过 `Connection::set_failure_reason`
///   在连接上登记了人类可读原因，供回收钩子写入日志；
/// - **兼容 (How)**：[`ConnectionError::code`] 给出旧式调用方期望的唯一负值信号。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// 候选列表走完仍无协议认领。
    #[error("matching protocol not found")]
    NoMatch,

    /// TLS 升级失败，剩余候选不再尝试。
    #[error("TLS negotiation failed.")]
    UpgradeFailed,

    /// 探测过程中连接被标记为不可恢复。
    #[error("connection flawed during protocol match: {reason}")]
    Flawed { reason: Cow<'static, str> },

    /// 协议已挂载但激活失败。
    #[error("activation failed")]
    ActivationFailed,
}

impl ConnectionError {
    /// 通知调用方拆除连接的统一负值。
    pub const TEARDOWN: i32 = -1;

    /// 旧式整型结果。
    pub fn code(&self) -> i32 {
        Self::TEARDOWN
    }

    /// 写入连接的失败原因。
    pub fn reason(&self) -> Cow<'static, str> {
        match self {
            ConnectionError::NoMatch => Cow::Borrowed("matching protocol not found"),
            ConnectionError::UpgradeFailed => Cow::Borrowed("TLS negotiation failed."),
            ConnectionError::Flawed { reason } => reason.clone(),
            ConnectionError::ActivationFailed => Cow::Borrowed("activation failed"),
        }
    }
}

/// 配置文件读取与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败。
    #[error("failed to read config `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// TOML 解析失败。
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// 语义校验失败。
    #[error("invalid config: {detail}")]
    Invalid { detail: String },
}

/// 启动编排错误：配置问题或某一协议注册失败。
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 带上失败协议名的注册错误。
    #[error("protocol `{protocol}` registration failed: {source}")]
    Register {
        protocol: String,
        #[source]
        source: RegistryError,
    },
}
