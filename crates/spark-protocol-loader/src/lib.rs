#![doc = r#"
# spark-protocol-loader

## 设计动机（Why）
- **定位**：多协议服务器的“连接 → 协议”调度器。一个监听端口上可以同时承载多种应用层协议，
  新接受的连接需要先判定它说的是哪种协议，必要时原地升级为 TLS，再把连接交给对应实现；
- **插件化**：协议实现既可以编译进进程，也可以打包成按名称动态载入的模块；
- **热路径**：匹配循环每条连接执行一次，成本为 O(该端口候选数)。

## 核心契约（What）
- [`ProtocolRegistry`]：有界、只追加的协议注册表，默认容量 [`PROTO_MAX`]；
- [`ModuleResolver`]：每个模块名至多载入一次，并把约定入口点包装为强类型 [`EntryPoints`]；
- [`ProtocolFactory`]：内建/模块两条路径的实例化与端口发现；
- [`PortDispatcher`]：每端口一份不可变候选列表，TLS 协议排在唯一的升级标记之后；
- [`ConnectionMatcher`]：走候选列表的状态机，命中后挂载、激活并处理首个请求；
- [`ProtocolRegistry::aggregate_statistics`] 与 [`recycle`]：监控与拆除钩子。

## 实现策略（How）
- 注册与调度器构建在启动期完成（见 [`bootstrap()`]），之后注册表与调度器只读，
  工作线程并发匹配无需加锁；模块缓存由互斥锁保护，保证并发注册下也只载入一次；
- 所有 `unsafe` 只存在于 `module::dylib`，匹配循环只看到强类型能力。

## 风险与考量（Trade-offs）
- 注册完成先于接受连接是与调用方的外部约定，装载器不做运行期检查；
- 升级或探测卡住时由传输层/协议自行设限，装载器只传播失败或 flawed 信号。
"#]

pub mod bootstrap;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod factory;
pub mod logging;
pub mod matcher;
pub mod module;
pub mod protocol;
pub mod recycle;
pub mod registry;
mod stats;

pub use bootstrap::bootstrap;
pub use config::{LoaderConfig, ProtocolDirective};
pub use connection::Connection;
pub use dispatcher::{Candidate, DispatcherSet, PortDispatcher};
pub use error::{BootstrapError, ConfigError, ConnectionError, ModuleLoadError, RegistryError};
pub use factory::ProtocolFactory;
pub use matcher::{ConnectionMatcher, MatchState};
pub use module::{
    EntryPoint, EntryPoints, LoadRequest, ModuleHandle, ModuleImage, ModuleLoader, ModuleResolver,
    PortDiscovery, ResolvedSymbol, SymbolRequirement,
};
#[cfg(feature = "dylib")]
pub use module::dylib::DylibLoader;
pub use protocol::{Protocol, ProtocolConfig};
pub use recycle::recycle;
pub use registry::{PROTO_LIMIT, PROTO_MAX, ProtocolRegistry, RegisteredProtocol, Registration};
