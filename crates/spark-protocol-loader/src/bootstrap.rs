//! 启动编排：按配置顺序注册全部协议，然后为每个端口构建调度器。
//!
//! 调用方需在接受任何连接之前完成 [`bootstrap`]；返回的注册表与调度器集合此后只读，
//! 可以放进 `Arc` 交给各个工作线程。

use tracing::info;

use crate::{
    config::LoaderConfig,
    dispatcher::DispatcherSet,
    error::BootstrapError,
    factory::ProtocolFactory,
    registry::ProtocolRegistry,
};

/// 注册配置中的全部协议并构建调度器。任一协议失败即中止启动。
pub fn bootstrap(
    config: &LoaderConfig,
    factory: ProtocolFactory,
) -> Result<(ProtocolRegistry, DispatcherSet), BootstrapError> {
    config.validate()?;

    let mut registry = ProtocolRegistry::with_capacity(factory, config.proto_max);
    for directive in &config.protocols {
        let protocol_config = config.protocol_config(directive);
        registry
            .register(directive.registration(&protocol_config))
            .map_err(|source| BootstrapError::Register {
                protocol: directive.name.clone(),
                source,
            })?;
    }

    let dispatchers = DispatcherSet::build(&registry);
    info!(
        target: "spark::protload",
        protocols = registry.len(),
        ports = dispatchers.len(),
        "protocol loader ready"
    );
    Ok((registry, dispatchers))
}
