//! # factory：协议实例化与端口发现
//!
//! ## 核心意图（Why）
//! - 每个协议注册都要回答两个问题：“它要监听哪个端口”与“给我一个实例”；
//!   两者都可能来自进程内建入口，也可能来自按名称载入的模块。
//!
//! ## 行为契约（What）
//! - [`ProtocolFactory::discover_port`] 是唯一会触发模块载入的地方；
//! - [`ProtocolFactory::instantiate_protocol`] 只查找已载入模块，找不到时视为
//!   “载入过程中丢失”，因为注册流程总是先发现端口；
//! - 未编译任何内建协议时，内建路径返回 [`RegistryError::EntryPointMissing`]。

use std::sync::Arc;

use tracing::{debug, error};

use crate::{
    error::RegistryError,
    module::{EntryPoint, EntryPoints, ModuleResolver},
    protocol::{Protocol, ProtocolConfig},
};

const BUILTIN: &str = "<builtin>";

/// 协议工厂：内建入口 + 模块解析器。
#[derive(Debug)]
pub struct ProtocolFactory {
    builtin: Option<EntryPoints>,
    resolver: Arc<ModuleResolver>,
}

impl ProtocolFactory {
    /// 带内建协议入口的工厂。
    pub fn new(builtin: EntryPoints, resolver: Arc<ModuleResolver>) -> Self {
        Self {
            builtin: Some(builtin),
            resolver,
        }
    }

    /// 仅支持模块协议的工厂。
    pub fn without_builtin(resolver: Arc<ModuleResolver>) -> Self {
        Self {
            builtin: None,
            resolver,
        }
    }

    pub fn resolver(&self) -> &Arc<ModuleResolver> {
        &self.resolver
    }

    /// 实例化协议对象。
    pub fn instantiate_protocol(
        &self,
        module: Option<&str>,
        name: &str,
        params: &str,
        config: &ProtocolConfig,
    ) -> Result<Arc<dyn Protocol>, RegistryError> {
        let entry_points = match module {
            None => self.builtin()?.clone(),
            Some(module) => {
                let handle = self.resolver.find(module).ok_or_else(|| {
                    error!(
                        target: "spark::protload",
                        protocol = name,
                        module,
                        "protocol module was lost during loading"
                    );
                    RegistryError::ModuleNotLoaded {
                        module: module.to_owned(),
                    }
                })?;
                self.resolver.entry_points(&handle)?
            }
        };

        entry_points
            .instantiate(name, params, config)
            .ok_or_else(|| RegistryError::InstantiationFailed {
                protocol: name.to_owned(),
            })
    }

    /// 发现协议希望监听的端口。负值表示端口无法确定。
    pub fn discover_port(
        &self,
        module: Option<&str>,
        name: &str,
        params: &str,
        config: &ProtocolConfig,
    ) -> Result<i32, RegistryError> {
        let port = match module {
            None => self.builtin()?.discover_port(name, params, config),
            Some(module) => {
                let handle = self.resolver.resolve(module)?;
                self.resolver
                    .entry_points(&handle)?
                    .discover_port(name, params, config)
            }
        };

        debug!(target: "spark::protload", protocol = name, port, "protocol wants to use port");
        if port < 0 {
            error!(
                target: "spark::protload",
                protocol = name,
                "protocol port number could not be determined"
            );
            return Err(RegistryError::PortUndeterminable {
                protocol: name.to_owned(),
            });
        }
        Ok(port)
    }

    fn builtin(&self) -> Result<&EntryPoints, RegistryError> {
        self.builtin
            .as_ref()
            .ok_or(RegistryError::EntryPointMissing {
                module: BUILTIN.to_owned(),
                symbol: EntryPoint::GetProtocol.symbol(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        connection::Connection,
        error::ModuleLoadError,
        module::{LoadRequest, ModuleImage, ModuleLoader, ResolvedSymbol},
    };

    struct Inert;

    impl Protocol for Inert {
        fn match_probe(&self, _conn: &mut dyn Connection) -> Option<Arc<dyn Protocol>> {
            None
        }

        fn process(&self, _conn: &mut dyn Connection) -> i32 {
            0
        }

        fn write_statistics(&self, _buf: Option<&mut [u8]>, _sync: bool) -> usize {
            0
        }
    }

    fn get_inert(name: &str, _params: &str, _config: &ProtocolConfig) -> Option<Arc<dyn Protocol>> {
        (name != "broken").then(|| Arc::new(Inert) as Arc<dyn Protocol>)
    }

    struct NoPortImage;

    impl ModuleImage for NoPortImage {
        fn resolve(&self, entry: EntryPoint) -> Option<ResolvedSymbol> {
            matches!(entry, EntryPoint::GetProtocol).then_some(ResolvedSymbol::GetProtocol(get_inert))
        }
    }

    struct EmptyImage;

    impl ModuleImage for EmptyImage {
        fn resolve(&self, _entry: EntryPoint) -> Option<ResolvedSymbol> {
            None
        }
    }

    #[derive(Default)]
    struct Loader {
        loads: AtomicUsize,
    }

    impl ModuleLoader for Loader {
        fn load(&self, request: &LoadRequest<'_>) -> Result<Arc<dyn ModuleImage>, ModuleLoadError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if request.module == "libempty.so" {
                Ok(Arc::new(EmptyImage))
            } else {
                Ok(Arc::new(NoPortImage))
            }
        }
    }

    fn factory(loader: Arc<Loader>) -> ProtocolFactory {
        let resolver = Arc::new(ModuleResolver::new(loader, 8));
        ProtocolFactory::new(
            EntryPoints::builtin(
                |name, params, config| get_inert(name, params, config),
                |name, _, config| if name == "nowhere" { -1 } else { config.port },
            ),
            resolver,
        )
    }

    #[test]
    fn builtin_port_comes_from_the_builtin_entry() {
        let factory = factory(Arc::new(Loader::default()));
        let config = ProtocolConfig::new(1094, "t");
        assert_eq!(factory.discover_port(None, "xroot", "", &config).unwrap(), 1094);
        assert!(matches!(
            factory.discover_port(None, "nowhere", "", &config),
            Err(RegistryError::PortUndeterminable { .. })
        ));
    }

    #[test]
    fn module_without_port_entry_falls_back_to_config_port() {
        let loader = Arc::new(Loader::default());
        let factory = factory(loader.clone());
        let port = factory
            .discover_port(Some("libhttp.so"), "http", "", &ProtocolConfig::new(-3, "t"))
            .unwrap();
        assert_eq!(port, 0);
        assert!(
            factory
                .instantiate_protocol(Some("libhttp.so"), "http", "", &ProtocolConfig::default())
                .is_ok()
        );
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn instantiation_requires_a_previously_loaded_module() {
        let factory = factory(Arc::new(Loader::default()));
        assert!(matches!(
            factory.instantiate_protocol(Some("libhttp.so"), "http", "", &ProtocolConfig::default()),
            Err(RegistryError::ModuleNotLoaded { .. })
        ));
    }

    #[test]
    fn missing_required_entry_point_is_fatal() {
        let factory = factory(Arc::new(Loader::default()));
        let config = ProtocolConfig::new(80, "t");
        assert!(matches!(
            factory.discover_port(Some("libempty.so"), "http", "", &config),
            Err(RegistryError::EntryPointMissing { .. })
        ));
    }

    #[test]
    fn empty_instance_is_reported() {
        let factory = factory(Arc::new(Loader::default()));
        assert!(matches!(
            factory.instantiate_protocol(None, "broken", "", &ProtocolConfig::default()),
            Err(RegistryError::InstantiationFailed { .. })
        ));
    }

    #[test]
    fn factory_without_builtin_rejects_builtin_registrations() {
        let resolver = Arc::new(ModuleResolver::new(Arc::new(Loader::default()), 8));
        let factory = ProtocolFactory::without_builtin(resolver);
        assert!(matches!(
            factory.discover_port(None, "xroot", "", &ProtocolConfig::default()),
            Err(RegistryError::EntryPointMissing { .. })
        ));
    }
}
