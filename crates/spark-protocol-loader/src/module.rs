//! # module：协议模块解析
//!
//! ## 核心意图（Why）
//! - 把“按名称载入模块 → 解析约定入口点 → 包装为强类型适配器”收敛到一个边界内，
//!   所有裸指针与 `unsafe` 只出现在具体的 [`ModuleLoader`] 实现（见 [`dylib`]）中，
//!   不会泄漏到匹配循环；
//! - 保证同一模块名在进程内至多载入一次，即便多个端口上的多个协议引用同一模块。
//!
//! ## 行为契约（What）
//! - [`ModuleResolver::resolve`]：首次请求时经由 [`ModuleLoader`] 载入，之后返回缓存句柄；
//! - [`ModuleResolver::lookup_symbol`]：解析入口点，缺失时返回 `None`，由调用方决定是否致命；
//! - [`ModuleResolver::entry_points`]：`spark_get_protocol` 必需，`spark_get_protocol_port` 可选；
//!   后者缺失时得到 [`PortDiscovery::UseDefault`]。
//!
//! ## 风险提示（Trade-offs）
//! - 载入期间持有互斥锁，注册因此被串行化；注册只在启动期发生，竞争无关紧要；
//! - 模块从不卸载：协议实例的 vtable 位于模块内部，卸载会让已注册实例悬空。

#[cfg(feature = "dylib")]
pub mod dylib;

use std::{
    ffi::{CStr, c_char},
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::{
    error::{ModuleLoadError, RegistryError},
    protocol::{Protocol, ProtocolConfig},
};

/// 模块 ABI 指纹：装载器版本、编译器版本与目标三元组。
///
/// # 教案式注释
/// - **意图 (Why)**：入口点使用 Rust ABI，`&str` 与 `Arc<dyn Protocol>` 的布局没有跨编译器保证；
///   只有宿主与模块由同一编译器针对同一目标、基于同一版本的本 crate 构建时，直接调用才是安全的；
/// - **契约 (What)**：宿主与模块各自在编译期生成该值（见构建脚本），模块经由 [`ABI_TAG_SYMBOL`]
///   以 C ABI 导出，装载器逐字节比较，任何差异都拒绝载入；
/// - **风险 (Trade-offs)**：同一编译器的不同构建参数（如 `-C panic`）不会反映在指纹中。
pub const PROTOCOL_ABI_TAG: &CStr = match CStr::from_bytes_with_nul(
    concat!(
        "spark-protocol-loader ",
        env!("CARGO_PKG_VERSION"),
        "; ",
        env!("SPARK_PROTLOAD_RUSTC_VERSION"),
        "; ",
        env!("SPARK_PROTLOAD_TARGET"),
        "\0"
    )
    .as_bytes(),
) {
    Ok(tag) => tag,
    Err(_) => panic!("ABI tag must not contain interior NUL bytes"),
};

/// 载入器类别标签，标识“协议模块”载入。
pub const LOADER_CATEGORY: &str = "protocol";

/// 指纹入口点名称。
pub const ABI_TAG_SYMBOL: &str = "spark_protocol_abi_tag";

/// 模块内建的协议实例化入口点签名。
pub type GetProtocolFn = fn(&str, &str, &ProtocolConfig) -> Option<Arc<dyn Protocol>>;

/// 模块内建的端口发现入口点签名。
pub type GetProtocolPortFn = fn(&str, &str, &ProtocolConfig) -> i32;

/// 指纹入口点签名：返回指向静态、以 NUL 结尾字符串的指针。
pub type AbiTagFn = extern "C" fn() -> *const c_char;

/// 实例化能力。
pub type InstantiateFn =
    Arc<dyn Fn(&str, &str, &ProtocolConfig) -> Option<Arc<dyn Protocol>> + Send + Sync>;

/// 端口发现能力。
pub type PortFn = Arc<dyn Fn(&str, &str, &ProtocolConfig) -> i32 + Send + Sync>;

/// 模块约定导出的入口点。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryPoint {
    GetProtocol,
    GetProtocolPort,
}

impl EntryPoint {
    /// 导出符号名。
    pub fn symbol(self) -> &'static str {
        match self {
            EntryPoint::GetProtocol => "spark_get_protocol",
            EntryPoint::GetProtocolPort => "spark_get_protocol_port",
        }
    }
}

/// 入口点缺失时是否应当报错。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolRequirement {
    Required,
    Optional,
}

/// 已解析的强类型入口点。
#[derive(Clone, Copy)]
pub enum ResolvedSymbol {
    GetProtocol(GetProtocolFn),
    GetProtocolPort(GetProtocolPortFn),
}

impl fmt::Debug for ResolvedSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedSymbol::GetProtocol(_) => f.write_str("GetProtocol(..)"),
            ResolvedSymbol::GetProtocolPort(_) => f.write_str("GetProtocolPort(..)"),
        }
    }
}

/// 端口发现的两种结果：解析到入口点，或回退到配置端口。
#[derive(Clone)]
pub enum PortDiscovery {
    Resolved(PortFn),
    UseDefault,
}

impl fmt::Debug for PortDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDiscovery::Resolved(_) => f.write_str("Resolved(..)"),
            PortDiscovery::UseDefault => f.write_str("UseDefault"),
        }
    }
}

/// 一组能力化的入口点：`{instantiate, discover_port}`。
///
/// 内建协议与模块协议共用同一形态，工厂无需区分调用来源。
#[derive(Clone)]
pub struct EntryPoints {
    instantiate: InstantiateFn,
    port: PortDiscovery,
}

impl EntryPoints {
    /// 组装入口点。
    pub fn new(instantiate: InstantiateFn, port: PortDiscovery) -> Self {
        Self { instantiate, port }
    }

    /// 以闭包形式声明进程内建的协议入口。
    pub fn builtin<I, P>(instantiate: I, port: P) -> Self
    where
        I: Fn(&str, &str, &ProtocolConfig) -> Option<Arc<dyn Protocol>> + Send + Sync + 'static,
        P: Fn(&str, &str, &ProtocolConfig) -> i32 + Send + Sync + 'static,
    {
        Self::new(Arc::new(instantiate), PortDiscovery::Resolved(Arc::new(port)))
    }

    pub fn instantiate(
        &self,
        name: &str,
        params: &str,
        config: &ProtocolConfig,
    ) -> Option<Arc<dyn Protocol>> {
        (self.instantiate)(name, params, config)
    }

    /// 发现端口；入口缺失时回退为 `config.port`（负值取 0）。
    pub fn discover_port(&self, name: &str, params: &str, config: &ProtocolConfig) -> i32 {
        match &self.port {
            PortDiscovery::Resolved(port) => port(name, params, config),
            PortDiscovery::UseDefault => config.default_port(),
        }
    }

    pub fn port_discovery(&self) -> &PortDiscovery {
        &self.port
    }
}

impl fmt::Debug for EntryPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoints")
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// 模块载入请求。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadRequest<'a> {
    pub module: &'a str,
    /// 宿主期望的 ABI 指纹，通常为 [`PROTOCOL_ABI_TAG`]。
    pub abi_tag: &'static CStr,
    pub category: &'static str,
}

/// 已载入模块的镜像，按约定名称解析入口点。
pub trait ModuleImage: Send + Sync {
    /// 解析入口点，缺失时返回 `None`。
    fn resolve(&self, entry: EntryPoint) -> Option<ResolvedSymbol>;
}

/// 进程的动态载入设施。
pub trait ModuleLoader: Send + Sync {
    /// 载入模块并校验兼容性。
    fn load(&self, request: &LoadRequest<'_>) -> Result<Arc<dyn ModuleImage>, ModuleLoadError>;
}

/// 已载入模块的句柄，克隆开销为一次引用计数。
#[derive(Clone)]
pub struct ModuleHandle {
    name: Arc<str>,
    image: Arc<dyn ModuleImage>,
}

impl ModuleHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// 模块解析器：按名称缓存已载入模块。
///
/// # 教案式注释
/// - **意图 (Why)**：同一模块可能为不同端口提供多个协议，必须只载入一次；
/// - **契约 (What)**：
///   - 缓存上限为 `limit` 个不同模块名，超限返回 [`RegistryError::ModuleTableFull`]；
///   - 检查与载入在同一把锁内完成，并发注册同一模块也只触发一次 [`ModuleLoader::load`]；
/// - **风险 (Trade-offs)**：缓存使用线性查找，模块数量受 `limit` 约束，足够小。
pub struct ModuleResolver {
    loader: Arc<dyn ModuleLoader>,
    limit: usize,
    modules: Mutex<Vec<ModuleHandle>>,
}

impl ModuleResolver {
    pub fn new(loader: Arc<dyn ModuleLoader>, limit: usize) -> Self {
        Self {
            loader,
            limit,
            modules: Mutex::new(Vec::new()),
        }
    }

    /// 载入（或复用）模块。
    pub fn resolve(&self, module: &str) -> Result<ModuleHandle, RegistryError> {
        let mut modules = self.modules.lock();
        if let Some(handle) = modules.iter().find(|handle| &*handle.name == module) {
            return Ok(handle.clone());
        }

        if modules.len() >= self.limit {
            error!(
                target: "spark::protload",
                module,
                limit = self.limit,
                "too many protocol modules have been loaded"
            );
            return Err(RegistryError::ModuleTableFull { limit: self.limit });
        }

        let request = LoadRequest {
            module,
            abi_tag: PROTOCOL_ABI_TAG,
            category: LOADER_CATEGORY,
        };
        let image = self.loader.load(&request).map_err(|source| {
            error!(target: "spark::protload", module, %source, "unable to load protocol module");
            RegistryError::ModuleLoad {
                module: module.to_owned(),
                source,
            }
        })?;

        info!(target: "spark::protload", module, "loaded protocol module");
        let handle = ModuleHandle {
            name: Arc::from(module),
            image,
        };
        modules.push(handle.clone());
        Ok(handle)
    }

    /// 查找已载入的模块，不触发载入。
    pub fn find(&self, module: &str) -> Option<ModuleHandle> {
        self.modules
            .lock()
            .iter()
            .find(|handle| &*handle.name == module)
            .cloned()
    }

    /// 解析入口点。
    pub fn lookup_symbol(
        &self,
        handle: &ModuleHandle,
        entry: EntryPoint,
        requirement: SymbolRequirement,
    ) -> Option<ResolvedSymbol> {
        let resolved = handle.image.resolve(entry);
        if resolved.is_none() {
            match requirement {
                SymbolRequirement::Required => error!(
                    target: "spark::protload",
                    module = handle.name(),
                    symbol = entry.symbol(),
                    "required entry point not found"
                ),
                SymbolRequirement::Optional => debug!(
                    target: "spark::protload",
                    module = handle.name(),
                    symbol = entry.symbol(),
                    "optional entry point not found"
                ),
            }
        }
        resolved
    }

    /// 解析模块的全部入口点并包装为 [`EntryPoints`]。
    pub fn entry_points(&self, handle: &ModuleHandle) -> Result<EntryPoints, RegistryError> {
        let instantiate = match self.lookup_symbol(
            handle,
            EntryPoint::GetProtocol,
            SymbolRequirement::Required,
        ) {
            Some(ResolvedSymbol::GetProtocol(get)) => get,
            _ => {
                return Err(RegistryError::EntryPointMissing {
                    module: handle.name().to_owned(),
                    symbol: EntryPoint::GetProtocol.symbol(),
                });
            }
        };

        let port = match self.lookup_symbol(
            handle,
            EntryPoint::GetProtocolPort,
            SymbolRequirement::Optional,
        ) {
            Some(ResolvedSymbol::GetProtocolPort(get_port)) => {
                PortDiscovery::Resolved(Arc::new(get_port))
            }
            _ => PortDiscovery::UseDefault,
        };

        Ok(EntryPoints::new(Arc::new(instantiate), port))
    }

    /// 已载入的模块名，按载入顺序。
    pub fn loaded_modules(&self) -> Vec<Arc<str>> {
        self.modules
            .lock()
            .iter()
            .map(|handle| handle.name.clone())
            .collect()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl fmt::Debug for ModuleResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleResolver")
            .field("limit", &self.limit)
            .field("modules", &self.loaded_modules())
            .finish_non_exhaustive()
    }
}

/// 协议模块的导出声明。
///
/// 在模块 crate（`crate-type = ["cdylib"]` 或 `dylib`）中调用一次，生成
/// [`ABI_TAG_SYMBOL`] 与 [`EntryPoint`] 约定的导出符号。端口入口可省略，
/// 省略时装载器使用配置端口。模块必须与宿主使用同一编译器和同一版本的本 crate 构建，
/// 否则指纹不一致，装载器拒绝载入。
///
/// ```ignore
/// spark_protocol_loader::declare_protocol_module! {
///     get_protocol: my_get_protocol,
///     get_protocol_port: my_get_port,
/// }
/// ```
#[macro_export]
macro_rules! declare_protocol_module {
    (get_protocol: $get:path $(, get_protocol_port: $port:path)? $(,)?) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn spark_protocol_abi_tag() -> *const ::core::ffi::c_char {
            $crate::module::PROTOCOL_ABI_TAG.as_ptr()
        }

        #[unsafe(no_mangle)]
        pub fn spark_get_protocol(
            name: &str,
            params: &str,
            config: &$crate::ProtocolConfig,
        ) -> ::core::option::Option<::std::sync::Arc<dyn $crate::Protocol>> {
            $get(name, params, config)
        }

        $(
            #[unsafe(no_mangle)]
            pub fn spark_get_protocol_port(
                name: &str,
                params: &str,
                config: &$crate::ProtocolConfig,
            ) -> i32 {
                $port(name, params, config)
            }
        )?
    };
}
