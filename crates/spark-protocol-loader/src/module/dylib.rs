//! 基于 `libloading` 的动态模块载入器。
//!
//! 本文件是整个 crate 中唯一接触裸符号的地方：载入共享库、校验 ABI 指纹、
//! 把导出符号复制为强类型函数指针。库句柄在成功载入后被有意泄漏，模块从不卸载。

use std::{
    ffi::CStr,
    path::{Path, PathBuf},
    sync::Arc,
};

use libloading::Library;

use super::{
    ABI_TAG_SYMBOL, AbiTagFn, EntryPoint, GetProtocolFn, GetProtocolPortFn, LoadRequest,
    ModuleImage, ModuleLoader, ResolvedSymbol,
};
use crate::error::ModuleLoadError;

/// 从文件系统载入协议模块。
///
/// - 模块名含路径分隔符时按路径直接载入；
/// - 否则若配置了 `search_dir` 则在该目录下查找，未配置时交由系统动态链接器搜索。
#[derive(Clone, Debug, Default)]
pub struct DylibLoader {
    search_dir: Option<PathBuf>,
}

impl DylibLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定模块搜索目录。
    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dir = Some(dir.into());
        self
    }

    /// 计算模块的实际载入路径。
    pub fn locate(&self, module: &str) -> PathBuf {
        let path = Path::new(module);
        match &self.search_dir {
            Some(dir) if path.components().count() == 1 => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl ModuleLoader for DylibLoader {
    fn load(&self, request: &LoadRequest<'_>) -> Result<Arc<dyn ModuleImage>, ModuleLoadError> {
        let path = self.locate(request.module);

        // SAFETY: 载入共享库会执行其初始化代码；协议模块被视为与宿主同等可信，
        // 模块路径来自运维配置。
        let library = unsafe { Library::new(&path) }.map_err(|err| ModuleLoadError::Open {
            detail: format!("{}: {err}", path.display()),
        })?;

        // SAFETY: 指纹符号约定为 `extern "C" fn() -> *const c_char`，由 `declare_protocol_module!` 生成。
        let abi_tag = unsafe { library.get::<AbiTagFn>(ABI_TAG_SYMBOL.as_bytes()) }
            .map(|symbol| *symbol)
            .map_err(|_| ModuleLoadError::MissingVersion {
                symbol: ABI_TAG_SYMBOL,
            })?;
        let raw = abi_tag();
        let found = if raw.is_null() {
            None
        } else {
            // SAFETY: 非空指针指向模块内静态、以 NUL 结尾的字符串；库句柄在此期间保持存活。
            Some(unsafe { CStr::from_ptr(raw) })
        };
        check_abi_tag(request, found)?;

        Ok(Arc::new(DylibImage {
            library: Box::leak(Box::new(library)),
        }))
    }
}

/// 比较模块报告的指纹与宿主期望值，必须完全一致。
fn check_abi_tag(request: &LoadRequest<'_>, found: Option<&CStr>) -> Result<(), ModuleLoadError> {
    match found {
        Some(tag) if tag == request.abi_tag => Ok(()),
        _ => Err(ModuleLoadError::Incompatible {
            category: request.category,
            expected: request.abi_tag.to_string_lossy().into_owned(),
            found: found.map_or_else(
                || "<null>".to_owned(),
                |tag| tag.to_string_lossy().into_owned(),
            ),
        }),
    }
}

/// 已载入且永不卸载的共享库。
struct DylibImage {
    library: &'static Library,
}

impl DylibImage {
    /// # Safety
    /// `T` 必须与模块导出符号的真实类型一致。
    unsafe fn symbol<T: Copy>(&self, name: &str) -> Option<T> {
        // SAFETY: 由调用方保证类型一致；库被泄漏为 `'static`，复制出的函数指针不会悬空。
        unsafe { self.library.get::<T>(name.as_bytes()) }
            .ok()
            .map(|symbol| *symbol)
    }
}

impl ModuleImage for DylibImage {
    fn resolve(&self, entry: EntryPoint) -> Option<ResolvedSymbol> {
        // SAFETY: 入口点签名由 ABI 指纹约束，指纹已在载入时校验。
        unsafe {
            match entry {
                EntryPoint::GetProtocol => self
                    .symbol::<GetProtocolFn>(entry.symbol())
                    .map(ResolvedSymbol::GetProtocol),
                EntryPoint::GetProtocolPort => self
                    .symbol::<GetProtocolPortFn>(entry.symbol())
                    .map(ResolvedSymbol::GetProtocolPort),
            }
        }
    }
}
