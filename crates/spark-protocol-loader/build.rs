use std::{env, process::Command};

/// 构建脚本入口：把编译器版本与目标三元组注入编译环境，组成协议模块的 ABI 指纹。
///
/// # 教案式说明（Why）
/// - 协议模块的入口点使用 Rust ABI（`&str`、`Arc<dyn Protocol>`），其布局只在
///   “同一编译器 + 同一装载器版本 + 同一目标”下稳定；手写的版本号无法表达这一点；
/// - 宿主与模块各自编译本 crate，指纹在两侧分别生成，载入时逐字节比较。
///
/// # 契约定义（What）
/// - 输出 `SPARK_PROTLOAD_RUSTC_VERSION`：`$RUSTC -V` 的首行，获取失败时为 `rustc-unknown`；
/// - 输出 `SPARK_PROTLOAD_TARGET`：Cargo 提供的 `TARGET`。
fn main() {
    let rustc = env::var("RUSTC").unwrap_or_else(|_| "rustc".to_owned());
    let version = Command::new(&rustc)
        .arg("-V")
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| {
            String::from_utf8(output.stdout)
                .ok()
                .and_then(|text| text.lines().next().map(|line| line.trim().to_owned()))
        })
        .filter(|line| !line.is_empty())
        .unwrap_or_else(|| "rustc-unknown".to_owned());
    let target = env::var("TARGET").unwrap_or_else(|_| "unknown-target".to_owned());

    println!("cargo:rustc-env=SPARK_PROTLOAD_RUSTC_VERSION={version}");
    println!("cargo:rustc-env=SPARK_PROTLOAD_TARGET={target}");
    println!("cargo:rerun-if-env-changed=RUSTC");
    println!("cargo:rerun-if-changed=build.rs");
}
